//! Backend talking to the node agent directly

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Backend, PolicyPayload};
use crate::broker::NodeConnectionBroker;
use crate::lifecycle::{LifecycleCommand, LifecycleStatus};
use crate::model::{App, PortProtocol, TrafficPolicy, Unit, UnitClass, UnitKind, UnitRef, Vnf};
use crate::policy::to_wire_policy;
use crate::proto::eva;
use crate::{Error, Result};

/// Deploys units through the node's EVA surface and pushes policies to its
/// ELA surface. Each call opens its own connection and closes it on return.
pub struct NativeBackend {
    broker: Arc<NodeConnectionBroker>,
}

impl NativeBackend {
    /// Backend using `broker` to reach nodes
    pub fn new(broker: Arc<NodeConnectionBroker>) -> Self {
        Self { broker }
    }

    pub(super) async fn push_policy(
        &self,
        node_id: &str,
        unit: UnitRef<'_>,
        policy: Option<&TrafficPolicy>,
    ) -> Result<()> {
        let wire = to_wire_policy(unit.id, policy)?;
        let mut clients = self.broker.connect_ela(node_id).await?;
        let result = clients.app_policy.set(wire).await;
        result.map_err(|s| {
            Error::from_status(format!("set policy of {unit} on node {node_id}"), s)
        })?;
        Ok(())
    }
}

#[async_trait]
impl Backend for NativeBackend {
    async fn deploy(&self, node_id: &str, unit: &Unit) -> Result<()> {
        let mut clients = self.broker.connect_eva(node_id).await?;
        let context = || format!("deploy {} on node {node_id}", unit.unit_ref());
        let result = match (unit, unit.kind()) {
            (Unit::App(app), UnitKind::Container) => {
                clients.app_deploy.deploy_container(app_to_wire(app)).await
            }
            (Unit::App(app), UnitKind::Vm) => clients.app_deploy.deploy_vm(app_to_wire(app)).await,
            (Unit::Vnf(vnf), UnitKind::Container) => {
                clients.vnf_deploy.deploy_container(vnf_to_wire(vnf)).await
            }
            (Unit::Vnf(vnf), UnitKind::Vm) => clients.vnf_deploy.deploy_vm(vnf_to_wire(vnf)).await,
        };
        result.map_err(|s| Error::from_status(context(), s))?;
        Ok(())
    }

    async fn redeploy(&self, node_id: &str, unit: &Unit) -> Result<()> {
        let mut clients = self.broker.connect_eva(node_id).await?;
        let result = match unit {
            Unit::App(app) => clients.app_deploy.redeploy(app_to_wire(app)).await,
            Unit::Vnf(vnf) => clients.vnf_deploy.redeploy(vnf_to_wire(vnf)).await,
        };
        result.map_err(|s| {
            Error::from_status(format!("redeploy {} on node {node_id}", unit.unit_ref()), s)
        })?;
        Ok(())
    }

    async fn run_command(
        &self,
        node_id: &str,
        unit: UnitRef<'_>,
        cmd: LifecycleCommand,
    ) -> Result<()> {
        let mut clients = self.broker.connect_eva(node_id).await?;
        let request = eva::LifecycleCommand {
            id: unit.id.to_string(),
            cmd: cmd.to_wire() as i32,
        };
        let result = match (unit.class, cmd) {
            (UnitClass::App, LifecycleCommand::Start) => clients.app_lifecycle.start(request).await,
            (UnitClass::App, LifecycleCommand::Stop) => clients.app_lifecycle.stop(request).await,
            (UnitClass::App, LifecycleCommand::Restart) => {
                clients.app_lifecycle.restart(request).await
            }
            (UnitClass::Vnf, LifecycleCommand::Start) => clients.vnf_lifecycle.start(request).await,
            (UnitClass::Vnf, LifecycleCommand::Stop) => clients.vnf_lifecycle.stop(request).await,
            (UnitClass::Vnf, LifecycleCommand::Restart) => {
                clients.vnf_lifecycle.restart(request).await
            }
        };
        result.map_err(|s| Error::from_status(format!("{cmd} {unit} on node {node_id}"), s))?;
        Ok(())
    }

    async fn status(&self, node_id: &str, unit: UnitRef<'_>) -> Result<LifecycleStatus> {
        let mut clients = self.broker.connect_eva(node_id).await?;
        let id = unit.id.to_string();
        let result = match unit.class {
            UnitClass::App => {
                clients
                    .app_deploy
                    .get_status(eva::ApplicationId { id })
                    .await
            }
            UnitClass::Vnf => clients.vnf_deploy.get_status(eva::VnfId { id }).await,
        };
        let response = result.map_err(|s| {
            Error::from_status(format!("get status of {unit} on node {node_id}"), s)
        })?;
        let status = LifecycleStatus::from_wire(response.into_inner().status());
        debug!(unit = %unit, status = %status, "Node reported status");
        Ok(status)
    }

    /// The node drops the unit's traffic policy together with the unit
    async fn undeploy(&self, node_id: &str, unit: UnitRef<'_>) -> Result<()> {
        let mut clients = self.broker.connect_eva(node_id).await?;
        let id = unit.id.to_string();
        let result = match unit.class {
            UnitClass::App => clients.app_deploy.undeploy(eva::ApplicationId { id }).await,
            UnitClass::Vnf => clients.vnf_deploy.undeploy(eva::VnfId { id }).await,
        };
        result.map_err(|s| Error::from_status(format!("undeploy {unit} on node {node_id}"), s))?;
        Ok(())
    }

    async fn set_policy(
        &self,
        node_id: &str,
        unit: UnitRef<'_>,
        policy: &PolicyPayload,
    ) -> Result<()> {
        match policy {
            PolicyPayload::Native(policy) => self.push_policy(node_id, unit, Some(policy)).await,
            PolicyPayload::KubeOvn(_) => Err(Error::validation(
                "kube-ovn policies cannot be pushed to a node",
            )),
        }
    }

    async fn delete_policy(&self, node_id: &str, unit: UnitRef<'_>) -> Result<()> {
        self.push_policy(node_id, unit, None).await
    }
}

/// `all` has no wire value and is sent as an empty protocol
fn wire_protocol(protocol: PortProtocol) -> String {
    match protocol {
        PortProtocol::All => String::new(),
        other => other.as_str().to_string(),
    }
}

fn app_to_wire(app: &App) -> eva::Application {
    eva::Application {
        id: app.id.clone(),
        name: app.name.clone(),
        version: app.version.clone(),
        vendor: app.vendor.clone(),
        description: app.description.clone(),
        cores: app.cores as i32,
        memory: app.memory as i32,
        ports: app
            .ports
            .iter()
            .map(|p| eva::PortProto {
                port: p.port,
                protocol: wire_protocol(p.protocol),
            })
            .collect(),
        source: app.source.clone(),
    }
}

fn vnf_to_wire(vnf: &Vnf) -> eva::Vnf {
    eva::Vnf {
        id: vnf.id.clone(),
        name: vnf.name.clone(),
        version: vnf.version.clone(),
        vendor: vnf.vendor.clone(),
        description: vnf.description.clone(),
        cores: vnf.cores as i32,
        memory: vnf.memory as i32,
        source: vnf.source.clone(),
    }
}

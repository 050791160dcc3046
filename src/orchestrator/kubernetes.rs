//! Backend deploying units as Kubernetes Deployments
//!
//! Object names are derived from the unit ID and the node serial so that
//! the same unit on two nodes never collides:
//!
//! - Deployment `deploy-<unit>-<serial>`
//! - container `pod-<unit>-<serial>`
//! - pod label `app=app-<unit>-<serial>`
//! - NetworkPolicy `np-<unit>-<serial>`
//!
//! Deployments are created with zero replicas; start and stop scale them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, Node as KubeNode, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecurityContext,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use super::{Backend, NativeBackend, PolicyPayload};
use crate::broker::NodeDirectory;
use crate::lifecycle::{LifecycleCommand, LifecycleStatus};
use crate::model::{PortProtocol, Unit, UnitKind, UnitRef};
use crate::policy::to_network_policy;
use crate::{Error, Result};

/// Field manager used for server-side apply
const FIELD_MANAGER: &str = "edgectl";

/// Label carrying the edge node ID, on cluster nodes and on Deployments
pub const NODE_ID_LABEL: &str = "node-id";

/// Label carrying the unit ID
pub const APP_ID_LABEL: &str = "app-id";

/// Label selecting a unit's pods
pub const APP_LABEL: &str = "app";

// =============================================================================
// Object naming
// =============================================================================

/// Deployment name for a unit on a node
pub fn deployment_name(unit_id: &str, serial: &str) -> String {
    format!("deploy-{unit_id}-{serial}")
}

/// Container name for a unit on a node
pub fn container_name(unit_id: &str, serial: &str) -> String {
    format!("pod-{unit_id}-{serial}")
}

/// Value of the `app` pod label for a unit on a node
pub fn app_label(unit_id: &str, serial: &str) -> String {
    format!("app-{unit_id}-{serial}")
}

/// NetworkPolicy name for a unit on a node
pub fn network_policy_name(unit_id: &str, serial: &str) -> String {
    format!("np-{unit_id}-{serial}")
}

// =============================================================================
// Kubernetes API seam
// =============================================================================

/// Kubernetes operations the backend needs, scoped to one namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Number of cluster nodes labelled with `node-id=<node_id>`
    async fn count_nodes(&self, node_id: &str) -> Result<usize>;

    /// Create a Deployment. An existing one is a FailedPrecondition.
    async fn create_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Create or replace a Deployment
    async fn apply_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Fetch a Deployment, `None` if absent
    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>>;

    /// Set the replica count of a Deployment
    async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<()>;

    /// Delete a Deployment and its pods. Returns false if it did not exist.
    async fn delete_deployment(&self, name: &str) -> Result<bool>;

    /// Create or replace a NetworkPolicy
    async fn apply_network_policy(&self, policy: &NetworkPolicy) -> Result<()>;

    /// Delete a NetworkPolicy. Returns false if it did not exist.
    async fn delete_network_policy(&self, name: &str) -> Result<bool>;
}

/// [`KubeClient`] backed by the API server
pub struct KubeClientImpl {
    client: Client,
    namespace: String,
}

impl KubeClientImpl {
    /// Wrap `client`, operating in `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn network_policies(&self) -> Api<NetworkPolicy> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}

fn object_name<K: kube::Resource>(object: &K) -> Result<&str> {
    object
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::internal("object has no name"))
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn count_nodes(&self, node_id: &str) -> Result<usize> {
        let api: Api<KubeNode> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&format!("{NODE_ID_LABEL}={node_id}"));
        let nodes = api
            .list(&params)
            .await
            .map_err(|e| Error::kube(format!("list cluster nodes for {node_id}"), e))?;
        Ok(nodes.items.len())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        let name = object_name(deployment)?;
        match self
            .deployments()
            .create(&PostParams::default(), deployment)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Err(Error::failed_precondition(format!(
                "deployment {name} already exists"
            ))),
            Err(e) => Err(Error::kube(format!("create deployment {name}"), e)),
        }
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<()> {
        let name = object_name(deployment)?;
        self.deployments()
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(deployment),
            )
            .await
            .map_err(|e| Error::kube(format!("apply deployment {name}"), e))?;
        Ok(())
    }

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>> {
        self.deployments()
            .get_opt(name)
            .await
            .map_err(|e| Error::kube(format!("get deployment {name}"), e))
    }

    async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<()> {
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        self.deployments()
            .patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::kube(format!("scale deployment {name} to {replicas}"), e))?;
        Ok(())
    }

    async fn delete_deployment(&self, name: &str) -> Result<bool> {
        match self
            .deployments()
            .delete(name, &DeleteParams::foreground())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(Error::kube(format!("delete deployment {name}"), e)),
        }
    }

    async fn apply_network_policy(&self, policy: &NetworkPolicy) -> Result<()> {
        let name = object_name(policy)?;
        self.network_policies()
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(policy),
            )
            .await
            .map_err(|e| Error::kube(format!("apply network policy {name}"), e))?;
        Ok(())
    }

    async fn delete_network_policy(&self, name: &str) -> Result<bool> {
        match self
            .network_policies()
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(Error::kube(format!("delete network policy {name}"), e)),
        }
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Where a Kubernetes-mode backend sends unit traffic policies
pub enum PolicyRoute {
    /// Push to the node's ELA surface, as in native mode
    Node(NativeBackend),
    /// Translate into a NetworkPolicy selecting the unit's pods
    NetworkPolicy,
}

/// Runs units as Deployments pinned to the edge node's cluster node
pub struct KubernetesBackend {
    kube: Arc<dyn KubeClient>,
    directory: Arc<dyn NodeDirectory>,
    namespace: String,
    image_pull_policy: String,
    policy_route: PolicyRoute,
}

impl KubernetesBackend {
    /// Create a backend operating in `namespace`
    pub fn new(
        kube: Arc<dyn KubeClient>,
        directory: Arc<dyn NodeDirectory>,
        namespace: String,
        image_pull_policy: String,
        policy_route: PolicyRoute,
    ) -> Self {
        Self {
            kube,
            directory,
            namespace,
            image_pull_policy,
            policy_route,
        }
    }

    async fn serial(&self, node_id: &str) -> Result<String> {
        self.directory
            .node(node_id)
            .await?
            .map(|node| node.serial)
            .ok_or_else(|| Error::not_found(format!("node {node_id}")))
    }

    /// The unit's Deployment; missing is NotFound
    async fn existing_deployment(&self, name: &str, unit: UnitRef<'_>) -> Result<Deployment> {
        self.kube
            .get_deployment(name)
            .await?
            .ok_or_else(|| Error::not_found(format!("deployment {name} for {unit}")))
    }

    /// Build the Deployment for `unit` on the node with `serial`
    pub fn build_deployment(
        &self,
        node_id: &str,
        serial: &str,
        unit: &Unit,
        replicas: i32,
    ) -> Result<Deployment> {
        if unit.kind() == UnitKind::Vm {
            return Err(Error::validation(format!(
                "{} cannot be deployed to Kubernetes: VM units are not supported",
                unit.unit_ref()
            )));
        }

        let unit_id = unit.id();
        let labels = BTreeMap::from([
            (NODE_ID_LABEL.to_string(), node_id.to_string()),
            (APP_ID_LABEL.to_string(), unit_id.to_string()),
            (APP_LABEL.to_string(), app_label(unit_id, serial)),
        ]);

        let ports = unit
            .ports()
            .iter()
            .map(|p| {
                let protocol = match p.protocol {
                    PortProtocol::Tcp => "TCP",
                    PortProtocol::Udp => "UDP",
                    PortProtocol::Sctp => "SCTP",
                    other => {
                        return Err(Error::validation(format!(
                            "ports: protocol {} is not supported by Kubernetes",
                            other.as_str()
                        )))
                    }
                };
                Ok(ContainerPort {
                    container_port: p.port as i32,
                    protocol: Some(protocol.to_string()),
                    ..Default::default()
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let limits = BTreeMap::from([
            ("cpu".to_string(), Quantity(unit.cores().to_string())),
            ("memory".to_string(), Quantity(format!("{}Mi", unit.memory()))),
        ]);

        let container = Container {
            name: container_name(unit_id, serial),
            image: Some(unit_id.to_string()),
            image_pull_policy: Some(self.image_pull_policy.clone()),
            ports: (!ports.is_empty()).then_some(ports),
            resources: Some(ResourceRequirements {
                limits: Some(limits),
                ..Default::default()
            }),
            security_context: Some(SecurityContext {
                capabilities: Some(Capabilities {
                    add: Some(vec!["NET_ADMIN".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(Deployment {
            metadata: ObjectMeta {
                name: Some(deployment_name(unit_id, serial)),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                strategy: Some(DeploymentStrategy {
                    type_: Some("Recreate".to_string()),
                    ..Default::default()
                }),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        node_selector: Some(BTreeMap::from([(
                            NODE_ID_LABEL.to_string(),
                            node_id.to_string(),
                        )])),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

/// Run state implied by a Deployment's desired replicas
fn replica_state(deployment: &Deployment) -> LifecycleStatus {
    let replicas = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    if replicas > 0 {
        LifecycleStatus::Running
    } else {
        LifecycleStatus::Stopped
    }
}

#[async_trait]
impl Backend for KubernetesBackend {
    async fn deploy(&self, node_id: &str, unit: &Unit) -> Result<()> {
        let serial = self.serial(node_id).await?;
        let deployment = self.build_deployment(node_id, &serial, unit, 0)?;

        match self.kube.count_nodes(node_id).await? {
            1 => {}
            0 => {
                return Err(Error::not_found(format!(
                    "no cluster node labelled {NODE_ID_LABEL}={node_id}"
                )))
            }
            n => {
                return Err(Error::failed_precondition(format!(
                    "{n} cluster nodes labelled {NODE_ID_LABEL}={node_id}, expected exactly one"
                )))
            }
        }

        self.kube.create_deployment(&deployment).await?;
        debug!(deployment = %deployment_name(unit.id(), &serial), "Deployment created");
        Ok(())
    }

    async fn redeploy(&self, node_id: &str, unit: &Unit) -> Result<()> {
        let serial = self.serial(node_id).await?;
        let name = deployment_name(unit.id(), &serial);
        let current = self.existing_deployment(&name, unit.unit_ref()).await?;
        let replicas = current.spec.and_then(|s| s.replicas).unwrap_or(0);

        let deployment = self.build_deployment(node_id, &serial, unit, replicas)?;
        self.kube.apply_deployment(&deployment).await
    }

    async fn run_command(
        &self,
        node_id: &str,
        unit: UnitRef<'_>,
        cmd: LifecycleCommand,
    ) -> Result<()> {
        let serial = self.serial(node_id).await?;
        let name = deployment_name(unit.id, &serial);
        let deployment = self.existing_deployment(&name, unit).await?;
        cmd.check(replica_state(&deployment))?;

        match cmd {
            LifecycleCommand::Start => self.kube.scale_deployment(&name, 1).await,
            LifecycleCommand::Stop => self.kube.scale_deployment(&name, 0).await,
            LifecycleCommand::Restart => {
                self.kube.scale_deployment(&name, 0).await?;
                self.kube.scale_deployment(&name, 1).await
            }
        }
    }

    async fn status(&self, node_id: &str, unit: UnitRef<'_>) -> Result<LifecycleStatus> {
        let serial = self.serial(node_id).await?;
        let name = deployment_name(unit.id, &serial);
        let deployment = self.existing_deployment(&name, unit).await?;
        let conditions = deployment
            .status
            .and_then(|s| s.conditions)
            .unwrap_or_default();
        Ok(LifecycleStatus::from_deployment_conditions(&conditions))
    }

    async fn undeploy(&self, node_id: &str, unit: UnitRef<'_>) -> Result<()> {
        let serial = self.serial(node_id).await?;
        let name = deployment_name(unit.id, &serial);
        if !self.kube.delete_deployment(&name).await? {
            return Err(Error::not_found(format!("deployment {name} for {unit}")));
        }
        info!(deployment = %name, "Deployment deleted");
        self.delete_policy(node_id, unit).await
    }

    async fn set_policy(
        &self,
        node_id: &str,
        unit: UnitRef<'_>,
        policy: &PolicyPayload,
    ) -> Result<()> {
        match (&self.policy_route, policy) {
            (PolicyRoute::Node(native), _) => native.set_policy(node_id, unit, policy).await,
            (PolicyRoute::NetworkPolicy, PolicyPayload::KubeOvn(policy)) => {
                let serial = self.serial(node_id).await?;
                let selector =
                    BTreeMap::from([(APP_LABEL.to_string(), app_label(unit.id, &serial))]);
                let network_policy = to_network_policy(
                    policy,
                    &network_policy_name(unit.id, &serial),
                    &self.namespace,
                    &selector,
                )?;
                self.kube.apply_network_policy(&network_policy).await
            }
            (PolicyRoute::NetworkPolicy, PolicyPayload::Native(_)) => Err(Error::validation(
                "native policies cannot be enforced as NetworkPolicies",
            )),
        }
    }

    async fn delete_policy(&self, node_id: &str, unit: UnitRef<'_>) -> Result<()> {
        match &self.policy_route {
            PolicyRoute::Node(native) => native.delete_policy(node_id, unit).await,
            PolicyRoute::NetworkPolicy => {
                let serial = self.serial(node_id).await?;
                let name = network_policy_name(unit.id, &serial);
                if !self.kube.delete_network_policy(&name).await? {
                    debug!(network_policy = %name, "No network policy to delete");
                }
                Ok(())
            }
        }
    }
}

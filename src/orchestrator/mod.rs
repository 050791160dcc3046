//! Deployment orchestration
//!
//! [`Orchestrator`] is the entry point for every unit lifecycle and policy
//! operation. The orchestration mode is looked at exactly once, in
//! [`Orchestrator::new`], which picks the [`Backend`] that executes all
//! later calls:
//!
//! | Mode | Units | App policies | Interface policies |
//! |---|---|---|---|
//! | native | node EVA surface | node ELA surface | node ELA surface |
//! | kubernetes | Deployments | node ELA surface | node ELA surface |
//! | kubernetes-ovn | Deployments | NetworkPolicies | rejected |
//!
//! Every call runs under the deadline of its [`RequestContext`]. Units and
//! policies are validated before any backend is contacted. Nothing is
//! retried.

pub mod kubernetes;
mod native;
mod node_config;

pub use kubernetes::{KubeClient, KubeClientImpl, KubernetesBackend, PolicyRoute};
pub use native::NativeBackend;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::broker::NodeConnectionBroker;
use crate::config::{ControllerConfig, OrchestrationMode};
use crate::lifecycle::{LifecycleCommand, LifecycleStatus};
use crate::model::{Entity, TrafficPolicy, TrafficPolicyKubeOvn, Unit, UnitRef};
use crate::{Error, Result};

/// Traffic policy attached to a unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyPayload {
    /// Enforced by the node
    Native(TrafficPolicy),
    /// Enforced by a Kubernetes NetworkPolicy
    KubeOvn(TrafficPolicyKubeOvn),
}

impl PolicyPayload {
    /// Validate the wrapped policy
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Native(policy) => policy.validate(),
            Self::KubeOvn(policy) => policy.validate(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Native(_) => "native",
            Self::KubeOvn(_) => "kube-ovn",
        }
    }
}

/// Operations every orchestration backend implements.
///
/// Inputs have already been validated by the [`Orchestrator`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Create the unit on the node without starting it
    async fn deploy(&self, node_id: &str, unit: &Unit) -> Result<()>;

    /// Replace the unit definition, keeping its run state
    async fn redeploy(&self, node_id: &str, unit: &Unit) -> Result<()>;

    /// Start, stop or restart the unit
    async fn run_command(
        &self,
        node_id: &str,
        unit: UnitRef<'_>,
        cmd: LifecycleCommand,
    ) -> Result<()>;

    /// Current status of the unit
    async fn status(&self, node_id: &str, unit: UnitRef<'_>) -> Result<LifecycleStatus>;

    /// Remove the unit and any policy attached to it
    async fn undeploy(&self, node_id: &str, unit: UnitRef<'_>) -> Result<()>;

    /// Replace the unit's traffic policy
    async fn set_policy(
        &self,
        node_id: &str,
        unit: UnitRef<'_>,
        policy: &PolicyPayload,
    ) -> Result<()>;

    /// Remove the unit's traffic policy. Removing a missing policy succeeds.
    async fn delete_policy(&self, node_id: &str, unit: UnitRef<'_>) -> Result<()>;
}

/// Deadline shared by every call made for one request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestContext {
    deadline: Instant,
}

impl RequestContext {
    /// Context expiring `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    /// Context expiring at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline }
    }

    /// When the request expires
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Run `fut`, failing with `DeadlineExceeded` once the deadline passes
    pub async fn run<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout_at(self.deadline, fut)
            .await
            .map_err(|_| Error::deadline_exceeded(operation.to_string()))?
    }
}

/// Lifecycle and policy operations for units on edge nodes
pub struct Orchestrator {
    mode: OrchestrationMode,
    backend: Arc<dyn Backend>,
    broker: Arc<NodeConnectionBroker>,
}

impl Orchestrator {
    /// Select the backend for `config.orchestration_mode`.
    ///
    /// The Kubernetes modes need `kube`; native mode ignores it.
    pub fn new(
        config: &ControllerConfig,
        broker: Arc<NodeConnectionBroker>,
        kube: Option<Arc<dyn KubeClient>>,
    ) -> Result<Self> {
        let mode = config.orchestration_mode;
        let backend: Arc<dyn Backend> = match mode {
            OrchestrationMode::Native => Arc::new(NativeBackend::new(Arc::clone(&broker))),
            OrchestrationMode::Kubernetes | OrchestrationMode::KubernetesOvn => {
                let kube = kube.ok_or_else(|| {
                    Error::validation(format!(
                        "orchestration mode {mode:?} requires a Kubernetes client"
                    ))
                })?;
                let route = if mode == OrchestrationMode::KubernetesOvn {
                    PolicyRoute::NetworkPolicy
                } else {
                    PolicyRoute::Node(NativeBackend::new(Arc::clone(&broker)))
                };
                Arc::new(KubernetesBackend::new(
                    kube,
                    Arc::clone(broker.directory()),
                    config.namespace.clone(),
                    config.image_pull_policy.clone(),
                    route,
                ))
            }
        };
        info!(mode = ?mode, "Orchestrator configured");
        Ok(Self::with_backend(mode, broker, backend))
    }

    /// Orchestrator driving a caller-supplied backend
    pub fn with_backend(
        mode: OrchestrationMode,
        broker: Arc<NodeConnectionBroker>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            mode,
            backend,
            broker,
        }
    }

    /// Mode fixed at construction
    pub fn mode(&self) -> OrchestrationMode {
        self.mode
    }

    /// Broker used for node-side operations
    pub fn broker(&self) -> &Arc<NodeConnectionBroker> {
        &self.broker
    }

    /// Deploy a unit. Succeeds with `Deployed`.
    #[instrument(skip(self, ctx, unit), fields(unit_id = %unit.id(), class = %unit.class()))]
    pub async fn deploy(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        unit: &Unit,
    ) -> Result<LifecycleStatus> {
        unit.validate()?;
        info!(status = %LifecycleStatus::Deploying, "Deploying unit");
        ctx.run("deploy", self.backend.deploy(node_id, unit)).await?;
        info!(status = %LifecycleStatus::Deployed, "Unit deployed");
        Ok(LifecycleStatus::Deployed)
    }

    /// Replace a deployed unit's definition
    #[instrument(skip(self, ctx, unit), fields(unit_id = %unit.id(), class = %unit.class()))]
    pub async fn redeploy(&self, ctx: &RequestContext, node_id: &str, unit: &Unit) -> Result<()> {
        unit.validate()?;
        ctx.run("redeploy", self.backend.redeploy(node_id, unit))
            .await?;
        info!("Unit redeployed");
        Ok(())
    }

    /// Start a deployed or stopped unit
    pub async fn start(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        unit: UnitRef<'_>,
    ) -> Result<LifecycleStatus> {
        self.command(ctx, node_id, unit, LifecycleCommand::Start)
            .await
    }

    /// Stop a running unit
    pub async fn stop(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        unit: UnitRef<'_>,
    ) -> Result<LifecycleStatus> {
        self.command(ctx, node_id, unit, LifecycleCommand::Stop)
            .await
    }

    /// Restart a running unit
    pub async fn restart(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        unit: UnitRef<'_>,
    ) -> Result<LifecycleStatus> {
        self.command(ctx, node_id, unit, LifecycleCommand::Restart)
            .await
    }

    /// Run a lifecycle command, returning the state it leads to
    #[instrument(skip(self, ctx), fields(unit = %unit))]
    pub async fn command(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        unit: UnitRef<'_>,
        cmd: LifecycleCommand,
    ) -> Result<LifecycleStatus> {
        require_unit_id(unit)?;
        info!(status = %cmd.transient(), "Lifecycle command issued");
        ctx.run(cmd.as_str(), self.backend.run_command(node_id, unit, cmd))
            .await?;
        info!(status = %cmd.target(), "Lifecycle command completed");
        Ok(cmd.target())
    }

    /// Current status of a unit
    #[instrument(skip(self, ctx), fields(unit = %unit))]
    pub async fn status(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        unit: UnitRef<'_>,
    ) -> Result<LifecycleStatus> {
        require_unit_id(unit)?;
        ctx.run("get status", self.backend.status(node_id, unit))
            .await
    }

    /// Remove a unit and its policy
    #[instrument(skip(self, ctx), fields(unit = %unit))]
    pub async fn undeploy(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        unit: UnitRef<'_>,
    ) -> Result<()> {
        require_unit_id(unit)?;
        ctx.run("undeploy", self.backend.undeploy(node_id, unit))
            .await?;
        info!("Unit undeployed");
        Ok(())
    }

    /// Replace the traffic policy of a unit
    #[instrument(skip(self, ctx, policy), fields(unit = %unit, policy_kind = policy.kind()))]
    pub async fn set_policy(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        unit: UnitRef<'_>,
        policy: &PolicyPayload,
    ) -> Result<()> {
        require_unit_id(unit)?;
        self.check_payload(policy)?;
        policy.validate()?;
        ctx.run("set policy", self.backend.set_policy(node_id, unit, policy))
            .await?;
        info!("Traffic policy applied");
        Ok(())
    }

    /// Remove the traffic policy of a unit
    #[instrument(skip(self, ctx), fields(unit = %unit))]
    pub async fn delete_policy(
        &self,
        ctx: &RequestContext,
        node_id: &str,
        unit: UnitRef<'_>,
    ) -> Result<()> {
        require_unit_id(unit)?;
        ctx.run("delete policy", self.backend.delete_policy(node_id, unit))
            .await?;
        info!("Traffic policy removed");
        Ok(())
    }

    fn check_payload(&self, policy: &PolicyPayload) -> Result<()> {
        let expected = match self.mode {
            OrchestrationMode::KubernetesOvn => "kube-ovn",
            OrchestrationMode::Native | OrchestrationMode::Kubernetes => "native",
        };
        if policy.kind() != expected {
            return Err(Error::validation(format!(
                "{} policy cannot be applied in {:?} mode",
                policy.kind(),
                self.mode
            )));
        }
        Ok(())
    }
}

fn require_unit_id(unit: UnitRef<'_>) -> Result<()> {
    if unit.id.is_empty() {
        return Err(Error::validation(format!("{} id cannot be empty", unit.class)));
    }
    Ok(())
}

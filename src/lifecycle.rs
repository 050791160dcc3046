//! Lifecycle status vocabulary shared by every orchestration backend
//!
//! Nodes report status in their own wire enum and Kubernetes reports it as
//! Deployment conditions; both are normalized into [`LifecycleStatus`] here.
//! [`LifecycleCommand`] carries the start/stop/restart preconditions so the
//! backends agree on which transitions are legal.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::apps::v1::DeploymentCondition;
use serde::{Deserialize, Serialize};

use crate::proto::eva;
use crate::{Error, Result};

/// Observable state of a unit deployed on a node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// State could not be determined
    #[default]
    Unknown,
    /// Deployment accepted but not yet complete
    Deploying,
    /// Deployed and ready to start
    Deployed,
    /// Start in progress
    Starting,
    /// Running
    Running,
    /// Stop in progress
    Stopping,
    /// Stopped
    Stopped,
    /// Failed
    Error,
}

impl LifecycleStatus {
    /// Lowercase name used in logs and on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Normalize a node-reported status.
    ///
    /// The node calls a freshly deployed unit `READY`; the controller calls
    /// it [`LifecycleStatus::Deployed`].
    pub fn from_wire(status: eva::lifecycle_status::Status) -> Self {
        use eva::lifecycle_status::Status;
        match status {
            Status::Unknown => Self::Unknown,
            Status::Ready => Self::Deployed,
            Status::Starting => Self::Starting,
            Status::Running => Self::Running,
            Status::Stopping => Self::Stopping,
            Status::Stopped => Self::Stopped,
            Status::Error => Self::Error,
        }
    }

    /// Inverse of [`LifecycleStatus::from_wire`]. `Deploying` has no wire
    /// counterpart and is reported as `UNKNOWN`.
    pub fn to_wire(self) -> eva::lifecycle_status::Status {
        use eva::lifecycle_status::Status;
        match self {
            Self::Unknown | Self::Deploying => Status::Unknown,
            Self::Deployed => Status::Ready,
            Self::Starting => Status::Starting,
            Self::Running => Status::Running,
            Self::Stopping => Status::Stopping,
            Self::Stopped => Status::Stopped,
            Self::Error => Status::Error,
        }
    }

    /// Derive a status from Kubernetes Deployment conditions.
    ///
    /// Only conditions whose status is `"True"` count. The most recently
    /// updated one decides: `Available` is Deployed, `Progressing` is
    /// Deploying, `ReplicaFailure` is Error and anything else is Unknown.
    /// With no true condition at all the unit is Stopped.
    pub fn from_deployment_conditions(conditions: &[DeploymentCondition]) -> Self {
        let mut active: Vec<&DeploymentCondition> =
            conditions.iter().filter(|c| c.status == "True").collect();
        // Newest first; conditions without a timestamp sort last
        active.sort_by(|a, b| {
            let a = a.last_update_time.as_ref().map(|t| t.0);
            let b = b.last_update_time.as_ref().map(|t| t.0);
            b.cmp(&a)
        });

        match active.first() {
            None => Self::Stopped,
            Some(latest) => match latest.type_.as_str() {
                "Available" => Self::Deployed,
                "Progressing" => Self::Deploying,
                "ReplicaFailure" => Self::Error,
                _ => Self::Unknown,
            },
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command changing the run state of a deployed unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleCommand {
    /// Deployed/Stopped -> Running
    Start,
    /// Running -> Stopped
    Stop,
    /// Running -> Running
    Restart,
}

impl LifecycleCommand {
    /// Lowercase command name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    /// Reject the command when `current` does not allow it
    pub fn check(self, current: LifecycleStatus) -> Result<()> {
        let allowed = match self {
            Self::Start => matches!(
                current,
                LifecycleStatus::Deployed | LifecycleStatus::Stopped
            ),
            Self::Stop | Self::Restart => current == LifecycleStatus::Running,
        };
        if allowed {
            return Ok(());
        }

        let expected = match self {
            Self::Start => "not stopped or deployed",
            Self::Stop | Self::Restart => "not running",
        };
        Err(Error::failed_precondition(format!(
            "cannot {} unit: {expected} (status: {current})",
            self.as_str()
        )))
    }

    /// State reported while the command is in flight
    pub fn transient(self) -> LifecycleStatus {
        match self {
            Self::Start | Self::Restart => LifecycleStatus::Starting,
            Self::Stop => LifecycleStatus::Stopping,
        }
    }

    /// State once the command has completed
    pub fn target(self) -> LifecycleStatus {
        match self {
            Self::Start | Self::Restart => LifecycleStatus::Running,
            Self::Stop => LifecycleStatus::Stopped,
        }
    }

    /// Wire representation sent to the node
    pub fn to_wire(self) -> eva::lifecycle_command::Command {
        use eva::lifecycle_command::Command;
        match self {
            Self::Start => Command::Start,
            Self::Stop => Command::Stop,
            Self::Restart => Command::Restart,
        }
    }
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Err(Error::validation("cmd missing")),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(Error::validation(format!(
                "cmd must be one of [start, stop, restart], got {other:?}"
            ))),
        }
    }
}

//! Controller configuration
//!
//! Loaded from an optional YAML file and then overridden by command-line
//! flags and `EDGECTL_*` environment variables (see `main.rs`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, DEFAULT_ELA_PORT, DEFAULT_EVA_PORT};

/// Where workloads run and how their traffic policies are enforced
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OrchestrationMode {
    /// Units and policies are pushed to the node agent
    #[default]
    Native,
    /// Units run as Kubernetes Deployments; policies still go to the node
    Kubernetes,
    /// Units run as Kubernetes Deployments; policies become NetworkPolicies
    KubernetesOvn,
}

impl OrchestrationMode {
    /// True for the modes that deploy through the Kubernetes API
    pub fn uses_kubernetes(self) -> bool {
        matches!(self, Self::Kubernetes | Self::KubernetesOvn)
    }
}

/// Controller settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Orchestration mode, fixed for the lifetime of the process
    pub orchestration_mode: OrchestrationMode,
    /// Node ELA port, defaults to [`DEFAULT_ELA_PORT`]
    pub ela_port: Option<u16>,
    /// Node EVA port, defaults to [`DEFAULT_EVA_PORT`]
    pub eva_port: Option<u16>,
    /// CA directory
    pub ca_dir: PathBuf,
    /// Namespace for Kubernetes objects
    pub namespace: String,
    /// Pull policy for unit images in the Kubernetes modes
    pub image_pull_policy: String,
    /// Deadline applied to every orchestration request, in seconds
    pub request_timeout_secs: u64,
    /// Connect timeout when dialing a node, in seconds
    pub dial_timeout_secs: u64,
    /// Dial nodes without TLS
    pub insecure: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            orchestration_mode: OrchestrationMode::default(),
            ela_port: None,
            eva_port: None,
            ca_dir: PathBuf::from("/etc/edgectl/ca"),
            namespace: "default".to_string(),
            image_pull_policy: "Never".to_string(),
            request_timeout_secs: 30,
            dial_timeout_secs: 2,
            insecure: false,
        }
    }
}

impl ControllerConfig {
    /// Read a YAML config file; absent keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse YAML; absent keys keep their defaults
    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Effective ELA port
    pub fn ela_port(&self) -> u16 {
        self.ela_port.unwrap_or(DEFAULT_ELA_PORT)
    }

    /// Effective EVA port
    pub fn eva_port(&self) -> u16 {
        self.eva_port.unwrap_or(DEFAULT_EVA_PORT)
    }

    /// Per-request deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Node connect timeout
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

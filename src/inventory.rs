//! File-backed inventory
//!
//! A YAML document listing tagged [`Record`]s stands in for the
//! persistence service: it answers node lookups for the broker and holds
//! the units, policies and DNS configurations the CLI operates on.
//!
//! ```yaml
//! records:
//!   - kind: node
//!     id: 0b8a4f3e-5c2d-4e1f-9a8b-7c6d5e4f3a2b
//!     name: edge-1
//!     location: rack 4
//!     serial: ABC123
//!   - kind: grpc_target
//!     id: 9e8d7c6b-5a4f-4e3d-8c2b-1a0f9e8d7c6b
//!     node_id: 0b8a4f3e-5c2d-4e1f-9a8b-7c6d5e4f3a2b
//!     grpc_target: 192.168.1.10
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::broker::NodeDirectory;
use crate::model::{
    App, DnsAppAlias, DnsConfig, Entity, Node, Record, TrafficPolicy, TrafficPolicyKubeOvn, Unit,
    Vnf,
};
use crate::orchestrator::PolicyPayload;
use crate::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    records: Vec<Record>,
}

/// Validated, indexed set of records
#[derive(Debug, Default)]
pub struct Inventory {
    nodes: HashMap<String, Node>,
    targets: HashMap<String, Vec<String>>,
    apps: HashMap<String, App>,
    vnfs: HashMap<String, Vnf>,
    policies: HashMap<String, TrafficPolicy>,
    kube_ovn_policies: HashMap<String, TrafficPolicyKubeOvn>,
    dns_configs: HashMap<String, DnsConfig>,
    dns_aliases: Vec<DnsAppAlias>,
}

impl Inventory {
    /// Load and validate an inventory file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let inventory = Self::from_yaml(&contents)?;
        debug!(path = %path.display(), nodes = inventory.nodes.len(), "Inventory loaded");
        Ok(inventory)
    }

    /// Parse and validate an inventory document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let file: InventoryFile = serde_yaml::from_str(contents)?;
        Self::from_records(file.records)
    }

    /// Index `records`, rejecting the first invalid or duplicate one
    pub fn from_records(records: Vec<Record>) -> Result<Self> {
        let mut inventory = Self::default();
        for (i, record) in records.into_iter().enumerate() {
            record.validate().map_err(|e| match e {
                Error::Validation(msg) => Error::validation(format!(
                    "records[{i}] ({}): {msg}",
                    record.table_name()
                )),
                other => other,
            })?;
            inventory.insert(record)?;
        }
        inventory.check_aliases()?;
        Ok(inventory)
    }

    fn insert(&mut self, record: Record) -> Result<()> {
        let id = record.id().to_string();
        let table = record.table_name();
        let duplicate = match record {
            Record::Node(node) => self.nodes.insert(id.clone(), node).is_some(),
            Record::GrpcTarget(target) => {
                self.targets
                    .entry(target.node_id)
                    .or_default()
                    .push(target.grpc_target);
                false
            }
            Record::App(app) => self.apps.insert(id.clone(), app).is_some(),
            Record::Vnf(vnf) => self.vnfs.insert(id.clone(), vnf).is_some(),
            Record::TrafficPolicy(policy) => self.policies.insert(id.clone(), policy).is_some(),
            Record::KubeOvnPolicy(policy) => {
                self.kube_ovn_policies.insert(id.clone(), policy).is_some()
            }
            Record::DnsConfig(config) => self.dns_configs.insert(id.clone(), config).is_some(),
            Record::DnsAppAlias(alias) => {
                let duplicate = self.dns_aliases.iter().any(|a| a.id == id);
                if !duplicate {
                    self.dns_aliases.push(alias);
                }
                duplicate
            }
            // Associations are the controller's own bookkeeping; nothing to index
            Record::NodeApp(_) | Record::NodeVnf(_) => false,
        };
        if duplicate {
            return Err(Error::validation(format!("duplicate {table} id {id}")));
        }
        Ok(())
    }

    /// Aliases must point at a known DNS configuration and application, at
    /// most once per pair
    fn check_aliases(&self) -> Result<()> {
        for (i, alias) in self.dns_aliases.iter().enumerate() {
            if !self.dns_configs.contains_key(&alias.dns_config_id) {
                return Err(Error::validation(format!(
                    "dns alias {} references unknown dns config {}",
                    alias.id, alias.dns_config_id
                )));
            }
            if !self.apps.contains_key(&alias.app_id) {
                return Err(Error::validation(format!(
                    "dns alias {} references unknown app {}",
                    alias.id, alias.app_id
                )));
            }
            let repeated = self.dns_aliases[..i]
                .iter()
                .any(|a| a.dns_config_id == alias.dns_config_id && a.app_id == alias.app_id);
            if repeated {
                return Err(Error::validation(format!(
                    "duplicate record detected for dns_config_id {} and app_id {}",
                    alias.dns_config_id, alias.app_id
                )));
            }
        }
        Ok(())
    }

    /// Application or VNF by ID
    pub fn unit(&self, id: &str) -> Result<Unit> {
        if let Some(app) = self.apps.get(id) {
            return Ok(Unit::App(app.clone()));
        }
        self.vnfs
            .get(id)
            .map(|vnf| Unit::Vnf(vnf.clone()))
            .ok_or_else(|| Error::not_found(format!("unit {id}")))
    }

    /// Traffic policy of either kind by ID
    pub fn policy(&self, id: &str) -> Result<PolicyPayload> {
        if let Some(policy) = self.policies.get(id) {
            return Ok(PolicyPayload::Native(policy.clone()));
        }
        self.kube_ovn_policies
            .get(id)
            .map(|policy| PolicyPayload::KubeOvn(policy.clone()))
            .ok_or_else(|| Error::not_found(format!("traffic policy {id}")))
    }

    /// Native traffic policy by ID
    pub fn native_policy(&self, id: &str) -> Result<&TrafficPolicy> {
        self.policies
            .get(id)
            .ok_or_else(|| Error::not_found(format!("traffic policy {id}")))
    }

    /// DNS configuration by ID
    pub fn dns_config(&self, id: &str) -> Result<&DnsConfig> {
        self.dns_configs
            .get(id)
            .ok_or_else(|| Error::not_found(format!("dns config {id}")))
    }

    /// Application aliases of a DNS configuration, in file order
    pub fn dns_aliases(&self, config_id: &str) -> Vec<DnsAppAlias> {
        self.dns_aliases
            .iter()
            .filter(|alias| alias.dns_config_id == config_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NodeDirectory for Inventory {
    async fn grpc_targets(&self, node_id: &str) -> Result<Vec<String>> {
        Ok(self.targets.get(node_id).cloned().unwrap_or_default())
    }

    async fn node(&self, node_id: &str) -> Result<Option<Node>> {
        Ok(self.nodes.get(node_id).cloned())
    }
}

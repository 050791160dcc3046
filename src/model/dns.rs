use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::{require_non_empty, require_uuid, Entity};
use crate::{Error, Result};

/// DNS records and upstream forwarders served by a node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Config ID
    pub id: String,
    /// Config name
    pub name: String,
    /// A records
    #[serde(default)]
    pub records: Vec<DnsARecord>,
    /// Upstream resolvers
    #[serde(default)]
    pub forwarders: Vec<DnsForwarder>,
}

impl DnsConfig {
    /// Forwarder addresses in declaration order
    pub fn forwarder_ips(&self) -> Vec<String> {
        self.forwarders.iter().map(|f| f.ip.clone()).collect()
    }
}

impl Entity for DnsConfig {
    fn table_name(&self) -> &'static str {
        "dns_configs"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<()> {
        require_uuid("id", &self.id)?;
        require_non_empty("name", &self.name)?;
        if self.records.is_empty() && self.forwarders.is_empty() {
            return Err(Error::validation("records and forwarders cannot both be empty"));
        }
        for (i, record) in self.records.iter().enumerate() {
            require_non_empty(&format!("records[{i}].name"), &record.name)?;
            require_non_empty(&format!("records[{i}].description"), &record.description)?;
            if record.ips.is_empty() {
                return Err(Error::validation(format!("records[{i}].ips cannot be empty")));
            }
            for (j, ip) in record.ips.iter().enumerate() {
                require_usable_ip(&format!("records[{i}].ips[{j}]"), ip)?;
            }
        }
        for (i, forwarder) in self.forwarders.iter().enumerate() {
            require_non_empty(&format!("forwarders[{i}].name"), &forwarder.name)?;
            require_non_empty(
                &format!("forwarders[{i}].description"),
                &forwarder.description,
            )?;
            require_usable_ip(&format!("forwarders[{i}].ip"), &forwarder.ip)?;
        }
        Ok(())
    }
}

/// Application published under a DNS configuration.
///
/// The node resolves the alias itself: the pushed A record is named after
/// the application ID and carries that ID as its only value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsAppAlias {
    /// Alias ID
    pub id: String,
    /// DNS configuration the alias belongs to
    pub dns_config_id: String,
    /// Alias name
    pub name: String,
    /// Description
    pub description: String,
    /// Aliased application
    pub app_id: String,
}

impl DnsAppAlias {
    /// A record pushed to the node for this alias
    pub fn a_record(&self) -> DnsARecord {
        DnsARecord {
            name: self.app_id.clone(),
            description: self.description.clone(),
            ips: vec![self.app_id.clone()],
        }
    }
}

impl Entity for DnsAppAlias {
    fn table_name(&self) -> &'static str {
        "dns_configs_app_aliases"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<()> {
        require_uuid("id", &self.id)?;
        require_uuid("dns_config_id", &self.dns_config_id)?;
        require_non_empty("name", &self.name)?;
        require_non_empty("description", &self.description)?;
        require_uuid("app_id", &self.app_id)
    }
}

/// Name resolving to one or more addresses
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsARecord {
    /// Fully qualified name
    pub name: String,
    /// Description
    pub description: String,
    /// Addresses
    pub ips: Vec<String>,
}

/// Upstream resolver
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsForwarder {
    /// Name
    pub name: String,
    /// Description
    pub description: String,
    /// Resolver address
    pub ip: String,
}

fn require_usable_ip(field: &str, value: &str) -> Result<()> {
    let ip: IpAddr = value
        .parse()
        .map_err(|_| Error::validation(format!("{field} could not be parsed")))?;
    if ip.is_unspecified() {
        return Err(Error::validation(format!("{field} cannot be unspecified")));
    }
    Ok(())
}

//! Native traffic policy model
//!
//! Applied by the node itself, either to an application or to a network
//! interface. Rules select traffic by MAC, IP or GTP attributes and decide
//! what happens to it.

use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{nested, require_non_empty, require_range, require_uuid, Entity};
use crate::{Error, Result};

/// Ordered list of traffic rules
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficPolicy {
    /// Policy ID
    pub id: String,
    /// Rules, evaluated by priority on the node
    #[serde(default)]
    pub traffic_rules: Vec<TrafficRule>,
}

impl Entity for TrafficPolicy {
    fn table_name(&self) -> &'static str {
        "traffic_policies"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<()> {
        require_uuid("id", &self.id)?;
        if self.traffic_rules.is_empty() {
            return Err(Error::validation("traffic_rules cannot be empty"));
        }
        for (i, rule) in self.traffic_rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| nested(&format!("traffic_rules[{i}]"), e))?;
        }
        Ok(())
    }
}

/// One selector/target pair
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRule {
    /// Description
    pub description: String,
    /// Priority, 1 is highest
    pub priority: u32,
    /// Source selector
    pub source: Option<TrafficSelector>,
    /// Destination selector
    pub destination: Option<TrafficSelector>,
    /// What to do with matching traffic
    pub target: Option<TrafficTarget>,
}

impl TrafficRule {
    fn validate(&self) -> Result<()> {
        require_non_empty("description", &self.description)?;
        require_range("priority", self.priority, 1, 65535)?;
        self.source
            .as_ref()
            .ok_or_else(|| Error::validation("source cannot be empty"))?
            .validate()
            .map_err(|e| nested("source", e))?;
        self.destination
            .as_ref()
            .ok_or_else(|| Error::validation("destination cannot be empty"))?
            .validate()
            .map_err(|e| nested("destination", e))?;
        self.target
            .as_ref()
            .ok_or_else(|| Error::validation("target cannot be empty"))?
            .validate()
            .map_err(|e| nested("target", e))
    }
}

/// Traffic match criteria. At least one filter must be set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSelector {
    /// Description
    pub description: String,
    /// Match by MAC address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macs: Option<MacFilter>,
    /// Match by IP address, ports and protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpFilter>,
    /// Match GTP tunnelled traffic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtp: Option<GtpFilter>,
}

impl TrafficSelector {
    fn validate(&self) -> Result<()> {
        require_non_empty("description", &self.description)?;
        if self.macs.is_none() && self.ip.is_none() && self.gtp.is_none() {
            return Err(Error::validation("macs|ip|gtp cannot all be nil"));
        }
        if let Some(macs) = &self.macs {
            macs.validate().map_err(|e| nested("macs", e))?;
        }
        if let Some(ip) = &self.ip {
            ip.validate().map_err(|e| nested("ip", e))?;
        }
        if let Some(gtp) = &self.gtp {
            gtp.validate().map_err(|e| nested("gtp", e))?;
        }
        Ok(())
    }
}

/// MAC address match
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacFilter {
    /// Addresses to match
    #[serde(default)]
    pub mac_addresses: Vec<String>,
}

impl MacFilter {
    fn validate(&self) -> Result<()> {
        for (i, mac) in self.mac_addresses.iter().enumerate() {
            if !is_mac_address(mac) {
                return Err(Error::validation(format!(
                    "mac_addresses[{i}] could not be parsed"
                )));
            }
        }
        Ok(())
    }
}

/// IP 5-tuple match
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpFilter {
    /// Network address
    pub address: String,
    /// Prefix length
    pub mask: u32,
    /// First port of the range
    pub begin_port: u32,
    /// Last port of the range
    pub end_port: u32,
    /// One of tcp, udp, icmp, sctp
    pub protocol: String,
}

impl IpFilter {
    fn validate(&self) -> Result<()> {
        parse_ip("address", &self.address)?;
        require_range("mask", self.mask, 0, 128)?;
        require_range("begin_port", self.begin_port, 1, 65535)?;
        require_range("end_port", self.end_port, 1, 65535)?;
        if self.begin_port > self.end_port {
            return Err(Error::validation("begin_port must be <= end_port"));
        }
        match self.protocol.as_str() {
            "tcp" | "udp" | "icmp" | "sctp" => Ok(()),
            _ => Err(Error::validation(
                "protocol must be one of [tcp, udp, icmp, sctp]",
            )),
        }
    }
}

/// GTP tunnel match
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtpFilter {
    /// Tunnel endpoint address
    pub address: String,
    /// Prefix length
    pub mask: u32,
    /// Subscriber identities
    #[serde(default)]
    pub imsis: Vec<String>,
}

impl GtpFilter {
    fn validate(&self) -> Result<()> {
        require_non_empty("address", &self.address)?;
        parse_ip("address", &self.address)?;
        require_range("mask", self.mask, 0, 128)?;
        for (i, imsi) in self.imsis.iter().enumerate() {
            let digits = imsi.len() == 14 || imsi.len() == 15;
            if !digits || !imsi.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::validation(format!(
                    "imsis[{i}] must be 14 or 15 digits"
                )));
            }
        }
        Ok(())
    }
}

/// Action applied to matching traffic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrafficAction {
    /// Forward
    Accept,
    /// Drop and notify the sender
    Reject,
    /// Drop silently
    Drop,
}

impl FromStr for TrafficAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            "drop" => Ok(Self::Drop),
            _ => Err(Error::validation(
                "action must be one of [accept, reject, drop]",
            )),
        }
    }
}

/// Rule outcome: an action plus optional header rewrites
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficTarget {
    /// Description
    pub description: String,
    /// One of accept, reject, drop
    pub action: String,
    /// Rewrite the destination MAC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<MacModifier>,
    /// Rewrite the destination IP and port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpModifier>,
}

impl TrafficTarget {
    /// Parsed action
    pub fn action(&self) -> Result<TrafficAction> {
        self.action.parse()
    }

    fn validate(&self) -> Result<()> {
        require_non_empty("description", &self.description)?;
        self.action()?;
        if self.mac.is_none() && self.ip.is_none() {
            return Err(Error::validation("mac|ip cannot both be nil"));
        }
        if let Some(mac) = &self.mac {
            if !is_mac_address(&mac.mac_address) {
                return Err(Error::validation("mac.mac_address could not be parsed"));
            }
        }
        if let Some(ip) = &self.ip {
            parse_ip("ip.address", &ip.address)?;
            require_range("ip.port", ip.port, 1, 65535)?;
        }
        Ok(())
    }
}

/// Destination MAC rewrite
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacModifier {
    /// New MAC address
    pub mac_address: String,
}

/// Destination IP rewrite
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpModifier {
    /// New address
    pub address: String,
    /// New port
    pub port: u32,
}

fn parse_ip(field: &str, value: &str) -> Result<IpAddr> {
    value
        .parse()
        .map_err(|_| Error::validation(format!("{field} could not be parsed")))
}

/// EUI-48, EUI-64 or 20-octet IPoIB address.
///
/// Octets are two hex digits separated by `:` or `-`, or groups of four hex
/// digits separated by `.` (`0000.5e00.5301`).
fn is_mac_address(value: &str) -> bool {
    let (sep, width) = match value.as_bytes().get(2) {
        Some(b':') => (':', 2),
        Some(b'-') => ('-', 2),
        _ => ('.', 4),
    };
    let groups: Vec<&str> = value.split(sep).collect();
    let octets = groups.len() * width / 2;
    matches!(octets, 6 | 8 | 20)
        && groups
            .iter()
            .all(|g| g.len() == width && g.bytes().all(|b| b.is_ascii_hexdigit()))
}

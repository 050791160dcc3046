//! Traffic policy model for the Kubernetes+OVN mode
//!
//! Expressed in terms of address blocks and ports so that it maps onto a
//! Kubernetes NetworkPolicy (see [`crate::policy::network_policy`]).

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use super::{nested, require_non_empty, require_uuid, Entity};
use crate::{Error, Result};

/// Ingress/egress rules applied to a unit's pods
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficPolicyKubeOvn {
    /// Policy ID
    pub id: String,
    /// Policy name
    pub name: String,
    /// Allowed inbound traffic
    #[serde(default, rename = "ingress_rules")]
    pub ingress: Vec<IngressRule>,
    /// Allowed outbound traffic
    #[serde(default, rename = "egress_rules")]
    pub egress: Vec<EgressRule>,
}

impl Entity for TrafficPolicyKubeOvn {
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
        require_non_empty("name", &self.name)?;
        if self.ingress.is_empty() && self.egress.is_empty() {
            return Err(Error::validation("ingress and egress cannot be empty"));
        }
        for (i, rule) in self.ingress.iter().enumerate() {
            validate_rule("from", &rule.from, &rule.ports)
                .map_err(|e| nested(&format!("ingress[{i}]"), e))?;
        }
        for (i, rule) in self.egress.iter().enumerate() {
            validate_rule("to", &rule.to, &rule.ports)
                .map_err(|e| nested(&format!("egress[{i}]"), e))?;
        }
        Ok(())
    }
}

/// Inbound rule
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    /// Description
    #[serde(default)]
    pub description: String,
    /// Allowed sources
    #[serde(default)]
    pub from: Vec<IpBlock>,
    /// Allowed ports
    #[serde(default)]
    pub ports: Vec<KubeOvnPort>,
}

/// Outbound rule
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRule {
    /// Description
    #[serde(default)]
    pub description: String,
    /// Allowed destinations
    #[serde(default)]
    pub to: Vec<IpBlock>,
    /// Allowed ports
    #[serde(default)]
    pub ports: Vec<KubeOvnPort>,
}

/// CIDR with carved-out sub-ranges
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpBlock {
    /// Allowed range
    pub cidr: String,
    /// Sub-ranges excluded from `cidr`
    #[serde(default)]
    pub except: Vec<String>,
}

impl IpBlock {
    /// Every exception must be a strictly smaller network inside `cidr`
    pub fn validate(&self) -> Result<()> {
        let parent = parse_cidr(&self.cidr)
            .map_err(|e| Error::validation(format!("invalid CIDR: {e}")))?;

        for (i, except) in self.except.iter().enumerate() {
            let child = parse_cidr(except)
                .map_err(|e| Error::validation(format!("except[{i}].invalid CIDR: {e}")))?;

            if child == parent {
                return Err(Error::validation(format!(
                    "except[{i}].CIDR({except}) is the same as CIDR({})",
                    self.cidr
                )));
            }
            if !parent.contains(child.ip()) {
                return Err(Error::validation(format!(
                    "except[{i}].CIDR({except}) is not in CIDR({})",
                    self.cidr
                )));
            }
            if child.prefix() <= parent.prefix() {
                return Err(Error::validation(format!(
                    "except[{i}].CIDR({except}) mask is invalid"
                )));
            }
        }
        Ok(())
    }
}

/// Port allowed by a rule
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeOvnPort {
    /// Port number
    pub port: u16,
    /// tcp, udp or sctp (case-insensitive)
    pub protocol: String,
}

impl KubeOvnPort {
    /// Kubernetes protocol name. Anything but tcp, udp or sctp is rejected.
    pub fn kube_protocol(&self) -> Result<&'static str> {
        match self.protocol.to_ascii_lowercase().as_str() {
            "tcp" => Ok("TCP"),
            "udp" => Ok("UDP"),
            "sctp" => Ok("SCTP"),
            _ => Err(Error::validation(format!(
                "not supported protocol: {}",
                self.protocol
            ))),
        }
    }
}

fn validate_rule(peer_field: &str, peers: &[IpBlock], ports: &[KubeOvnPort]) -> Result<()> {
    for (i, block) in peers.iter().enumerate() {
        block
            .validate()
            .map_err(|e| nested(&format!("{peer_field}[{i}]"), e))?;
    }
    for (i, port) in ports.iter().enumerate() {
        port.kube_protocol()
            .map_err(|e| nested(&format!("ports[{i}]"), e))?;
    }
    Ok(())
}

/// Parse `addr/prefix` into its network. A bare address is not a CIDR.
fn parse_cidr(value: &str) -> std::result::Result<IpNetwork, String> {
    if !value.contains('/') {
        return Err(format!("missing prefix length in {value:?}"));
    }
    let net: IpNetwork = value.parse().map_err(|e| format!("{e}"))?;
    IpNetwork::new(net.network(), net.prefix()).map_err(|e| format!("{e}"))
}

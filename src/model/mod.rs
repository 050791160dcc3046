//! Entities handled by the controller
//!
//! Every entity carries an ID, knows which table the persistence service
//! stores it in and validates itself before any backend is contacted.
//! [`Record`] is the closed set of entity kinds, used wherever entities of
//! mixed kinds travel together (for example the inventory file).

mod dns;
mod kube_ovn;
mod node;
pub(crate) mod traffic;
mod unit;

pub use dns::{DnsARecord, DnsAppAlias, DnsConfig, DnsForwarder};
pub use kube_ovn::{EgressRule, IngressRule, IpBlock, KubeOvnPort, TrafficPolicyKubeOvn};
pub use node::{Node, NodeGrpcTarget};
pub use traffic::{
    GtpFilter, IpFilter, IpModifier, MacFilter, MacModifier, TrafficAction, TrafficPolicy,
    TrafficRule, TrafficSelector, TrafficTarget,
};
pub use unit::{
    App, NodeApp, NodeVnf, PortProtocol, PortSpec, Unit, UnitClass, UnitKind, UnitRef, Vnf,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Capability shared by every persisted entity
pub trait Entity {
    /// Table the persistence service stores this entity in
    fn table_name(&self) -> &'static str;

    /// Entity ID
    fn id(&self) -> &str;

    /// Replace the entity ID (used when the persistence service assigns one)
    fn set_id(&mut self, id: String);

    /// Check the entity's invariants
    fn validate(&self) -> Result<()>;
}

/// Any entity, tagged by kind
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    /// Edge node
    Node(Node),
    /// Registered gRPC target of a node
    GrpcTarget(NodeGrpcTarget),
    /// Application
    App(App),
    /// Virtual network function
    Vnf(Vnf),
    /// Application deployed to a node
    NodeApp(NodeApp),
    /// VNF deployed to a node
    NodeVnf(NodeVnf),
    /// Native traffic policy
    TrafficPolicy(TrafficPolicy),
    /// Kubernetes+OVN traffic policy
    KubeOvnPolicy(TrafficPolicyKubeOvn),
    /// DNS configuration
    DnsConfig(DnsConfig),
    /// Application alias within a DNS configuration
    DnsAppAlias(DnsAppAlias),
}

macro_rules! each_record {
    ($record:expr, $inner:ident => $body:expr) => {
        match $record {
            Record::Node($inner) => $body,
            Record::GrpcTarget($inner) => $body,
            Record::App($inner) => $body,
            Record::Vnf($inner) => $body,
            Record::NodeApp($inner) => $body,
            Record::NodeVnf($inner) => $body,
            Record::TrafficPolicy($inner) => $body,
            Record::KubeOvnPolicy($inner) => $body,
            Record::DnsConfig($inner) => $body,
            Record::DnsAppAlias($inner) => $body,
        }
    };
}

impl Entity for Record {
    fn table_name(&self) -> &'static str {
        each_record!(self, e => e.table_name())
    }

    fn id(&self) -> &str {
        each_record!(self, e => e.id())
    }

    fn set_id(&mut self, id: String) {
        each_record!(self, e => e.set_id(id))
    }

    fn validate(&self) -> Result<()> {
        each_record!(self, e => e.validate())
    }
}

// =============================================================================
// Shared validation helpers
// =============================================================================

/// Require `value` to be a UUID
pub(crate) fn require_uuid(field: &str, value: &str) -> Result<()> {
    Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| Error::validation(format!("{field} not a valid uuid")))
}

/// Require `value` to be non-empty
pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require `value` to lie in `min..=max`
pub(crate) fn require_range<T>(field: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(Error::validation(format!(
            "{field} must be in [{min}..{max}]"
        )));
    }
    Ok(())
}

/// Prefix a validation message with the path of the field it came from
pub(crate) fn nested(path: &str, err: Error) -> Error {
    match err {
        Error::Validation(msg) => Error::validation(format!("{path}.{msg}")),
        other => other,
    }
}

use serde::{Deserialize, Serialize};

use super::{require_non_empty, require_uuid, Entity};
use crate::Result;

/// Edge node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node ID. Also the TLS server name the node presents.
    pub id: String,
    /// Display name
    pub name: String,
    /// Physical location
    pub location: String,
    /// Hardware serial, used to name the node's Kubernetes objects
    pub serial: String,
}

impl Entity for Node {
    fn table_name(&self) -> &'static str {
        "nodes"
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
        require_non_empty("location", &self.location)?;
        require_non_empty("serial", &self.serial)
    }
}

/// Address under which a node registered itself for reverse dialing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGrpcTarget {
    /// Record ID
    pub id: String,
    /// Node the target belongs to
    pub node_id: String,
    /// Host (optionally `host:port`) the node can be reached at
    pub grpc_target: String,
}

impl Entity for NodeGrpcTarget {
    fn table_name(&self) -> &'static str {
        "node_grpc_targets"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<()> {
        require_uuid("id", &self.id)?;
        require_uuid("node_id", &self.node_id)?;
        require_non_empty("grpc_target", &self.grpc_target)
    }
}

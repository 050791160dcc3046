use std::fmt;

use serde::{Deserialize, Serialize};

use super::{require_non_empty, require_range, require_uuid, Entity};
use crate::lifecycle::LifecycleCommand;
use crate::{Error, Result, MAX_CORES, MAX_MEMORY};

/// How a unit is packaged
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Container image
    Container,
    /// Virtual machine image
    Vm,
}

/// Transport protocol of an exposed port
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
    /// SCTP
    Sctp,
    /// Every protocol
    All,
}

impl PortProtocol {
    /// Lowercase protocol name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::Sctp => "sctp",
            Self::All => "all",
        }
    }
}

/// Port exposed by an application
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port number
    pub port: u32,
    /// Protocol
    pub protocol: PortProtocol,
}

/// Application deployable to an edge node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    /// Application ID
    pub id: String,
    /// Packaging
    #[serde(rename = "type")]
    pub kind: UnitKind,
    /// Name
    pub name: String,
    /// Version
    pub version: String,
    /// Vendor
    pub vendor: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// CPU cores
    pub cores: u32,
    /// Memory in MB
    pub memory: u32,
    /// Exposed ports
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    /// URI the node downloads the image from
    pub source: String,
}

impl Entity for App {
    fn table_name(&self) -> &'static str {
        "apps"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<()> {
        require_uuid("id", &self.id)?;
        validate_footprint(
            &self.name,
            &self.version,
            &self.vendor,
            self.cores,
            self.memory,
            &self.source,
        )?;
        for (i, port) in self.ports.iter().enumerate() {
            require_range(&format!("ports[{i}].port"), port.port, 1, 65535)?;
        }
        Ok(())
    }
}

/// Virtual network function deployable to an edge node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vnf {
    /// VNF ID
    pub id: String,
    /// Packaging
    #[serde(rename = "type")]
    pub kind: UnitKind,
    /// Name
    pub name: String,
    /// Version
    pub version: String,
    /// Vendor
    pub vendor: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// CPU cores
    pub cores: u32,
    /// Memory in MB
    pub memory: u32,
    /// URI the node downloads the image from
    pub source: String,
}

impl Entity for Vnf {
    fn table_name(&self) -> &'static str {
        "vnfs"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<()> {
        require_uuid("id", &self.id)?;
        validate_footprint(
            &self.name,
            &self.version,
            &self.vendor,
            self.cores,
            self.memory,
            &self.source,
        )
    }
}

fn validate_footprint(
    name: &str,
    version: &str,
    vendor: &str,
    cores: u32,
    memory: u32,
    source: &str,
) -> Result<()> {
    require_non_empty("name", name)?;
    require_non_empty("version", version)?;
    require_non_empty("vendor", vendor)?;
    require_range("cores", cores, 1, MAX_CORES)?;
    require_range("memory", memory, 1, MAX_MEMORY)?;
    url::Url::parse(source)
        .map_err(|e| Error::validation(format!("source.uri is invalid: {e}")))?;
    Ok(())
}

/// Which family of node services manages a unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitClass {
    /// Application
    App,
    /// Virtual network function
    Vnf,
}

impl fmt::Display for UnitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::App => "application",
            Self::Vnf => "vnf",
        })
    }
}

/// Workload to deploy: an application or a VNF
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unit {
    /// Application
    App(App),
    /// Virtual network function
    Vnf(Vnf),
}

impl Unit {
    /// Unit ID
    pub fn id(&self) -> &str {
        match self {
            Self::App(app) => &app.id,
            Self::Vnf(vnf) => &vnf.id,
        }
    }

    /// Service family managing the unit
    pub fn class(&self) -> UnitClass {
        match self {
            Self::App(_) => UnitClass::App,
            Self::Vnf(_) => UnitClass::Vnf,
        }
    }

    /// Packaging
    pub fn kind(&self) -> UnitKind {
        match self {
            Self::App(app) => app.kind,
            Self::Vnf(vnf) => vnf.kind,
        }
    }

    /// CPU cores
    pub fn cores(&self) -> u32 {
        match self {
            Self::App(app) => app.cores,
            Self::Vnf(vnf) => vnf.cores,
        }
    }

    /// Memory in MB
    pub fn memory(&self) -> u32 {
        match self {
            Self::App(app) => app.memory,
            Self::Vnf(vnf) => vnf.memory,
        }
    }

    /// Exposed ports. VNFs expose none.
    pub fn ports(&self) -> &[PortSpec] {
        match self {
            Self::App(app) => &app.ports,
            Self::Vnf(_) => &[],
        }
    }

    /// Borrowed reference used by lifecycle operations
    pub fn unit_ref(&self) -> UnitRef<'_> {
        UnitRef {
            class: self.class(),
            id: self.id(),
        }
    }

    /// Validate the wrapped entity
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::App(app) => app.validate(),
            Self::Vnf(vnf) => vnf.validate(),
        }
    }
}

/// Reference to a unit already deployed on a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitRef<'a> {
    /// Service family
    pub class: UnitClass,
    /// Unit ID
    pub id: &'a str,
}

impl<'a> UnitRef<'a> {
    /// Reference an application
    pub fn app(id: &'a str) -> Self {
        Self {
            class: UnitClass::App,
            id,
        }
    }

    /// Reference a VNF
    pub fn vnf(id: &'a str) -> Self {
        Self {
            class: UnitClass::Vnf,
            id,
        }
    }
}

impl fmt::Display for UnitRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.class, self.id)
    }
}

/// Application deployed to a node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeApp {
    /// Association ID
    pub id: String,
    /// Node
    pub node_id: String,
    /// Application
    pub app_id: String,
    /// Pending lifecycle command, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
}

impl NodeApp {
    /// Parse the pending command
    pub fn command(&self) -> Result<LifecycleCommand> {
        self.cmd.as_deref().unwrap_or_default().parse()
    }
}

impl Entity for NodeApp {
    fn table_name(&self) -> &'static str {
        "nodes_apps"
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
        require_uuid("app_id", &self.app_id)?;
        if self.cmd.is_some() {
            self.command()?;
        }
        Ok(())
    }
}

/// VNF deployed to a node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVnf {
    /// Association ID
    pub id: String,
    /// Node
    pub node_id: String,
    /// VNF
    pub vnf_id: String,
    /// Pending lifecycle command, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
}

impl NodeVnf {
    /// Parse the pending command
    pub fn command(&self) -> Result<LifecycleCommand> {
        self.cmd.as_deref().unwrap_or_default().parse()
    }
}

impl Entity for NodeVnf {
    fn table_name(&self) -> &'static str {
        "nodes_vnfs"
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
        require_uuid("vnf_id", &self.vnf_id)?;
        if self.cmd.is_some() {
            self.command()?;
        }
        Ok(())
    }
}

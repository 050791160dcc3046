//! Node connection brokering
//!
//! Turns a node ID into live gRPC clients for one of the node's two
//! surfaces. The node's address comes from the persistence service through
//! [`NodeDirectory`]; the actual dial goes through an injected
//! [`NodeDialer`] so that deployments where nodes dial home (reverse
//! tunnels) can substitute their own transport.
//!
//! Connections are per request: a client bundle owns its channel and the
//! channel is closed when the bundle is dropped. Nothing is retried here.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::model::Node;
use crate::mtls::pin_to_node;
use crate::proto::ela::application_policy_service_client::ApplicationPolicyServiceClient;
use crate::proto::ela::dns_service_client::DnsServiceClient;
use crate::proto::ela::interface_policy_service_client::InterfacePolicyServiceClient;
use crate::proto::ela::interface_service_client::InterfaceServiceClient;
use crate::proto::ela::zone_service_client::ZoneServiceClient;
use crate::proto::eva::application_deployment_service_client::ApplicationDeploymentServiceClient;
use crate::proto::eva::application_lifecycle_service_client::ApplicationLifecycleServiceClient;
use crate::proto::eva::vnf_deployment_service_client::VnfDeploymentServiceClient;
use crate::proto::eva::vnf_lifecycle_service_client::VnfLifecycleServiceClient;
use crate::{Error, Result, DEFAULT_ELA_PORT, DEFAULT_EVA_PORT};

/// The two gRPC surfaces every node exposes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Surface {
    /// Policy, interface, DNS and zone configuration
    Ela,
    /// Application and VNF deployment and lifecycle
    Eva,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ela => "ELA",
            Self::Eva => "EVA",
        })
    }
}

/// Read access to the node records kept by the persistence service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Targets the node registered for reverse dialing
    async fn grpc_targets(&self, node_id: &str) -> Result<Vec<String>>;

    /// Node record, `None` if the node is unknown
    async fn node(&self, node_id: &str) -> Result<Option<Node>>;
}

/// Transport used to reach a node
#[async_trait]
pub trait NodeDialer: Send + Sync {
    /// Announce that `host` is the address of a node. Fire-and-forget.
    fn register_host(&self, host: &str);

    /// Open a channel to `endpoint`
    async fn dial(
        &self,
        surface: Surface,
        endpoint: Endpoint,
    ) -> std::result::Result<Channel, tonic::transport::Error>;
}

/// Dials the node address directly
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectDialer;

#[async_trait]
impl NodeDialer for DirectDialer {
    fn register_host(&self, host: &str) {
        debug!(host = %host, "Node host registered");
    }

    async fn dial(
        &self,
        _surface: Surface,
        endpoint: Endpoint,
    ) -> std::result::Result<Channel, tonic::transport::Error> {
        endpoint.connect().await
    }
}

/// Ports and timeouts used when dialing nodes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Port of the ELA surface
    pub ela_port: u16,
    /// Port of the EVA surface
    pub eva_port: u16,
    /// Connect timeout per dial
    pub dial_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ela_port: DEFAULT_ELA_PORT,
            eva_port: DEFAULT_EVA_PORT,
            dial_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&ControllerConfig> for BrokerConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            ela_port: config.ela_port(),
            eva_port: config.eva_port(),
            dial_timeout: config.dial_timeout(),
        }
    }
}

impl BrokerConfig {
    fn port(&self, surface: Surface) -> u16 {
        match surface {
            Surface::Ela => self.ela_port,
            Surface::Eva => self.eva_port,
        }
    }
}

/// Open channel to one surface of one node
pub struct NodeChannel {
    node_id: String,
    surface: Surface,
    channel: Channel,
}

impl NodeChannel {
    /// Node this channel talks to
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Surface this channel talks to
    pub fn surface(&self) -> Surface {
        self.surface
    }

    /// Handle for building clients; clones share the connection
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

impl Drop for NodeChannel {
    fn drop(&mut self) {
        debug!(node_id = %self.node_id, surface = %self.surface, "Disconnected from node");
    }
}

/// Clients for a node's EVA surface
pub struct EvaClients {
    /// Application deployment
    pub app_deploy: ApplicationDeploymentServiceClient<Channel>,
    /// Application lifecycle
    pub app_lifecycle: ApplicationLifecycleServiceClient<Channel>,
    /// VNF deployment
    pub vnf_deploy: VnfDeploymentServiceClient<Channel>,
    /// VNF lifecycle
    pub vnf_lifecycle: VnfLifecycleServiceClient<Channel>,
    conn: NodeChannel,
}

impl EvaClients {
    fn new(conn: NodeChannel) -> Self {
        let channel = conn.channel();
        Self {
            app_deploy: ApplicationDeploymentServiceClient::new(channel.clone()),
            app_lifecycle: ApplicationLifecycleServiceClient::new(channel.clone()),
            vnf_deploy: VnfDeploymentServiceClient::new(channel.clone()),
            vnf_lifecycle: VnfLifecycleServiceClient::new(channel),
            conn,
        }
    }

    /// Node these clients talk to
    pub fn node_id(&self) -> &str {
        self.conn.node_id()
    }

    /// Close the connection
    pub fn disconnect(self) {}
}

/// Clients for a node's ELA surface
pub struct ElaClients {
    /// Per-application traffic policy
    pub app_policy: ApplicationPolicyServiceClient<Channel>,
    /// Per-interface traffic policy
    pub interface_policy: InterfacePolicyServiceClient<Channel>,
    /// Network interfaces
    pub interfaces: InterfaceServiceClient<Channel>,
    /// DNS records and forwarders
    pub dns: DnsServiceClient<Channel>,
    /// Network zones
    pub zones: ZoneServiceClient<Channel>,
    conn: NodeChannel,
}

impl ElaClients {
    fn new(conn: NodeChannel) -> Self {
        let channel = conn.channel();
        Self {
            app_policy: ApplicationPolicyServiceClient::new(channel.clone()),
            interface_policy: InterfacePolicyServiceClient::new(channel.clone()),
            interfaces: InterfaceServiceClient::new(channel.clone()),
            dns: DnsServiceClient::new(channel.clone()),
            zones: ZoneServiceClient::new(channel),
            conn,
        }
    }

    /// Node these clients talk to
    pub fn node_id(&self) -> &str {
        self.conn.node_id()
    }

    /// Close the connection
    pub fn disconnect(self) {}
}

/// Resolves nodes and opens per-request connections to them
pub struct NodeConnectionBroker {
    directory: Arc<dyn NodeDirectory>,
    dialer: Arc<dyn NodeDialer>,
    tls: Option<ClientTlsConfig>,
    config: BrokerConfig,
}

impl NodeConnectionBroker {
    /// Create a broker. Without `tls` nodes are dialed in plaintext.
    pub fn new(
        directory: Arc<dyn NodeDirectory>,
        dialer: Arc<dyn NodeDialer>,
        tls: Option<ClientTlsConfig>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            directory,
            dialer,
            tls,
            config,
        }
    }

    /// Node records backing this broker
    pub fn directory(&self) -> &Arc<dyn NodeDirectory> {
        &self.directory
    }

    /// Host of the node's single registered target
    pub async fn resolve(&self, node_id: &str) -> Result<String> {
        let targets = self.directory.grpc_targets(node_id).await?;
        match targets.as_slice() {
            [target] => Ok(target_host(target)),
            [] => Err(Error::not_found(format!(
                "node {node_id} has no registered gRPC target"
            ))),
            many => Err(Error::connection(
                format!("resolve node {node_id}"),
                format!(
                    "{} registered gRPC targets, expected exactly one",
                    many.len()
                ),
            )),
        }
    }

    /// Hand the node's address to the dialer
    pub async fn register_node(&self, node_id: &str) -> Result<()> {
        let host = self.resolve(node_id).await?;
        info!(node_id = %node_id, host = %host, "Registering node with dialer");
        self.dialer.register_host(&host);
        Ok(())
    }

    /// Open a channel to one surface of a node
    pub async fn connect(&self, node_id: &str, surface: Surface) -> Result<NodeChannel> {
        let host = self.resolve(node_id).await?;
        let context = format!("connect to node {node_id} ({surface})");
        let endpoint = self.endpoint(node_id, &host, surface, &context)?;

        debug!(node_id = %node_id, surface = %surface, uri = %endpoint.uri(), "Connecting to node");
        let channel = self
            .dialer
            .dial(surface, endpoint)
            .await
            .map_err(|e| Error::connection(context, e))?;

        Ok(NodeChannel {
            node_id: node_id.to_string(),
            surface,
            channel,
        })
    }

    /// Clients for the node's EVA surface
    pub async fn connect_eva(&self, node_id: &str) -> Result<EvaClients> {
        Ok(EvaClients::new(self.connect(node_id, Surface::Eva).await?))
    }

    /// Clients for the node's ELA surface
    pub async fn connect_ela(&self, node_id: &str) -> Result<ElaClients> {
        Ok(ElaClients::new(self.connect(node_id, Surface::Ela).await?))
    }

    fn endpoint(
        &self,
        node_id: &str,
        host: &str,
        surface: Surface,
        context: &str,
    ) -> Result<Endpoint> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let authority = match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{host}]"),
            _ => host.to_string(),
        };
        let uri = format!("{scheme}://{authority}:{}", self.config.port(surface));

        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| Error::connection(context, e))?
            .connect_timeout(self.config.dial_timeout);

        match &self.tls {
            Some(tls) => endpoint
                .tls_config(pin_to_node(tls, node_id))
                .map_err(|e| Error::connection(context, e)),
            None => Ok(endpoint),
        }
    }
}

/// Strip any port from a registered target; surfaces have fixed ports
fn target_host(target: &str) -> String {
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return addr.ip().to_string();
    }
    if target.parse::<IpAddr>().is_ok() {
        return target.to_string();
    }
    match target.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() && !host.contains(':') => {
            host.to_string()
        }
        _ => target.to_string(),
    }
}

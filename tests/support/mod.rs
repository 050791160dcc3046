//! In-process edge node serving the EVA and ELA surfaces
//!
//! Behaves like a node agent closely enough for the controller: units move
//! through READY/RUNNING/STOPPED, lifecycle commands in the wrong state are
//! FAILED_PRECONDITION, unknown units are NOT_FOUND, and an empty traffic
//! policy clears the stored one.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tonic::transport::{Server, ServerTlsConfig};
use tonic::{Request, Response, Status};

use edgectl::broker::{BrokerConfig, DirectDialer, NodeConnectionBroker};
use edgectl::inventory::Inventory;
use edgectl::model::{
    App, DnsARecord, DnsAppAlias, DnsConfig, DnsForwarder, Node, NodeGrpcTarget, PortProtocol,
    PortSpec, Record, UnitKind, Vnf,
};
use edgectl::proto::eva::lifecycle_status::Status as WireStatus;
use edgectl::proto::{ela, eva};

pub const NODE_ID: &str = "a3c1e2f4-5b6d-4e7f-8a9b-0c1d2e3f4a5b";
pub const APP_ID: &str = "6a1f0c2e-3b4d-4e5f-8a9b-0c1d2e3f4a5b";
pub const VNF_ID: &str = "7b2e1d3f-4c5a-4b6c-9d0e-1f2a3b4c5d6e";
pub const DNS_ID: &str = "2c3d4e5f-6a7b-4c8d-9e0f-1a2b3c4d5e6f";

/// Everything the node has been told
#[derive(Debug, Default)]
pub struct NodeState {
    /// Unit ID to current status
    pub units: HashMap<String, WireStatus>,
    /// Unit ID to the name it was last (re)deployed with
    pub names: HashMap<String, String>,
    /// Application traffic policies by unit ID
    pub app_policies: HashMap<String, ela::TrafficPolicy>,
    /// Interface traffic policies by interface ID
    pub interface_policies: HashMap<String, ela::TrafficPolicy>,
    /// Network interfaces
    pub interfaces: Vec<ela::NetworkInterface>,
    /// DNS A records
    pub dns_records: BTreeMap<String, Vec<String>>,
    /// DNS forwarders
    pub forwarders: Vec<String>,
    /// A record name whose SetA fails
    pub failing_record: Option<String>,
    /// RPCs in arrival order
    pub calls: Vec<String>,
}

#[derive(Clone)]
struct Agent {
    state: Arc<Mutex<NodeState>>,
}

impl Agent {
    fn with_state<T>(&self, call: &str, f: impl FnOnce(&mut NodeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.to_string());
        f(&mut state)
    }

    fn deploy_unit(
        &self,
        call: &str,
        id: &str,
        name: &str,
    ) -> Result<Response<eva::Empty>, Status> {
        self.with_state(call, |state| {
            if state.units.contains_key(id) {
                return Err(Status::already_exists(format!("{id} already deployed")));
            }
            state.units.insert(id.to_string(), WireStatus::Ready);
            state.names.insert(id.to_string(), name.to_string());
            Ok(Response::new(eva::Empty {}))
        })
    }

    fn redeploy_unit(
        &self,
        call: &str,
        id: &str,
        name: &str,
    ) -> Result<Response<eva::Empty>, Status> {
        self.with_state(call, |state| {
            if !state.units.contains_key(id) {
                return Err(Status::not_found(format!("{id} not found")));
            }
            state.names.insert(id.to_string(), name.to_string());
            Ok(Response::new(eva::Empty {}))
        })
    }

    fn unit_status(&self, call: &str, id: &str) -> Result<Response<eva::LifecycleStatus>, Status> {
        self.with_state(call, |state| {
            let status = state
                .units
                .get(id)
                .ok_or_else(|| Status::not_found(format!("{id} not found")))?;
            Ok(Response::new(eva::LifecycleStatus {
                status: *status as i32,
            }))
        })
    }

    fn undeploy_unit(&self, call: &str, id: &str) -> Result<Response<eva::Empty>, Status> {
        self.with_state(call, |state| {
            state
                .units
                .remove(id)
                .ok_or_else(|| Status::not_found(format!("{id} not found")))?;
            state.names.remove(id);
            state.app_policies.remove(id);
            Ok(Response::new(eva::Empty {}))
        })
    }

    fn run_command(
        &self,
        call: &str,
        cmd: eva::LifecycleCommand,
        from: &[WireStatus],
        to: WireStatus,
    ) -> Result<Response<eva::Empty>, Status> {
        self.with_state(call, |state| {
            let status = state
                .units
                .get_mut(&cmd.id)
                .ok_or_else(|| Status::not_found(format!("{} not found", cmd.id)))?;
            if !from.contains(status) {
                return Err(Status::failed_precondition(format!(
                    "{} is {}",
                    cmd.id,
                    status.as_str_name()
                )));
            }
            *status = to;
            Ok(Response::new(eva::Empty {}))
        })
    }
}

// =============================================================================
// EVA
// =============================================================================

#[tonic::async_trait]
impl eva::application_deployment_service_server::ApplicationDeploymentService for Agent {
    async fn deploy_container(
        &self,
        request: Request<eva::Application>,
    ) -> Result<Response<eva::Empty>, Status> {
        let app = request.into_inner();
        self.deploy_unit("app.deploy_container", &app.id, &app.name)
    }

    async fn deploy_vm(
        &self,
        request: Request<eva::Application>,
    ) -> Result<Response<eva::Empty>, Status> {
        let app = request.into_inner();
        self.deploy_unit("app.deploy_vm", &app.id, &app.name)
    }

    async fn get_status(
        &self,
        request: Request<eva::ApplicationId>,
    ) -> Result<Response<eva::LifecycleStatus>, Status> {
        self.unit_status("app.get_status", &request.into_inner().id)
    }

    async fn get_all(
        &self,
        _request: Request<eva::Empty>,
    ) -> Result<Response<eva::Applications>, Status> {
        Ok(Response::new(eva::Applications::default()))
    }

    async fn redeploy(
        &self,
        request: Request<eva::Application>,
    ) -> Result<Response<eva::Empty>, Status> {
        let app = request.into_inner();
        self.redeploy_unit("app.redeploy", &app.id, &app.name)
    }

    async fn undeploy(
        &self,
        request: Request<eva::ApplicationId>,
    ) -> Result<Response<eva::Empty>, Status> {
        self.undeploy_unit("app.undeploy", &request.into_inner().id)
    }
}

#[tonic::async_trait]
impl eva::application_lifecycle_service_server::ApplicationLifecycleService for Agent {
    async fn start(
        &self,
        request: Request<eva::LifecycleCommand>,
    ) -> Result<Response<eva::Empty>, Status> {
        self.run_command(
            "app.start",
            request.into_inner(),
            &[WireStatus::Ready, WireStatus::Stopped],
            WireStatus::Running,
        )
    }

    async fn stop(
        &self,
        request: Request<eva::LifecycleCommand>,
    ) -> Result<Response<eva::Empty>, Status> {
        self.run_command(
            "app.stop",
            request.into_inner(),
            &[WireStatus::Running],
            WireStatus::Stopped,
        )
    }

    async fn restart(
        &self,
        request: Request<eva::LifecycleCommand>,
    ) -> Result<Response<eva::Empty>, Status> {
        self.run_command(
            "app.restart",
            request.into_inner(),
            &[WireStatus::Running],
            WireStatus::Running,
        )
    }
}

#[tonic::async_trait]
impl eva::vnf_deployment_service_server::VnfDeploymentService for Agent {
    async fn deploy_container(
        &self,
        request: Request<eva::Vnf>,
    ) -> Result<Response<eva::Empty>, Status> {
        let vnf = request.into_inner();
        self.deploy_unit("vnf.deploy_container", &vnf.id, &vnf.name)
    }

    async fn deploy_vm(&self, request: Request<eva::Vnf>) -> Result<Response<eva::Empty>, Status> {
        let vnf = request.into_inner();
        self.deploy_unit("vnf.deploy_vm", &vnf.id, &vnf.name)
    }

    async fn get_status(
        &self,
        request: Request<eva::VnfId>,
    ) -> Result<Response<eva::LifecycleStatus>, Status> {
        self.unit_status("vnf.get_status", &request.into_inner().id)
    }

    async fn get_all(&self, _request: Request<eva::Empty>) -> Result<Response<eva::Vnfs>, Status> {
        Ok(Response::new(eva::Vnfs::default()))
    }

    async fn redeploy(&self, request: Request<eva::Vnf>) -> Result<Response<eva::Empty>, Status> {
        let vnf = request.into_inner();
        self.redeploy_unit("vnf.redeploy", &vnf.id, &vnf.name)
    }

    async fn undeploy(&self, request: Request<eva::VnfId>) -> Result<Response<eva::Empty>, Status> {
        self.undeploy_unit("vnf.undeploy", &request.into_inner().id)
    }
}

#[tonic::async_trait]
impl eva::vnf_lifecycle_service_server::VnfLifecycleService for Agent {
    async fn start(
        &self,
        request: Request<eva::LifecycleCommand>,
    ) -> Result<Response<eva::Empty>, Status> {
        self.run_command(
            "vnf.start",
            request.into_inner(),
            &[WireStatus::Ready, WireStatus::Stopped],
            WireStatus::Running,
        )
    }

    async fn stop(
        &self,
        request: Request<eva::LifecycleCommand>,
    ) -> Result<Response<eva::Empty>, Status> {
        self.run_command(
            "vnf.stop",
            request.into_inner(),
            &[WireStatus::Running],
            WireStatus::Stopped,
        )
    }

    async fn restart(
        &self,
        request: Request<eva::LifecycleCommand>,
    ) -> Result<Response<eva::Empty>, Status> {
        self.run_command(
            "vnf.restart",
            request.into_inner(),
            &[WireStatus::Running],
            WireStatus::Running,
        )
    }
}

// =============================================================================
// ELA
// =============================================================================

fn store_policy(store: &mut HashMap<String, ela::TrafficPolicy>, policy: ela::TrafficPolicy) {
    if policy.traffic_rules.is_empty() {
        store.remove(&policy.id);
    } else {
        store.insert(policy.id.clone(), policy);
    }
}

#[tonic::async_trait]
impl ela::application_policy_service_server::ApplicationPolicyService for Agent {
    async fn set(
        &self,
        request: Request<ela::TrafficPolicy>,
    ) -> Result<Response<ela::Empty>, Status> {
        self.with_state("app_policy.set", |state| {
            store_policy(&mut state.app_policies, request.into_inner());
        });
        Ok(Response::new(ela::Empty {}))
    }
}

#[tonic::async_trait]
impl ela::interface_policy_service_server::InterfacePolicyService for Agent {
    async fn set(
        &self,
        request: Request<ela::TrafficPolicy>,
    ) -> Result<Response<ela::Empty>, Status> {
        self.with_state("interface_policy.set", |state| {
            store_policy(&mut state.interface_policies, request.into_inner());
        });
        Ok(Response::new(ela::Empty {}))
    }
}

#[tonic::async_trait]
impl ela::interface_service_server::InterfaceService for Agent {
    async fn update(
        &self,
        request: Request<ela::NetworkInterface>,
    ) -> Result<Response<ela::Empty>, Status> {
        let update = request.into_inner();
        self.with_state("interfaces.update", |state| {
            let existing = state
                .interfaces
                .iter_mut()
                .find(|i| i.id == update.id)
                .ok_or_else(|| Status::not_found(format!("interface {} not found", update.id)))?;
            *existing = update;
            Ok(Response::new(ela::Empty {}))
        })
    }

    async fn bulk_update(
        &self,
        request: Request<ela::NetworkInterfaces>,
    ) -> Result<Response<ela::Empty>, Status> {
        let updates = request.into_inner().network_interfaces;
        self.with_state("interfaces.bulk_update", |state| {
            for update in updates {
                if let Some(existing) = state.interfaces.iter_mut().find(|i| i.id == update.id) {
                    *existing = update;
                }
            }
        });
        Ok(Response::new(ela::Empty {}))
    }

    async fn get_all(
        &self,
        _request: Request<ela::Empty>,
    ) -> Result<Response<ela::NetworkInterfaces>, Status> {
        self.with_state("interfaces.get_all", |state| {
            Ok(Response::new(ela::NetworkInterfaces {
                network_interfaces: state.interfaces.clone(),
            }))
        })
    }

    async fn get(
        &self,
        request: Request<ela::InterfaceId>,
    ) -> Result<Response<ela::NetworkInterface>, Status> {
        let id = request.into_inner().id;
        self.with_state("interfaces.get", |state| {
            state
                .interfaces
                .iter()
                .find(|i| i.id == id)
                .cloned()
                .map(Response::new)
                .ok_or_else(|| Status::not_found(format!("interface {id} not found")))
        })
    }
}

#[tonic::async_trait]
impl ela::dns_service_server::DnsService for Agent {
    async fn set_a(
        &self,
        request: Request<ela::DnsRecordSet>,
    ) -> Result<Response<ela::Empty>, Status> {
        let record = request.into_inner();
        self.with_state("dns.set_a", |state| {
            if state.failing_record.as_deref() == Some(record.name.as_str()) {
                return Err(Status::internal(format!("cannot store {}", record.name)));
            }
            state.dns_records.insert(record.name, record.values);
            Ok(Response::new(ela::Empty {}))
        })
    }

    async fn delete_a(
        &self,
        request: Request<ela::DnsRecordSet>,
    ) -> Result<Response<ela::Empty>, Status> {
        let record = request.into_inner();
        self.with_state("dns.delete_a", |state| {
            state.dns_records.remove(&record.name);
        });
        Ok(Response::new(ela::Empty {}))
    }

    async fn set_forwarders(
        &self,
        request: Request<ela::DnsForwarders>,
    ) -> Result<Response<ela::Empty>, Status> {
        let forwarders = request.into_inner().ip_addresses;
        self.with_state("dns.set_forwarders", |state| {
            state.forwarders = forwarders;
        });
        Ok(Response::new(ela::Empty {}))
    }

    async fn delete_forwarders(
        &self,
        request: Request<ela::DnsForwarders>,
    ) -> Result<Response<ela::Empty>, Status> {
        let removed = request.into_inner().ip_addresses;
        self.with_state("dns.delete_forwarders", |state| {
            state.forwarders.retain(|ip| !removed.contains(ip));
        });
        Ok(Response::new(ela::Empty {}))
    }
}

// =============================================================================
// Node process
// =============================================================================

/// Running mock node
pub struct MockNode {
    pub state: Arc<Mutex<NodeState>>,
    pub eva_addr: SocketAddr,
    pub ela_addr: SocketAddr,
}

impl MockNode {
    /// Serve both surfaces on ephemeral localhost ports
    pub async fn start(tls: Option<ServerTlsConfig>) -> Self {
        let state = Arc::new(Mutex::new(NodeState {
            interfaces: vec![ela::NetworkInterface {
                id: "0000:00:1f.6".to_string(),
                description: "uplink".to_string(),
                mac_address: "8c:16:45:5f:11:2a".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }));
        let agent = Agent {
            state: Arc::clone(&state),
        };

        let eva_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let eva_addr = eva_listener.local_addr().unwrap();
        let ela_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ela_addr = ela_listener.local_addr().unwrap();

        let mut eva_server = Server::builder();
        let mut ela_server = Server::builder();
        if let Some(tls) = tls {
            eva_server = eva_server.tls_config(tls.clone()).unwrap();
            ela_server = ela_server.tls_config(tls).unwrap();
        }

        let eva_router = eva_server
            .add_service(
                eva::application_deployment_service_server::ApplicationDeploymentServiceServer::new(
                    agent.clone(),
                ),
            )
            .add_service(
                eva::application_lifecycle_service_server::ApplicationLifecycleServiceServer::new(
                    agent.clone(),
                ),
            )
            .add_service(eva::vnf_deployment_service_server::VnfDeploymentServiceServer::new(
                agent.clone(),
            ))
            .add_service(eva::vnf_lifecycle_service_server::VnfLifecycleServiceServer::new(
                agent.clone(),
            ));
        tokio::spawn(async move {
            eva_router
                .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(eva_listener))
                .await
        });

        let ela_router = ela_server
            .add_service(
                ela::application_policy_service_server::ApplicationPolicyServiceServer::new(
                    agent.clone(),
                ),
            )
            .add_service(
                ela::interface_policy_service_server::InterfacePolicyServiceServer::new(
                    agent.clone(),
                ),
            )
            .add_service(ela::interface_service_server::InterfaceServiceServer::new(
                agent.clone(),
            ))
            .add_service(ela::dns_service_server::DnsServiceServer::new(agent));
        tokio::spawn(async move {
            ela_router
                .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(ela_listener))
                .await
        });

        // Give servers time to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            state,
            eva_addr,
            ela_addr,
        }
    }

    /// Broker configuration pointing at this node's ports
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            ela_port: self.ela_addr.port(),
            eva_port: self.eva_addr.port(),
            dial_timeout: Duration::from_secs(2),
        }
    }

    /// RPCs received so far
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn app() -> App {
    App {
        id: APP_ID.to_string(),
        kind: UnitKind::Container,
        name: "nginx".to_string(),
        version: "1.25".to_string(),
        vendor: "f5".to_string(),
        description: "web frontend".to_string(),
        cores: 2,
        memory: 512,
        ports: vec![PortSpec {
            port: 80,
            protocol: PortProtocol::Tcp,
        }],
        source: "http://images.example.net/nginx.tar.gz".to_string(),
    }
}

pub fn vnf() -> Vnf {
    Vnf {
        id: VNF_ID.to_string(),
        kind: UnitKind::Vm,
        name: "upf".to_string(),
        version: "2.0".to_string(),
        vendor: "acme".to_string(),
        description: String::new(),
        cores: 4,
        memory: 4096,
        source: "http://images.example.net/upf.qcow2".to_string(),
    }
}

pub fn dns_config() -> DnsConfig {
    DnsConfig {
        id: DNS_ID.to_string(),
        name: "edge-dns".to_string(),
        records: vec![
            DnsARecord {
                name: "video.edge".to_string(),
                description: "analytics frontend".to_string(),
                ips: vec!["10.16.0.10".to_string()],
            },
            DnsARecord {
                name: "cache.edge".to_string(),
                description: "content cache".to_string(),
                ips: vec!["10.16.0.11".to_string(), "10.16.0.12".to_string()],
            },
        ],
        forwarders: vec![DnsForwarder {
            name: "upstream".to_string(),
            description: "operator resolver".to_string(),
            ip: "8.8.8.8".to_string(),
        }],
    }
}

/// The application published under [`dns_config`]
pub fn dns_alias() -> DnsAppAlias {
    DnsAppAlias {
        id: "8e7d6c5b-4a39-4281-9f0e-d1c2b3a49586".to_string(),
        dns_config_id: DNS_ID.to_string(),
        name: "frontend".to_string(),
        description: "nginx frontend".to_string(),
        app_id: APP_ID.to_string(),
    }
}

/// Inventory holding one node registered at localhost
pub fn inventory() -> Inventory {
    Inventory::from_records(vec![
        Record::Node(Node {
            id: NODE_ID.to_string(),
            name: "edge-1".to_string(),
            location: "rack 4".to_string(),
            serial: "ABC123".to_string(),
        }),
        Record::GrpcTarget(NodeGrpcTarget {
            id: "9e8d7c6b-5a4f-4e3d-8c2b-1a0f9e8d7c6b".to_string(),
            node_id: NODE_ID.to_string(),
            grpc_target: "127.0.0.1".to_string(),
        }),
        Record::App(app()),
        Record::Vnf(vnf()),
        Record::DnsConfig(dns_config()),
        Record::DnsAppAlias(dns_alias()),
    ])
    .unwrap()
}

/// Plaintext broker resolving through [`inventory`]
pub fn broker(node: &MockNode) -> Arc<NodeConnectionBroker> {
    Arc::new(NodeConnectionBroker::new(
        Arc::new(inventory()),
        Arc::new(DirectDialer),
        None,
        node.broker_config(),
    ))
}

/// Install the process crypto provider once per test binary
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

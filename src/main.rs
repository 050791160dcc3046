//! edgectl - edge infrastructure controller CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use edgectl::broker::{BrokerConfig, DirectDialer, NodeConnectionBroker};
use edgectl::config::{ControllerConfig, OrchestrationMode};
use edgectl::inventory::Inventory;
use edgectl::mtls::{ClientMtlsConfig, ServerMtlsConfig};
use edgectl::orchestrator::{KubeClient, KubeClientImpl, Orchestrator, RequestContext};
use edgectl::pki::{self, CertificateAuthority, SharedAuthority};

/// edgectl - deploy and control workloads on edge nodes
#[derive(Parser, Debug)]
#[command(name = "edgectl", version, about, long_about = None)]
struct Cli {
    /// Controller config file (YAML)
    #[arg(long, global = true, env = "EDGECTL_CONFIG")]
    config: Option<PathBuf>,

    /// Orchestration mode
    #[arg(long, global = true, env = "EDGECTL_ORCHESTRATION_MODE", value_enum)]
    mode: Option<OrchestrationMode>,

    /// CA directory
    #[arg(long, global = true, env = "EDGECTL_CA_DIR")]
    ca_dir: Option<PathBuf>,

    /// Node ELA port
    #[arg(long, global = true, env = "EDGECTL_ELA_PORT")]
    ela_port: Option<u16>,

    /// Node EVA port
    #[arg(long, global = true, env = "EDGECTL_EVA_PORT")]
    eva_port: Option<u16>,

    /// Namespace for Kubernetes objects
    #[arg(long, global = true, env = "EDGECTL_NAMESPACE")]
    namespace: Option<String>,

    /// Deadline for each request in seconds
    #[arg(long, global = true, env = "EDGECTL_REQUEST_TIMEOUT")]
    timeout_secs: Option<u64>,

    /// Dial nodes over plaintext gRPC (test setups only)
    #[arg(long, global = true, env = "EDGECTL_INSECURE")]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Certificate authority management
    #[command(subcommand)]
    Ca(CaCommand),

    /// Application and VNF lifecycle
    #[command(subcommand)]
    App(AppCommand),

    /// Unit traffic policies
    #[command(subcommand)]
    Policy(PolicyCommand),

    /// Node DNS configuration
    #[command(subcommand)]
    Dns(DnsCommand),

    /// Node network interfaces
    #[command(subcommand)]
    Interface(InterfaceCommand),
}

#[derive(Subcommand, Debug)]
enum CaCommand {
    /// Create the CA (or repair its certificate) and print the root
    Init,

    /// Sign a node CSR and print the certificate
    Sign {
        /// PEM-encoded certificate signing request
        #[arg(long)]
        csr: PathBuf,
    },

    /// Issue serving credentials for a node into a directory
    ServerCert {
        /// Node ID the certificate is issued for
        #[arg(long)]
        node_id: String,

        /// Output directory for cert.pem, key.pem and ca.pem
        #[arg(long)]
        out_dir: PathBuf,
    },
}

/// Node and unit addressed by a command
#[derive(Args, Debug)]
struct UnitTarget {
    /// Inventory file
    #[arg(long, env = "EDGECTL_INVENTORY")]
    inventory: PathBuf,

    /// Node ID
    #[arg(long)]
    node: String,

    /// Application or VNF ID
    #[arg(long)]
    unit: String,
}

#[derive(Subcommand, Debug)]
enum AppCommand {
    /// Deploy a unit to a node
    Deploy(UnitTarget),
    /// Replace a deployed unit's definition
    Redeploy(UnitTarget),
    /// Start a unit
    Start(UnitTarget),
    /// Stop a unit
    Stop(UnitTarget),
    /// Restart a unit
    Restart(UnitTarget),
    /// Print a unit's status
    Status(UnitTarget),
    /// Remove a unit and its policy
    Undeploy(UnitTarget),
}

#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Attach a traffic policy to a unit
    Set {
        #[command(flatten)]
        target: UnitTarget,

        /// Traffic policy ID
        #[arg(long)]
        policy: String,
    },
    /// Remove a unit's traffic policy
    Delete(UnitTarget),
}

/// Node and DNS configuration addressed by a command
#[derive(Args, Debug)]
struct DnsTarget {
    /// Inventory file
    #[arg(long, env = "EDGECTL_INVENTORY")]
    inventory: PathBuf,

    /// Node ID
    #[arg(long)]
    node: String,

    /// DNS configuration ID
    #[arg(long = "dns-config")]
    dns_config: String,
}

#[derive(Subcommand, Debug)]
enum DnsCommand {
    /// Push records and forwarders to a node
    Apply(DnsTarget),
    /// Remove records and forwarders from a node
    Remove(DnsTarget),
}

#[derive(Subcommand, Debug)]
enum InterfaceCommand {
    /// List a node's network interfaces
    List {
        /// Inventory file
        #[arg(long, env = "EDGECTL_INVENTORY")]
        inventory: PathBuf,

        /// Node ID
        #[arg(long)]
        node: String,
    },
    /// Attach a native traffic policy to an interface
    SetPolicy {
        /// Inventory file
        #[arg(long, env = "EDGECTL_INVENTORY")]
        inventory: PathBuf,

        /// Node ID
        #[arg(long)]
        node: String,

        /// Interface ID
        #[arg(long)]
        interface: String,

        /// Traffic policy ID
        #[arg(long)]
        policy: String,
    },
    /// Clear an interface's traffic policy
    DeletePolicy {
        /// Inventory file
        #[arg(long, env = "EDGECTL_INVENTORY")]
        inventory: PathBuf,

        /// Node ID
        #[arg(long)]
        node: String,

        /// Interface ID
        #[arg(long)]
        interface: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - aws-lc-rs, shared by tonic and kube
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Ca(cmd) => run_ca(&config, cmd),
        Commands::App(cmd) => run_app(&config, cmd).await,
        Commands::Policy(cmd) => run_policy(&config, cmd).await,
        Commands::Dns(cmd) => run_dns(&config, cmd).await,
        Commands::Interface(cmd) => run_interface(&config, cmd).await,
    }
}

/// Config file first, then flags and environment on top
fn load_config(cli: &Cli) -> anyhow::Result<ControllerConfig> {
    let mut config = match &cli.config {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.orchestration_mode = mode;
    }
    if let Some(dir) = &cli.ca_dir {
        config.ca_dir = dir.clone();
    }
    if cli.ela_port.is_some() {
        config.ela_port = cli.ela_port;
    }
    if cli.eva_port.is_some() {
        config.eva_port = cli.eva_port;
    }
    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(secs) = cli.timeout_secs {
        config.request_timeout_secs = secs;
    }
    config.insecure |= cli.insecure;
    Ok(config)
}

fn run_ca(config: &ControllerConfig, cmd: CaCommand) -> anyhow::Result<()> {
    let ca = CertificateAuthority::init(&config.ca_dir)
        .with_context(|| format!("failed to open CA in {}", config.ca_dir.display()))?;
    match cmd {
        CaCommand::Init => {
            print!("{}", ca.ca_cert_pem());
        }
        CaCommand::Sign { csr } => {
            let csr_pem = std::fs::read_to_string(&csr)
                .with_context(|| format!("failed to read CSR {}", csr.display()))?;
            let csr_der = pki::parse_pem(&csr_pem)?;
            let cert_pem = ca.sign_csr(&csr_der)?;
            print!("{cert_pem}");
        }
        CaCommand::ServerCert { node_id, out_dir } => {
            let credentials = ServerMtlsConfig::issue_for_node(&ca, &node_id)?;
            credentials.write_to(&out_dir)?;
            info!(node_id = %node_id, dir = %out_dir.display(), "Issued node serving certificate");
        }
    }
    Ok(())
}

/// Orchestrator over `inventory`, dialing nodes with the controller identity
async fn orchestrator(
    config: &ControllerConfig,
    inventory: Inventory,
) -> anyhow::Result<Orchestrator> {
    let tls = if config.insecure {
        None
    } else {
        let ca = SharedAuthority::new(&config.ca_dir).get().await?;
        Some(ClientMtlsConfig::issue(&ca)?.to_tonic_config())
    };
    let broker = Arc::new(NodeConnectionBroker::new(
        Arc::new(inventory),
        Arc::new(DirectDialer),
        tls,
        BrokerConfig::from(config),
    ));

    let kube: Option<Arc<dyn KubeClient>> = if config.orchestration_mode.uses_kubernetes() {
        let client = kube::Client::try_default()
            .await
            .context("failed to create Kubernetes client")?;
        Some(Arc::new(KubeClientImpl::new(client, config.namespace.clone())))
    } else {
        None
    };

    Ok(Orchestrator::new(config, broker, kube)?)
}

fn load_inventory(path: &Path) -> anyhow::Result<Inventory> {
    Inventory::from_file(path)
        .with_context(|| format!("failed to load inventory {}", path.display()))
}

async fn run_app(config: &ControllerConfig, cmd: AppCommand) -> anyhow::Result<()> {
    let target = match &cmd {
        AppCommand::Deploy(t)
        | AppCommand::Redeploy(t)
        | AppCommand::Start(t)
        | AppCommand::Stop(t)
        | AppCommand::Restart(t)
        | AppCommand::Status(t)
        | AppCommand::Undeploy(t) => t,
    };
    let inventory = load_inventory(&target.inventory)?;
    let unit = inventory.unit(&target.unit)?;
    let orchestrator = orchestrator(config, inventory).await?;
    let ctx = RequestContext::with_timeout(config.request_timeout());
    let node = target.node.as_str();

    match &cmd {
        AppCommand::Deploy(_) => {
            let status = orchestrator.deploy(&ctx, node, &unit).await?;
            println!("{status}");
        }
        AppCommand::Redeploy(_) => orchestrator.redeploy(&ctx, node, &unit).await?,
        AppCommand::Start(_) => {
            let status = orchestrator.start(&ctx, node, unit.unit_ref()).await?;
            println!("{status}");
        }
        AppCommand::Stop(_) => {
            let status = orchestrator.stop(&ctx, node, unit.unit_ref()).await?;
            println!("{status}");
        }
        AppCommand::Restart(_) => {
            let status = orchestrator.restart(&ctx, node, unit.unit_ref()).await?;
            println!("{status}");
        }
        AppCommand::Status(_) => {
            let status = orchestrator.status(&ctx, node, unit.unit_ref()).await?;
            println!("{status}");
        }
        AppCommand::Undeploy(_) => orchestrator.undeploy(&ctx, node, unit.unit_ref()).await?,
    }
    Ok(())
}

async fn run_policy(config: &ControllerConfig, cmd: PolicyCommand) -> anyhow::Result<()> {
    match cmd {
        PolicyCommand::Set { target, policy } => {
            let inventory = load_inventory(&target.inventory)?;
            let unit = inventory.unit(&target.unit)?;
            let policy = inventory.policy(&policy)?;
            let orchestrator = orchestrator(config, inventory).await?;
            let ctx = RequestContext::with_timeout(config.request_timeout());
            orchestrator
                .set_policy(&ctx, &target.node, unit.unit_ref(), &policy)
                .await?;
        }
        PolicyCommand::Delete(target) => {
            let inventory = load_inventory(&target.inventory)?;
            let unit = inventory.unit(&target.unit)?;
            let orchestrator = orchestrator(config, inventory).await?;
            let ctx = RequestContext::with_timeout(config.request_timeout());
            orchestrator
                .delete_policy(&ctx, &target.node, unit.unit_ref())
                .await?;
        }
    }
    Ok(())
}

async fn run_dns(config: &ControllerConfig, cmd: DnsCommand) -> anyhow::Result<()> {
    let (target, apply) = match cmd {
        DnsCommand::Apply(target) => (target, true),
        DnsCommand::Remove(target) => (target, false),
    };
    let inventory = load_inventory(&target.inventory)?;
    let dns = inventory.dns_config(&target.dns_config)?.clone();
    let aliases = inventory.dns_aliases(&dns.id);
    let orchestrator = orchestrator(config, inventory).await?;
    let ctx = RequestContext::with_timeout(config.request_timeout());
    if apply {
        orchestrator
            .apply_dns_config(&ctx, &target.node, &dns, &aliases)
            .await?;
    } else {
        orchestrator
            .remove_dns_config(&ctx, &target.node, &dns, &aliases)
            .await?;
    }
    Ok(())
}

async fn run_interface(config: &ControllerConfig, cmd: InterfaceCommand) -> anyhow::Result<()> {
    let ctx = RequestContext::with_timeout(config.request_timeout());
    match cmd {
        InterfaceCommand::List { inventory, node } => {
            let orchestrator = orchestrator(config, load_inventory(&inventory)?).await?;
            for interface in orchestrator.interfaces(&ctx, &node).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    interface.id,
                    interface.mac_address,
                    interface.r#type().as_str_name(),
                    interface.description
                );
            }
        }
        InterfaceCommand::SetPolicy {
            inventory,
            node,
            interface,
            policy,
        } => {
            let inventory = load_inventory(&inventory)?;
            let policy = inventory.native_policy(&policy)?.clone();
            let orchestrator = orchestrator(config, inventory).await?;
            orchestrator
                .set_interface_policy(&ctx, &node, &interface, &policy)
                .await?;
        }
        InterfaceCommand::DeletePolicy {
            inventory,
            node,
            interface,
        } => {
            let orchestrator = orchestrator(config, load_inventory(&inventory)?).await?;
            orchestrator
                .delete_interface_policy(&ctx, &node, &interface)
                .await?;
        }
    }
    Ok(())
}

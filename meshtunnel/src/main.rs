use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meshtunnel_core::host::IrohHost;
use meshtunnel_core::storage::{AddressStore, MemoryAddressStore, RedbAddressStore};
use meshtunnel_core::{
    AgentCell, ForwardTarget, PeerDirectory, TcpForwarder, TunnelAgent, TunnelConfig, TunnelError,
    TunnelModule, TunnelResult, TunnelServer,
};

#[derive(Parser)]
#[command(name = "meshtunnel")]
#[command(about = "Edge-to-edge TCP tunnels through a relay", long_about = None)]
struct Cli {
    /// TOML configuration file, environment variables are used when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run an edge agent
    Agent {
        /// Node name, overrides MY_NODE_NAME
        #[arg(long)]
        node_name: Option<String>,

        /// Relay server as <node-id>@<relay-url>
        #[arg(long)]
        relay_server: Option<String>,
    },
    /// Run the relay server
    Server {
        /// Relay port
        #[arg(long)]
        listen_port: Option<u16>,
    },
    /// Run an edge agent that forwards a local port to a remote service
    Forward {
        /// Node name, overrides MY_NODE_NAME
        #[arg(long)]
        node_name: Option<String>,

        /// Relay server as <node-id>@<relay-url>
        #[arg(long)]
        relay_server: Option<String>,

        /// Local socket to accept connections on
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,

        /// Node the target service is reachable from
        #[arg(long)]
        node: String,

        /// Target IP as seen from that node
        #[arg(long)]
        ip: String,

        /// Target port
        #[arg(long)]
        port: u16,
    },
}

fn load_config(path: Option<&PathBuf>) -> TunnelResult<TunnelConfig> {
    match path {
        Some(path) => TunnelConfig::from_file(path),
        None => TunnelConfig::from_env(),
    }
}

fn open_store(config: &TunnelConfig) -> TunnelResult<Arc<dyn AddressStore>> {
    match &config.directory.db_path {
        Some(path) => Ok(Arc::new(RedbAddressStore::open(
            path,
            config.directory.event_buffer,
        )?)),
        None => {
            warn!("No directory database configured, peer addresses are kept in memory only");
            Ok(Arc::new(MemoryAddressStore::default()))
        }
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
        token.cancel();
    });
    cancel
}

async fn run_agent(config: TunnelConfig, forward: Option<(SocketAddr, ForwardTarget)>) -> TunnelResult<()> {
    let cancel = cancel_on_ctrl_c();
    let directory = Arc::new(PeerDirectory::new(&config.directory, open_store(&config)?));

    let module = TunnelModule::new(directory.clone(), &cancel);
    module.start().await?;

    let agents: AgentCell<IrohHost> = AgentCell::new();
    let agent = agents
        .get_or_bootstrap(|| TunnelAgent::bootstrap(&config, directory.clone(), &cancel))
        .await?;

    if let Some((listen, target)) = forward {
        let forwarder = TcpForwarder::bind(listen, agent.proxy().clone(), target).await?;
        tokio::spawn(forwarder.run(cancel.child_token()));
    }

    cancel.cancelled().await;
    agent.shutdown().await?;
    module.stop().await
}

#[tokio::main]
async fn main() -> TunnelResult<()> {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "meshtunnel=info"
            .parse()
            .map_err(|e| TunnelError::configuration("logging", format!("Invalid log directive: {}", e)))?,
    );
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Agent {
            node_name,
            relay_server,
        } => {
            config.agent.node_name = node_name.or(config.agent.node_name);
            config.agent.relay_server = relay_server.unwrap_or(config.agent.relay_server);
            config.validate()?;
            run_agent(config, None).await
        }
        Commands::Server { listen_port } => {
            if let Some(port) = listen_port {
                config.server.listen_port = port;
            }
            config.validate()?;

            let cancel = cancel_on_ctrl_c();
            let server = TunnelServer::start(&config).await?;
            for addr in server.advertised() {
                println!("{}", addr);
            }

            cancel.cancelled().await;
            server.shutdown().await
        }
        Commands::Forward {
            node_name,
            relay_server,
            listen,
            node,
            ip,
            port,
        } => {
            config.agent.node_name = node_name.or(config.agent.node_name);
            config.agent.relay_server = relay_server.unwrap_or(config.agent.relay_server);
            config.validate()?;

            let target = ForwardTarget {
                node_name: node,
                ip,
                port,
            };
            run_agent(config, Some((listen, target))).await
        }
    }
}

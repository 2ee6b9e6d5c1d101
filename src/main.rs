use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dispatcher_lite::config::DispatcherConfig;
use dispatcher_lite::node::ManagerNode;
use dispatcher_lite::shutdown::install_shutdown_handler;
use dispatcher_lite::store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "dispatcher-lite")]
#[command(version)]
#[command(about = "Node liveness and task dispatcher for a cluster manager")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a dispatcher
    Server(ServerArgs),
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port agents connect to
    #[arg(long, default_value = "4242")]
    port: u16,

    /// Port for the status dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Lease TTL handed to nodes, in milliseconds
    #[arg(long, default_value = "5000")]
    heartbeat_ttl_ms: u64,

    /// Random extension added to each TTL, in milliseconds (0 disables)
    #[arg(long, default_value = "0")]
    heartbeat_jitter_ms: u64,

    /// Snapshots buffered per task watch stream
    #[arg(long, default_value = "16")]
    watch_buffer: usize,
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if args.heartbeat_ttl_ms == 0 {
        return Err("--heartbeat-ttl-ms must be greater than zero".into());
    }

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let mut config = DispatcherConfig::new(listen_addr)
        .with_heartbeat_ttl(Duration::from_millis(args.heartbeat_ttl_ms))
        .with_heartbeat_jitter(Duration::from_millis(args.heartbeat_jitter_ms))
        .with_watch_buffer(args.watch_buffer);
    if let Some(port) = args.dashboard_port {
        config = config.with_dashboard(format!("0.0.0.0:{}", port).parse()?);
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        dashboard_addr = ?config.dashboard_addr,
        heartbeat_ttl_ms = args.heartbeat_ttl_ms,
        heartbeat_jitter_ms = args.heartbeat_jitter_ms,
        "Starting dispatcher-lite"
    );

    let shutdown = install_shutdown_handler();
    let node = ManagerNode::new(config, Arc::new(MemoryStore::new()));
    node.run(shutdown).await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
    }

    Ok(())
}

use clap::Parser;
use devrig_agent::{AgentServer, RPC_PORT_ENV};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "devrig-integration-test-app-agent", about = "Integration test agent for application pods")]
struct Args {
    /// Port the agent RPC server listens on.
    #[arg(long = "rpc-port", env = RPC_PORT_ENV)]
    rpc_port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("devrig_agent=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    info!(rpc_port = args.rpc_port, "Starting devrig application agent");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting down");
            on_signal.cancel();
        }
    });

    let listener = AgentServer::bind(args.rpc_port).await?;
    AgentServer::local(shutdown).serve(listener).await?;
    Ok(())
}

use devrig_harness::config::HarnessConfig;
use devrig_harness::shared::context::CallContext;
use devrig_harness::shared::types::WaitOptions;
use devrig_harness::Harness;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("devrig_harness=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let instance_id = std::env::var("DEVRIG_INSTANCE_ID")
        .map_err(|_| "DEVRIG_INSTANCE_ID must name the instance to watch")?;
    let wait_for = std::env::var("DEVRIG_WAIT_FOR").unwrap_or_else(|_| "running".to_string());
    let timeout_secs = std::env::var("DEVRIG_WAIT_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(600);

    let config = HarnessConfig::from_env()?;
    info!(%instance_id, %wait_for, manager_addr = %config.manager_addr, "Starting devrig watch");

    let harness = Harness::connect(config).await?;

    let ctx = CallContext::new().with_timeout(Duration::from_secs(timeout_secs));
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling wait");
            interrupt.cancel();
        }
    });

    let status = match wait_for.as_str() {
        "running" => {
            harness
                .engine
                .wait_for_start(&ctx, &instance_id, WaitOptions::default())
                .await?
        }
        "stopped" => match &harness.teardown {
            Some(teardown) => teardown.wait_for_stop(&ctx, &instance_id).await?,
            None => harness.engine.wait_for_stopped(&ctx, &instance_id).await?,
        },
        other => return Err(format!("DEVRIG_WAIT_FOR must be running or stopped, got {other}").into()),
    };

    info!(%instance_id, phase = ?status.phase, "Application instance converged");
    println!("{:?}", status.phase);
    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use coordinator_engine::logging::init_logging;
use coordinator_engine::{Coordinator, CoordinatorConfig};
use coordinator_server::{serve, spawn_sweeper};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Flags override the `COORDINATOR_*` environment.
#[derive(Parser, Debug)]
#[command(name = "coordinator-server", version, about = "Threshold session coordinator")]
struct Args {
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Idle session TTL in seconds; 0 disables expiry.
    #[arg(long)]
    session_ttl_secs: Option<u64>,

    #[arg(long)]
    sweep_secs: Option<u64>,

    #[arg(long)]
    log_dir: Option<String>,

    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(self, mut config: CoordinatorConfig) -> CoordinatorConfig {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(secs) = self.session_ttl_secs {
            config.session_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = self.sweep_secs {
            config.sweep_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(dir) = self.log_dir {
            config.log_dir = dir;
        }
        config.log_json |= self.log_json;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.apply(CoordinatorConfig::from_env().context("invalid coordinator environment")?);
    let _guard = init_logging(&config.log_dir, "coordinator.log", config.log_json);

    let coordinator = Arc::new(Coordinator::new(&config));
    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(coordinator.clone(), config.sweep_interval, cancel.clone());

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("cannot bind {}", config.bind))?;
    info!(bind = %config.bind, "coordinator listening");

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
                _ = cancel.cancelled() => {}
            }
            cancel.cancel();
        }
    };
    serve(listener, coordinator, shutdown).await?;

    cancel.cancel();
    if let Err(e) = sweeper.await {
        error!(error = %e, "session sweeper task failed");
    }
    info!("coordinator stopped");
    Ok(())
}

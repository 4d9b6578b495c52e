//! Vigil edge agent entry point.
//!
//! Single executable, no subcommands. SIGINT/SIGTERM trigger a graceful
//! shutdown; exit code 0 on a clean stop, 1 on an init/start failure.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_agent::agent::Agent;
use vigil_agent::shipper::ShipLayer;
use vigil_config::Config;

/// Command line arguments for the Vigil edge agent
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Edge recording agent for the Vigil multi-camera security system")]
struct Args {
    /// Central server host (overrides config)
    #[arg(long, env = "CENTRAL_SERVER_HOST")]
    server_host: Option<String>,

    /// Central server port (overrides config)
    #[arg(long, env = "CENTRAL_SERVER_PORT")]
    server_port: Option<u16>,

    /// Camera identity (overrides config)
    #[arg(long, env = "CAMERA_ID")]
    camera_id: Option<String>,

    /// Agent base directory (overrides config)
    #[arg(long, env = "BASE_PATH")]
    base_path: Option<PathBuf>,

    /// Write the changed-pixel overlay bitmap on every motion trigger
    #[arg(long)]
    debug_motion: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.server_host {
            config.server.host = host;
        }
        if let Some(port) = self.server_port {
            config.server.port = port;
        }
        if let Some(id) = self.camera_id {
            config.camera.id = id;
        }
        if let Some(base) = self.base_path {
            // An explicit NFS_MOUNT_PATH wins; otherwise the mount follows
            // the relocated base.
            if std::env::var_os("NFS_MOUNT_PATH").is_none() {
                config.paths.nfs_mount = base.join("security_footage");
            }
            config.paths.base = base;
        }
        if self.debug_motion {
            config.motion.debug_overlay = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut config = Config::from_env();
    args.apply(&mut config);

    // Console echo is synchronous via the fmt layer; the ship layer mirrors
    // every event into the batcher's queue without ever blocking a caller.
    let (ship_tx, ship_rx) = mpsc::unbounded_channel();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "vigil_agent=debug,vigil_core=debug,vigil_config=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .with(ShipLayer::new(config.camera.id.clone(), ship_tx))
        .init();

    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());

    let mut agent = match Agent::initialize(config, ship_rx, shutdown.clone()).await {
        Ok(agent) => agent,
        Err(err) => {
            error!(error = %err, "initialization failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = agent.start().await {
        error!(error = %err, "startup failed");
        agent.stop().await;
        return ExitCode::FAILURE;
    }

    agent.supervise().await;
    agent.stop().await;
    ExitCode::SUCCESS
}

/// Cancel the shutdown token on SIGINT or SIGTERM.
fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut terminate = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(stream) => stream,
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                _ = terminate.recv() => info!("terminate received"),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
            }
        }
        shutdown.cancel();
    });
}

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fleet_lite::config::{self, MasterConfig, WorkerConfig};
use fleet_lite::master::MasterNode;
use fleet_lite::shutdown::install_shutdown_handler;
use fleet_lite::worker::WorkerServer;

#[derive(Parser, Debug)]
#[command(name = "fleet-lite")]
#[command(version)]
#[command(about = "A lightweight compute-fleet orchestrator")]
struct Args {
    #[command(subcommand)]
    role: Role,
}

#[derive(clap::Subcommand, Debug)]
enum Role {
    /// Run the master: worker registry, liveness polling, job dispatch,
    /// and the HTTP status page
    Master {
        /// Home directory (overrides MASTER_HOME)
        #[arg(long)]
        home: Option<PathBuf>,
    },

    /// Run a worker: command listener, job execution, telemetry
    Worker {
        /// Home directory (overrides WORKER_HOME)
        #[arg(long)]
        home: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let shutdown = install_shutdown_handler();

    match args.role {
        Role::Master { home } => {
            let home = config::resolve_home(home, config::MASTER_HOME_ENV)?;
            tracing::info!(home = %home.display(), "loading master config");
            let cfg = MasterConfig::load(&home)?;
            MasterNode::new(cfg).run(shutdown).await?;
        }
        Role::Worker { home } => {
            let home = config::resolve_home(home, config::WORKER_HOME_ENV)?;
            tracing::info!(home = %home.display(), "loading worker config");
            let cfg = WorkerConfig::load(&home)?;
            WorkerServer::new(cfg).run(shutdown).await?;
        }
    }

    Ok(())
}

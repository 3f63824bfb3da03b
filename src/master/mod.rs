pub mod dispatcher;
pub mod poller;
pub mod prober;
pub mod selector;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::MasterConfig;
use crate::error::Result;
use crate::registry::WorkerRegistry;
use crate::status::{run_status_server, StatusState};

/// Master node orchestrating all subsystems around the shared registry.
pub struct MasterNode {
    config: MasterConfig,
    registry: Arc<WorkerRegistry>,
}

impl MasterNode {
    pub fn new(config: MasterConfig) -> Self {
        Self {
            config,
            registry: Arc::new(WorkerRegistry::new()),
        }
    }

    /// Run the master until shutdown:
    /// 1. Sweeps every configured worker once to seed the registry
    /// 2. Spawns the HTTP status server
    /// 3. Spawns the telemetry poller over the reachable working set
    /// 4. Spawns the reconnection prober over the unreachable complement
    /// 5. Spawns the job dispatch loop over the watched data directory
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let MasterNode { config, registry } = self;

        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let poll_period = Duration::from_secs(config.poll_interval_secs);
        let probe_period = Duration::from_secs(config.probe_interval_secs);

        tracing::info!(workers = ?config.workers, "master starting");
        poller::initial_sweep(&registry, &config.workers, connect_timeout).await;

        let status_state = StatusState {
            registry: registry.clone(),
        };
        let status_addr = config.status_addr;
        let static_dir = config.static_dir.clone();
        tokio::spawn(async move {
            run_status_server(status_addr, static_dir, status_state).await;
        });

        let poll_registry = registry.clone();
        let poll_shutdown = shutdown.clone();
        tokio::spawn(async move {
            poller::run_poller(poll_registry, poll_period, connect_timeout, poll_shutdown).await;
        });

        let probe_registry = registry.clone();
        let probe_workers = config.workers.clone();
        let probe_shutdown = shutdown.clone();
        tokio::spawn(async move {
            prober::run_prober(
                probe_registry,
                probe_workers,
                probe_period,
                connect_timeout,
                probe_shutdown,
            )
            .await;
        });

        let dispatcher = dispatcher::JobDispatcher::new(registry.clone(), &config);
        let dispatch_shutdown = shutdown.clone();
        tokio::spawn(async move {
            dispatcher.run(poll_period, dispatch_shutdown).await;
        });

        shutdown.cancelled().await;
        tracing::info!("master shutting down");
        Ok(())
    }
}

pub mod handler;
pub mod telemetry;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;

/// Worker node: a TCP listener handing every accepted connection to its
/// own command-handler task, so a running job never blocks the accept
/// loop or other connections.
pub struct WorkerServer {
    config: WorkerConfig,
}

impl WorkerServer {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        tracing::info!(addr = %self.config.listen_addr, "worker listening");
        serve(listener, Arc::new(self.config), shutdown).await;
        Ok(())
    }
}

/// Accept loop over an already-bound listener. Public so tests can bind
/// an ephemeral port themselves.
pub async fn serve(listener: TcpListener, config: Arc<WorkerConfig>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("worker shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let config = config.clone();
                        tokio::spawn(async move {
                            handler::handle_connection(stream, peer, config).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                    }
                }
            }
        }
    }
}

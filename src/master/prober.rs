//! Periodic liveness probing of workers currently marked unreachable.
//!
//! Workers are retried indefinitely at a constant, configurable period:
//! the fleet is small and manually curated, so nothing is ever evicted.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::protocol;
use crate::registry::{find_missing, WorkerRegistry};

/// Probe every configured address outside the current working set with a
/// lightweight `vivantoupas` request. A worker that answers becomes
/// eligible for the very next poll cycle. Returns the recovered
/// addresses.
pub async fn probe_cycle(
    registry: &WorkerRegistry,
    configured: &[String],
    timeout: Duration,
) -> Vec<String> {
    let reachable = registry.reachable().await;
    let down = find_missing(configured, &reachable);

    let replies = futures::future::join_all(down.iter().map(|addr| async move {
        match protocol::probe(addr, timeout).await {
            Ok(reply) if reply.is_available() => Some(addr.clone()),
            Ok(reply) => {
                tracing::debug!(worker = %addr, state = ?reply.state, "probe answered, not available");
                None
            }
            Err(error) => {
                tracing::debug!(worker = %addr, %error, "liveness probe failed");
                None
            }
        }
    }))
    .await;

    let mut recovered = Vec::new();
    for addr in replies.into_iter().flatten() {
        tracing::info!(worker = %addr, "worker answered liveness probe");
        registry.mark_reachable(&addr).await;
        recovered.push(addr);
    }
    recovered
}

pub async fn run_prober(
    registry: Arc<WorkerRegistry>,
    configured: Vec<String>,
    period: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                probe_cycle(&registry, &configured, timeout).await;
            }
        }
    }
}

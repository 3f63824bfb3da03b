//! Periodic telemetry sweep over the workers currently believed
//! reachable.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::protocol;
use crate::registry::{find_missing, WorkerRecord, WorkerRegistry};

/// Poll every address in `expected` concurrently, upsert each successful
/// telemetry reply, and return the addresses that answered this sweep.
/// Failures only drop the address from the working set; its registry
/// record survives untouched.
pub async fn poll_addresses(
    registry: &WorkerRegistry,
    expected: &[String],
    timeout: Duration,
) -> Vec<String> {
    let replies = futures::future::join_all(expected.iter().map(|addr| async move {
        match protocol::request_info(addr, timeout).await {
            Ok(info) => Some((addr.clone(), info)),
            Err(error) => {
                tracing::warn!(worker = %addr, %error, "telemetry poll failed");
                None
            }
        }
    }))
    .await;

    let mut responded = Vec::new();
    for (addr, info) in replies.into_iter().flatten() {
        registry.upsert(WorkerRecord::from_info(&addr, info)).await;
        responded.push(addr);
    }
    responded
}

/// One poll sweep: refresh telemetry for the current working set, report
/// every address that stopped responding, and store the survivors as the
/// new working set. Returns the newly lost addresses.
pub async fn poll_cycle(registry: &WorkerRegistry, timeout: Duration) -> Vec<String> {
    let expected = registry.reachable().await;
    let responded = poll_addresses(registry, &expected, timeout).await;

    let missing = find_missing(&expected, &responded);
    if !missing.is_empty() {
        tracing::warn!(workers = ?missing, "lost contact with workers");
    }
    registry.set_reachable(responded).await;
    missing
}

/// Startup sweep over every configured address, seeding the registry and
/// the reachable working set with whoever answers.
pub async fn initial_sweep(registry: &WorkerRegistry, configured: &[String], timeout: Duration) {
    let responded = poll_addresses(registry, configured, timeout).await;
    let unreachable = find_missing(configured, &responded);
    if !unreachable.is_empty() {
        tracing::warn!(workers = ?unreachable, "workers unreachable at startup");
    }
    tracing::info!(workers = ?responded, "initial fleet sweep complete");
    registry.set_reachable(responded).await;
}

pub async fn run_poller(
    registry: Arc<WorkerRegistry>,
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
                poll_cycle(&registry, timeout).await;
            }
        }
    }
}

//! Liveness poller and reconnection prober against fake workers.


use std::time::Duration;

use tokio::net::TcpListener;

use fleet_lite::master::{poller, prober};
use fleet_lite::registry::WorkerRegistry;

use test_harness::{spawn_fake_worker, spawn_fake_worker_on, test_info, unused_addr};

const TIMEOUT: Duration = Duration::from_millis(500);

#[tokio::test]
async fn initial_sweep_seeds_registry_with_responders() {
    let live = spawn_fake_worker(test_info("self", 12.5, 40.0, "h1")).await;
    let dead = unused_addr().await;
    let configured = vec![live.addr.clone(), dead.clone()];

    let registry = WorkerRegistry::new();
    poller::initial_sweep(&registry, &configured, TIMEOUT).await;

    let snapshot = registry.snapshot().await;
    assert!(snapshot.records.contains_key(&live.addr));
    assert!(!snapshot.records.contains_key(&dead));
    assert_eq!(registry.reachable().await, vec![live.addr.clone()]);
}

#[tokio::test]
async fn poll_cycle_updates_records_and_reports_missing() {
    let live = spawn_fake_worker(test_info("self", 12.5, 40.0, "h1")).await;
    let dead = unused_addr().await;

    let registry = WorkerRegistry::new();
    registry
        .set_reachable(vec![live.addr.clone(), dead.clone()])
        .await;

    let missing = poller::poll_cycle(&registry, TIMEOUT).await;
    assert_eq!(missing, vec![dead.clone()]);

    let snapshot = registry.snapshot().await;
    let record = &snapshot.records[&live.addr];
    assert_eq!(record.address, live.addr);
    assert_eq!(record.cpu_usage.get("cpu0"), Some(&12.5));
    assert_eq!(record.memory_usage, 40.0);
    assert_eq!(record.machine_name, "h1");

    // the lost worker drops out of the working set, not the registry
    assert_eq!(registry.reachable().await, vec![live.addr.clone()]);
}

#[tokio::test]
async fn poll_failure_keeps_last_known_record() {
    let registry = WorkerRegistry::new();

    let addr;
    {
        let live = spawn_fake_worker(test_info("self", 55.0, 70.0, "h2")).await;
        addr = live.addr.clone();
        registry.set_reachable(vec![addr.clone()]).await;
        poller::poll_cycle(&registry, TIMEOUT).await;
    } // worker gone

    let missing = poller::poll_cycle(&registry, TIMEOUT).await;
    assert_eq!(missing, vec![addr.clone()]);

    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.records[&addr].memory_usage, 70.0);
    assert!(registry.reachable().await.is_empty());
}

#[tokio::test]
async fn probe_recovery_makes_worker_eligible_for_next_poll() {
    let worker = spawn_fake_worker(test_info("self", 5.0, 30.0, "h3")).await;
    let configured = vec![worker.addr.clone()];

    // worker failed its previous polls: working set is empty
    let registry = WorkerRegistry::new();
    registry.set_reachable(Vec::<String>::new()).await;

    let recovered = prober::probe_cycle(&registry, &configured, TIMEOUT).await;
    assert_eq!(recovered, vec![worker.addr.clone()]);

    // the very next poll cycle includes it again
    let missing = poller::poll_cycle(&registry, TIMEOUT).await;
    assert!(missing.is_empty());
    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.records[&worker.addr].machine_name, "h3");
}

#[tokio::test]
async fn prober_skips_reachable_workers() {
    let mut worker = spawn_fake_worker(test_info("self", 5.0, 30.0, "h4")).await;
    let configured = vec![worker.addr.clone()];

    let registry = WorkerRegistry::new();
    registry.set_reachable(vec![worker.addr.clone()]).await;

    let recovered = prober::probe_cycle(&registry, &configured, TIMEOUT).await;
    assert!(recovered.is_empty());
    assert!(worker.commands.try_recv().is_err());
}

#[tokio::test]
async fn prober_keeps_retrying_dead_workers() {
    let dead = unused_addr().await;
    let configured = vec![dead.clone()];
    let registry = WorkerRegistry::new();

    // never evicted, retried every cycle
    for _ in 0..3 {
        let recovered = prober::probe_cycle(&registry, &configured, TIMEOUT).await;
        assert!(recovered.is_empty());
        assert!(registry.reachable().await.is_empty());
    }
}

#[tokio::test]
async fn lost_worker_recovers_end_to_end() {
    // A is live, B is down
    let a = spawn_fake_worker(test_info("self", 12.5, 40.0, "h1")).await;
    let b_addr = unused_addr().await;
    let configured = vec![a.addr.clone(), b_addr.clone()];

    let registry = WorkerRegistry::new();
    poller::initial_sweep(&registry, &configured, TIMEOUT).await;
    assert_eq!(registry.reachable().await, vec![a.addr.clone()]);

    // one poll cycle: A's exact values land in the registry, B stays out
    poller::poll_cycle(&registry, TIMEOUT).await;
    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.records[&a.addr].cpu_usage.get("cpu0"), Some(&12.5));
    assert!(!snapshot.records.contains_key(&b_addr));

    // B comes up on its original address
    let b_listener = TcpListener::bind(b_addr.as_str()).await.unwrap();
    let _b = spawn_fake_worker_on(b_listener, test_info("self", 1.0, 20.0, "h2"));

    // a prober cycle reconciles it, the next poll repopulates its record
    let recovered = prober::probe_cycle(&registry, &configured, TIMEOUT).await;
    assert_eq!(recovered, vec![b_addr.clone()]);

    let missing = poller::poll_cycle(&registry, TIMEOUT).await;
    assert!(missing.is_empty());
    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.records[&b_addr].machine_name, "h2");
    assert_eq!(snapshot.records[&b_addr].memory_usage, 20.0);
}

//! The master's worker registry: the single source of truth for worker
//! state, shared by the poller, the prober, the dispatcher, and the
//! status server.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::protocol::WorkerInfo;

/// Last-known state of one worker. Created on first successful contact,
/// replaced wholesale on every later one, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// host:port identity key. Never mutated after insertion.
    pub address: String,
    /// Core id -> utilization percent.
    pub cpu_usage: HashMap<String, f64>,
    /// Percent of physical memory in use.
    pub memory_usage: f64,
    /// Worker-reported hostname, informational only.
    pub machine_name: String,
    /// Timestamp of last successful contact.
    pub last_seen: DateTime<Utc>,
}

impl WorkerRecord {
    /// Build a record from a telemetry reply. The identity is the address
    /// the master dialed, not whatever the worker reported about itself.
    pub fn from_info(address: &str, info: WorkerInfo) -> Self {
        Self {
            address: address.to_string(),
            cpu_usage: info.cpu_usage,
            memory_usage: info.memory_usage,
            machine_name: info.machine_name,
            last_seen: info.last_seen,
        }
    }

    /// Mean per-core CPU utilization, if any cores were reported.
    pub fn mean_cpu(&self) -> Option<f64> {
        if self.cpu_usage.is_empty() {
            return None;
        }
        Some(self.cpu_usage.values().sum::<f64>() / self.cpu_usage.len() as f64)
    }
}

/// Consistent, independently owned copy of the registry for read-only
/// consumers.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub records: HashMap<String, WorkerRecord>,
    /// Addresses whose last poll or probe succeeded. A worker is
    /// Available iff its address is in this set.
    pub reachable: HashSet<String>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    records: HashMap<String, WorkerRecord>,
    reachable: HashSet<String>,
}

/// Concurrently-accessed worker table. All mutation goes through one
/// lock; callers never hold it across network I/O.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    inner: RwLock<RegistryInner>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record for its address. Last writer wins.
    pub async fn upsert(&self, record: WorkerRecord) {
        let mut inner = self.inner.write().await;
        inner.records.insert(record.address.clone(), record);
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read().await;
        RegistrySnapshot {
            records: inner.records.clone(),
            reachable: inner.reachable.clone(),
        }
    }

    /// Addresses currently believed reachable, in stable order.
    pub async fn reachable(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut addrs: Vec<String> = inner.reachable.iter().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Replace the reachable working set after a poll sweep.
    pub async fn set_reachable(&self, addrs: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.write().await;
        inner.reachable = addrs.into_iter().collect();
    }

    /// Reconcile one worker back after a successful liveness probe: it
    /// becomes eligible for the very next poll cycle.
    pub async fn mark_reachable(&self, addr: &str) {
        let mut inner = self.inner.write().await;
        inner.reachable.insert(addr.to_string());
    }
}

/// Addresses in `expected` that are absent from `responded`, preserving
/// the order of `expected`.
pub fn find_missing(expected: &[String], responded: &[String]) -> Vec<String> {
    let responded: HashSet<&str> = responded.iter().map(String::as_str).collect();
    expected
        .iter()
        .filter(|addr| !responded.contains(addr.as_str()))
        .cloned()
        .collect()
}

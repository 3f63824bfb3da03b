//! Pluggable worker selection for job dispatch.

use crate::config::SelectorKind;
use crate::registry::RegistrySnapshot;

/// Strategy choosing which reachable worker gets the next job. The
/// dispatch loop only knows this trait, so policies are swappable
/// without touching it.
pub trait WorkerSelector: Send {
    fn select(&mut self, snapshot: &RegistrySnapshot) -> Option<String>;
}

pub fn make_selector(kind: SelectorKind) -> Box<dyn WorkerSelector> {
    match kind {
        SelectorKind::RoundRobin => Box::new(RoundRobin::default()),
        SelectorKind::LeastLoaded => Box::new(LeastLoaded),
    }
}

fn candidates(snapshot: &RegistrySnapshot) -> Vec<&str> {
    let mut list: Vec<&str> = snapshot.reachable.iter().map(String::as_str).collect();
    list.sort_unstable();
    list
}

/// Stable rotation over the sorted reachable list.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl WorkerSelector for RoundRobin {
    fn select(&mut self, snapshot: &RegistrySnapshot) -> Option<String> {
        let list = candidates(snapshot);
        if list.is_empty() {
            return None;
        }
        let picked = list[self.cursor % list.len()].to_string();
        self.cursor = self.cursor.wrapping_add(1);
        Some(picked)
    }
}

/// Lowest mean per-core CPU from the registry snapshot, falling back to
/// memory utilization for workers without CPU telemetry yet.
#[derive(Debug)]
pub struct LeastLoaded;

impl LeastLoaded {
    fn load_of(snapshot: &RegistrySnapshot, addr: &str) -> f64 {
        match snapshot.records.get(addr) {
            Some(record) => record.mean_cpu().unwrap_or(record.memory_usage),
            None => f64::MAX,
        }
    }
}

impl WorkerSelector for LeastLoaded {
    fn select(&mut self, snapshot: &RegistrySnapshot) -> Option<String> {
        candidates(snapshot)
            .into_iter()
            .min_by(|a, b| {
                Self::load_of(snapshot, a).total_cmp(&Self::load_of(snapshot, b))
            })
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use crate::registry::WorkerRecord;

    fn snapshot(workers: &[(&str, &[f64])]) -> RegistrySnapshot {
        let mut snap = RegistrySnapshot::default();
        for (addr, cores) in workers {
            let cpu_usage: HashMap<String, f64> = cores
                .iter()
                .enumerate()
                .map(|(i, usage)| (format!("cpu{i}"), *usage))
                .collect();
            snap.records.insert(
                addr.to_string(),
                WorkerRecord {
                    address: addr.to_string(),
                    cpu_usage,
                    memory_usage: 50.0,
                    machine_name: "test".to_string(),
                    last_seen: Utc::now(),
                },
            );
            snap.reachable.insert(addr.to_string());
        }
        snap
    }

    #[test]
    fn round_robin_rotates_over_sorted_candidates() {
        let snap = snapshot(&[("b:1", &[]), ("a:1", &[]), ("c:1", &[])]);
        let mut selector = RoundRobin::default();
        assert_eq!(selector.select(&snap).as_deref(), Some("a:1"));
        assert_eq!(selector.select(&snap).as_deref(), Some("b:1"));
        assert_eq!(selector.select(&snap).as_deref(), Some("c:1"));
        assert_eq!(selector.select(&snap).as_deref(), Some("a:1"));
    }

    #[test]
    fn round_robin_empty_fleet() {
        let mut selector = RoundRobin::default();
        assert_eq!(selector.select(&RegistrySnapshot::default()), None);
    }

    #[test]
    fn least_loaded_picks_lowest_mean_cpu() {
        let snap = snapshot(&[("a:1", &[80.0, 60.0]), ("b:1", &[10.0, 20.0])]);
        let mut selector = LeastLoaded;
        assert_eq!(selector.select(&snap).as_deref(), Some("b:1"));
    }

    #[test]
    fn least_loaded_ignores_unreachable_records() {
        let mut snap = snapshot(&[("a:1", &[90.0]), ("b:1", &[5.0])]);
        snap.reachable.remove("b:1");
        let mut selector = LeastLoaded;
        assert_eq!(selector.select(&snap).as_deref(), Some("a:1"));
    }
}

//! Watched-directory job dispatch.
//!
//! Each cycle the data directory is scanned; any filename absent from
//! the previous scan is a new artifact and gets dispatched to one worker
//! as a `run_python` job. In-flight jobs are bounded by a semaphore so a
//! burst of artifacts cannot spawn an unbounded number of connections.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MasterConfig;
use crate::master::selector::{make_selector, WorkerSelector};
use crate::protocol;
use crate::registry::WorkerRegistry;

/// Filenames currently present in `dir`.
pub async fn scan_dir(dir: &Path) -> std::io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Filenames present now but absent from the previous scan, in stable
/// order.
pub fn new_artifacts(previous: &HashSet<String>, current: &HashSet<String>) -> Vec<String> {
    let mut fresh: Vec<String> = current.difference(previous).cloned().collect();
    fresh.sort();
    fresh
}

pub struct JobDispatcher {
    registry: Arc<WorkerRegistry>,
    selector: Box<dyn WorkerSelector>,
    data_dir: PathBuf,
    connect_timeout: Duration,
    permits: Arc<Semaphore>,
    previous: HashSet<String>,
}

impl JobDispatcher {
    pub fn new(registry: Arc<WorkerRegistry>, config: &MasterConfig) -> Self {
        Self {
            registry,
            selector: make_selector(config.selector),
            data_dir: config.data_dir.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            permits: Arc::new(Semaphore::new(config.max_inflight_jobs.max(1))),
            previous: HashSet::new(),
        }
    }

    /// Record the directory's current contents without dispatching, so
    /// artifacts that predate startup are not treated as new.
    pub async fn prime(&mut self) {
        match scan_dir(&self.data_dir).await {
            Ok(names) => self.previous = names,
            Err(error) => {
                tracing::warn!(dir = %self.data_dir.display(), %error, "failed to read data directory");
            }
        }
    }

    /// One dispatch cycle. Returns how many jobs were fired.
    pub async fn dispatch_cycle(&mut self) -> usize {
        let current = match scan_dir(&self.data_dir).await {
            Ok(names) => names,
            Err(error) => {
                tracing::warn!(dir = %self.data_dir.display(), %error, "failed to read data directory");
                return 0;
            }
        };

        let fresh = new_artifacts(&self.previous, &current);
        self.previous = current;

        let mut dispatched = 0;
        for artifact in fresh {
            tracing::info!(%artifact, "new job artifact detected");

            let snapshot = self.registry.snapshot().await;
            let Some(worker) = self.selector.select(&snapshot) else {
                tracing::warn!(%artifact, "no reachable worker, job dropped");
                continue;
            };

            self.spawn_job(worker, artifact);
            dispatched += 1;
        }
        dispatched
    }

    /// Fire one job on its own task. The permit is acquired inside the
    /// task so the scan loop never blocks on a full pool.
    fn spawn_job(&self, worker: String, artifact: String) {
        let job_id = Uuid::new_v4();
        let permits = self.permits.clone();
        let timeout = self.connect_timeout;

        tracing::info!(job_id = %job_id, %worker, %artifact, "job assigned");
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                // Semaphore is never closed while the dispatcher lives.
                Err(_) => return,
            };
            match protocol::run_job(&worker, &artifact, timeout).await {
                Ok(lines) => {
                    tracing::info!(
                        job_id = %job_id,
                        %worker,
                        lines = lines.len(),
                        last = lines.last().map(String::as_str).unwrap_or(""),
                        "job stream finished"
                    );
                }
                Err(error) => {
                    tracing::warn!(job_id = %job_id, %worker, %error, "job dispatch failed");
                }
            }
        });
    }

    pub async fn run(mut self, period: Duration, shutdown: CancellationToken) {
        self.prime().await;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.dispatch_cycle().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_artifacts_is_exact_difference() {
        let previous = set(&["a.dat", "b.dat"]);
        let current = set(&["b.dat", "c.dat", "d.dat"]);
        assert_eq!(new_artifacts(&previous, &current), vec!["c.dat", "d.dat"]);
    }

    #[test]
    fn removed_files_are_not_artifacts() {
        let previous = set(&["a.dat", "b.dat"]);
        let current = set(&["a.dat"]);
        assert!(new_artifacts(&previous, &current).is_empty());
    }

    #[test]
    fn first_scan_against_empty_previous() {
        assert_eq!(
            new_artifacts(&HashSet::new(), &set(&["a.dat"])),
            vec!["a.dat"]
        );
    }

    #[tokio::test]
    async fn scan_dir_lists_filenames() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("sample.dat"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("other.dat"), b"y").await.unwrap();

        let names = scan_dir(dir.path()).await.unwrap();
        assert_eq!(names, set(&["sample.dat", "other.dat"]));
    }
}

//! Host telemetry from /proc.
//!
//! CPU utilization needs two time-separated samples of the cumulative
//! per-core counters: a single snapshot only describes the average since
//! boot, not current load. Memory uses MemAvailable rather than MemFree
//! so reclaimable cache does not read as pressure on an idle host.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{FleetError, Result};

const PROC_STAT: &str = "/proc/stat";
const PROC_MEMINFO: &str = "/proc/meminfo";

/// Gap between the two /proc/stat samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Cumulative counters per core: user, nice, system, idle, iowait, irq,
/// softirq — the first seven fields of a /proc/stat cpu line.
pub type CpuSample = HashMap<String, Vec<u64>>;

/// Per-core utilization percentages from two time-separated samples.
pub async fn cpu_usage() -> Result<HashMap<String, f64>> {
    let first = parse_stat(&tokio::fs::read_to_string(PROC_STAT).await?);
    tokio::time::sleep(SAMPLE_INTERVAL).await;
    let second = parse_stat(&tokio::fs::read_to_string(PROC_STAT).await?);
    Ok(usage_between(&first, &second))
}

/// Percent of physical memory in use.
pub async fn memory_usage() -> Result<f64> {
    parse_meminfo(&tokio::fs::read_to_string(PROC_MEMINFO).await?)
}

pub fn machine_name() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Parse the per-core lines of /proc/stat. The aggregate `cpu` line is
/// skipped; malformed lines are ignored.
pub fn parse_stat(data: &str) -> CpuSample {
    let mut sample = CpuSample::new();
    for line in data.lines() {
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else { continue };
        // "cpu0", "cpu1", ... but not the aggregate "cpu"
        if !name.starts_with("cpu") || name.len() == 3 {
            continue;
        }
        let counters: Vec<u64> = fields.take(7).filter_map(|f| f.parse().ok()).collect();
        if counters.len() == 7 {
            sample.insert(name.to_string(), counters);
        }
    }
    sample
}

/// utilization = 1 - Δidle/Δtotal per core, as a percent clamped to
/// [0, 100]. Cores present in only one of the samples are skipped; a
/// core whose counters did not move reads as 0%.
pub fn usage_between(first: &CpuSample, second: &CpuSample) -> HashMap<String, f64> {
    let mut usage = HashMap::new();
    for (core, before) in first {
        let Some(after) = second.get(core) else {
            continue;
        };

        let total_before: u64 = before.iter().sum();
        let total_after: u64 = after.iter().sum();
        let total_delta = total_after.saturating_sub(total_before);
        if total_delta == 0 {
            usage.insert(core.clone(), 0.0);
            continue;
        }

        let idle_delta = after[3].saturating_sub(before[3]);
        let percent = (1.0 - idle_delta as f64 / total_delta as f64) * 100.0;
        usage.insert(core.clone(), percent.clamp(0.0, 100.0));
    }
    usage
}

/// (MemTotal - MemAvailable) / MemTotal as a percent.
pub fn parse_meminfo(data: &str) -> Result<f64> {
    let mut total = None;
    let mut available = None;
    for line in data.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        match key {
            "MemTotal:" => total = value.parse::<u64>().ok(),
            "MemAvailable:" => available = value.parse::<u64>().ok(),
            _ => {}
        }
    }

    match (total, available) {
        (Some(total), Some(available)) if total > 0 => {
            let used = total.saturating_sub(available);
            Ok(used as f64 / total as f64 * 100.0)
        }
        _ => Err(FleetError::Telemetry(
            "MemTotal/MemAvailable missing from /proc/meminfo".to_string(),
        )),
    }
}

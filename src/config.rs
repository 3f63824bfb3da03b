use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{FleetError, Result};

/// Environment variable locating the master's home directory.
pub const MASTER_HOME_ENV: &str = "MASTER_HOME";
/// Environment variable locating the worker's home directory.
pub const WORKER_HOME_ENV: &str = "WORKER_HOME";

/// Resolve the home directory for a role: an explicit CLI override wins,
/// otherwise the environment variable must be set. Missing both is fatal.
pub fn resolve_home(explicit: Option<PathBuf>, env_var: &'static str) -> Result<PathBuf> {
    if let Some(home) = explicit {
        return Ok(home);
    }
    std::env::var_os(env_var)
        .map(PathBuf::from)
        .ok_or(FleetError::MissingHome(env_var))
}

/// Worker-selection strategy for job dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    #[default]
    RoundRobin,
    LeastLoaded,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    /// Worker addresses in host:port form. The registry identity key.
    pub workers: Vec<String>,

    /// Address the HTTP status server binds to.
    #[serde(default = "default_status_addr")]
    pub status_addr: SocketAddr,

    /// Directory of static assets for the status page.
    /// Relative paths are resolved against the home directory.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Directory watched for new job artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Telemetry poll period.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Liveness probe period for unreachable workers.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Bound on every outbound connect and single-object read.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Maximum number of jobs in flight across all workers.
    #[serde(default = "default_max_inflight")]
    pub max_inflight_jobs: usize,

    #[serde(default)]
    pub selector: SelectorKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Address the command listener binds to. Also reported as this
    /// worker's identity in telemetry replies.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Interpreter the job script runs under.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Job script path. The script is configured locally so a remote
    /// caller can never choose the executable. Relative paths are
    /// resolved against the home directory.
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,
}

fn default_status_addr() -> SocketAddr {
    // SAFETY: hardcoded valid address
    "0.0.0.0:8082".parse().expect("default status address is valid")
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("default listen address is valid")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_poll_interval() -> u64 {
    2
}

fn default_probe_interval() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_max_inflight() -> usize {
    4
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_script_path() -> PathBuf {
    PathBuf::from("scripts/compute_job.py")
}

fn config_path(home: &Path) -> PathBuf {
    home.join("config").join("config.yaml")
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| FleetError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_against(home: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = home.join(&*path);
    }
}

impl MasterConfig {
    /// Load `$MASTER_HOME/config/config.yaml` and resolve relative paths.
    pub fn load(home: &Path) -> Result<Self> {
        let path = config_path(home);
        let raw = read_config(&path)?;
        let mut config: MasterConfig =
            serde_yaml::from_str(&raw).map_err(|source| FleetError::ConfigParse {
                path: path.clone(),
                source,
            })?;
        resolve_against(home, &mut config.static_dir);
        resolve_against(home, &mut config.data_dir);
        Ok(config)
    }
}

impl WorkerConfig {
    /// Load `$WORKER_HOME/config/config.yaml` and resolve the script path.
    pub fn load(home: &Path) -> Result<Self> {
        let path = config_path(home);
        let raw = read_config(&path)?;
        let mut config: WorkerConfig =
            serde_yaml::from_str(&raw).map_err(|source| FleetError::ConfigParse {
                path: path.clone(),
                source,
            })?;
        resolve_against(home, &mut config.script_path);
        Ok(config)
    }
}

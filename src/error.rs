use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("{0} is not set")]
    MissingHome(&'static str),

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("connection to worker {addr} failed: {source}")]
    Connection {
        addr: String,
        source: std::io::Error,
    },

    #[error("request to worker {addr} timed out")]
    Timeout { addr: String },

    #[error("malformed reply from worker {addr}: {source}")]
    Decode {
        addr: String,
        source: serde_json::Error,
    },

    #[error("worker {addr} closed the connection before replying")]
    ConnectionClosed { addr: String },

    #[error("telemetry unavailable: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;

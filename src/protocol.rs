//! Wire messages and the master-side client operations of the control
//! protocol.
//!
//! One TCP connection carries exactly one request: the initiator sends a
//! single `Command` as one newline-terminated JSON object, then reads the
//! reply. `infos` and `vivantoupas` answer with one JSON object line;
//! `run_python` answers with a stream of plain-text progress lines that
//! ends when the worker closes the connection.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{FleetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Infos,
    RunPython,
    Vivantoupas,
    /// Any kind this build does not know. Decoding must not fail on it:
    /// the worker answers "unknown command" instead.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command: CommandKind,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Command {
    pub fn infos() -> Self {
        Self {
            command: CommandKind::Infos,
            args: Vec::new(),
        }
    }

    pub fn run_python(arg: impl Into<String>) -> Self {
        Self {
            command: CommandKind::RunPython,
            args: vec![arg.into()],
        }
    }

    pub fn liveness_probe() -> Self {
        Self {
            command: CommandKind::Vivantoupas,
            args: Vec::new(),
        }
    }
}

/// Telemetry reply to an `infos` command. Same shape as the registry's
/// `WorkerRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub address: String,
    pub cpu_usage: HashMap<String, f64>,
    pub memory_usage: f64,
    pub machine_name: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    Available,
    Unavailable,
}

/// Reply to a `vivantoupas` probe. `pending_command` is a diagnostic
/// placeholder and currently always empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessReply {
    pub state: LivenessState,
    #[serde(default)]
    pub pending_command: String,
}

impl LivenessReply {
    pub fn available() -> Self {
        Self {
            state: LivenessState::Available,
            pending_command: String::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == LivenessState::Available
    }
}

/// Serialize `value` as one newline-terminated JSON object.
pub fn encode_line<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut buf = serde_json::to_vec(value)?;
    buf.push(b'\n');
    Ok(buf)
}

async fn dial(addr: &str, limit: Duration) -> Result<TcpStream> {
    let connect = TcpStream::connect(addr);
    match timeout(limit, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(FleetError::Connection {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(FleetError::Timeout {
            addr: addr.to_string(),
        }),
    }
}

async fn read_reply<T: DeserializeOwned>(
    reader: &mut BufReader<OwnedReadHalf>,
    addr: &str,
    limit: Duration,
) -> Result<T> {
    let mut line = String::new();
    let read = timeout(limit, reader.read_line(&mut line))
        .await
        .map_err(|_| FleetError::Timeout {
            addr: addr.to_string(),
        })?
        .map_err(|source| FleetError::Connection {
            addr: addr.to_string(),
            source,
        })?;
    if read == 0 {
        return Err(FleetError::ConnectionClosed {
            addr: addr.to_string(),
        });
    }
    serde_json::from_str(&line).map_err(|source| FleetError::Decode {
        addr: addr.to_string(),
        source,
    })
}

async fn send_request(
    addr: &str,
    cmd: &Command,
    limit: Duration,
) -> Result<(BufReader<OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf)> {
    let stream = dial(addr, limit).await?;
    let (read_half, mut write_half) = stream.into_split();
    let frame = encode_line(cmd).map_err(|source| FleetError::Decode {
        addr: addr.to_string(),
        source,
    })?;
    write_half
        .write_all(&frame)
        .await
        .map_err(|source| FleetError::Connection {
            addr: addr.to_string(),
            source,
        })?;
    Ok((BufReader::new(read_half), write_half))
}

/// Request fresh telemetry from a worker. Connect and reply reads are
/// both bounded by `limit`; a dead address must not stall a poll cycle.
pub async fn request_info(addr: &str, limit: Duration) -> Result<WorkerInfo> {
    let (mut reader, _writer) = send_request(addr, &Command::infos(), limit).await?;
    read_reply(&mut reader, addr, limit).await
}

/// Lightweight liveness probe against a worker believed unreachable.
pub async fn probe(addr: &str, limit: Duration) -> Result<LivenessReply> {
    let (mut reader, _writer) = send_request(addr, &Command::liveness_probe(), limit).await?;
    read_reply(&mut reader, addr, limit).await
}

/// Dispatch a `run_python` job and relay progress lines until the worker
/// closes the connection. Only the connect is bounded by `limit`: a job
/// may legitimately stay silent for long stretches and is not cancellable
/// mid-flight. Returns every progress line, in arrival order.
pub async fn run_job(addr: &str, arg: &str, limit: Duration) -> Result<Vec<String>> {
    let (mut reader, _writer) = send_request(addr, &Command::run_python(arg), limit).await?;

    let mut lines = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|source| FleetError::Connection {
                addr: addr.to_string(),
                source,
            })?;
        // End of stream is the only completion signal.
        if read == 0 {
            break;
        }
        let progress = line.trim_end_matches(['\r', '\n']);
        tracing::info!(worker = %addr, progress, "job progress");
        lines.push(progress.to_string());
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kind_wire_names() {
        let encoded = serde_json::to_string(&Command::run_python("sample.dat")).unwrap();
        assert_eq!(encoded, r#"{"command":"run_python","args":["sample.dat"]}"#);

        let infos: Command = serde_json::from_str(r#"{"command":"infos","args":[]}"#).unwrap();
        assert_eq!(infos.command, CommandKind::Infos);

        let probe: Command = serde_json::from_str(r#"{"command":"vivantoupas"}"#).unwrap();
        assert_eq!(probe.command, CommandKind::Vivantoupas);
        assert!(probe.args.is_empty());
    }

    #[test]
    fn unknown_command_kind_still_decodes() {
        let cmd: Command =
            serde_json::from_str(r#"{"command":"reboot_everything","args":["now"]}"#).unwrap();
        assert_eq!(cmd.command, CommandKind::Unknown);
        assert_eq!(cmd.args, vec!["now"]);
    }

    #[test]
    fn liveness_reply_roundtrip() {
        let reply = LivenessReply::available();
        let encoded = serde_json::to_string(&reply).unwrap();
        assert_eq!(encoded, r#"{"state":"available","pending_command":""}"#);

        let decoded: LivenessReply = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.is_available());
    }

    #[test]
    fn encode_line_is_newline_terminated() {
        let frame = encode_line(&Command::infos()).unwrap();
        assert_eq!(frame.last(), Some(&b'\n'));
        assert_eq!(frame.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn worker_info_decodes_wire_shape() {
        let raw = r#"{
            "address": "10.0.0.1:8080",
            "cpu_usage": {"cpu0": 12.5},
            "memory_usage": 40.0,
            "machine_name": "h1",
            "last_seen": "2026-08-07T10:00:00Z"
        }"#;
        let info: WorkerInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.address, "10.0.0.1:8080");
        assert_eq!(info.cpu_usage.get("cpu0"), Some(&12.5));
        assert_eq!(info.memory_usage, 40.0);
        assert_eq!(info.machine_name, "h1");
    }
}

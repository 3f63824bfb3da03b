//! Per-connection command dispatcher.
//!
//! Every accepted connection carries exactly one command:
//! read line, decode, dispatch, reply or stream, close. A decode failure
//! gets one diagnostic line back; nothing that happens on one connection
//! may take down the listener or any other connection.

use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::process;

use crate::config::WorkerConfig;
use crate::protocol::{encode_line, Command, CommandKind, LivenessReply, WorkerInfo};
use crate::worker::telemetry;

pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, config: Arc<WorkerConfig>) {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => return,
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "failed to read command");
            return;
        }
    }

    let cmd: Command = match serde_json::from_str(&line) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "undecodable command");
            let _ = report_progress(&mut writer, "error: could not decode command").await;
            return;
        }
    };

    tracing::info!(peer = %peer, kind = ?cmd.command, "command received");

    let result = match cmd.command {
        CommandKind::Infos => handle_infos(&mut writer, &config).await,
        CommandKind::RunPython => handle_run_python(&mut writer, &cmd, &config).await,
        CommandKind::Vivantoupas => send_json(&mut writer, &LivenessReply::available()).await,
        CommandKind::Unknown => report_progress(&mut writer, "error: unknown command").await,
    };

    if let Err(e) = result {
        tracing::warn!(peer = %peer, error = %e, "connection handler failed");
    }
}

/// Send one plain-text progress line.
async fn report_progress(writer: &mut OwnedWriteHalf, progress: &str) -> std::io::Result<()> {
    writer.write_all(progress.as_bytes()).await?;
    writer.write_all(b"\n").await
}

/// Send one JSON object line.
async fn send_json<T: Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> std::io::Result<()> {
    let frame = encode_line(value).map_err(std::io::Error::other)?;
    writer.write_all(&frame).await
}

async fn handle_infos(writer: &mut OwnedWriteHalf, config: &WorkerConfig) -> std::io::Result<()> {
    let cpu_usage = match telemetry::cpu_usage().await {
        Ok(usage) => usage,
        Err(e) => {
            tracing::warn!(error = %e, "cpu sampling failed");
            return report_progress(writer, &format!("error: telemetry unavailable: {e}")).await;
        }
    };
    let memory_usage = match telemetry::memory_usage().await {
        Ok(usage) => usage,
        Err(e) => {
            tracing::warn!(error = %e, "memory sampling failed");
            return report_progress(writer, &format!("error: telemetry unavailable: {e}")).await;
        }
    };

    let info = WorkerInfo {
        address: config.listen_addr.to_string(),
        cpu_usage,
        memory_usage,
        machine_name: telemetry::machine_name(),
        last_seen: Utc::now(),
    };
    send_json(writer, &info).await
}

/// Launch the configured script against the job argument and relay its
/// stdout line by line as it is produced. The final line reports success
/// or failure; every failure is content in the stream, never a crash.
async fn handle_run_python(
    writer: &mut OwnedWriteHalf,
    cmd: &Command,
    config: &WorkerConfig,
) -> std::io::Result<()> {
    let Some(arg) = cmd.args.first() else {
        return report_progress(writer, "error: missing job argument").await;
    };

    let mut child = match process::Command::new(&config.interpreter)
        .arg(&config.script_path)
        .arg(arg)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(error = %e, "failed to launch job");
            return report_progress(writer, &format!("error: failed to launch job: {e}")).await;
        }
    };

    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill().await;
        return report_progress(writer, "error: job has no output pipe").await;
    };

    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                report_progress(writer, &format!("Output: {line}")).await?;
            }
            Ok(None) => break,
            Err(e) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                return report_progress(writer, &format!("error: reading job output failed: {e}"))
                    .await;
            }
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => report_progress(writer, "job finished successfully").await,
        Ok(status) => report_progress(writer, &format!("error: job exited with {status}")).await,
        Err(e) => report_progress(writer, &format!("error: failed to collect job status: {e}")).await,
    }
}

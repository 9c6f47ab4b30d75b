//! Capture worker
//!
//! Runs the capture executable once per request and forwards every line it
//! prints, stdout and stderr interleaved as they arrive, to the supervisor.

use async_channel::Sender;
use common::channel::CaptureChannels;
use common::{CaptureResult, Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub async fn run_capture(executable: String, channels: CaptureChannels) -> Result<()> {
    while let Ok(request) = channels.requests.recv().await {
        info!("Running {} with args {:?}", executable, request.args);

        match run_once(&executable, &request.args, &channels.results).await {
            Ok(()) => debug!("Capture run finished"),
            Err(Error::Channel(reason)) => {
                debug!("{}, capture worker stopping", reason);
                return Ok(());
            }
            Err(e) => {
                // Launch and read failures go back as an ordinary output line
                warn!("Capture run failed: {}", e);
                if channels
                    .results
                    .send(CaptureResult {
                        line: e.to_string(),
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
        }
    }

    info!("Capture request channel closed");
    Ok(())
}

async fn forward(results: &Sender<CaptureResult>, line: String) -> Result<()> {
    results
        .send(CaptureResult { line })
        .await
        .map_err(|_| Error::Channel("capture results closed".to_string()))
}

async fn run_once(executable: &str, args: &[String], results: &Sender<CaptureResult>) -> Result<()> {
    let mut child = Command::new(executable)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Io(std::io::Error::other("capture stdout not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Io(std::io::Error::other("capture stderr not piped")))?;

    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        tokio::select! {
            line = out_lines.next_line(), if out_open => match line? {
                Some(line) => forward(results, line).await?,
                None => out_open = false,
            },
            line = err_lines.next_line(), if err_open => match line? {
                Some(line) => forward(results, line).await?,
                None => err_open = false,
            },
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        warn!("Capture executable exited with {}", status);
    }
    Ok(())
}

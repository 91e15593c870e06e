//! threadline - replay recorded assistant event streams
//!
//! Feeds an NDJSON event recording through the frame decoder and stream
//! accumulator in fixed-size chunks, the way a network transport would
//! deliver it, and prints the accumulated message as JSON.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/threadline/ (~/.local/state/threadline/)
//! - Config: $XDG_CONFIG_HOME/threadline/config.toml (~/.config/threadline/config.toml)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::stream;
use std::path::{Path, PathBuf};
use threadline_core::stream::accumulate;
use threadline_core::{Config, MessageStatus, ThreadMessage};

#[derive(Parser)]
#[command(name = "threadline")]
#[command(about = "Replay recorded assistant event streams")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay an NDJSON event file and print the accumulated message
    Replay {
        /// Recorded NDJSON event stream
        file: PathBuf,

        /// Drop a dangling partial line at end of file instead of failing
        #[arg(long)]
        lenient: bool,

        /// Transport chunk size in bytes
        #[arg(long, default_value = "64")]
        chunk_size: usize,

        /// Print every intermediate snapshot (one JSON object per line) first
        #[arg(long)]
        snapshots: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        threadline_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Replay {
            file,
            lenient,
            chunk_size,
            snapshots,
        } => {
            let mut stream_config = config.stream.clone();
            if lenient {
                stream_config.allow_incomplete_line_on_flush = true;
            }
            replay(&file, &stream_config, chunk_size, snapshots).await
        }
    }
}

async fn replay(
    file: &Path,
    config: &threadline_core::StreamConfig,
    chunk_size: usize,
    snapshots: bool,
) -> Result<()> {
    if chunk_size == 0 {
        bail!("--chunk-size must be greater than zero");
    }

    let bytes =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    tracing::info!(
        file = %file.display(),
        bytes = bytes.len(),
        chunk_size,
        lenient = config.allow_incomplete_line_on_flush,
        "Replaying event stream"
    );

    let chunks: Vec<std::io::Result<Vec<u8>>> =
        bytes.chunks(chunk_size).map(|c| Ok(c.to_vec())).collect();
    let mut handle = accumulate(stream::iter(chunks), config);

    let message = if snapshots {
        let mut last = handle.snapshot();
        while let Some(snapshot) = handle.next_snapshot().await {
            println!(
                "{}",
                serde_json::to_string(&snapshot).context("failed to serialize snapshot")?
            );
            last = snapshot;
        }
        last
    } else {
        handle.result().await
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&message).context("failed to serialize message")?
    );

    report_status(&message)
}

/// Fail the process when the stream ended in error
fn report_status(message: &ThreadMessage) -> Result<()> {
    if !message.status.is_error() {
        tracing::info!(message_id = %message.id, status = ?message.status, "Replay finished");
        return Ok(());
    }

    let error = match &message.status {
        MessageStatus::Incomplete {
            error: Some(error), ..
        } => error.as_str(),
        _ => "finish reason was error",
    };
    tracing::warn!(message_id = %message.id, error = %error, "Replay ended with an error");
    bail!("stream ended with an error: {}", error)
}

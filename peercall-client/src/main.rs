use anyhow::Context;
use clap::Parser;
use peercall_client::config::{AppConfig, REMOTE_FRAMES_CHANNEL_CAPACITY};
use peercall_client::{CallSession, CallState, SessionHandle};
use peercall_signaling::transport::tokio::TokioTransport;
use peercall_webrtc::TrackKind;
use peercall_webrtc::rtc::{RemoteFrame, RtcEngine};
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REMOTE_FRAMES_LOG_INTERVAL: u64 = 500;
const COMMANDS_CHANNEL_CAPACITY: usize = 8;

#[derive(Parser, Debug)]
#[command(name = "peercall", version, about = "Peer-to-peer video call client")]
struct Cli {
    /// Directory containing config.toml
    #[arg(long, env = "PEERCALL_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,
    /// Overrides signaling.url from the config
    #[arg(long)]
    signaling_url: Option<String>,
    /// Place the call right after connecting to the signaling server
    #[arg(long, default_value_t = false)]
    start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "{}=debug,peercall_client=debug,peercall_signaling=info,peercall_webrtc=info,peercall_media=info,webrtc=warn",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::parse(&cli.config_dir)?;
    if let Some(url) = cli.signaling_url {
        config.signaling.url = url;
        config.validate()?;
    }
    tracing::debug!(?config, "Loaded config");

    let transport = TokioTransport::connect(&config.signaling.url)
        .await
        .with_context(|| format!("Failed to connect to {}", config.signaling.url))?;

    let (frames_tx, frames_rx) = mpsc::channel(REMOTE_FRAMES_CHANNEL_CAPACITY);
    tokio::spawn(count_remote_frames(frames_rx));
    let engine = RtcEngine::new(config.capture()).with_remote_output(frames_tx);

    let shutdown = CancellationToken::new();
    let session = CallSession::builder(engine, transport)
        .with_settings(config.call_settings())
        .with_shutdown(shutdown.clone())
        .build();
    let (handle, task) = session.start();

    if cli.start
        && let Err(err) = handle.start_call().await
    {
        tracing::error!(%err, "Failed to start call");
    }

    tracing::info!("Type `start` to place the call, `end` or Ctrl-C to hang up");
    tokio::spawn(forward_commands(handle.clone(), spawn_stdin_reader()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, ending call");
            shutdown.cancel();
        }
        _ = handle.wait_for_state(CallState::Ended) => {}
    }

    task.await.context("Call session task failed")?;
    tracing::info!("Bye");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    End,
}

fn parse_command(line: &str) -> Option<Result<Command, String>> {
    match line.trim() {
        "" => None,
        "start" => Some(Ok(Command::Start)),
        "end" => Some(Ok(Command::End)),
        other => Some(Err(other.to_string())),
    }
}

/// Reads commands on a dedicated thread, tokio's stdin would keep the runtime from shutting down.
fn spawn_stdin_reader() -> mpsc::Receiver<Command> {
    let (commands_tx, commands_rx) = mpsc::channel(COMMANDS_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    tracing::warn!(?err, "Failed to read from stdin");
                    break;
                }
            };
            match parse_command(&line) {
                Some(Ok(command)) => {
                    if commands_tx.blocking_send(command).is_err() {
                        break;
                    }
                }
                Some(Err(unknown)) => tracing::warn!(command = %unknown, "Unknown command"),
                None => {}
            }
        }
        tracing::debug!("Stdin closed, no more commands");
    });
    commands_rx
}

async fn forward_commands(handle: SessionHandle, mut commands_rx: mpsc::Receiver<Command>) {
    while let Some(command) = commands_rx.recv().await {
        match command {
            Command::Start => {
                if let Err(err) = handle.start_call().await {
                    tracing::error!(%err, "Failed to start call");
                }
            }
            Command::End => {
                let _ = handle.end_call().await;
                return;
            }
        }
    }
}

async fn count_remote_frames(mut frames_rx: mpsc::Receiver<RemoteFrame>) {
    let mut counts: HashMap<TrackKind, u64> = HashMap::new();

    while let Some(frame) = frames_rx.recv().await {
        let count = counts.entry(frame.kind).or_default();
        *count += 1;
        if *count % REMOTE_FRAMES_LOG_INTERVAL == 1 {
            tracing::debug!(track_id = %frame.track_id, kind = %frame.kind, frames = *count, bytes = frame.payload.len(), "Receiving remote media");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn commands() {
        assert_eq!(parse_command("start\n"), Some(Ok(Command::Start)));
        assert_eq!(parse_command("  end "), Some(Ok(Command::End)));
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("dial"), Some(Err("dial".to_string())));
    }

    #[test]
    fn cli_args() {
        let cli = Cli::parse_from([
            "peercall",
            "--config-dir",
            "/etc/peercall",
            "--signaling-url",
            "wss://relay.example.com/ws",
            "--start",
        ]);
        assert_eq!(cli.config_dir, PathBuf::from("/etc/peercall"));
        assert_eq!(
            cli.signaling_url.as_deref(),
            Some("wss://relay.example.com/ws")
        );
        assert!(cli.start);
    }
}

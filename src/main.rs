//! # AudioHook Client - Command Line Entry Point
//!
//! Connects to an AudioHook server, streams a WAV file (or silence) and lets
//! the operator steer the session from stdin.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The session, the audio pump and stdin all run on tokio
//! - **tokio::select!**: Whichever of "server closed", "signal" or "close
//!   command" happens first ends the run
//! - **Result<T, E>**: Startup failures bubble up through `anyhow`
//!
//! ## Commands (one per line on stdin):
//! - `pause` / `resume`: Stop or restart streaming
//! - `update {"key":"value"}`: Send an update, optionally with parameters
//! - `stats`: Log the session counters
//! - `close`: End the session and exit

use anyhow::Result;
use audiohook_client::audio::PcmSource;
use audiohook_client::transport::WsConnector;
use audiohook_client::{ClientConfig, Phase, SessionClient};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The client entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from audiohook.toml, `.env` and the environment
/// 2. **Sets up logging**
/// 3. **Connects** with a signed handshake and sends `open`
/// 4. **Streams audio** once the server answers `opened`
/// 5. **Closes the session** on a signal, a `close` command, or server request
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = ClientConfig::load()?;
    config.validate()?;

    info!("Starting audiohook-client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        uri = %config.server.uri,
        session_id = %config.session.session_id,
        sample_rate = config.audio.sample_rate,
        "Configuration loaded"
    );

    let source = match &config.audio.wav_path {
        Some(path) => PcmSource::from_wav_file(path, &config.audio)?,
        None => {
            info!("No WAV file configured, streaming silence");
            PcmSource::silence(&config.audio)
        }
    };

    let client = SessionClient::connect(&config, &WsConnector).await?;
    client.attach_audio(Box::new(source)).await?;

    setup_signal_handlers();

    tokio::select! {
        _ = client.wait_closed() => {
            info!("Session closed");
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, closing session...");
        }
        _ = run_commands(&client) => {
            info!("Close requested");
        }
    }

    if client.phase() != Phase::Closed {
        if let Err(e) = client.request_close().await {
            error!("Failed to close session cleanly: {}", e);
        }
    }

    info!(stats = ?client.stats(), "Client stopped");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "info", "audiohook_client=trace")
/// - If not set, defaults to "audiohook_client=debug"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audiohook_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Read operator commands until `close` is entered.
///
/// End of input does not end the session; streaming continues until a
/// signal or the server closes.
async fn run_commands(client: &SessionClient) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read command: {}", e);
                break;
            }
        };

        let (command, rest) = match line.trim().split_once(' ') {
            Some((command, rest)) => (command.to_string(), rest.trim().to_string()),
            None => (line.trim().to_string(), String::new()),
        };

        let result = match command.as_str() {
            "" => continue,
            "pause" => client.request_pause().await,
            "resume" => client.request_resume().await,
            "update" => match parse_parameters(&rest) {
                Ok(parameters) => client.request_update(parameters).await,
                Err(e) => {
                    warn!("Invalid update parameters: {}", e);
                    continue;
                }
            },
            "stats" => {
                info!(stats = ?client.stats(), phase = %client.phase(), "Session stats");
                continue;
            }
            "close" => return,
            other => {
                warn!("Unknown command: {} (expected pause, resume, update, stats or close)", other);
                continue;
            }
        };

        if let Err(e) = result {
            warn!("Command {} failed: {}", command, e);
        }
    }

    std::future::pending::<()>().await
}

/// `update` takes an optional JSON object.
fn parse_parameters(raw: &str) -> Result<Option<Map<String, Value>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(Some(map)),
        _ => anyhow::bail!("update parameters must be a JSON object"),
    }
}

/// Set up signal handlers for graceful shutdown.
///
/// SIGTERM and SIGINT (Ctrl+C) both set the global shutdown flag; the main
/// task then closes the session before exiting.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

//! Calldeck voice-path client - Main entry point
//!
//! Wires the two core subsystems together: the duplex session client feeds
//! streamed speech-synthesis frames into the playback engine, which renders
//! them through the local audio device. Everything else the dashboard does
//! lives elsewhere; this process is only the real-time audio delivery path.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use base64::Engine as _;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use calldeck_client::audio::PlaybackEngine;
use calldeck_client::session::{SessionClient, SessionConfig};
use calldeck_common::config::Config;
use calldeck_common::envelope::MessageKind;

/// Command-line arguments for calldeck-client
#[derive(Parser, Debug)]
#[command(name = "calldeck-client")]
#[command(about = "Real-time voice-path client for the calldeck dashboard")]
#[command(version)]
struct Args {
    /// Duplex session endpoint URL
    #[arg(short, long, env = "CALLDECK_SERVER_URL")]
    url: Option<String>,

    /// Config file path (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Conversation to subscribe to on connect
    #[arg(long)]
    conversation: Option<String>,

    /// Room to subscribe to on connect
    #[arg(long)]
    room: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calldeck_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = Config::load(args.url.as_deref(), args.config.as_deref())
        .context("Failed to load configuration")?;

    let endpoint = url::Url::parse(&config.server_url).context("Invalid session endpoint URL")?;
    if !matches!(endpoint.scheme(), "ws" | "wss") {
        anyhow::bail!("Session endpoint must be a ws:// or wss:// URL, got {}", endpoint);
    }
    info!("Session endpoint: {}", endpoint);

    // Playback engine; a device failure is surfaced once and playback stays
    // inert (pushes become no-ops) rather than crashing the session
    let engine = Arc::new(Mutex::new(PlaybackEngine::new(config.audio_buffer_size)));
    match engine.lock().unwrap().init() {
        Ok(()) => info!("Playback engine initialized"),
        Err(e) => warn!("Audio unavailable, continuing without playback: {}", e),
    }

    // Duplex session client
    let client = SessionClient::new(SessionConfig::from(&config));

    // Route synthesized-speech frames into the playback engine; payload
    // audio arrives base64-encoded inside the JSON envelope
    let engine_for_audio = Arc::clone(&engine);
    let _audio_route = client.on_message(move |envelope| {
        if envelope.message_kind() != MessageKind::AudioDelta {
            return;
        }
        let Some(encoded) = envelope.data.get("audio").and_then(|v| v.as_str()) else {
            warn!("audio_delta envelope without audio payload");
            return;
        };
        match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(bytes) => engine_for_audio.lock().unwrap().push(&bytes),
            Err(e) => warn!("Undecodable audio payload: {}", e),
        }
    });

    // Re-establish topic subscriptions on every (re)connect; the server
    // forgets them when the socket drops
    let client_for_topics = client.clone();
    let conversation = args.conversation.clone();
    let room = args.room.clone();
    let _topic_route = client.on_connect(move || {
        if let Some(id) = conversation.as_deref() {
            client_for_topics.subscribe_to_conversation(id);
        }
        if let Some(id) = room.as_deref() {
            client_for_topics.subscribe_to_room(id);
        }
        client_for_topics.subscribe_to_actions();
    });

    let _disconnect_log = client.on_disconnect(|| info!("Session closed"));
    let _error_log = client.on_error(|e| warn!("Session error: {}", e));

    client.connect();

    shutdown_signal().await;

    // User-initiated stop: flush the audio path and halt reconnection
    engine.lock().unwrap().reset();
    client.disconnect();

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

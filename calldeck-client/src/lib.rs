//! # Calldeck Voice-Path Client (calldeck-client)
//!
//! Real-time audio delivery path for the calldeck assistant dashboard.
//!
//! **Purpose:** Ingest streamed speech-synthesis audio over a resilient
//! duplex session and render it glitch-free through the local audio device.
//!
//! **Architecture:** Two coupled subsystems:
//! - [`audio`]: playback engine with a lock-free producer/consumer handoff
//!   into a real-time render callback (cpal + ringbuf)
//! - [`session`]: auto-reconnecting, topic-multiplexed event transport
//!   (tokio-tungstenite) feeding envelopes to registered handlers

pub mod audio;
pub mod error;
pub mod session;

pub use audio::PlaybackEngine;
pub use error::{Error, Result};
pub use session::{SessionClient, SessionConfig};

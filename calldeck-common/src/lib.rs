//! # Calldeck Common Library
//!
//! Shared code for the calldeck voice-path client:
//! - Wire envelope model for the duplex session (Envelope, ControlFrame)
//! - Topic types for server-side event scoping
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod envelope;
pub mod error;

pub use envelope::{ControlFrame, Envelope, MessageKind, Topic};
pub use error::{Error, Result};

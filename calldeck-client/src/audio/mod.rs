//! Audio playback path
//!
//! Converts streamed PCM16 speech frames to normalized samples, hands them
//! across the real-time boundary through a lock-free command channel, and
//! renders them through the audio device.

pub mod convert;
pub mod engine;
pub mod output;
pub mod queue;

pub use engine::PlaybackEngine;

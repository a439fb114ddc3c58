//! Duplex session client
//!
//! One live connection to the calldeck server, an exponential-backoff
//! reconnection policy, and four independent observer registries for the
//! events the hosting application cares about (message, connect,
//! disconnect, error).

pub mod backoff;
pub mod client;
pub mod registry;

pub use client::{ConnectionState, SessionClient, SessionConfig};
pub use registry::{HandlerId, Registry, Subscription};

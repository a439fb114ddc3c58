//! Duplex session client
//!
//! Owns one live WebSocket connection to the calldeck server and keeps it
//! alive across network interruption: an unexpected close schedules a
//! cancellable deferred reconnect with exponential backoff, while an
//! explicit [`disconnect`](SessionClient::disconnect) permanently halts
//! reconnection. Inbound frames are parsed as [`Envelope`]s and dispatched
//! to the message registry in registration order; malformed frames are
//! logged and dropped.
//!
//! The client is a single long-lived object per application session,
//! created once and reused across reconnects; only the socket handle is
//! recreated per attempt. The transport handle and its hooks are owned
//! exclusively by this client; all interaction goes through its public
//! operations and handler registries.

use crate::session::backoff::ReconnectPolicy;
use crate::session::registry::{Registry, Subscription};
use calldeck_common::envelope::{ControlFrame, Envelope, Topic};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Session client configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Duplex session endpoint URL
    pub url: String,

    /// Backoff base delay (doubles per attempt)
    pub reconnect_base_delay: Duration,

    /// Automatic reconnect attempts before giving up
    pub reconnect_max_attempts: u32,
}

impl SessionConfig {
    /// Config with the standard backoff (1s base, 5 attempts).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_base_delay: Duration::from_millis(
                calldeck_common::config::DEFAULT_RECONNECT_BASE_DELAY_MS,
            ),
            reconnect_max_attempts: calldeck_common::config::DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl From<&calldeck_common::config::Config> for SessionConfig {
    fn from(config: &calldeck_common::config::Config) -> Self {
        Self {
            url: config.server_url.clone(),
            reconnect_base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            reconnect_max_attempts: config.reconnect_max_attempts,
        }
    }
}

/// Mutable session state, guarded by one lock.
///
/// `should_reconnect` is intent, distinct from the transient `phase`: it is
/// set false only by an explicit user-initiated disconnect.
struct SessionState {
    phase: ConnectionState,
    should_reconnect: bool,
    policy: ReconnectPolicy,

    /// Writer half of the live connection (Some while Connected)
    outbound: Option<mpsc::UnboundedSender<Message>>,

    /// Pending deferred reconnect, cancellable by disconnect()
    reconnect_timer: Option<JoinHandle<()>>,

    /// Most recent transport error, cleared on successful open
    last_error: Option<String>,

    /// Bumped by connect() and disconnect(); a connection task whose epoch
    /// no longer matches has been superseded and must not touch state
    epoch: u64,
}

struct Shared {
    config: SessionConfig,
    state: Mutex<SessionState>,
    on_message: Registry<Envelope>,
    on_connect: Registry<()>,
    on_disconnect: Registry<()>,
    on_error: Registry<String>,
}

/// Duplex session client with automatic reconnection.
///
/// Cheap to clone; all clones share the same connection and registries.
/// Methods that start background work (`connect`, and transitively the
/// reconnect timer) must run inside a tokio runtime.
#[derive(Clone)]
pub struct SessionClient {
    shared: Arc<Shared>,
}

/// What to do after a connection ends, decided under the state lock
enum CloseAction {
    Retry { delay: Duration, attempt: u32 },
    GiveUp { max_attempts: u32 },
    Nothing,
}

impl SessionClient {
    pub fn new(config: SessionConfig) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect_base_delay, config.reconnect_max_attempts);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(SessionState {
                    phase: ConnectionState::Disconnected,
                    should_reconnect: true,
                    policy,
                    outbound: None,
                    reconnect_timer: None,
                    last_error: None,
                    epoch: 0,
                }),
                on_message: Registry::new(),
                on_connect: Registry::new(),
                on_disconnect: Registry::new(),
                on_error: Registry::new(),
            }),
        }
    }

    /// Open the connection. No-op while already connecting or connected.
    ///
    /// A manual call after reconnection gave up starts a fresh attempt
    /// cycle; the attempt counter resets on successful open.
    pub fn connect(&self) {
        let epoch = {
            let mut state = self.shared.state.lock().unwrap();
            match state.phase {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    debug!("connect() ignored: already {:?}", state.phase);
                    return;
                }
                ConnectionState::Disconnected => {}
            }
            state.phase = ConnectionState::Connecting;
            state.should_reconnect = true;
            state.epoch += 1;
            state.epoch
        };

        let client = self.clone();
        tokio::spawn(async move {
            client.run_connection(epoch).await;
        });
    }

    /// Permanently close the session.
    ///
    /// Sets the reconnect intent false and cancels any pending reconnect
    /// timer under the same lock, so a scheduled reconnect can never fire
    /// after this returns. The socket handle is released; a later
    /// `connect()` builds a new one.
    pub fn disconnect(&self) {
        let (timer, was_connected) = {
            let mut state = self.shared.state.lock().unwrap();
            state.should_reconnect = false;
            state.epoch += 1;
            let was_connected = state.phase == ConnectionState::Connected;
            state.phase = ConnectionState::Disconnected;
            // Dropping the sender closes the writer loop, which sends the
            // close frame and lets the connection task wind down
            state.outbound = None;
            (state.reconnect_timer.take(), was_connected)
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if was_connected {
            self.shared.on_disconnect.dispatch(&());
        }
        info!("Session disconnected");
    }

    /// Serialize and transmit a frame, at-most-once.
    ///
    /// While not connected the frame is dropped with a warning; nothing is
    /// queued for later delivery and nothing panics. Serialization failure
    /// is logged, not propagated.
    pub fn send<T: Serialize>(&self, frame: &T) {
        let tx = {
            let state = self.shared.state.lock().unwrap();
            if state.phase != ConnectionState::Connected {
                warn!("send() while disconnected; message dropped");
                return;
            }
            match state.outbound.clone() {
                Some(tx) => tx,
                None => {
                    warn!("send() with no live transport; message dropped");
                    return;
                }
            }
        };

        match serde_json::to_string(frame) {
            Ok(json) => {
                if tx.send(Message::Text(json)).is_err() {
                    warn!("Session closing; message dropped");
                }
            }
            Err(e) => error!("Failed to serialize outbound frame: {}", e),
        }
    }

    /// Whether the session is currently connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current connection lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().unwrap().phase
    }

    /// Most recent transport error, if any (cleared on successful open).
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().unwrap().last_error.clone()
    }

    // --- Handler registration ------------------------------------------------

    /// Register a handler for every parsed inbound envelope.
    pub fn on_message(
        &self,
        handler: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.on_message.register(handler)
    }

    /// Register a handler invoked on every successful open.
    pub fn on_connect(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.shared.on_connect.register(move |_: &()| handler())
    }

    /// Register a handler invoked whenever the connection closes.
    pub fn on_disconnect(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.shared.on_disconnect.register(move |_: &()| handler())
    }

    /// Register a handler for surfaced session errors (reconnection given
    /// up). Transient faults recovered by the backoff are not surfaced.
    pub fn on_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> Subscription {
        self.shared.on_error.register(move |e: &String| handler(e))
    }

    // --- Topic subscription helpers ------------------------------------------
    //
    // Fire-and-forget convenience wrappers; the server is the source of
    // truth for active subscriptions, the client tracks nothing.

    pub fn subscribe_to_conversation(&self, conversation_id: &str) {
        self.send(&ControlFrame::subscribe(Topic::Conversation, Some(conversation_id)));
    }

    pub fn unsubscribe_from_conversation(&self, conversation_id: &str) {
        self.send(&ControlFrame::unsubscribe(Topic::Conversation, Some(conversation_id)));
    }

    pub fn subscribe_to_room(&self, room_id: &str) {
        self.send(&ControlFrame::subscribe(Topic::Room, Some(room_id)));
    }

    pub fn unsubscribe_from_room(&self, room_id: &str) {
        self.send(&ControlFrame::unsubscribe(Topic::Room, Some(room_id)));
    }

    pub fn subscribe_to_actions(&self) {
        self.send(&ControlFrame::subscribe(Topic::Actions, None));
    }

    pub fn unsubscribe_from_actions(&self) {
        self.send(&ControlFrame::unsubscribe(Topic::Actions, None));
    }

    // --- Connection internals -------------------------------------------------

    /// Dial, pump, and tear down one connection attempt.
    async fn run_connection(self, epoch: u64) {
        let url = self.shared.config.url.clone();
        debug!("Connecting to {}", url);

        let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!("Connection to {} failed: {}", url, e);
                self.on_closed(epoch, Some(e.to_string()), false);
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let superseded = {
            let mut state = self.shared.state.lock().unwrap();
            if state.epoch != epoch {
                true
            } else {
                state.phase = ConnectionState::Connected;
                state.policy.reset();
                state.outbound = Some(tx);
                state.last_error = None;
                false
            }
        };
        if superseded {
            // disconnect() superseded this attempt while dialing
            debug!("Connection superseded during dial; closing");
            let mut ws = ws;
            let _ = ws.close(None).await;
            return;
        }

        info!("Session connected to {}", url);
        self.shared.on_connect.dispatch(&());

        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            warn!("Transport write failed");
                            break;
                        }
                    }
                    None => {
                        // Writer handle released (explicit disconnect)
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => self.dispatch_inbound(&text),
                    Some(Ok(Message::Close(_))) => {
                        debug!("Server closed the session");
                        break;
                    }
                    Some(Ok(other)) => trace!("Ignoring non-text frame: {:?}", other),
                    Some(Err(e)) => {
                        warn!("Transport error: {}", e);
                        break;
                    }
                    None => break,
                },
            }
        }

        self.on_closed(epoch, None, true);
    }

    /// Parse one inbound frame and dispatch it to the message handlers.
    ///
    /// A malformed frame is logged and dropped; no handler runs, nothing
    /// crashes, and the next well-formed frame is dispatched normally.
    fn dispatch_inbound(&self, text: &str) {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => {
                trace!(kind = %envelope.kind, "Inbound envelope");
                self.shared.on_message.dispatch(&envelope);
            }
            Err(e) => warn!("Dropping malformed inbound frame: {}", e),
        }
    }

    /// Handle the end of a connection attempt (failed dial or closed
    /// socket) and decide whether to schedule a reconnect.
    fn on_closed(&self, epoch: u64, dial_error: Option<String>, was_connected: bool) {
        let action = {
            let mut state = self.shared.state.lock().unwrap();
            if state.epoch != epoch {
                // Superseded by disconnect() or a newer connect()
                return;
            }
            state.phase = ConnectionState::Disconnected;
            state.outbound = None;
            if let Some(e) = dial_error {
                state.last_error = Some(e);
            }

            if state.should_reconnect {
                match state.policy.next_delay() {
                    Some(delay) => CloseAction::Retry {
                        delay,
                        attempt: state.policy.attempts(),
                    },
                    None => CloseAction::GiveUp {
                        max_attempts: state.policy.max_attempts(),
                    },
                }
            } else {
                CloseAction::Nothing
            }
        };

        if was_connected {
            self.shared.on_disconnect.dispatch(&());
        }

        match action {
            CloseAction::Retry { delay, attempt } => {
                info!("Scheduling reconnect attempt {} in {:?}", attempt, delay);
                let client = self.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    client.reconnect_fired();
                });
                self.shared.state.lock().unwrap().reconnect_timer = Some(timer);
            }
            CloseAction::GiveUp { max_attempts } => {
                let message = format!(
                    "Reconnection given up after {} failed attempts",
                    max_attempts
                );
                warn!("{}", message);
                self.shared.state.lock().unwrap().last_error = Some(message.clone());
                self.shared.on_error.dispatch(&message);
            }
            CloseAction::Nothing => {}
        }
    }

    /// Deferred reconnect fired: re-check intent under the lock, then dial.
    fn reconnect_fired(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.reconnect_timer = None;
            if !state.should_reconnect {
                return;
            }
        }
        self.connect();
    }
}

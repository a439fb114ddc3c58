//! Wire envelope model for the duplex session
//!
//! Every message exchanged over the session is wrapped in an envelope:
//! `{ type: string, data: object, timestamp: ISO-8601 }`. The `type` field
//! selects the dispatch target; `data` is opaque to the transport layer and
//! interpreted only by the registered handlers.
//!
//! Outbound control-plane messages (topic subscribe/unsubscribe) use a
//! dedicated tagged union ([`ControlFrame`]) instead of a loose map, with
//! the topic id fields flattened next to `type` as the server expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope kind for streamed synthesized-speech frames
pub const KIND_AUDIO_DELTA: &str = "audio_delta";

/// Envelope kind for conversation state updates
pub const KIND_CONVERSATION_UPDATE: &str = "conversation_update";

/// Envelope kind for room state updates
pub const KIND_ROOM_UPDATE: &str = "room_update";

/// Envelope kind for action state updates
pub const KIND_ACTION_UPDATE: &str = "action_update";

/// Structured wrapper around every message exchanged over the session.
///
/// The payload stays a raw JSON value: this layer routes envelopes, it does
/// not interpret them. Handlers that care about a given kind pull what they
/// need out of `data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Message kind, determines the dispatch target
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque payload body (interpreted by handlers, not by the transport)
    #[serde(default)]
    pub data: serde_json::Value,

    /// Server or client timestamp (ISO-8601)
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Create an envelope with the current timestamp.
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Classify the envelope kind for client-side dispatch specialization.
    ///
    /// Kinds this core does not interpret map to [`MessageKind::Unknown`];
    /// they are still delivered to message handlers unchanged.
    pub fn message_kind(&self) -> MessageKind {
        match self.kind.as_str() {
            KIND_CONVERSATION_UPDATE => MessageKind::ConversationUpdate,
            KIND_ROOM_UPDATE => MessageKind::RoomUpdate,
            KIND_ACTION_UPDATE => MessageKind::ActionUpdate,
            KIND_AUDIO_DELTA => MessageKind::AudioDelta,
            _ => MessageKind::Unknown,
        }
    }
}

/// Typed specialization of the envelope `type` field.
///
/// Covers the kinds the client dispatches on, with an explicit fallback for
/// everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Conversation state changed
    ConversationUpdate,
    /// Room state changed
    RoomUpdate,
    /// Action state changed
    ActionUpdate,
    /// Chunk of streamed synthesized-speech audio
    AudioDelta,
    /// Kind not interpreted by this core
    Unknown,
}

/// Named channel scoping which server-side events reach this client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// A single conversation, selected by `conversation_id`
    Conversation,
    /// A single room, selected by `room_id`
    Room,
    /// The global actions feed (no id)
    Actions,
}

/// Outbound control-plane frame for topic subscription management.
///
/// Serialized flat: `{"type": "subscribe", "topic": "conversation",
/// "conversation_id": "...", "timestamp": "..."}`. The client keeps no
/// local subscription table; the server is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Start receiving events for a topic
    Subscribe {
        topic: Topic,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Stop receiving events for a topic
    Unsubscribe {
        topic: Topic,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ControlFrame {
    /// Build a subscribe frame for `topic`.
    ///
    /// `id` lands in the id field matching the topic (`conversation_id` or
    /// `room_id`); the actions topic carries no id and ignores it.
    pub fn subscribe(topic: Topic, id: Option<&str>) -> Self {
        let (conversation_id, room_id) = Self::id_fields(topic, id);
        ControlFrame::Subscribe {
            topic,
            conversation_id,
            room_id,
            timestamp: Utc::now(),
        }
    }

    /// Build an unsubscribe frame for `topic`.
    pub fn unsubscribe(topic: Topic, id: Option<&str>) -> Self {
        let (conversation_id, room_id) = Self::id_fields(topic, id);
        ControlFrame::Unsubscribe {
            topic,
            conversation_id,
            room_id,
            timestamp: Utc::now(),
        }
    }

    fn id_fields(topic: Topic, id: Option<&str>) -> (Option<String>, Option<String>) {
        match topic {
            Topic::Conversation => (id.map(String::from), None),
            Topic::Room => (None, id.map(String::from)),
            Topic::Actions => (None, None),
        }
    }
}

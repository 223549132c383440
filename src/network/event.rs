//! Notifications a server emits for the embedding application.
//!
//! Events are immutable value objects delivered over a broadcast channel.
//! They exist for the duration of the handler invocation that consumes them
//! and are never retained by the server itself.
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::envelope::{Envelope, Receipt};

/// How many unconsumed events a subscriber may lag behind.
pub const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Started,
    Stopped,
}

#[derive(Clone, Debug)]
pub enum ServerEvent {
    /// A frame was decrypted and deserialized successfully.
    MessageReceived {
        envelope: Envelope<serde_json::Value>,
        /// The decrypted JSON text the envelope was reconstructed from.
        raw: String,
    },
    /// The server is about to answer on the connection identified by
    /// `stream_id`. For malformed inbound messages the correlation id is
    /// the nil uuid.
    ResponseRequested {
        correlation_id: Uuid,
        response: Envelope<Receipt>,
        stream_id: Uuid,
    },
    /// Lifecycle observability for the embedding application.
    StateChanged {
        state: ServerState,
        description: String,
    },
}

pub(crate) fn event_channel() -> broadcast::Sender<ServerEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}

//! Pipelink errors.
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// One or more configuration fields were missing or empty.
    /// Checked before any I/O is attempted, never retried automatically.
    #[error("Invalid channel configuration:\n{}", .0.join("\n"))]
    Validation(Vec<String>),

    #[error("{0}")]
    Connection(String),

    /// A channel level failure, carrying the channel name for context.
    #[error("Transport failure on channel {channel:?}:\n{source}")]
    Transport {
        channel: String,
        source: Box<Error>,
    },

    #[error("Got an empty payload")]
    EmptyPayload,

    #[error("Couldn't serialize envelope:\n{0}")]
    EnvelopeSerialization(String),

    #[error("Couldn't deserialize envelope:\n{0}")]
    EnvelopeDeserialization(String),

    /// The Base64-encoded key didn't decode to exactly 32 bytes.
    #[error("Invalid encryption key: expected 32 bytes after decoding, got {0}")]
    InvalidKey(usize),

    #[error("Encryption error: {0}")]
    Crypto(String),

    /// Explicit cancellation, distinguishable from transport errors.
    #[error("Pipe operation was cancelled.")]
    Cancelled,

    #[error("Couldn't find file: {0}")]
    FileNotFound(String),

    #[error("I/O error while {0}:\n{1}")]
    IoError(String, std::io::Error),

    #[error("Unexpected I/O error:\n{0}")]
    RawIoError(#[from] std::io::Error),

    #[error("I/O error at path {0:?} while {1}:\n{2}")]
    IoPathError(PathBuf, &'static str, std::io::Error),

    /// Thrown if one tries to bind a channel that already has an active
    /// server. Another helper instance might be already running.
    #[error(
        "There seems to be an active server on this channel.\n\
            If you're sure there isn't, remove the stale channel binding manually."
    )]
    ChannelExists,
}

//! The sending side of a channel.
use serde::Serialize;

use super::protocol::*;
use crate::{
    config::ChannelConfig, envelope::Envelope, error::Error, internal_prelude::*,
};

/// Sends envelopes over a named channel.
///
/// A send is fire-and-forget with at-most-once semantics: success only means
/// the bytes were handed to the transport, not that the server processed
/// them. There are no retries in here either; retry count and delay are the
/// caller's business.
pub struct ChannelClient {
    config: ChannelConfig,
    /// A pre-connected stream takes precedence over opening a new
    /// connection. Useful for tests and for callers that pool connections.
    stream: Option<GenericStream>,
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("config", &self.config)
            .field("stream", &self.stream.as_ref().map(|_| "GenericStream<not_debuggable>"))
            .finish()
    }
}

impl ChannelClient {
    pub fn new(config: ChannelConfig) -> Self {
        ChannelClient {
            config,
            stream: None,
        }
    }

    /// Create a client that sends over an already connected stream instead
    /// of opening one itself.
    pub fn with_stream(config: ChannelConfig, stream: GenericStream) -> Self {
        ChannelClient {
            config,
            stream: Some(stream),
        }
    }

    /// Send one envelope over the configured channel.
    ///
    /// The configuration is validated before any I/O happens; every missing
    /// field produces its own error line and they're all reported together.
    /// Transport failures come back as [`Error::Transport`] with the channel
    /// name attached, cancellation as [`Error::Cancelled`]. The connection
    /// is released on every exit path.
    pub async fn send<T: Serialize>(&mut self, envelope: &Envelope<T>) -> Result<String, Error> {
        self.validate(envelope)?;

        let mut bytes = envelope.serialize()?;
        if self.config.use_encryption {
            if let Some(cipher) = &self.config.cipher {
                bytes = cipher.encrypt(&bytes)?;
            }
        }

        let token = self.config.cancellation.clone();
        let channel_name = self.config.channel_name.clone();

        // Acquire a connection: the injected stream if we have one,
        // otherwise a fresh platform stream.
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                result = get_client_stream(&self.config) => result.map_err(|err| {
                    Error::Transport {
                        channel: channel_name.clone(),
                        source: Box::new(err),
                    }
                })?,
            },
        };
        let mut stream = ChannelStream::new(stream);
        debug!(
            "Sending envelope {} over channel {channel_name:?} (stream {})",
            envelope.message_id,
            stream.id()
        );

        let result = tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            result = send_frame(&bytes, stream.get()?) => result.map_err(|err| {
                Error::Transport {
                    channel: channel_name.clone(),
                    source: Box::new(err),
                }
            }),
        };
        stream.release();
        result?;

        Ok(format!(
            "Envelope {} sent over channel {channel_name:?}.",
            envelope.message_id
        ))
    }

    /// Check all required configuration fields in one pass.
    /// Every missing field gets its own line, so the caller sees the whole
    /// picture at once.
    fn validate<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<(), Error> {
        let mut errors = Vec::new();

        if self.config.server_name.trim().is_empty() {
            errors.push("Server name must not be empty.".to_string());
        }
        if self.config.channel_name.trim().is_empty() {
            errors.push("Channel name must not be empty.".to_string());
        }
        match serde_json::to_string(&envelope.payload) {
            Ok(json) if json == "null" || json == "\"\"" => {
                errors.push("Payload must not be empty.".to_string());
            }
            Ok(_) => {}
            Err(err) => errors.push(format!("Payload is not serializable: {err}")),
        }
        if self.config.use_encryption && self.config.cipher.is_none() {
            errors.push("Encryption is enabled, but no cipher is configured.".to_string());
        }

        if errors.is_empty() {
            return Ok(());
        }

        warn!(
            "Refusing to send on channel {:?}:\n{}",
            self.config.channel_name,
            errors.join("\n")
        );
        Err(Error::Validation(errors))
    }
}

//! The receiving side of a channel.
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::event::{event_channel, ServerEvent, ServerState};
use super::protocol::*;
use crate::{
    config::ChannelConfig,
    envelope::{Envelope, Receipt},
    error::Error,
    internal_prelude::*,
};

/// Serves exactly one connection on a named channel.
///
/// A running server moves through `Idle -> Listening -> Connected`, then
/// alternates between reading frames and dispatching them until the binding
/// is cancelled or the transport fails. Each successfully dispatched message
/// is answered with a correlated [`Receipt`] on the same connection.
///
/// Malformed messages are contained: they produce an error receipt with the
/// nil correlation id and the connection stays usable. One bad frame never
/// kills the loop.
///
/// Handling a second client requires a new server instance; there is no
/// multi-client fan-in on a single channel.
pub struct ChannelServer {
    config: ChannelConfig,
    events: broadcast::Sender<ServerEvent>,
    /// A pre-built listener takes precedence over binding a new one.
    /// Useful for tests.
    listener: Option<GenericListener>,
    listening: bool,
}

impl std::fmt::Debug for ChannelServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelServer")
            .field("config", &self.config)
            .field("listening", &self.listening)
            .finish()
    }
}

impl ChannelServer {
    pub fn new(config: ChannelConfig) -> Self {
        ChannelServer {
            config,
            events: event_channel(),
            listener: None,
            listening: false,
        }
    }

    /// Create a server that accepts on an already bound listener instead of
    /// binding one itself.
    pub fn with_listener(config: ChannelConfig, listener: GenericListener) -> Self {
        ChannelServer {
            config,
            events: event_channel(),
            listener: Some(listener),
            listening: false,
        }
    }

    /// Get a receiver for all events this server emits.
    /// Subscribe before calling [`ChannelServer::start`], or early events
    /// will be missed.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// A handle on the token governing this server's pending operations.
    pub fn cancellation(&self) -> CancellationToken {
        self.config.cancellation.clone()
    }

    /// Serve one connection until the binding is cancelled or the transport
    /// fails.
    ///
    /// A cancellation requested before listening begins is re-raised as
    /// [`Error::Cancelled`]. Any other failure to construct the listener is
    /// logged and swallowed; the call then returns cleanly without ever
    /// having listened. This asymmetry is part of the protocol contract.
    pub async fn start(&mut self) -> Result<(), Error> {
        let token = self.config.cancellation.clone();
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => match get_listener(&self.config).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(
                        "Failed to open channel {:?}: {err}",
                        self.config.channel_name
                    );
                    self.notify(ServerEvent::StateChanged {
                        state: ServerState::Stopped,
                        description: format!("Failed to open channel: {err}"),
                    });
                    return Ok(());
                }
            },
        };

        self.listening = true;
        self.notify(ServerEvent::StateChanged {
            state: ServerState::Started,
            description: format!("Listening on channel {:?}", self.config.channel_name),
        });

        self.run(listener, &token).await;

        self.listening = false;
        self.notify(ServerEvent::StateChanged {
            state: ServerState::Stopped,
            description: format!("Stopped serving channel {:?}", self.config.channel_name),
        });

        Ok(())
    }

    /// Stop a server that is currently listening. Idempotent.
    ///
    /// Cancels all pending operations of the binding and arms a fresh
    /// cancellation token so the configuration can be reused.
    pub fn stop(&mut self) {
        if !self.listening {
            debug!(
                "Server on channel {:?} is not listening, nothing to stop",
                self.config.channel_name
            );
            return;
        }

        self.config.cancellation.cancel();
        self.listening = false;
        self.config.reset_cancellation();
    }

    /// Accept one connection and run the read/dispatch loop on it.
    /// All failures in here are contained; they end the run, not the caller.
    async fn run(&mut self, listener: GenericListener, token: &CancellationToken) {
        let accepted = tokio::select! {
            _ = token.cancelled() => {
                trace!(
                    "Channel {:?} cancelled while awaiting a client",
                    self.config.channel_name
                );
                return;
            }
            result = listener.accept() => result,
        };

        let mut stream = match accepted {
            Ok(stream) => ChannelStream::new(stream),
            Err(err) => {
                trace!(
                    "Channel {:?} failed while accepting: {err}",
                    self.config.channel_name
                );
                self.notify_failure(Uuid::nil(), "The channel failed before a message arrived.");
                return;
            }
        };
        info!(
            "Client connected on channel {:?} (stream {})",
            self.config.channel_name,
            stream.id()
        );

        loop {
            let inner = match stream.get() {
                Ok(inner) => inner,
                Err(err) => {
                    trace!("Lost the connection handle: {err}");
                    break;
                }
            };

            let frame = tokio::select! {
                _ = token.cancelled() => {
                    trace!(
                        "Read loop on channel {:?} cancelled",
                        self.config.channel_name
                    );
                    self.notify_failure(
                        stream.id(),
                        "The channel operation was cancelled while reading.",
                    );
                    break;
                }
                result = receive_frame(inner) => match result {
                    Ok(frame) => frame,
                    Err(err) => {
                        trace!(
                            "Transport failure on channel {:?}: {err}",
                            self.config.channel_name
                        );
                        self.notify_failure(stream.id(), "The channel connection failed.");
                        break;
                    }
                },
            };

            // A zero-byte read means there's no data for us yet, not that
            // the conversation is over.
            if frame.is_empty() {
                trace!(
                    "Empty read on channel {:?}, continuing",
                    self.config.channel_name
                );
                tokio::task::yield_now().await;
                continue;
            }

            if let Err(err) = self.dispatch(&frame, &mut stream).await {
                trace!(
                    "Failed to answer on channel {:?}: {err}",
                    self.config.channel_name
                );
                break;
            }
        }

        stream.release();
    }

    /// Turn one frame into an envelope, notify subscribers and answer with
    /// a correlated receipt.
    ///
    /// Undecryptable or malformed frames are answered with a generic error
    /// receipt; only a failure to write the response is returned as an
    /// error, since that means the connection itself is gone.
    async fn dispatch(&mut self, frame: &[u8], stream: &mut ChannelStream) -> Result<(), Error> {
        let bytes = if self.config.use_encryption {
            let decrypted = self
                .config
                .cipher
                .as_ref()
                .ok_or_else(|| Error::Validation(vec![
                    "Encryption is enabled, but no cipher is configured.".to_string(),
                ]))
                .and_then(|cipher| cipher.decrypt(frame));
            match decrypted {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(
                        "Discarding undecryptable message on channel {:?}: {err}",
                        self.config.channel_name
                    );
                    return self.respond_failure(stream).await;
                }
            }
        } else {
            frame.to_vec()
        };

        let envelope = match Envelope::<serde_json::Value>::deserialize(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    "Discarding malformed message on channel {:?}: {err}",
                    self.config.channel_name
                );
                return self.respond_failure(stream).await;
            }
        };

        info!(
            "Received envelope {} on channel {:?}",
            envelope.message_id, self.config.channel_name
        );
        let raw = String::from_utf8_lossy(&bytes).to_string();
        self.notify(ServerEvent::MessageReceived {
            envelope: envelope.clone(),
            raw,
        });

        let response = Envelope::new(Receipt::acknowledge(envelope.message_id));
        self.notify(ServerEvent::ResponseRequested {
            correlation_id: envelope.message_id,
            response: response.clone(),
            stream_id: stream.id(),
        });

        self.write_response(&response, stream).await
    }

    /// Answer a message that couldn't be processed. The peer only ever sees
    /// a generic description, never our error internals.
    async fn respond_failure(&mut self, stream: &mut ChannelStream) -> Result<(), Error> {
        let response = Envelope::new(Receipt::failure("Failed to process message."));
        self.notify(ServerEvent::ResponseRequested {
            correlation_id: Uuid::nil(),
            response: response.clone(),
            stream_id: stream.id(),
        });

        self.write_response(&response, stream).await
    }

    async fn write_response(
        &mut self,
        response: &Envelope<Receipt>,
        stream: &mut ChannelStream,
    ) -> Result<(), Error> {
        let mut bytes = response.serialize()?;
        if self.config.use_encryption {
            if let Some(cipher) = &self.config.cipher {
                bytes = cipher.encrypt(&bytes)?;
            }
        }

        send_frame(&bytes, stream.get()?).await
    }

    /// Best-effort notification that a run ended without a proper response.
    fn notify_failure(&mut self, stream_id: Uuid, description: &str) {
        let response = Envelope::new(Receipt::failure(description));
        self.notify(ServerEvent::ResponseRequested {
            correlation_id: Uuid::nil(),
            response,
            stream_id,
        });
    }

    fn notify(&self, event: ServerEvent) {
        // Nobody listening is fine; events are purely observational.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

    use super::*;
    use crate::network::lifecycle::{ChannelService, Momentary};
    use crate::network::socket::{Listener, Stream};

    /// Replays a fixed sequence of reads, then stays pending forever.
    /// An empty chunk produces a zero-byte read. Writes are collected.
    struct ScriptedStream {
        reads: VecDeque<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl AsyncRead for ScriptedStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            match self.reads.pop_front() {
                Some(chunk) => {
                    buf.put_slice(&chunk);
                    Poll::Ready(Ok(()))
                }
                // Keep the read loop suspended until it gets cancelled.
                None => Poll::Pending,
            }
        }
    }

    impl AsyncWrite for ScriptedStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl Stream for ScriptedStream {}

    /// Hands out one prepared stream, then refuses further connections.
    struct OneShotListener {
        stream: Mutex<Option<GenericStream>>,
    }

    #[async_trait::async_trait]
    impl Listener for OneShotListener {
        async fn accept<'a>(&'a self) -> Result<GenericStream, Error> {
            self.stream
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::Connection("No more connections.".to_string()))
        }
    }

    fn scripted_server(
        reads: Vec<Vec<u8>>,
    ) -> (ChannelServer, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let stream = ScriptedStream {
            reads: reads.into(),
            written: written.clone(),
        };
        let listener = OneShotListener {
            stream: Mutex::new(Some(Box::new(stream))),
        };
        let server = ChannelServer::with_listener(
            ChannelConfig::new("scripted-channel"),
            Box::new(listener),
        );
        (server, written)
    }

    fn valid_envelope_bytes() -> Vec<u8> {
        Envelope::new(serde_json::json!({"Id": 1, "Name": "Test"}))
            .serialize()
            .unwrap()
    }

    #[tokio::test]
    async fn precancelled_start_raises_and_never_listens() {
        let config = ChannelConfig::new("never-started");
        config.cancellation.cancel();
        let mut server = ChannelServer::new(config);

        let result = server.start().await;

        let Err(err) = result else {
            panic!("expected a cancellation error");
        };
        assert_eq!(err.to_string(), "Pipe operation was cancelled.");
        assert!(!server.is_listening());
    }

    #[tokio::test]
    async fn zero_byte_read_keeps_the_connection_alive() {
        // A zero-byte read followed by a valid envelope: the server must
        // still process the second frame.
        let (server, written) = scripted_server(vec![Vec::new(), valid_envelope_bytes()]);
        let mut events = server.subscribe();

        // Momentary shuts the server down after the first real message.
        Momentary::new(server).start().await.unwrap();

        let mut received = None;
        while let Ok(event) = events.try_recv() {
            if let ServerEvent::MessageReceived { envelope, .. } = event {
                received = Some(envelope);
            }
        }
        let envelope = received.expect("the message after the zero-byte read got lost");
        assert_eq!(envelope.payload["Id"], 1);

        // The connection also carried a correlated receipt back.
        let written = written.lock().unwrap();
        let receipt = Envelope::<Receipt>::deserialize(&written).unwrap();
        assert_eq!(receipt.payload.correlation_id, envelope.message_id);
        assert!(receipt.payload.success);
    }

    #[tokio::test]
    async fn malformed_frame_gets_a_nil_receipt_and_the_loop_survives() {
        let (server, written) = scripted_server(vec![
            b"this is not json".to_vec(),
            valid_envelope_bytes(),
        ]);
        let mut events = server.subscribe();

        Momentary::new(server).start().await.unwrap();

        // First response: nil correlation id for the garbage frame.
        // Then the valid envelope must still have been dispatched.
        let mut responses = Vec::new();
        let mut received = None;
        while let Ok(event) = events.try_recv() {
            match event {
                ServerEvent::ResponseRequested { correlation_id, .. } => {
                    responses.push(correlation_id)
                }
                ServerEvent::MessageReceived { envelope, .. } => received = Some(envelope),
                ServerEvent::StateChanged { .. } => {}
            }
        }

        let envelope = received.expect("valid message after the malformed one got lost");
        assert_eq!(responses.first(), Some(&Uuid::nil()));
        assert!(responses.contains(&envelope.message_id));

        // Both receipts were written back on the same connection.
        let written = written.lock().unwrap();
        let text = String::from_utf8_lossy(&written);
        assert_eq!(text.matches("CorrelationId").count(), 2);
    }

    #[tokio::test]
    async fn cancelled_read_loop_emits_a_failure_notification() {
        // An empty script leaves the read loop suspended on a pending read.
        let (mut server, _written) = scripted_server(vec![]);
        let mut events = server.subscribe();
        let token = server.cancellation();

        let handle = tokio::spawn(async move { server.start().await });

        // Let the server accept the connection and block on the read,
        // then cancel the binding mid-read.
        tokio::task::yield_now().await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let mut failure = None;
        while let Ok(event) = events.try_recv() {
            if let ServerEvent::ResponseRequested {
                correlation_id,
                response,
                ..
            } = event
            {
                failure = Some((correlation_id, response));
            }
        }
        let (correlation_id, response) =
            failure.expect("the cancelled read loop ended without a failure notification");
        assert_eq!(correlation_id, Uuid::nil());
        assert!(!response.payload.success);
    }

    #[tokio::test]
    async fn momentary_stops_after_the_first_of_two_messages() {
        let first = Envelope::new(serde_json::json!({"Id": 1, "Name": "First"}));
        let second = Envelope::new(serde_json::json!({"Id": 2, "Name": "Second"}));
        let (server, written) = scripted_server(vec![
            first.serialize().unwrap(),
            second.serialize().unwrap(),
        ]);
        let mut events = server.subscribe();

        // Two envelopes arrive back to back. The policy must still end the
        // run; whether the second one slips through before the cancellation
        // lands is deliberately left open.
        Momentary::new(server).start().await.unwrap();

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServerEvent::MessageReceived { envelope, .. } = event {
                received.push(envelope.message_id);
            }
        }
        assert_eq!(received.first(), Some(&first.message_id));

        // The first message's receipt went out before the run ended.
        let written = written.lock().unwrap();
        let text = String::from_utf8_lossy(&written);
        assert!(text.contains(&first.message_id.to_string()));
    }

    #[tokio::test]
    async fn stop_without_listening_is_a_no_op() {
        let (mut server, _written) = scripted_server(vec![]);
        assert!(!server.is_listening());
        server.stop();
        assert!(!server.is_listening());
    }
}

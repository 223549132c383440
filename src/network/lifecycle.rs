//! Operating policies for a channel server.
//!
//! The policies wrap a [`ChannelServer`](super::server::ChannelServer) by
//! composition and speak the same start/stop contract, so callers pick a
//! policy without caring about the core underneath:
//!
//! - [`Momentary`] serves until the first message got through, then shuts
//!   the core down.
//! - [`Perpetual`] keeps the core running indefinitely, restarting it after
//!   failures. This is the resilience policy for long-lived helper
//!   processes; transient transport failures self-heal without external
//!   supervision.
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::event::{ServerEvent, ServerState};
use super::server::ChannelServer;
use crate::{error::Error, internal_prelude::*};

/// How long [`Perpetual`] waits before restarting a failed run.
pub const RESTART_BACKOFF: Duration = Duration::from_secs(2);

/// The common contract of a channel server and its lifecycle wrappers.
#[async_trait]
pub trait ChannelService: Send {
    async fn start(&mut self) -> Result<(), Error>;
    fn stop(&mut self);
    fn subscribe(&self) -> broadcast::Receiver<ServerEvent>;
    fn cancellation(&self) -> CancellationToken;
}

#[async_trait]
impl ChannelService for ChannelServer {
    async fn start(&mut self) -> Result<(), Error> {
        ChannelServer::start(self).await
    }

    fn stop(&mut self) {
        ChannelServer::stop(self)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        ChannelServer::subscribe(self)
    }

    fn cancellation(&self) -> CancellationToken {
        ChannelServer::cancellation(self)
    }
}

/// Stops the wrapped service after the first successfully received message.
///
/// The shared token is cancelled as soon as the message notification
/// arrives, so the core exits once that message's response went out. A
/// second message racing in before the cancellation takes effect may or may
/// not be processed; that race is part of the contract.
pub struct Momentary<S: ChannelService> {
    inner: S,
}

impl<S: ChannelService> Momentary<S> {
    pub fn new(inner: S) -> Self {
        Momentary { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: ChannelService> ChannelService for Momentary<S> {
    async fn start(&mut self) -> Result<(), Error> {
        let mut events = self.inner.subscribe();
        let token = self.inner.cancellation();

        let watcher = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ServerEvent::MessageReceived { envelope, .. }) => {
                        debug!(
                            "First message {} received, shutting the server down",
                            envelope.message_id
                        );
                        token.cancel();
                        break;
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let result = self.inner.start().await;
        watcher.abort();

        result
    }

    fn stop(&mut self) {
        self.inner.stop()
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.subscribe()
    }

    fn cancellation(&self) -> CancellationToken {
        self.inner.cancellation()
    }
}

/// Restarts the wrapped service until the binding is cancelled.
///
/// A failed run is logged and retried after [`RESTART_BACKOFF`]; the backoff
/// sleep races the same cancellation token, so disposing the binding never
/// hangs on a pending restart. A run that served a connection is restarted
/// right away; a run that ended cleanly without ever reaching the listening
/// state (a swallowed channel-construction failure) is backed off like a
/// failed one.
pub struct Perpetual<S: ChannelService> {
    inner: S,
}

impl<S: ChannelService> Perpetual<S> {
    pub fn new(inner: S) -> Self {
        Perpetual { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

/// Whether a finished run ever reached the listening state.
///
/// A receiver that lagged behind saw a busy run, which only happens after
/// listening began, so lag counts as having listened.
fn run_reached_listening(events: &mut broadcast::Receiver<ServerEvent>) -> bool {
    loop {
        match events.try_recv() {
            Ok(ServerEvent::StateChanged {
                state: ServerState::Started,
                ..
            }) => return true,
            Ok(_) => continue,
            Err(broadcast::error::TryRecvError::Lagged(_)) => return true,
            Err(_) => return false,
        }
    }
}

#[async_trait]
impl<S: ChannelService> ChannelService for Perpetual<S> {
    async fn start(&mut self) -> Result<(), Error> {
        loop {
            let token = self.inner.cancellation();
            if token.is_cancelled() {
                break;
            }

            let mut events = self.inner.subscribe();
            match self.inner.start().await {
                Ok(()) => {
                    if token.is_cancelled() {
                        break;
                    }
                    if run_reached_listening(&mut events) {
                        debug!("Server run finished, restarting");
                        continue;
                    }
                    // A clean return without listening means the channel
                    // couldn't be opened; retrying instantly would just
                    // spin on the same error.
                    error!("Server run never listened. Restarting in {RESTART_BACKOFF:?}.");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(RESTART_BACKOFF) => {}
                    }
                }
                Err(Error::Cancelled) => break,
                Err(err) => {
                    error!("Server run failed: {err}. Restarting in {RESTART_BACKOFF:?}.");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(RESTART_BACKOFF) => {}
                    }
                }
            }
        }

        Ok(())
    }

    fn stop(&mut self) {
        self.inner.stop()
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.subscribe()
    }

    fn cancellation(&self) -> CancellationToken {
        self.inner.cancellation()
    }
}

//! Channel handling is platform specific code.
//!
//! The shared `Listener`/`Stream` abstractions live here; the submodules
//! provide the backend for each supported platform. Depending on the target,
//! the respective platform is read and loaded into this scope.
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::error::Error;

/// A trait that represents the server side of a named channel.
/// This is necessary to easily write generic functions where both platform
/// listeners (and test listeners) can be used.
#[async_trait]
pub trait Listener: Sync + Send {
    async fn accept<'a>(&'a self) -> Result<GenericStream, Error>;
}

/// A trait that represents one end of an established channel connection.
/// This is necessary to write generic functions over the platform stream
/// types.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

/// Convenience type, so we don't have to write `Box<dyn Listener>` all the time.
pub type GenericListener = Box<dyn Listener>;
/// Convenience type, so we don't have to write `Box<dyn Stream>` all the time. \
/// This also prevents name collisions, since `Stream` is imported in many preludes.
pub type GenericStream = Box<dyn Stream>;

/// A thin wrapper around one established connection.
///
/// It owns exactly one underlying OS handle and carries a generated id so
/// log lines can be correlated across reconnect attempts. The handle is
/// released when the wrapper is dropped or [`ChannelStream::release`] is
/// called, on every exit path.
pub struct ChannelStream {
    id: Uuid,
    inner: Option<GenericStream>,
}

impl std::fmt::Debug for ChannelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStream")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ChannelStream {
    pub fn new(stream: GenericStream) -> Self {
        ChannelStream {
            id: Uuid::new_v4(),
            inner: Some(stream),
        }
    }

    /// The generated identifier of this connection, for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_some()
    }

    /// Get a handle on the underlying stream for reading and writing.
    pub fn get(&mut self) -> Result<&mut GenericStream, Error> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::Connection("The channel stream has been released.".to_string()))
    }

    /// Drop the underlying OS handle. Idempotent.
    pub fn release(&mut self) {
        self.inner = None;
    }
}

/// Platform backend providing `get_client_stream` and `get_listener`.
#[cfg_attr(not(target_os = "windows"), path = "unix.rs")]
#[cfg_attr(target_os = "windows", path = "windows.rs")]
mod platform;
pub use self::platform::*;

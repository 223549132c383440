//! The configuration of a single channel binding.
use tokio_util::sync::CancellationToken;

use crate::crypto::Cipher;

/// The server name denoting the local machine.
pub const LOCAL_MACHINE: &str = ".";

/// Everything a client or server needs to operate on one named channel.
///
/// One configuration is shared by exactly one long-lived client or server.
/// Its [`CancellationToken`] is the single authority over the lifetime of
/// all pending operations on this binding; cancelling it aborts any
/// in-flight connect, accept, read or write.
///
/// Cloning the configuration clones the token handle, not the token itself.
/// Keep a clone around if you need to cancel a server you've moved into a
/// background task.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// The machine the channel lives on. `"."` denotes the local machine,
    /// which is the only supported value on unix platforms.
    pub server_name: String,
    pub channel_name: String,
    pub use_encryption: bool,
    pub cipher: Option<Cipher>,
    pub cancellation: CancellationToken,
}

impl ChannelConfig {
    /// A local, unencrypted channel binding.
    ///
    /// The channel name is always supplied explicitly by the caller; there
    /// is no process-wide default.
    pub fn new(channel_name: impl Into<String>) -> Self {
        ChannelConfig {
            server_name: LOCAL_MACHINE.to_string(),
            channel_name: channel_name.into(),
            use_encryption: false,
            cipher: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Enable encryption of all frames on this channel.
    pub fn with_cipher(mut self, cipher: Cipher) -> Self {
        self.use_encryption = true;
        self.cipher = Some(cipher);
        self
    }

    /// Replace a used-up token so the binding can be reused after a stop.
    pub(crate) fn reset_cancellation(&mut self) {
        self.cancellation = CancellationToken::new();
    }
}

#![doc = include_str!("../README.md")]

pub(crate) mod internal_prelude {
    #![allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod network;
pub mod secret;

pub use config::ChannelConfig;
pub use crypto::Cipher;
pub use envelope::{Envelope, Receipt};
pub use error::Error;
pub use network::{ChannelClient, ChannelServer, ChannelService, Momentary, Perpetual};

pub mod prelude {
    pub use super::config::ChannelConfig;
    pub use super::crypto::Cipher;
    pub use super::envelope::{Envelope, Receipt};
    pub use super::error::Error;
    pub use super::network::event::{ServerEvent, ServerState};
    pub use super::network::protocol::{receive_frame, send_frame};
    pub use super::network::{
        ChannelClient, ChannelServer, ChannelService, Momentary, Perpetual,
    };
}

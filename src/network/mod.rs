//! Everything that's necessary to talk between the helper process and its
//! controlling parent.
//!
//! ## Channels
//!
//! Communication happens over a named, local, bidirectional byte channel.
//! On unix systems that's a unix domain socket derived from the channel
//! name, on Windows a named pipe. Exactly one client and one server bind to
//! a shared channel name.
//!
//! ## Communication
//!
//! Raw frames are moved with [`send_frame`](protocol::send_frame) and
//! [`receive_frame`](protocol::receive_frame). One logical message occupies
//! one frame; there is no length prefix.
//!
//! The payload of a frame is a serialized [`Envelope`](crate::Envelope),
//! optionally encrypted with the configured [`Cipher`](crate::Cipher).
//!
//! ## Protocol
//!
//! From the client's perspective:
//!
//! - Connect to the channel.
//! - Send one serialized (and possibly encrypted) envelope.
//! - Optionally await the server's correlated receipt.
//!
//! The server answers every received frame with a
//! [`Receipt`](crate::Receipt) envelope whose correlation id is the
//! originating message id, and notifies its subscribers about everything it
//! sees via [`ServerEvent`](event::ServerEvent).
pub mod client;
pub mod event;
pub mod lifecycle;
/// The framing beneath all communication.
pub mod protocol;
pub mod server;
/// Low-level platform channel handling.
pub mod socket;

pub use client::ChannelClient;
pub use event::{ServerEvent, ServerState};
pub use lifecycle::{ChannelService, Momentary, Perpetual};
pub use server::ChannelServer;

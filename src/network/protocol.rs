//! The wire protocol beneath all channel communication.
//!
//! A logical message occupies exactly one frame. Frames carry no length
//! prefix; the transport is a local channel where one write on the sending
//! side corresponds to one read on the receiving side for messages up to
//! [`FRAME_SIZE`] bytes.
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// Reexport all stream/socket related stuff for convenience purposes
pub use super::socket::*;
use crate::{error::Error, internal_prelude::*};

/// The maximum number of bytes a single read pulls off the channel.
pub const FRAME_SIZE: usize = 4096;

/// Send one frame: write the whole buffer, then flush.
pub async fn send_frame(payload: &[u8], stream: &mut GenericStream) -> Result<(), Error> {
    debug!("Sending frame with {} bytes", payload.len());
    stream
        .write_all(payload)
        .await
        .map_err(|err| Error::IoError("writing frame".to_string(), err))?;

    stream
        .flush()
        .await
        .map_err(|err| Error::IoError("flushing frame".to_string(), err))?;

    Ok(())
}

/// Receive one frame: a single read of up to [`FRAME_SIZE`] bytes.
///
/// An empty result represents a zero-byte read. Whether that means "no data
/// yet" or "peer went away" is up to the caller; the server's read loop
/// keeps listening on it.
pub async fn receive_frame(stream: &mut GenericStream) -> Result<Vec<u8>, Error> {
    let mut buffer = vec![0; FRAME_SIZE];
    let received = stream
        .read(&mut buffer)
        .await
        .map_err(|err| Error::IoError("reading frame".to_string(), err))?;

    buffer.truncate(received);
    debug!("Received frame with {received} bytes");

    Ok(buffer)
}

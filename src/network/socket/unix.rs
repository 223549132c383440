use std::path::PathBuf;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};

use super::{GenericListener, GenericStream, Listener, Stream};
use crate::config::{ChannelConfig, LOCAL_MACHINE};
use crate::error::Error;

impl Stream for UnixStream {}

#[async_trait]
impl Listener for UnixListener {
    async fn accept<'a>(&'a self) -> Result<GenericStream, Error> {
        let (stream, _) = self
            .accept()
            .await
            .map_err(|err| Error::IoError("accepting new channel connection".to_string(), err))?;
        Ok(Box::new(stream))
    }
}

/// Map a channel name to the unix socket path backing it.
pub fn channel_path(channel_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{channel_name}.socket"))
}

/// Get a new stream for the client, connected to the configured channel.
pub async fn get_client_stream(config: &ChannelConfig) -> Result<GenericStream, Error> {
    if config.server_name != LOCAL_MACHINE {
        return Err(Error::Connection(format!(
            "Remote endpoint {:?} is not supported on this platform. \
                Use \".\" for the local machine.",
            config.server_name
        )));
    }

    let path = channel_path(&config.channel_name);
    if !path.exists() {
        return Err(Error::FileNotFound(format!(
            "Channel socket at path {path:?}. Is the server listening?"
        )));
    }

    let stream = UnixStream::connect(&path)
        .await
        .map_err(|err| Error::IoPathError(path, "connecting to channel", err))?;

    Ok(Box::new(stream))
}

/// Get a new listener for the server, bound to the configured channel name.
pub async fn get_listener(config: &ChannelConfig) -> Result<GenericListener, Error> {
    let path = channel_path(&config.channel_name);

    // Check if the socket already exists.
    // In case it does, we have to check whether it's an active socket.
    // If it is, another server is bound to this channel and we have to
    // throw an error. Otherwise we can simply remove it.
    if path.exists() {
        if get_client_stream(config).await.is_ok() {
            return Err(Error::ChannelExists);
        }

        std::fs::remove_file(&path).map_err(|err| {
            Error::IoPathError(path.clone(), "removing stale channel socket", err)
        })?;
    }

    let listener = UnixListener::bind(&path)
        .map_err(|err| Error::IoPathError(path, "binding channel socket", err))?;

    Ok(Box::new(listener))
}

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::net::windows::named_pipe::{
    ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
};

use super::{GenericListener, GenericStream, Listener, Stream};
use crate::config::{ChannelConfig, LOCAL_MACHINE};
use crate::error::Error;

impl Stream for NamedPipeClient {}
impl Stream for NamedPipeServer {}

/// Map a server and channel name to the named pipe address backing it.
fn pipe_address(server_name: &str, channel_name: &str) -> String {
    format!(r"\\{server_name}\pipe\{channel_name}")
}

/// Accepts connections on a named pipe.
///
/// Windows has no listener primitive for pipes. Instead, a fresh server-side
/// pipe instance is created for every accept and handed out once a client
/// connected to it.
pub struct NamedPipeListener {
    address: String,
    first_instance: AtomicBool,
}

#[async_trait]
impl Listener for NamedPipeListener {
    async fn accept<'a>(&'a self) -> Result<GenericStream, Error> {
        let server = ServerOptions::new()
            .first_pipe_instance(self.first_instance.swap(false, Ordering::SeqCst))
            .create(&self.address)
            .map_err(|err| Error::IoError("creating named pipe instance".to_string(), err))?;

        server
            .connect()
            .await
            .map_err(|err| Error::IoError("waiting for a named pipe client".to_string(), err))?;

        Ok(Box::new(server))
    }
}

/// Get a new stream for the client, connected to the configured channel.
pub async fn get_client_stream(config: &ChannelConfig) -> Result<GenericStream, Error> {
    let address = pipe_address(&config.server_name, &config.channel_name);

    let stream = ClientOptions::new().open(&address).map_err(|err| {
        Error::IoError(format!("connecting to named pipe {address}"), err)
    })?;

    Ok(Box::new(stream))
}

/// Get a new listener for the server, bound to the configured channel name.
pub async fn get_listener(config: &ChannelConfig) -> Result<GenericListener, Error> {
    if config.server_name != LOCAL_MACHINE {
        return Err(Error::Connection(
            "Servers can only listen on the local machine. Use \".\" as the server name."
                .to_string(),
        ));
    }

    Ok(Box::new(NamedPipeListener {
        address: pipe_address(LOCAL_MACHINE, &config.channel_name),
        first_instance: AtomicBool::new(true),
    }))
}

// server/mod.rs
//! Inbound command server.
//!
//! The gateway opens a connection to the lamp's fixed port for every command
//! exchange. Each read on that connection is one `ActuatorCommand`; the reply
//! is an `ActuatorComply` written back on the same connection, and the new
//! state is additionally pushed to the gateway's report port.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    codec, commands,
    devices::Device,
    error::Result,
    link::GatewayLink,
    models::{ActuatorCommand, ActuatorComply},
    utils,
};

pub struct CommandServer {
    listener: TcpListener,
    device: Arc<dyn Device>,
    link: GatewayLink,
    idle_timeout: Duration,
    allowed_peer: Option<IpAddr>,
}

impl CommandServer {
    /// Binds the listener. When `allowed_peer` is set, connections from any
    /// other IP are dropped on accept.
    pub async fn bind(
        addr: SocketAddr,
        link: GatewayLink,
        idle_timeout: Duration,
        allowed_peer: Option<IpAddr>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Command server listening");
        Ok(Self {
            listener,
            device: link.device(),
            link,
            idle_timeout,
            allowed_peer,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept command connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            if let Some(allowed) = self.allowed_peer {
                if peer.ip() != allowed {
                    warn!(%peer, gateway = %allowed, "Rejected connection from unknown peer");
                    continue;
                }
            }

            let connection_id = Uuid::new_v4();
            let span = info_span!("command_connection", id = %connection_id, %peer);
            tokio::spawn(
                serve_connection(
                    stream,
                    Arc::clone(&self.device),
                    self.link.clone(),
                    self.idle_timeout,
                )
                .instrument(span),
            );
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    device: Arc<dyn Device>,
    link: GatewayLink,
    idle_timeout: Duration,
) {
    debug!("Gateway connected");
    let mut buf = vec![0u8; codec::MAX_MESSAGE_SIZE];
    // The idle timeout is armed once the first command has arrived.
    let mut armed = false;

    loop {
        let read = if armed {
            match timeout(idle_timeout, stream.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    debug!("Connection idle, closing");
                    break;
                }
            }
        } else {
            stream.read(&mut buf).await
        };

        let n = match read {
            Ok(0) => {
                debug!("Gateway closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Failed to read command");
                break;
            }
        };
        armed = true;

        let comply = process_frame(device.as_ref(), &link, &buf[..n]).await;
        if let Err(e) = codec::write_message(&mut stream, &comply).await {
            debug!(error = %e, "Comply not delivered, peer is gone");
            break;
        }
    }

    utils::close_quietly(stream).await;
}

/// Decodes and executes one command frame, schedules the follow-up push to
/// the report port and builds the comply for the inbound connection.
/// Undecodable frames are answered with `InvalidState`.
pub async fn process_frame(device: &dyn Device, link: &GatewayLink, frame: &[u8]) -> ActuatorComply {
    let status = match codec::decode::<ActuatorCommand>(frame) {
        Ok(command) => {
            info!(
                command = command.command_type().as_str(),
                body = %command.body,
                "Command received"
            );
            commands::execute(device, &command).await
        }
        Err(e) => {
            warn!(error = %e, "Malformed command");
            e.comply_status()
        }
    };

    let link = link.clone();
    tokio::spawn(
        async move {
            if let Err(e) = link.push_update(true).await {
                warn!(error = %e, "State push after command failed");
            }
        }
        .in_current_span(),
    );

    info!(device = device.name(), status = status.as_str(), "Command handled");
    ActuatorComply::new(status, device.get_status().await.to_update(true))
}

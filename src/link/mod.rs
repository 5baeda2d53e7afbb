// link/mod.rs
//! Link to the gateway.
//!
//! Joining is a two-step exchange on the gateway's registration port: the
//! lamp sends a `JoinRequest` and waits for exactly one `JoinReply` carrying
//! the report port. After that every push (heartbeat or command follow-up)
//! opens a short-lived connection to the report port, writes one
//! `ActuatorUpdate` and closes it.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, info, warn};

use crate::{
    codec,
    config::{DeviceSettings, GatewaySettings},
    devices::Device,
    error::{AppError, Result},
    metrics as lamp_metrics,
    models::{Address, JoinReply, JoinRequest},
    server::CommandServer,
    utils,
};

/// What discovery needs from the link.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Joins the gateway at `gateway`. A no-op while a join is in flight or
    /// a link is established.
    async fn connect(&self, gateway: SocketAddr) -> Result<()>;
    async fn disconnect(&self);
    /// IP of the joined gateway, if any.
    async fn gateway_ip(&self) -> Option<IpAddr>;
}

enum Session {
    Closed,
    Joining,
    Joined(JoinedSession),
}

struct JoinedSession {
    gateway: SocketAddr,
    report_addr: SocketAddr,
    command_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

struct LinkInner {
    device: Arc<dyn Device>,
    device_settings: DeviceSettings,
    gateway_settings: GatewaySettings,
    session: Mutex<Session>,
}

#[derive(Clone)]
pub struct GatewayLink {
    inner: Arc<LinkInner>,
}

impl GatewayLink {
    pub fn new(
        device: Arc<dyn Device>,
        device_settings: DeviceSettings,
        gateway_settings: GatewaySettings,
    ) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                device,
                device_settings,
                gateway_settings,
                session: Mutex::new(Session::Closed),
            }),
        }
    }

    pub fn device(&self) -> Arc<dyn Device> {
        Arc::clone(&self.inner.device)
    }

    pub async fn is_joined(&self) -> bool {
        matches!(*self.inner.session.lock().await, Session::Joined(_))
    }

    pub async fn gateway_ip(&self) -> Option<IpAddr> {
        match &*self.inner.session.lock().await {
            Session::Joined(joined) => Some(joined.gateway.ip()),
            _ => None,
        }
    }

    pub async fn report_addr(&self) -> Option<SocketAddr> {
        match &*self.inner.session.lock().await {
            Session::Joined(joined) => Some(joined.report_addr),
            _ => None,
        }
    }

    /// Address the command server is listening on while joined.
    pub async fn command_addr(&self) -> Option<SocketAddr> {
        match &*self.inner.session.lock().await {
            Session::Joined(joined) => Some(joined.command_addr),
            _ => None,
        }
    }

    pub async fn connect(&self, gateway: SocketAddr) -> Result<()> {
        {
            let mut session = self.inner.session.lock().await;
            if !matches!(*session, Session::Closed) {
                debug!(%gateway, "Join already in progress or established");
                return Ok(());
            }
            *session = Session::Joining;
        }

        let joined = self.establish(gateway).await;
        lamp_metrics::record_join(joined.is_ok());
        if joined.is_err() {
            self.close_if_joining().await;
        }
        joined
    }

    async fn establish(&self, gateway: SocketAddr) -> Result<()> {
        // The listen address must be usable before the gateway sees a join.
        let listen_addr = self.listen_addr()?;
        let report_port = self.join(gateway).await?;
        self.enter_data_phase(gateway, listen_addr, report_port).await
    }

    /// Tears the link down: stops the command server and the heartbeat.
    pub async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.inner.session.lock().await, Session::Closed);
        if let Session::Joined(joined) = previous {
            for task in joined.tasks {
                task.abort();
            }
            info!(gateway = %joined.gateway, "Gateway link closed");
        }
    }

    /// Sends the current state to the gateway's report port on a fresh
    /// connection.
    pub async fn push_update(&self, is_online: bool) -> Result<()> {
        let report_addr = self.report_addr().await.ok_or(AppError::NotJoined)?;
        let result = self.send_update(report_addr, is_online).await;
        lamp_metrics::record_push(result.is_ok());
        result
    }

    async fn send_update(&self, report_addr: SocketAddr, is_online: bool) -> Result<()> {
        let mut stream = self.open(report_addr).await?;
        let update = self.inner.device.get_status().await.to_update(is_online);
        let written = codec::write_message(&mut stream, &update).await;
        utils::close_quietly(stream).await;
        written?;
        debug!(%report_addr, state = %update.state, is_online, "Update pushed");
        Ok(())
    }

    async fn open(&self, addr: SocketAddr) -> Result<TcpStream> {
        let stream = timeout(
            self.inner.gateway_settings.connect_timeout(),
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| AppError::Timeout("connecting to the gateway"))??;
        Ok(stream)
    }

    async fn join(&self, gateway: SocketAddr) -> Result<u16> {
        let mut stream = self.open(gateway).await?;
        info!(%gateway, "Connected to gateway, sending join request");

        let request = JoinRequest {
            device_info: Some(self.inner.device.get_status().await.to_device_info()),
            device_address: Some(Address::new(
                self.advertise_ip(&stream)?,
                self.inner.device_settings.port,
            )),
        };
        codec::write_message(&mut stream, &request).await?;

        let reply = timeout(
            self.inner.gateway_settings.connect_timeout(),
            codec::read_message::<_, JoinReply>(&mut stream),
        )
        .await
        .map_err(|_| AppError::Timeout("waiting for the join reply"));
        utils::close_quietly(stream).await;

        let reply = reply??.ok_or_else(|| {
            AppError::Protocol("gateway closed the join connection without replying".into())
        })?;
        u16::try_from(reply.report_port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| AppError::Protocol(format!("invalid report port {}", reply.report_port)))
    }

    fn advertise_ip(&self, stream: &TcpStream) -> Result<IpAddr> {
        match &self.inner.device_settings.advertise_ip {
            Some(ip) => ip
                .parse()
                .map_err(|_| AppError::Validation(format!("invalid advertise_ip {ip:?}"))),
            None => Ok(stream.local_addr()?.ip()),
        }
    }

    fn listen_addr(&self) -> Result<SocketAddr> {
        let settings = &self.inner.device_settings;
        let listen_ip: IpAddr = settings.listen_address.parse().map_err(|_| {
            AppError::Validation(format!("invalid listen_address {:?}", settings.listen_address))
        })?;
        Ok(SocketAddr::new(listen_ip, settings.port))
    }

    async fn enter_data_phase(
        &self,
        gateway: SocketAddr,
        listen_addr: SocketAddr,
        report_port: u16,
    ) -> Result<()> {
        let allowed_peer = self
            .inner
            .device_settings
            .reject_foreign_peers
            .then_some(gateway.ip());

        let server = CommandServer::bind(
            listen_addr,
            self.clone(),
            self.inner.gateway_settings.idle_timeout(),
            allowed_peer,
        )
        .await?;
        let command_addr = server.local_addr()?;
        let tasks = vec![
            tokio::spawn(server.run()),
            tokio::spawn(self.clone().heartbeat()),
        ];

        let mut session = self.inner.session.lock().await;
        if !matches!(*session, Session::Joining) {
            for task in tasks {
                task.abort();
            }
            return Err(AppError::Protocol("link closed while joining".into()));
        }
        let report_addr = SocketAddr::new(gateway.ip(), report_port);
        *session = Session::Joined(JoinedSession {
            gateway,
            report_addr,
            command_addr,
            tasks,
        });
        info!(%gateway, %report_addr, %command_addr, "Joined gateway");
        Ok(())
    }

    async fn close_if_joining(&self) {
        let mut session = self.inner.session.lock().await;
        if matches!(*session, Session::Joining) {
            *session = Session::Closed;
        }
    }

    async fn heartbeat(self) {
        let period = self.inner.gateway_settings.heartbeat_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.push_update(true).await {
                warn!(error = %e, "Heartbeat push failed");
            }
        }
    }
}

#[async_trait]
impl GatewayConnector for GatewayLink {
    async fn connect(&self, gateway: SocketAddr) -> Result<()> {
        GatewayLink::connect(self, gateway).await
    }

    async fn disconnect(&self) {
        GatewayLink::disconnect(self).await
    }

    async fn gateway_ip(&self) -> Option<IpAddr> {
        GatewayLink::gateway_ip(self).await
    }
}

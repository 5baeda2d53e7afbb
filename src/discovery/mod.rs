// discovery/mod.rs
//! Gateway discovery over UDP multicast.
//!
//! The gateway periodically announces its registration `Address` to a fixed
//! multicast group. The first valid announcement of a discovery cycle starts
//! a join; a latch keeps repeated announcements from starting another one.
//! Socket failures are retried with exponential backoff, and running out of
//! attempts is fatal.

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::{
    codec,
    config::DiscoverySettings,
    error::{AppError, Result},
    link::GatewayConnector,
    metrics as lamp_metrics,
    models::Address,
};

/// Exponential backoff with a cap: `min(initial * 2^attempt, max)`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempts: u32,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    pub fn from_settings(settings: &DiscoverySettings) -> Self {
        Self::new(
            settings.max_reconnect_attempts,
            settings.initial_reconnect_delay(),
            settings.max_reconnect_delay(),
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, or `None` once every attempt is used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(self.attempts).unwrap_or(u32::MAX);
        let delay = self.initial_delay.saturating_mul(factor).min(self.max_delay);
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

pub struct MulticastDiscovery {
    settings: DiscoverySettings,
    gateway: Arc<dyn GatewayConnector>,
    join_sent: Arc<AtomicBool>,
    policy: ReconnectPolicy,
    received_since_bind: bool,
    silent_windows: u32,
}

impl MulticastDiscovery {
    pub fn new(settings: DiscoverySettings, gateway: Arc<dyn GatewayConnector>) -> Self {
        let policy = ReconnectPolicy::from_settings(&settings);
        Self {
            settings,
            gateway,
            join_sent: Arc::new(AtomicBool::new(false)),
            policy,
            received_since_bind: false,
            silent_windows: 0,
        }
    }

    /// Listens until reconnection attempts are exhausted, which is the only
    /// way this returns.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let err = match self.listen().await {
                Ok(never) => match never {},
                Err(e) => e,
            };
            warn!(error = %err, "Multicast listener failed");
            self.join_sent.store(false, Ordering::SeqCst);

            let Some(delay) = self.policy.next_delay() else {
                error!(
                    attempts = self.policy.attempts(),
                    "Maximum multicast reconnection attempts reached"
                );
                return Err(AppError::ReconnectExhausted(self.policy.attempts()));
            };
            lamp_metrics::record_multicast_reconnect();
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.policy.attempts(),
                max_attempts = self.settings.max_reconnect_attempts,
                "Reconnecting to multicast group"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn listen(&mut self) -> Result<Infallible> {
        let socket = self.bind().await?;
        info!(
            group = %self.settings.multicast_addr,
            port = self.settings.port,
            "Listening for gateway announcements"
        );

        self.received_since_bind = false;
        self.silent_windows = 0;

        let mut buf = vec![0u8; codec::MAX_MESSAGE_SIZE];
        loop {
            match timeout(self.settings.announcement_timeout(), socket.recv_from(&mut buf)).await {
                Err(_) => self.on_silence().await,
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok((n, from))) => {
                    self.on_datagram(&buf[..n], from).await;
                }
            }
        }
    }

    /// The first datagram after a bind resets the backoff; every datagram
    /// ends a run of silent windows.
    async fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        if !self.received_since_bind {
            self.received_since_bind = true;
            self.policy.reset();
        }
        self.silent_windows = 0;
        self.handle_announcement(datagram, from).await;
    }

    async fn bind(&self) -> Result<UdpSocket> {
        let group: Ipv4Addr = self.settings.multicast_addr.parse().map_err(|_| {
            AppError::Validation(format!("invalid multicast group {:?}", self.settings.multicast_addr))
        })?;
        let interface: Ipv4Addr = self.settings.interface.parse().map_err(|_| {
            AppError::Validation(format!("invalid interface {:?}", self.settings.interface))
        })?;

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.settings.port)).await?;
        socket.join_multicast_v4(group, interface)?;
        Ok(socket)
    }

    /// Handles one datagram. Returns whether a join was started.
    ///
    /// Undecodable datagrams and addresses without an IP or port are dropped
    /// silently. An announcement from a different gateway than the joined one
    /// drops the current link first.
    pub async fn handle_announcement(&self, datagram: &[u8], from: SocketAddr) -> bool {
        let Ok(address) = codec::decode::<Address>(datagram) else {
            trace!(%from, "Ignoring undecodable datagram");
            return false;
        };
        let Some(gateway) = address.socket_addr() else {
            trace!(%from, "Ignoring announcement without gateway address");
            return false;
        };

        if let Some(current) = self.gateway.gateway_ip().await {
            if current == gateway.ip() {
                return false;
            }
            warn!(from = %current, to = %gateway.ip(), "Gateway relocated, dropping link");
            self.gateway.disconnect().await;
            self.join_sent.store(false, Ordering::SeqCst);
        }

        if self.join_sent.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!(%gateway, "Gateway discovered");
        let connector = Arc::clone(&self.gateway);
        let join_sent = Arc::clone(&self.join_sent);
        tokio::spawn(async move {
            if let Err(e) = connector.connect(gateway).await {
                warn!(%gateway, error = %e, "Join failed");
                join_sent.store(false, Ordering::SeqCst);
            }
        });
        true
    }

    async fn on_silence(&mut self) {
        if self.settings.disconnect_after == 0 {
            return;
        }
        let Some(gateway_ip) = self.gateway.gateway_ip().await else {
            self.silent_windows = 0;
            return;
        };

        self.silent_windows += 1;
        debug!(%gateway_ip, missed = self.silent_windows, "No announcement from gateway");
        if self.silent_windows >= self.settings.disconnect_after {
            warn!(
                %gateway_ip,
                missed = self.silent_windows,
                "Gateway stopped announcing, dropping link"
            );
            self.gateway.disconnect().await;
            self.join_sent.store(false, Ordering::SeqCst);
            self.silent_windows = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeGateway {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        joined: Mutex<Option<IpAddr>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl GatewayConnector for FakeGateway {
        async fn connect(&self, gateway: SocketAddr) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Timeout("joining"));
            }
            *self.joined.lock().await = Some(gateway.ip());
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            *self.joined.lock().await = None;
        }

        async fn gateway_ip(&self) -> Option<IpAddr> {
            *self.joined.lock().await
        }
    }

    fn announcement(ip: &str, port: u32) -> Vec<u8> {
        codec::encode(&Address {
            ip: ip.into(),
            port,
            ..Default::default()
        })
    }

    fn discovery(gateway: Arc<FakeGateway>) -> MulticastDiscovery {
        MulticastDiscovery::new(DiscoverySettings::default(), gateway)
    }

    fn sender() -> SocketAddr {
        "10.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn backoff_sequence_is_capped_and_bounded() {
        let mut policy = ReconnectPolicy::from_settings(&DiscoverySettings::default());
        let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            [1000, 2000, 4000, 8000, 16000, 32000, 60000, 60000, 60000, 60000]
        );
        assert_eq!(policy.next_delay(), None);

        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn repeated_announcements_trigger_one_join() {
        let gateway = Arc::new(FakeGateway::default());
        let discovery = discovery(gateway.clone());

        let datagram = announcement("10.0.0.1", 5000);
        assert!(discovery.handle_announcement(&datagram, sender()).await);
        assert!(!discovery.handle_announcement(&datagram, sender()).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(gateway.connects.load(Ordering::SeqCst), 1);

        // Joined: the same gateway keeps announcing.
        assert!(!discovery.handle_announcement(&datagram, sender()).await);
        assert_eq!(gateway.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_announcements_are_ignored() {
        let gateway = Arc::new(FakeGateway::default());
        let discovery = discovery(gateway.clone());

        assert!(!discovery.handle_announcement(&[0x12, 0x10, b'a'], sender()).await);
        assert!(!discovery.handle_announcement(&announcement("", 5000), sender()).await);
        assert!(!discovery.handle_announcement(&announcement("10.0.0.1", 0), sender()).await);
        assert!(!discovery.handle_announcement(&announcement("not-an-ip", 5000), sender()).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gateway.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_join_releases_the_latch() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail.store(true, Ordering::SeqCst);
        let discovery = discovery(gateway.clone());

        let datagram = announcement("10.0.0.1", 5000);
        assert!(discovery.handle_announcement(&datagram, sender()).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        gateway.fail.store(false, Ordering::SeqCst);
        assert!(discovery.handle_announcement(&datagram, sender()).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(gateway.connects.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.gateway_ip().await, Some("10.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn relocated_gateway_is_rejoined() {
        let gateway = Arc::new(FakeGateway::default());
        let discovery = discovery(gateway.clone());

        assert!(discovery.handle_announcement(&announcement("10.0.0.1", 5000), sender()).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(discovery.handle_announcement(&announcement("10.0.0.2", 5000), sender()).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(gateway.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.connects.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.gateway_ip().await, Some("10.0.0.2".parse().unwrap()));
    }

    #[tokio::test]
    async fn silent_gateway_is_dropped_after_threshold() {
        let gateway = Arc::new(FakeGateway::default());
        let mut discovery = discovery(gateway.clone());
        discovery.on_datagram(&announcement("10.0.0.1", 5000), sender()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        discovery.on_silence().await;
        discovery.on_silence().await;
        assert_eq!(gateway.disconnects.load(Ordering::SeqCst), 0);
        discovery.on_silence().await;
        assert_eq!(gateway.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(discovery.silent_windows, 0);

        // A fresh announcement starts a new discovery cycle.
        assert!(discovery.handle_announcement(&announcement("10.0.0.1", 5000), sender()).await);
    }

    #[tokio::test]
    async fn announcement_ends_a_silent_run() {
        let gateway = Arc::new(FakeGateway::default());
        let mut discovery = discovery(gateway.clone());
        let datagram = announcement("10.0.0.1", 5000);
        discovery.on_datagram(&datagram, sender()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        discovery.on_silence().await;
        discovery.on_silence().await;
        discovery.on_datagram(&datagram, sender()).await;
        assert_eq!(discovery.silent_windows, 0);
        discovery.on_silence().await;
        discovery.on_silence().await;
        assert_eq!(gateway.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn silence_is_ignored_while_unlinked() {
        let gateway = Arc::new(FakeGateway::default());
        let mut discovery = discovery(gateway.clone());
        for _ in 0..5 {
            discovery.on_silence().await;
        }
        assert_eq!(discovery.silent_windows, 0);
        assert_eq!(gateway.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_datagram_after_bind_resets_backoff() {
        let gateway = Arc::new(FakeGateway::default());
        let mut discovery = discovery(gateway.clone());
        for _ in 0..4 {
            discovery.policy.next_delay();
        }
        assert_eq!(discovery.policy.attempts(), 4);

        // Undecodable traffic still proves the socket works.
        discovery.on_datagram(&[0x12, 0x10, b'a'], sender()).await;
        assert_eq!(discovery.policy.attempts(), 0);
        assert_eq!(discovery.policy.next_delay(), Some(Duration::from_millis(1000)));

        // Only the first datagram after a bind resets it.
        discovery.policy.next_delay();
        discovery.on_datagram(&announcement("10.0.0.1", 5000), sender()).await;
        assert_eq!(discovery.policy.attempts(), 2);
    }

    #[tokio::test]
    async fn exhausted_reconnects_are_fatal() {
        let settings = DiscoverySettings {
            // Not a multicast group, so joining it fails every time.
            multicast_addr: "127.0.0.1".into(),
            port: 0,
            max_reconnect_attempts: 3,
            initial_reconnect_delay_ms: 1,
            max_reconnect_delay_ms: 2,
            ..Default::default()
        };
        let mut discovery = MulticastDiscovery::new(settings, Arc::new(FakeGateway::default()));
        let err = tokio::time::timeout(Duration::from_secs(5), discovery.run())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, AppError::ReconnectExhausted(3)), "{err}");
    }
}

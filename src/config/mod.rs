// config/mod.rs
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use config::Config;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Settings {
    #[validate(nested)]
    pub device: DeviceSettings,
    #[validate(nested)]
    pub discovery: DiscoverySettings,
    #[validate(nested)]
    pub gateway: GatewaySettings,
    pub metrics: MetricsSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeviceSettings {
    /// `<Category>-<Id>`; the gateway splits the name on `-`.
    #[validate(length(min = 1), custom(function = "validate_device_name"))]
    pub name: String,
    #[validate(custom(function = "validate_ip"))]
    pub listen_address: String,
    #[validate(range(min = 1))]
    pub port: u16,
    /// IP announced in the join request. Defaults to the local address of the
    /// join connection.
    #[validate(custom(function = "validate_ip"))]
    pub advertise_ip: Option<String>,
    pub reject_foreign_peers: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            name: "Lamp-01".to_string(),
            listen_address: "0.0.0.0".to_string(),
            port: 60555,
            advertise_ip: None,
            reject_foreign_peers: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DiscoverySettings {
    #[validate(custom(function = "validate_multicast_group"))]
    pub multicast_addr: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[validate(custom(function = "validate_ipv4"))]
    pub interface: String,
    #[validate(range(min = 1))]
    pub max_reconnect_attempts: u32,
    #[validate(range(min = 1))]
    pub initial_reconnect_delay_ms: u64,
    #[validate(range(min = 1))]
    pub max_reconnect_delay_ms: u64,
    #[validate(range(min = 1))]
    pub announcement_timeout_ms: u64,
    /// Silent announcement windows tolerated before the link is dropped.
    /// `0` disables the check.
    pub disconnect_after: u32,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            multicast_addr: "224.0.1.0".to_string(),
            port: 12345,
            interface: "0.0.0.0".to_string(),
            max_reconnect_attempts: 10,
            initial_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 60_000,
            announcement_timeout_ms: 5_000,
            disconnect_after: 3,
        }
    }
}

impl DiscoverySettings {
    pub fn initial_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn announcement_timeout(&self) -> Duration {
        Duration::from_millis(self.announcement_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GatewaySettings {
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub heartbeat_interval_ms: u64,
    #[validate(range(min = 1))]
    pub idle_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            heartbeat_interval_ms: 5_000,
            idle_timeout_ms: 2_000,
        }
    }
}

impl GatewaySettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then `config/config.*` if present, then `LAMP__*` environment
    /// variables (e.g. `LAMP__DEVICE__PORT=60556`).
    pub fn new() -> Result<Self, config::ConfigError> {
        let settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(config::File::with_name("config/config").required(false))
            .add_source(
                config::Environment::with_prefix("LAMP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}

fn validate_device_name(name: &str) -> Result<(), ValidationError> {
    match name.split_once('-') {
        Some((category, id)) if !category.is_empty() && !id.is_empty() => Ok(()),
        _ => Err(ValidationError::new("device_name_format")),
    }
}

fn validate_ip(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("ip_address"))
}

fn validate_ipv4(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("ipv4_address"))
}

fn validate_multicast_group(addr: &str) -> Result<(), ValidationError> {
    match addr.parse::<Ipv4Addr>() {
        Ok(ip) if ip.is_multicast() => Ok(()),
        _ => Err(ValidationError::new("multicast_group")),
    }
}

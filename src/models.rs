// models.rs
use std::net::{IpAddr, SocketAddr};

use crate::utils;

/// Endpoint announced by the gateway over multicast, or the lamp's own
/// command endpoint inside a join request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Address {
    #[prost(string, tag = "1")]
    pub ip: String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
    #[prost(string, tag = "3")]
    pub broker_ip: String,
    #[prost(uint32, tag = "4")]
    pub broker_port: u32,
    #[prost(string, tag = "5")]
    pub publish_exchange: String,
}

impl Address {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port: u32::from(port),
            ..Default::default()
        }
    }

    /// Resolves to a usable socket address. Empty or unparsable IPs and ports
    /// outside `1..=65535` yield `None`.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.ip.trim().parse().ok()?;
        if ip.is_unspecified() {
            return None;
        }
        let port = u16::try_from(self.port).ok().filter(|p| *p != 0)?;
        Some(SocketAddr::new(ip, port))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DeviceType {
    Unspecified = 0,
    Sensor = 1,
    Actuator = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceInfo {
    #[prost(enumeration = "DeviceType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub state: String,
    #[prost(string, tag = "4")]
    pub metadata: String,
    #[prost(string, tag = "5")]
    pub timestamp: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct JoinRequest {
    #[prost(message, optional, tag = "1")]
    pub device_info: Option<DeviceInfo>,
    #[prost(message, optional, tag = "2")]
    pub device_address: Option<Address>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct JoinReply {
    #[prost(uint32, tag = "1")]
    pub report_port: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ActuatorUpdate {
    #[prost(string, tag = "1")]
    pub device_name: String,
    #[prost(string, tag = "2")]
    pub state: String,
    #[prost(string, tag = "3")]
    pub metadata: String,
    #[prost(string, tag = "4")]
    pub timestamp: String,
    #[prost(bool, tag = "5")]
    pub is_online: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CommandType {
    Unspecified = 0,
    GetState = 1,
    Action = 2,
    SetState = 3,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Unspecified => "unspecified",
            CommandType::GetState => "get_state",
            CommandType::Action => "action",
            CommandType::SetState => "set_state",
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ActuatorCommand {
    #[prost(enumeration = "CommandType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub body: String,
}

impl ActuatorCommand {
    pub fn new(command_type: CommandType, body: impl Into<String>) -> Self {
        Self {
            r#type: command_type as i32,
            body: body.into(),
        }
    }

    /// Unknown type numbers are treated as unspecified.
    pub fn command_type(&self) -> CommandType {
        CommandType::try_from(self.r#type).unwrap_or(CommandType::Unspecified)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ComplyStatus {
    Unspecified = 0,
    Ok = 1,
    Fail = 2,
    UnknownAction = 3,
    InvalidState = 4,
}

impl ComplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplyStatus::Unspecified => "unspecified",
            ComplyStatus::Ok => "ok",
            ComplyStatus::Fail => "fail",
            ComplyStatus::UnknownAction => "unknown_action",
            ComplyStatus::InvalidState => "invalid_state",
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ActuatorComply {
    #[prost(enumeration = "ComplyStatus", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub update: Option<ActuatorUpdate>,
}

impl ActuatorComply {
    pub fn new(status: ComplyStatus, update: ActuatorUpdate) -> Self {
        Self {
            status: status as i32,
            update: Some(update),
        }
    }

    pub fn comply_status(&self) -> ComplyStatus {
        ComplyStatus::try_from(self.status).unwrap_or(ComplyStatus::Unspecified)
    }
}

/// Point-in-time view of a device. Wire snapshots are built from it and
/// stamped with a fresh timestamp on every conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub device_name: String,
    pub state: String,
    pub metadata: String,
}

impl DeviceStatus {
    pub fn to_device_info(&self) -> DeviceInfo {
        DeviceInfo {
            r#type: DeviceType::Actuator as i32,
            name: self.device_name.clone(),
            state: self.state.clone(),
            metadata: self.metadata.clone(),
            timestamp: utils::timestamp(),
        }
    }

    pub fn to_update(&self, is_online: bool) -> ActuatorUpdate {
        ActuatorUpdate {
            device_name: self.device_name.clone(),
            state: self.state.clone(),
            metadata: self.metadata.clone(),
            timestamp: utils::timestamp(),
            is_online,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_requires_ip_and_port() {
        let addr = Address {
            ip: "192.168.0.10".into(),
            port: 5000,
            ..Default::default()
        };
        assert_eq!(addr.socket_addr(), Some("192.168.0.10:5000".parse().unwrap()));

        let no_port = Address {
            ip: "192.168.0.10".into(),
            ..Default::default()
        };
        assert_eq!(no_port.socket_addr(), None);

        let no_ip = Address {
            port: 5000,
            ..Default::default()
        };
        assert_eq!(no_ip.socket_addr(), None);

        let zero_ip = Address {
            ip: "0.0.0.0".into(),
            port: 5000,
            ..Default::default()
        };
        assert_eq!(zero_ip.socket_addr(), None);

        let too_large = Address {
            ip: "10.0.0.1".into(),
            port: 70_000,
            ..Default::default()
        };
        assert_eq!(too_large.socket_addr(), None);
    }

    #[test]
    fn unknown_enum_values_fall_back_to_unspecified() {
        let command = ActuatorCommand {
            r#type: 42,
            body: String::new(),
        };
        assert_eq!(command.command_type(), CommandType::Unspecified);

        let comply = ActuatorComply {
            status: -1,
            update: None,
        };
        assert_eq!(comply.comply_status(), ComplyStatus::Unspecified);
    }

    #[test]
    fn device_info_is_stamped_as_actuator() {
        let status = DeviceStatus {
            device_name: "Lamp-01".into(),
            state: "{}".into(),
            metadata: "{}".into(),
        };
        let info = status.to_device_info();
        assert_eq!(info.r#type, DeviceType::Actuator as i32);
        assert_eq!(info.name, "Lamp-01");
        assert!(!info.timestamp.is_empty());

        let update = status.to_update(true);
        assert!(update.is_online);
        assert_eq!(update.device_name, "Lamp-01");
    }
}

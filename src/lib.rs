// lib.rs
//! Smart lamp actuator node.
//!
//! The lamp finds its gateway through UDP multicast announcements, joins it
//! over TCP, then serves gateway commands on a fixed port while pushing its
//! state to the gateway's report port.

pub mod agent;
pub mod codec;
pub mod commands;
pub mod config;
pub mod devices;
pub mod discovery;
pub mod error;
pub mod link;
pub mod metrics;
pub mod models;
pub mod server;
pub mod utils;

pub use agent::DeviceAgent;
pub use error::{AppError, Result};

// metrics/mod.rs
use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

use crate::models::{CommandType, ComplyStatus};

pub const COMMANDS_TOTAL: &str = "lamp_commands_total";
pub const PUSHES_TOTAL: &str = "lamp_pushes_total";
pub const JOINS_TOTAL: &str = "lamp_joins_total";
pub const MULTICAST_RECONNECTS_TOTAL: &str = "lamp_multicast_reconnects_total";

/// Installs the Prometheus recorder and its HTTP scrape listener.
pub fn setup_metrics(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()
}

pub fn record_command(command_type: CommandType, status: ComplyStatus) {
    counter!(COMMANDS_TOTAL, "type" => command_type.as_str(), "status" => status.as_str())
        .increment(1);
}

pub fn record_push(ok: bool) {
    counter!(PUSHES_TOTAL, "outcome" => outcome(ok)).increment(1);
}

pub fn record_join(ok: bool) {
    counter!(JOINS_TOTAL, "outcome" => outcome(ok)).increment(1);
}

pub fn record_multicast_reconnect() {
    counter!(MULTICAST_RECONNECTS_TOTAL).increment(1);
}

fn outcome(ok: bool) -> &'static str {
    if ok { "ok" } else { "error" }
}

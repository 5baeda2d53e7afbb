// utils.rs
use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Current UTC time as RFC 3339 with milliseconds and an explicit `+00:00` offset.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// Sends FIN and drops the stream. Errors are logged and swallowed.
pub async fn close_quietly(mut stream: TcpStream) {
    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Failed to shut down connection");
    }
}

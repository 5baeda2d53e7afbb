// error.rs
use crate::models::ComplyStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed message: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Unsupported command")]
    UnsupportedCommand,
    #[error("Not joined to a gateway")]
    NotJoined,
    #[error("Gateway protocol error: {0}")]
    Protocol(String),
    #[error("Timed out while {0}")]
    Timeout(&'static str),
    #[error("Multicast reconnection failed {0} times")]
    ReconnectExhausted(u32),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Status reported back to the gateway when a command fails with this error.
    pub fn comply_status(&self) -> ComplyStatus {
        match self {
            AppError::InvalidState(_) | AppError::Json(_) | AppError::Decode(_) => {
                ComplyStatus::InvalidState
            }
            AppError::UnknownAction(_) => ComplyStatus::UnknownAction,
            AppError::UnsupportedCommand => ComplyStatus::Unspecified,
            _ => ComplyStatus::Fail,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

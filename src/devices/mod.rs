// devices/mod.rs
mod smart_lamp;
pub mod state;

pub use smart_lamp::{Action, SmartLamp};
pub use state::{LampColor, LampState, StateStore, Switch};

use crate::{error::AppError, models::DeviceStatus};

#[async_trait::async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> &str;
    async fn perform_action(&self, action: Action) -> Result<(), AppError>;
    /// Validates and applies a JSON state document.
    async fn set_state(&self, body: &str) -> Result<(), AppError>;
    async fn get_status(&self) -> DeviceStatus;
}

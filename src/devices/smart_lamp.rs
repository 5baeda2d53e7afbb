// smart_lamp.rs
use std::str::FromStr;

use async_trait::async_trait;
use tracing::{debug, info};

use super::state::{LampState, StateStore};
use crate::{error::AppError, models::DeviceStatus};

pub const LAMP_METADATA: &str =
    r#"{"isOn":"(yes or no)","Color":"(yellow or white)","Brightness":"(1 to 10)"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TurnOn,
    TurnOff,
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("turn_on") {
            Ok(Action::TurnOn)
        } else if s.eq_ignore_ascii_case("turn_off") {
            Ok(Action::TurnOff)
        } else {
            Err(AppError::UnknownAction(s.to_string()))
        }
    }
}

pub struct SmartLamp {
    name: String,
    store: StateStore,
}

impl SmartLamp {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_state(name, LampState::default())
    }

    pub fn with_state(name: impl Into<String>, initial: LampState) -> Self {
        Self {
            name: name.into(),
            store: StateStore::new(initial),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }
}

#[async_trait]
impl super::Device for SmartLamp {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform_action(&self, action: Action) -> Result<(), AppError> {
        let state = match action {
            Action::TurnOn => self.store.set_power(true).await,
            Action::TurnOff => self.store.set_power(false).await,
        };
        info!(lamp = %self.name, %state, "Action applied");
        Ok(())
    }

    async fn set_state(&self, body: &str) -> Result<(), AppError> {
        match self.store.apply_body(body).await {
            Ok(state) => {
                info!(lamp = %self.name, %state, "State updated");
                Ok(())
            }
            Err(e) => {
                debug!(lamp = %self.name, %body, error = %e, "Rejected state update");
                Err(e)
            }
        }
    }

    async fn get_status(&self) -> DeviceStatus {
        DeviceStatus {
            device_name: self.name.clone(),
            state: self.store.to_json().await,
            metadata: LAMP_METADATA.to_string(),
        }
    }
}

// state.rs
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use validator::Validate;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Switch {
    Yes,
    No,
}

impl TryFrom<String> for Switch {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("yes") {
            Ok(Switch::Yes)
        } else if value.eq_ignore_ascii_case("no") {
            Ok(Switch::No)
        } else {
            Err(format!("expected \"yes\" or \"no\", got {value:?}"))
        }
    }
}

impl From<bool> for Switch {
    fn from(on: bool) -> Self {
        if on { Switch::Yes } else { Switch::No }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum LampColor {
    Yellow,
    White,
}

impl TryFrom<String> for LampColor {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("yellow") {
            Ok(LampColor::Yellow)
        } else if value.eq_ignore_ascii_case("white") {
            Ok(LampColor::White)
        } else {
            Err(format!("expected \"yellow\" or \"white\", got {value:?}"))
        }
    }
}

/// The lamp's state document. Serializes to exactly
/// `{"isOn": ..., "Color": ..., "Brightness": ...}` in that key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LampState {
    #[serde(rename = "isOn")]
    pub is_on: Switch,
    #[serde(rename = "Color")]
    pub color: LampColor,
    #[validate(range(min = 1, max = 10))]
    #[serde(rename = "Brightness")]
    pub brightness: i64,
}

impl Default for LampState {
    fn default() -> Self {
        Self {
            is_on: Switch::Yes,
            color: LampColor::Yellow,
            brightness: 10,
        }
    }
}

impl LampState {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

impl fmt::Display for LampState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

/// Checks a `SET_STATE` body against `current` and returns the state that
/// results from applying it.
///
/// Every key of the body must already exist in the current state, but only
/// the first key (in document order) is validated and applied; later keys are
/// ignored.
pub fn validate_state_body(current: &LampState, body: &str) -> Result<LampState> {
    let parsed: Value = serde_json::from_str(body)?;
    let Value::Object(fields) = parsed else {
        return Err(AppError::InvalidState("body is not a JSON object".into()));
    };

    let mut candidate = current.to_map();
    if let Some(unknown) = fields.keys().find(|k| !candidate.contains_key(k.as_str())) {
        return Err(AppError::InvalidState(format!("unknown key {unknown:?}")));
    }

    let Some((key, value)) = fields.into_iter().next() else {
        return Err(AppError::InvalidState("body has no keys".into()));
    };
    candidate.insert(key.clone(), value);

    let next: LampState = serde_json::from_value(Value::Object(candidate))
        .map_err(|e| AppError::InvalidState(format!("{key}: {e}")))?;
    next.validate()
        .map_err(|e| AppError::InvalidState(format!("{key}: {e}")))?;
    Ok(next)
}

/// Holds the lamp state. Every mutation happens under one write lock so a
/// read-validate-write sequence can't interleave with another command.
#[derive(Debug, Default)]
pub struct StateStore {
    state: RwLock<LampState>,
}

impl StateStore {
    pub fn new(initial: LampState) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    pub async fn snapshot(&self) -> LampState {
        self.state.read().await.clone()
    }

    pub async fn to_json(&self) -> String {
        self.state.read().await.to_json()
    }

    pub async fn set_power(&self, on: bool) -> LampState {
        let mut state = self.state.write().await;
        state.is_on = Switch::from(on);
        state.clone()
    }

    /// Validates `body` and applies it. The state is untouched on error.
    pub async fn apply_body(&self, body: &str) -> Result<LampState> {
        let mut state = self.state.write().await;
        let next = validate_state_body(&state, body)?;
        *state = next.clone();
        Ok(next)
    }
}

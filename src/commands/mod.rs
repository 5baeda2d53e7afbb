// commands/mod.rs
use async_trait::async_trait;
use tracing::debug;

use crate::{
    devices::{Action, Device},
    error::AppError,
    metrics as lamp_metrics,
    models::{ActuatorCommand, CommandType, ComplyStatus},
};

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, device: &dyn Device) -> Result<(), AppError>;
}

/// Builds a handler for one command type from the command body.
pub trait CommandFactory: Sync {
    fn command_type(&self) -> CommandType;
    fn create(&self, body: &str) -> Result<Box<dyn CommandHandler>, AppError>;
}

inventory::collect!(&'static dyn CommandFactory);

pub fn factory_for(command_type: CommandType) -> Option<&'static dyn CommandFactory> {
    inventory::iter::<&'static dyn CommandFactory>
        .into_iter()
        .find(|f| f.command_type() == command_type)
        .copied()
}

/// Runs a gateway command against `device` and returns the status to report.
/// Command types without a registered handler report `Unspecified`.
pub async fn execute(device: &dyn Device, command: &ActuatorCommand) -> ComplyStatus {
    let command_type = command.command_type();
    let result = match factory_for(command_type) {
        Some(factory) => match factory.create(&command.body) {
            Ok(handler) => handler.execute(device).await,
            Err(e) => Err(e),
        },
        None => Err(AppError::UnsupportedCommand),
    };

    let status = match result {
        Ok(()) => ComplyStatus::Ok,
        Err(e) => {
            debug!(command = command_type.as_str(), body = %command.body, error = %e, "Command rejected");
            e.comply_status()
        }
    };
    lamp_metrics::record_command(command_type, status);
    status
}

pub struct GetStateCommand;

#[async_trait]
impl CommandHandler for GetStateCommand {
    async fn execute(&self, _device: &dyn Device) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct GetStateCommandFactory;

impl CommandFactory for GetStateCommandFactory {
    fn command_type(&self) -> CommandType {
        CommandType::GetState
    }

    fn create(&self, _body: &str) -> Result<Box<dyn CommandHandler>, AppError> {
        Ok(Box::new(GetStateCommand))
    }
}

inventory::submit! {
    &GetStateCommandFactory as &'static dyn CommandFactory
}

pub struct ActionCommand {
    action: Action,
}

#[async_trait]
impl CommandHandler for ActionCommand {
    async fn execute(&self, device: &dyn Device) -> Result<(), AppError> {
        device.perform_action(self.action).await
    }
}

pub struct ActionCommandFactory;

impl CommandFactory for ActionCommandFactory {
    fn command_type(&self) -> CommandType {
        CommandType::Action
    }

    fn create(&self, body: &str) -> Result<Box<dyn CommandHandler>, AppError> {
        let action = body.parse::<Action>()?;
        Ok(Box::new(ActionCommand { action }))
    }
}

inventory::submit! {
    &ActionCommandFactory as &'static dyn CommandFactory
}

/// Validation needs the current state, so it happens inside `execute`.
pub struct SetStateCommand {
    body: String,
}

#[async_trait]
impl CommandHandler for SetStateCommand {
    async fn execute(&self, device: &dyn Device) -> Result<(), AppError> {
        device.set_state(&self.body).await
    }
}

pub struct SetStateCommandFactory;

impl CommandFactory for SetStateCommandFactory {
    fn command_type(&self) -> CommandType {
        CommandType::SetState
    }

    fn create(&self, body: &str) -> Result<Box<dyn CommandHandler>, AppError> {
        Ok(Box::new(SetStateCommand {
            body: body.to_string(),
        }))
    }
}

inventory::submit! {
    &SetStateCommandFactory as &'static dyn CommandFactory
}

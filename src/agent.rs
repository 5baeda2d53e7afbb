// agent.rs
use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::Settings,
    devices::SmartLamp,
    discovery::MulticastDiscovery,
    error::Result,
    link::GatewayLink,
};

/// Owns the lamp and its gateway link and drives discovery.
pub struct DeviceAgent {
    settings: Settings,
    lamp: Arc<SmartLamp>,
    link: GatewayLink,
}

impl DeviceAgent {
    pub fn new(settings: Settings) -> Self {
        let lamp = Arc::new(SmartLamp::new(settings.device.name.clone()));
        let link = GatewayLink::new(
            lamp.clone(),
            settings.device.clone(),
            settings.gateway.clone(),
        );
        Self {
            settings,
            lamp,
            link,
        }
    }

    pub fn lamp(&self) -> &Arc<SmartLamp> {
        &self.lamp
    }

    pub fn link(&self) -> &GatewayLink {
        &self.link
    }

    /// Runs discovery until multicast reconnection is exhausted.
    pub async fn run(&self) -> Result<()> {
        info!(device = %self.settings.device.name, "Starting lamp agent");
        let mut discovery =
            MulticastDiscovery::new(self.settings.discovery.clone(), Arc::new(self.link.clone()));
        discovery.run().await
    }

    /// Tells the gateway the lamp is going offline and drops the link.
    pub async fn shutdown(&self) {
        if self.link.is_joined().await {
            if let Err(e) = self.link.push_update(false).await {
                warn!(error = %e, "Failed to report offline state");
            }
        }
        self.link.disconnect().await;
        info!("Lamp agent stopped");
    }
}

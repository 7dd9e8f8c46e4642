// Application state (AppState)

use crate::controller::handle::ControllerHandle;
use crate::core::config::Config;
use crate::status::bus::EventBus;
use std::sync::Arc;

/// Shared application state
///
/// Everything the control surface handlers need. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Inbox of the controller task
    pub controller: ControllerHandle,

    /// Outbound status, stats and ready events
    pub bus: EventBus,

    /// Configuration
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, controller: ControllerHandle, bus: EventBus) -> Self {
        Self {
            controller,
            bus,
            config: Arc::new(config),
        }
    }
}

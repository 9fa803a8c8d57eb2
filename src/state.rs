//! Shared application state for the built-in handlers.
//!
//! Cloned per request; every field is behind an `Arc` or is itself a cheap
//! shared handle.

use std::sync::Arc;

use crate::config::Config;
use crate::handlers::{HealthRegistry, ServerVersion};

#[derive(Clone, Debug)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Build information served at `/version`
    pub version: Arc<ServerVersion>,
    /// Checks run by `/healthz`
    pub health: HealthRegistry,
}

impl AppState {
    pub fn new(config: Config, version: ServerVersion, health: HealthRegistry) -> Self {
        Self {
            config: Arc::new(config),
            version: Arc::new(version),
            health,
        }
    }
}

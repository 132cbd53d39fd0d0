//! Application state for the datasource service.

use std::sync::Arc;

use common::config::AppConfig;
use federation::{FederationService, InMemoryRegistry};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub federation: FederationService,
}

impl AppState {
    /// Creates a new application state with an empty in-memory registry.
    pub fn new(config: AppConfig) -> Self {
        Self {
            federation: FederationService::new(&config, Arc::new(InMemoryRegistry::new())),
            config,
        }
    }
}

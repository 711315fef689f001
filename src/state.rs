//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;

use crate::config::Config;
use crate::inventory::HostDirectory;
use crate::registry::SessionRegistry;

/// Shared application state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Process-wide session registry.
    pub registry: SessionRegistry,
    /// Read-only host descriptor lookup.
    pub directory: Arc<dyn HostDirectory>,
}

//! Application state for the API server.

use std::sync::Arc;

use tapwire_core::{Broadcaster, ExchangeStore, LifecycleStore, DEFAULT_STORE_CAPACITY};

use crate::hub::DashboardHub;

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Captured exchanges, shared with the proxy.
    pub exchanges: Arc<ExchangeStore>,
    /// Ingested lifecycle events.
    pub lifecycle: Arc<LifecycleStore>,
    /// Live push hub.
    pub hub: DashboardHub,
}

impl AppState {
    /// Creates application state around existing stores.
    pub fn new(
        exchanges: Arc<ExchangeStore>,
        lifecycle: Arc<LifecycleStore>,
        hub: DashboardHub,
    ) -> Self {
        Self {
            exchanges,
            lifecycle,
            hub,
        }
    }

    /// Creates application state with fresh stores of the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(
            Arc::new(ExchangeStore::new(capacity)),
            Arc::new(LifecycleStore::new(capacity)),
            DashboardHub::default(),
        )
    }

    /// Empties both stores and tells observers.
    pub fn clear_all(&self) {
        self.exchanges.clear();
        self.lifecycle.clear();
        tracing::info!("Cleared captured exchanges and lifecycle events");
        self.hub.notify_cleared();
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_STORE_CAPACITY)
    }
}

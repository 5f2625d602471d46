//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::config::LifecycleConfig;
use crate::lifecycle::Lifecycle;
use crate::store::GraphStore;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Store every lifecycle component was built on
    pub store: Arc<dyn GraphStore>,

    /// Lifecycle components
    pub lifecycle: Lifecycle,
}

impl AppState {
    pub fn new(store: Arc<dyn GraphStore>, config: LifecycleConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new(store.clone(), config),
            store,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;

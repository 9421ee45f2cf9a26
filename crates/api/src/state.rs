//! Shared application state for the Axum API server.

use std::sync::Arc;

use courier_common::store::{NotificationStore, PreferenceStore};
use courier_engine::dispatch::DispatchEngine;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn NotificationStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub engine: Arc<DispatchEngine>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferenceStore>,
        engine: Arc<DispatchEngine>,
    ) -> Self {
        Self {
            store,
            preferences,
            engine,
        }
    }
}

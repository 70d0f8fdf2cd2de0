pub mod api;
pub mod budget;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod guardrail;
pub mod net;
pub mod providers;
pub mod registry;
pub mod stream;
pub mod users;

use std::sync::Arc;

use crate::client::InferenceClient;
use crate::config::Config;
use crate::db::Database;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    /// Resolved once at startup; direct or remote.
    pub client: Arc<dyn InferenceClient>,
}

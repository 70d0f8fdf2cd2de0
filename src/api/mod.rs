pub mod health;
pub mod invoke;
pub mod models;

use axum::Router;
use axum::routing::{get, post};

use crate::AppState;

/// Build the gateway router.
///
/// Route layout:
/// ```text
/// /health                        GET
/// /api/v1/model/invoke           POST   (JSON or NDJSON stream)
/// /api/v1/models                 GET    (?type=chat)
/// ```
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/model/invoke", post(invoke::invoke_model))
        .route("/api/v1/models", get(models::list_models))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::client::DirectClient;
    use crate::config::Config;
    use crate::db::Database;
    use crate::providers::ProviderRouter;
    use crate::providers::testing::ScriptedProvider;
    use crate::registry::ModelRegistry;
    use crate::registry::tests::sample_model;

    /// Gateway state backed by an in-memory database, the sample model and a
    /// scripted "openai" provider.
    pub(crate) fn test_state(provider: ScriptedProvider) -> AppState {
        let db = Database::open_in_memory().unwrap();
        ModelRegistry::new(db.clone()).upsert(&sample_model()).unwrap();

        let mut providers = ProviderRouter::new();
        providers.register(Arc::new(provider));

        let config = Config::default();
        let client = DirectClient::new(db.clone(), providers, &config.budget);
        AppState {
            config: Arc::new(config),
            db,
            client: Arc::new(client),
        }
    }

    #[test]
    fn test_build_api_router_creates_router() {
        let _router: Router<AppState> = build_api_router();
    }
}

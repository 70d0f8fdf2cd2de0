//! Startup-time selection between the in-process and remote clients.

use std::sync::Arc;

use crate::config::{Config, GatewayConfig};
use crate::db::Database;
use crate::error::GatewayError;
use crate::guardrail::Guardrail;
use crate::providers::ProviderRouter;

use super::{DirectClient, InferenceClient, RemoteClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMode {
    Direct,
    Remote { base_url: String },
}

impl ClientMode {
    /// Remote when a gateway URL is configured, direct otherwise.
    pub fn from_config(config: &GatewayConfig) -> Self {
        match config.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Self::Remote {
                base_url: url.to_string(),
            },
            _ => Self::Direct,
        }
    }
}

/// Build the process-wide inference client.
///
/// In remote mode `db`, `providers` and `guardrail` are unused: the gateway
/// owns them.
pub fn build_client(
    config: &Config,
    db: Database,
    providers: ProviderRouter,
    guardrail: Option<Arc<dyn Guardrail>>,
) -> Result<Arc<dyn InferenceClient>, GatewayError> {
    match ClientMode::from_config(&config.gateway) {
        ClientMode::Remote { base_url } => {
            tracing::info!(gateway = %base_url, "Using remote inference gateway");
            let client = RemoteClient::new(base_url, config.gateway.timeout_secs)?;
            Ok(Arc::new(client))
        }
        ClientMode::Direct => {
            if providers.is_empty() {
                tracing::warn!("No providers registered; every invocation will fail");
            }
            tracing::info!(
                providers = ?providers.provider_ids(),
                budget_enabled = config.budget.enabled,
                "Using direct inference client"
            );
            let client = DirectClient::new(db, providers, &config.budget)
                .with_guardrail(guardrail, config.guardrail.check_output);
            Ok(Arc::new(client))
        }
    }
}

//! Provider router.
//!
//! Maps a catalog model's `provider_id` to the registered provider instance.
//! Unlike a load-balancing router there is no fallback: a model belongs to
//! exactly one provider.

use std::collections::HashMap;
use std::sync::Arc;

use crate::providers::{ModelProvider, ProviderError};
use crate::registry::Model;

/// Registry of providers keyed by provider id.
#[derive(Default, Clone)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. A later registration with the same id replaces
    /// the earlier one.
    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        let id = provider.id().to_string();
        if self.providers.insert(id.clone(), provider).is_some() {
            tracing::warn!(provider = %id, "Provider re-registered, replacing previous instance");
        } else {
            tracing::debug!(provider = %id, "Provider registered");
        }
    }

    /// Look up the provider that serves a model.
    pub fn provider_for(&self, model: &Model) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        self.providers
            .get(&model.provider_id)
            .cloned()
            .ok_or_else(|| ProviderError::NoProvider(model.provider_id.clone()))
    }

    /// Sorted ids of all registered providers.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

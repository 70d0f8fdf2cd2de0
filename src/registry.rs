//! Model Registry.
//!
//! Read-only catalog of models with their pricing and capability limits.
//! Rows are seeded from the `[[models]]` config section at startup.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::GatewayError;

/// Catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    /// Name the provider knows the model by.
    pub internal_name: String,
    /// Display name.
    pub name: String,
    #[serde(rename = "type", default = "default_model_type")]
    pub model_type: String,
    pub provider_id: String,
    #[serde(default)]
    pub max_context: u32,
    #[serde(default)]
    pub max_output: u32,
    #[serde(default)]
    pub max_reasoning: u32,
    /// USD per 1000 input tokens.
    #[serde(default)]
    pub cost_1k_input: f64,
    /// USD per 1000 output tokens.
    #[serde(default)]
    pub cost_1k_output: f64,
}

fn default_model_type() -> String {
    "chat".to_string()
}

impl Model {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            internal_name: row.get(1)?,
            name: row.get(2)?,
            model_type: row.get(3)?,
            provider_id: row.get(4)?,
            max_context: row.get(5)?,
            max_output: row.get(6)?,
            max_reasoning: row.get(7)?,
            cost_1k_input: row.get(8)?,
            cost_1k_output: row.get(9)?,
        })
    }

    /// Clamp a requested thought budget to this model's reasoning limit.
    /// `None` or zero disables reasoning.
    pub fn clamp_thought_budget(&self, requested: Option<u32>) -> Option<u32> {
        requested
            .map(|budget| budget.min(self.max_reasoning))
            .filter(|&budget| budget > 0)
    }
}

/// Public catalog entry returned by `listModels`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub name: String,
    pub internal_name: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub max_context: u32,
    pub max_output: u32,
    pub max_reasoning: u32,
}

impl From<Model> for ModelSummary {
    fn from(model: Model) -> Self {
        Self {
            name: model.name,
            internal_name: model.internal_name,
            model_type: model.model_type,
            max_context: model.max_context,
            max_output: model.max_output,
            max_reasoning: model.max_reasoning,
        }
    }
}

const MODEL_COLUMNS: &str = "id, internal_name, name, type, provider_id, max_context, \
     max_output, max_reasoning, cost_1k_input, cost_1k_output";

#[derive(Clone)]
pub struct ModelRegistry {
    db: Database,
}

impl ModelRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Resolve a model by registry id or internal name.
    pub fn resolve(&self, id_or_name: &str) -> Result<Model, GatewayError> {
        let model = self.db.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {MODEL_COLUMNS} FROM models WHERE id = ?1 OR internal_name = ?1 \
                     ORDER BY id = ?1 DESC LIMIT 1"
                ),
                params![id_or_name],
                Model::from_row,
            )
            .optional()
        })?;
        model.ok_or_else(|| GatewayError::ModelNotFound(id_or_name.to_string()))
    }

    /// List catalog entries, optionally restricted to one model type.
    pub fn list(&self, model_type: Option<&str>) -> Result<Vec<ModelSummary>, GatewayError> {
        let models = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MODEL_COLUMNS} FROM models WHERE ?1 IS NULL OR type = ?1 ORDER BY name"
            ))?;
            let rows = stmt.query_map(params![model_type], Model::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        Ok(models.into_iter().map(ModelSummary::from).collect())
    }

    /// Insert or replace a catalog row.
    pub fn upsert(&self, model: &Model) -> Result<(), GatewayError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO models (id, internal_name, name, type, provider_id, max_context, \
                 max_output, max_reasoning, cost_1k_input, cost_1k_output) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(id) DO UPDATE SET internal_name = excluded.internal_name, \
                 name = excluded.name, type = excluded.type, provider_id = excluded.provider_id, \
                 max_context = excluded.max_context, max_output = excluded.max_output, \
                 max_reasoning = excluded.max_reasoning, cost_1k_input = excluded.cost_1k_input, \
                 cost_1k_output = excluded.cost_1k_output",
                params![
                    model.id,
                    model.internal_name,
                    model.name,
                    model.model_type,
                    model.provider_id,
                    model.max_context,
                    model.max_output,
                    model.max_reasoning,
                    model.cost_1k_input,
                    model.cost_1k_output,
                ],
            )
        })?;
        tracing::debug!(model = %model.id, provider = %model.provider_id, "Model upserted");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Model priced at $0.01 / 1k input and $0.02 / 1k output.
    pub fn sample_model() -> Model {
        Model {
            id: "gpt-mini".into(),
            internal_name: "gpt-4o-mini".into(),
            name: "GPT Mini".into(),
            model_type: "chat".into(),
            provider_id: "openai".into(),
            max_context: 128_000,
            max_output: 4096,
            max_reasoning: 2048,
            cost_1k_input: 0.01,
            cost_1k_output: 0.02,
        }
    }

    fn registry() -> ModelRegistry {
        let registry = ModelRegistry::new(Database::open_in_memory().unwrap());
        registry.upsert(&sample_model()).unwrap();
        registry
    }

    #[test]
    fn test_resolve_by_id_and_internal_name() {
        let registry = registry();
        assert_eq!(registry.resolve("gpt-mini").unwrap(), sample_model());
        assert_eq!(registry.resolve("gpt-4o-mini").unwrap(), sample_model());
    }

    #[test]
    fn test_resolve_unknown() {
        let err = registry().resolve("missing").unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotFound(ref m) if m == "missing"));
    }

    #[test]
    fn test_list_filters_by_type() {
        let registry = registry();
        registry
            .upsert(&Model {
                id: "embed".into(),
                internal_name: "text-embedding-3-small".into(),
                name: "Embeddings".into(),
                model_type: "embedding".into(),
                ..sample_model()
            })
            .unwrap();

        assert_eq!(registry.list(None).unwrap().len(), 2);
        let chat = registry.list(Some("chat")).unwrap();
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].internal_name, "gpt-4o-mini");
        assert!(registry.list(Some("image")).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_updates_pricing() {
        let registry = registry();
        registry
            .upsert(&Model {
                cost_1k_input: 0.5,
                ..sample_model()
            })
            .unwrap();
        assert_eq!(registry.resolve("gpt-mini").unwrap().cost_1k_input, 0.5);
    }

    #[test]
    fn test_summary_wire_shape() {
        let json = serde_json::to_value(ModelSummary::from(sample_model())).unwrap();
        assert_eq!(json["internalName"], "gpt-4o-mini");
        assert_eq!(json["type"], "chat");
        assert_eq!(json["maxOutput"], 4096);
        assert!(json.get("cost1kInput").is_none());
    }

    #[test]
    fn test_clamp_thought_budget() {
        let model = sample_model();
        assert_eq!(model.clamp_thought_budget(Some(10_000)), Some(2048));
        assert_eq!(model.clamp_thought_budget(Some(512)), Some(512));
        assert_eq!(model.clamp_thought_budget(Some(0)), None);
        assert_eq!(model.clamp_thought_budget(None), None);

        let no_reasoning = Model {
            max_reasoning: 0,
            ..sample_model()
        };
        assert_eq!(no_reasoning.clamp_thought_budget(Some(1024)), None);
    }
}

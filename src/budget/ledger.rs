//! Usage metering and balance ledger.
//!
//! Each tracked invocation writes its ledger rows and decrements the user's
//! remaining balance in one SQLite transaction. The decrement is clamped at
//! zero in SQL so concurrent writers can never drive a balance negative.

use chrono::Utc;
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::budget::{CostCalculator, UsageKind, UsageRecord};
use crate::db::Database;
use crate::error::GatewayError;
use crate::providers::types::TokenUsage;
use crate::registry::Model;

/// Everything the ledger needs to meter one invocation.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub user_id: String,
    pub model: Model,
    pub ip: Option<String>,
    /// `None` when the provider never ran (e.g. blocked by a guardrail).
    pub usage: Option<TokenUsage>,
    /// USD spent on guardrail checks for this invocation.
    pub guardrail_cost: f64,
}

impl UsageEvent {
    pub fn new(user_id: &str, model: &Model, ip: Option<&str>, usage: Option<TokenUsage>) -> Self {
        Self {
            user_id: user_id.to_string(),
            model: model.clone(),
            ip: ip.map(String::from),
            usage,
            guardrail_cost: 0.0,
        }
    }

    pub fn with_guardrail_cost(mut self, cost: f64) -> Self {
        self.guardrail_cost = cost;
        self
    }
}

#[derive(Clone)]
pub struct UsageLedger {
    db: Database,
    calculator: CostCalculator,
}

impl UsageLedger {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            calculator: CostCalculator::new(),
        }
    }

    /// Persist ledger rows for an invocation and debit the user's balance.
    ///
    /// Returns the model cost (the value stored on the usage row). Guardrail
    /// cost is written to its own `guardrail` row and debited as well. A call
    /// with neither token usage nor guardrail cost writes nothing.
    pub fn track(&self, event: &UsageEvent) -> Result<f64, GatewayError> {
        let cost = event
            .usage
            .as_ref()
            .map_or(0.0, |usage| self.calculator.calculate_cost(&event.model, usage));
        let guardrail_cost = event.guardrail_cost.max(0.0);

        if event.usage.is_none() && guardrail_cost == 0.0 {
            tracing::debug!(user_id = %event.user_id, "Nothing to meter");
            return Ok(0.0);
        }

        let created_at = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut insert = tx.prepare_cached(
                    "INSERT INTO usage (id, user_id, model_id, ip, input_tokens, output_tokens, \
                     cache_read_tokens, cache_write_tokens, cost, type, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;

                if let Some(usage) = event.usage {
                    insert.execute(params![
                        Uuid::new_v4().to_string(),
                        event.user_id,
                        event.model.id,
                        event.ip,
                        usage.input_tokens,
                        usage.output_tokens,
                        usage.cache_read_input_tokens,
                        usage.cache_write_input_tokens,
                        cost,
                        UsageKind::User.as_str(),
                        created_at,
                    ])?;
                }

                if guardrail_cost > 0.0 {
                    insert.execute(params![
                        Uuid::new_v4().to_string(),
                        event.user_id,
                        event.model.id,
                        event.ip,
                        0u32,
                        0u32,
                        0u32,
                        0u32,
                        guardrail_cost,
                        UsageKind::Guardrail.as_str(),
                        created_at,
                    ])?;
                }

                let debit = cost + guardrail_cost;
                if debit > 0.0 {
                    tx.execute(
                        "UPDATE users SET remaining = MAX(0.0, remaining - ?1) \
                         WHERE id = ?2 AND budget IS NOT NULL AND remaining IS NOT NULL",
                        params![debit, event.user_id],
                    )?;
                }
            }
            tx.commit()
        })?;

        tracing::info!(
            user_id = %event.user_id,
            model = %event.model.id,
            input_tokens = event.usage.map_or(0, |u| u.input_tokens),
            output_tokens = event.usage.map_or(0, |u| u.output_tokens),
            cost_usd = cost,
            guardrail_cost_usd = guardrail_cost,
            "Usage tracked"
        );
        Ok(cost)
    }

    /// All ledger rows for a user, oldest first.
    pub fn records_for_user(&self, user_id: &str) -> Result<Vec<UsageRecord>, GatewayError> {
        let records = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, model_id, ip, input_tokens, output_tokens, \
                 cache_read_tokens, cache_write_tokens, cost, type, created_at \
                 FROM usage WHERE user_id = ?1 ORDER BY created_at, rowid",
            )?;
            let rows = stmt.query_map(params![user_id], record_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        Ok(records)
    }

    /// Sum of all ledger costs for a user.
    pub fn total_cost_for_user(&self, user_id: &str) -> Result<f64, GatewayError> {
        let total = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(cost), 0.0) FROM usage WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
        })?;
        Ok(total)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<UsageRecord> {
    let kind: String = row.get(9)?;
    let kind = kind.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(UsageRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        model_id: row.get(2)?,
        ip: row.get(3)?,
        input_tokens: row.get(4)?,
        output_tokens: row.get(5)?,
        cache_read_tokens: row.get(6)?,
        cache_write_tokens: row.get(7)?,
        cost: row.get(8)?,
        kind,
        created_at: row.get(10)?,
    })
}

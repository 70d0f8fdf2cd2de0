//! Pre-flight quota check.
//!
//! Read-only: the balance is only decremented by the ledger once real usage
//! is known. Concurrent requests that each see a small positive balance are
//! all admitted.

use crate::config::BudgetConfig;
use crate::db::Database;
use crate::error::GatewayError;
use crate::users::{self, User};

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Allowed,
    Rejected { status: u16, message: String },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

pub struct AdmissionController {
    db: Database,
    enabled: bool,
    message: String,
}

impl AdmissionController {
    pub fn new(db: Database, config: &BudgetConfig) -> Self {
        Self {
            db,
            enabled: config.enabled,
            message: config.rejection_message(),
        }
    }

    /// Check whether a user may start a new invocation.
    pub fn check(&self, user_id: &str) -> Result<Admission, GatewayError> {
        if !self.enabled {
            return Ok(Admission::Allowed);
        }
        let user = users::get_user(&self.db, user_id)?
            .ok_or_else(|| GatewayError::UserNotFound(user_id.to_string()))?;
        let admission = self.evaluate(&user);
        if !admission.is_allowed() {
            tracing::info!(user_id = %user_id, remaining = ?user.remaining, "Admission rejected: budget exhausted");
        }
        Ok(admission)
    }

    /// Decide admission from a user's quota state alone.
    pub fn evaluate(&self, user: &User) -> Admission {
        if !self.enabled {
            return Admission::Allowed;
        }
        match (user.budget, user.remaining) {
            (None, _) => Admission::Allowed,
            (Some(_), Some(remaining)) if remaining > 0.0 => Admission::Allowed,
            (Some(_), _) => Admission::Rejected {
                status: 429,
                message: self.message.clone(),
            },
        }
    }

    /// The message carried by every rejection.
    pub fn message(&self) -> &str {
        &self.message
    }
}

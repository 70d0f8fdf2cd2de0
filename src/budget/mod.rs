pub mod admission;
pub mod cost;
pub mod ledger;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use self::admission::{Admission, AdmissionController};
pub use self::cost::CostCalculator;
pub use self::ledger::{UsageEvent, UsageLedger};

/// Who a usage row is billed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    User,
    /// Content-safety checks.
    Guardrail,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Guardrail => "guardrail",
        }
    }
}

impl FromStr for UsageKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "guardrail" => Ok(Self::Guardrail),
            _ => Err(format!("Unknown usage type: {s}")),
        }
    }
}

/// Append-only ledger row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: String,
    pub user_id: String,
    pub model_id: String,
    pub ip: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
    pub cost: f64,
    #[serde(rename = "type")]
    pub kind: UsageKind,
    pub created_at: String,
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::registry::Model;

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub guardrail: GuardrailConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Catalog rows upserted into the registry at startup.
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Remote gateway settings. When `url` is set, the process relays every
/// invocation to that gateway instead of calling providers in-process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    /// When false, admission control always allows.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reset_schedule")]
    pub reset_schedule: String,
    #[serde(default = "default_support_contact")]
    pub support_contact: String,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reset_schedule: default_reset_schedule(),
            support_contact: default_support_contact(),
        }
    }
}

impl BudgetConfig {
    /// The fixed message returned with every quota rejection.
    pub fn rejection_message(&self) -> String {
        format!(
            "You have exhausted your usage budget. Budgets reset {}. \
             Contact {} if you need more.",
            self.reset_schedule, self.support_contact
        )
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailKind {
    #[default]
    None,
    Terms,
    Http,
}

impl std::fmt::Display for GuardrailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Terms => write!(f, "terms"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl FromStr for GuardrailKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" | "" => Ok(Self::None),
            "terms" => Ok(Self::Terms),
            "http" => Ok(Self::Http),
            _ => Err(format!("Unknown guardrail kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardrailConfig {
    #[serde(default)]
    pub kind: GuardrailKind,
    /// Terms matched case-insensitively by the `terms` guardrail.
    #[serde(default)]
    pub blocked_terms: Vec<String>,
    /// USD charged per text unit checked.
    #[serde(default)]
    pub cost_per_text_unit: f64,
    /// Characters per billable text unit.
    #[serde(default = "default_text_unit_chars")]
    pub text_unit_chars: usize,
    /// Endpoint for the `http` guardrail.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Also check non-streaming model output.
    #[serde(default)]
    pub check_output: bool,
    #[serde(default = "default_guardrail_timeout")]
    pub timeout_secs: u64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            kind: GuardrailKind::None,
            blocked_terms: Vec::new(),
            cost_per_text_unit: 0.0,
            text_unit_chars: default_text_unit_chars(),
            url: None,
            check_output: false,
            timeout_secs: default_guardrail_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Any `/v1/chat/completions` endpoint.
    #[default]
    Openai,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Id referenced by `Model.provider_id`.
    pub id: String,
    #[serde(default)]
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_port() -> u16 {
    3001
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("modelgate.db")
}
const fn default_true() -> bool {
    true
}
const fn default_request_timeout() -> u64 {
    300
}
const fn default_guardrail_timeout() -> u64 {
    10
}
const fn default_text_unit_chars() -> usize {
    1000
}
fn default_reset_schedule() -> String {
    "every Monday at 00:00 UTC".to_string()
}
fn default_support_contact() -> String {
    "your administrator".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `MODELGATE_` takes precedence over
    /// the file value.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&content)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Reject combinations that cannot work at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.guardrail.kind == GuardrailKind::Http && self.guardrail.url.is_none() {
            anyhow::bail!("guardrail.kind = \"http\" requires guardrail.url");
        }
        if self.guardrail.text_unit_chars == 0 {
            anyhow::bail!("guardrail.text_unit_chars must be greater than zero");
        }
        for model in &self.models {
            if self.gateway.url.is_none() && !self.providers.iter().any(|p| p.id == model.provider_id) {
                tracing::warn!(
                    model = %model.id,
                    provider = %model.provider_id,
                    "Model references a provider that is not configured"
                );
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        macro_rules! env_str {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                }
            };
        }

        macro_rules! env_bool {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                }
            };
        }

        macro_rules! env_parse {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                    }
                }
            };
        }

        macro_rules! env_opt_str {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                }
            };
        }

        macro_rules! env_list {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
            };
        }

        // -- Server --
        env_str!("MODELGATE_SERVER_HOST", self.server.host);
        env_parse!("MODELGATE_SERVER_PORT", self.server.port);
        env_list!("MODELGATE_SERVER_CORS_ORIGINS", self.server.cors_origins);

        // -- Database --
        if let Ok(val) = std::env::var("MODELGATE_DATABASE_PATH") {
            self.database.path = PathBuf::from(val);
        }

        // -- Gateway --
        // The bare GATEWAY_URL is honoured for deployments that already set it;
        // the prefixed variable wins when both are present.
        env_opt_str!("GATEWAY_URL", self.gateway.url);
        env_opt_str!("MODELGATE_GATEWAY_URL", self.gateway.url);
        env_parse!("MODELGATE_GATEWAY_TIMEOUT", self.gateway.timeout_secs);

        // -- Budget --
        env_bool!("MODELGATE_BUDGET_ENABLED", self.budget.enabled);
        env_str!("MODELGATE_BUDGET_RESET_SCHEDULE", self.budget.reset_schedule);
        env_str!("MODELGATE_BUDGET_SUPPORT_CONTACT", self.budget.support_contact);

        // -- Guardrail --
        env_parse!("MODELGATE_GUARDRAIL_KIND", self.guardrail.kind);
        env_opt_str!("MODELGATE_GUARDRAIL_URL", self.guardrail.url);
        env_list!("MODELGATE_GUARDRAIL_BLOCKED_TERMS", self.guardrail.blocked_terms);
        env_parse!("MODELGATE_GUARDRAIL_UNIT_COST", self.guardrail.cost_per_text_unit);
        env_bool!("MODELGATE_GUARDRAIL_CHECK_OUTPUT", self.guardrail.check_output);

        // -- Logging --
        env_str!("MODELGATE_LOG_LEVEL", self.logging.level);
        env_bool!("MODELGATE_LOG_JSON", self.logging.json);
    }
}

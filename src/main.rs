//! modelgate -- inference gateway with per-user quotas.
//!
//! This is the standalone gateway entry point. It wires together:
//!   - Configuration loading
//!   - Database initialization and model catalog seeding
//!   - Provider router and guardrail creation
//!   - Inference client selection (direct or remote)
//!   - HTTP server with graceful shutdown on SIGTERM / SIGINT

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use modelgate::AppState;
use modelgate::api;
use modelgate::client::build_client;
use modelgate::config::{Config, ProviderConfig, ProviderKind};
use modelgate::db::Database;
use modelgate::guardrail::build_guardrail;
use modelgate::providers::router::ProviderRouter;
use modelgate::providers::{OpenAiCompatConfig, OpenAiCompatProvider};
use modelgate::registry::ModelRegistry;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: PathBuf,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("modelgate.toml");

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("modelgate {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    CliArgs { config_path }
}

fn print_usage() {
    println!(
        "\
modelgate {version} -- Inference gateway with per-user quotas

USAGE:
    modelgate [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: modelgate.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    MODELGATE_CONFIG       Alternative to --config flag
    GATEWAY_URL            Relay to a remote gateway instead of calling providers
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse CLI arguments
    let cli = parse_args();

    let config_path = std::env::var("MODELGATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    // 2. Load configuration
    let config = Config::load(&config_path)?;

    // 3. Initialize tracing/logging
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting modelgate"
    );

    // 4. Open database
    let db = Database::open(&config.database.path)?;
    tracing::info!(path = %config.database.path.display(), "Database opened");

    // 5. Seed the model catalog
    let registry = ModelRegistry::new(db.clone());
    for model in &config.models {
        registry.upsert(model)?;
    }
    if !config.models.is_empty() {
        tracing::info!(models = config.models.len(), "Model catalog seeded");
    }

    // 6. Create provider router
    let mut provider_router = ProviderRouter::new();
    for provider_config in &config.providers {
        match build_provider(provider_config) {
            Ok(provider) => {
                provider_router.register(Arc::new(provider));
                tracing::info!(provider = %provider_config.id, "Provider registered");
            }
            Err(e) => {
                tracing::warn!(provider = %provider_config.id, error = %e, "Failed to initialize provider, skipping");
            }
        }
    }

    // 7. Guardrail + inference client
    let guardrail = build_guardrail(&config.guardrail)?;
    let client = build_client(&config, db.clone(), provider_router, guardrail)?;

    if !config.budget.enabled {
        tracing::warn!("Budget enforcement is DISABLED -- usage is metered but never rejected");
    }

    // 8. Build shared application state
    let state = AppState {
        config: Arc::new(config.clone()),
        db,
        client,
    };

    let app = build_app(state);

    // 9. Bind and serve
    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully");
    Ok(())
}

// ---------------------------------------------------------------------------
// Provider builder
// ---------------------------------------------------------------------------

fn build_provider(config: &ProviderConfig) -> anyhow::Result<OpenAiCompatProvider> {
    match config.kind {
        ProviderKind::Openai => {
            let provider = OpenAiCompatProvider::new(OpenAiCompatConfig {
                id: config.id.clone(),
                base_url: config.base_url.clone(),
                api_key: config.api_key.clone(),
                timeout_secs: config.timeout_secs,
            })
            .map_err(|e| anyhow::anyhow!("OpenAI-compatible provider init failed: {e}"))?;
            Ok(provider)
        }
    }
}

// ---------------------------------------------------------------------------
// Router assembly
// ---------------------------------------------------------------------------

/// Build the application router with all middleware layers.
fn build_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let trace = TraceLayer::new_for_http();

    api::build_api_router()
        .layer(propagate_id)
        .layer(request_id)
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer from config.
fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("modelgate={level},tower_http={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::sync::Arc;
use std::time::Duration;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use x402::{
    InMemoryReplayStore, PaymentSigner, ProofVerifier, ReplayStore, RequirementIssuer,
    SqliteReplayStore,
};
use x402_ledger::{PaymentLedger, SqliteStore};

use x402_server::config::{load_signer_key, ServerConfig};
use x402_server::cors::build_cors;
use x402_server::error::ServerError;
use x402_server::gateway::Gateway;
use x402_server::routes;
use x402_server::sources::SourceRegistry;
use x402_server::state::{build_http_client, AppState};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

fn build_state(config: ServerConfig) -> Result<AppState, ServerError> {
    let signer = match load_signer_key() {
        Some(key) => PaymentSigner::from_private_key(&key)
            .map_err(|e| ServerError::Config(format!("invalid EVM_PRIVATE_KEY: {e}")))?,
        None => {
            tracing::warn!("EVM_PRIVATE_KEY not set, using an ephemeral receiver key");
            PaymentSigner::random()
        }
    };
    let receiver = config.pay_to.unwrap_or_else(|| signer.address());

    let replay_store: Arc<dyn ReplayStore> = match &config.replay_db_path {
        Some(path) => {
            let store = SqliteReplayStore::open(path)
                .map_err(|e| ServerError::Config(format!("failed to open replay store: {e}")))?;
            tracing::info!("Replay store at: {}", path);
            Arc::new(store)
        }
        None => {
            tracing::warn!("REPLAY_DB_PATH not set, replay protection resets on restart");
            Arc::new(InMemoryReplayStore::new())
        }
    };

    let issuer = RequirementIssuer::with_chain_config(config.chain.clone());
    let verifier = ProofVerifier::new()
        .with_chain_config(config.chain.clone())
        .with_replay_store(replay_store);

    let ledger = match &config.ledger_db_path {
        Some(path) => {
            let store = SqliteStore::open(path)
                .map_err(|e| ServerError::Config(format!("failed to open ledger: {e}")))?;
            tracing::info!("Authoritative ledger at: {}", path);
            PaymentLedger::new().with_store(Arc::new(store))
        }
        None => {
            tracing::warn!("LEDGER_DB_PATH not set, payments go to the in-memory fallback ledger and budgets are not enforced");
            PaymentLedger::new()
        }
    };

    let http = build_http_client()?;
    let sources = SourceRegistry::from_specs(&config.sources, &http)
        .map_err(|e| ServerError::Config(e.to_string()))?;
    if sources.is_empty() {
        tracing::warn!("QUERY_SOURCES not set, no paid query routes are served");
    }
    let routes = config.route_config(receiver)?;

    tracing::info!("Receiver address: {:#x}", receiver);
    for (route, price) in &routes.routes {
        tracing::info!("Paid route {} at {}", route, price.price);
    }

    Ok(AppState::new(
        config,
        routes,
        Gateway::new(issuer, verifier, receiver),
        Arc::new(ledger),
        sources,
    ))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    let state = match build_state(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start: {e}");
            std::process::exit(1);
        }
    };

    state.gateway.verifier().start_replay_cleanup(CLEANUP_INTERVAL);
    state.ledger.start_lock_cleanup(CLEANUP_INTERVAL);

    let Some(governor_conf) = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm)
        .finish()
    else {
        tracing::error!("Invalid RATE_LIMIT_RPM: {rate_limit_rpm}");
        std::process::exit(1);
    };

    tracing::info!("Starting x402-server on port {}", port);
    tracing::info!("Ledger tier: {}", state.ledger.tier().as_str());
    tracing::info!("Rate limit: {} req/min per IP", rate_limit_rpm);

    let state_data = web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .app_data(web::JsonConfig::default().limit(65_536))
            .wrap(Logger::default())
            .wrap(build_cors(&allowed_origins))
            .wrap(Governor::new(&governor_conf))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

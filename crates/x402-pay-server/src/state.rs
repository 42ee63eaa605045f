use std::sync::Arc;
use std::time::Duration;

use x402_ledger::PaymentLedger;

use crate::config::{RouteConfig, ServerConfig};
use crate::error::ServerError;
use crate::gateway::Gateway;
use crate::sources::SourceRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub routes: Arc<RouteConfig>,
    pub gateway: Arc<Gateway>,
    pub ledger: Arc<PaymentLedger>,
    pub sources: Arc<SourceRegistry>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        routes: RouteConfig,
        gateway: Gateway,
        ledger: Arc<PaymentLedger>,
        sources: SourceRegistry,
    ) -> Self {
        Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            gateway: Arc::new(gateway),
            ledger,
            sources: Arc::new(sources),
        }
    }
}

/// Client for upstream data sources.
pub fn build_http_client() -> Result<reqwest::Client, ServerError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::none()) // Prevent SSRF via redirects
        .build()
        .map_err(|e| ServerError::Config(format!("failed to create HTTP client: {e}")))
}

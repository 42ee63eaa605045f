#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use serde_json::{json, Value};
use x402::{encode_proof, PaymentSigner, ProofSigner, ProofVerifier, RequirementIssuer};
use x402_ledger::{PaymentLedger, SqliteStore};
use x402_server::config::{RouteConfigBuilder, ServerConfig};
use x402_server::sources::{QuerySource, SourceError, SourceFuture, SourceRegistry};
use x402_server::{AppState, Gateway};

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const METRICS_TOKEN: &str = "test-metrics-token";

/// `$0.00005` at 18 decimals.
pub const QUERY_AMOUNT: u128 = 50_000_000_000_000;
/// `$0.00015` at 18 decimals.
pub const REPORT_AMOUNT: u128 = 150_000_000_000_000;

pub const TARGET: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";

pub struct StaticSource {
    provider: &'static str,
    payload: Option<Value>,
    pub hits: AtomicUsize,
}

impl StaticSource {
    pub fn ok(provider: &'static str, payload: Value) -> Self {
        Self {
            provider,
            payload: Some(payload),
            hits: AtomicUsize::new(0),
        }
    }

    pub fn failing(provider: &'static str) -> Self {
        Self {
            provider,
            payload: None,
            hits: AtomicUsize::new(0),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl QuerySource for StaticSource {
    fn provider(&self) -> &str {
        self.provider
    }

    fn fetch<'a>(&'a self, target: &'a str) -> SourceFuture<'a> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let result = match &self.payload {
            Some(p) => Ok(json!({ "target": target, "result": p })),
            None => Err(SourceError::Status(503)),
        };
        Box::pin(async move { result })
    }
}

pub fn receiver() -> Address {
    Address::repeat_byte(0x42)
}

pub fn sqlite_ledger() -> PaymentLedger {
    PaymentLedger::new().with_store(Arc::new(SqliteStore::open_in_memory().unwrap()))
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        admin_token: Some(ADMIN_TOKEN.to_string()),
        metrics_token: Some(METRICS_TOKEN.to_string()),
        ..ServerConfig::default()
    }
}

pub struct Fixture {
    pub state: AppState,
    pub security: Arc<StaticSource>,
}

/// `security` answers, `whale` always fails; `report` fans out to both.
pub fn fixture(ledger: PaymentLedger, config: ServerConfig) -> Fixture {
    let routes = RouteConfigBuilder::new(receiver(), 18)
        .route("GET", "/api/query/security", "$0.00005", Some("token security scan"))
        .route("GET", "/api/query/whale", "$0.00005", None)
        .route("GET", "/api/query/report", "$0.00015", None)
        .build()
        .unwrap();
    let security = Arc::new(StaticSource::ok("goplus", json!({ "risk": "low" })));
    let sources = SourceRegistry::new()
        .with_source("security", security.clone())
        .with_source("whale", Arc::new(StaticSource::failing("whale-alert")));
    let gateway = Gateway::new(RequirementIssuer::new(), ProofVerifier::new(), receiver());

    Fixture {
        state: AppState::new(config, routes, gateway, Arc::new(ledger), sources),
        security,
    }
}

/// A fresh `X-PAYMENT` value for `resource`.
pub fn payment_header(signer: &PaymentSigner, resource: &str, amount: u128) -> String {
    let requirement = RequirementIssuer::new()
        .issue(resource, U256::from(amount), receiver())
        .unwrap();
    encode_proof(&signer.sign_proof(&requirement).unwrap()).unwrap()
}

pub fn admin_auth() -> (&'static str, String) {
    ("Authorization", format!("Bearer {ADMIN_TOKEN}"))
}

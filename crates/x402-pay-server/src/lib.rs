//! x402 resource server.
//!
//! Serves `GET /api/query/{query_type}?target=...` behind an x402 payment
//! gate. An accepted proof lets the query run against its upstream
//! [`sources::QuerySource`]; the result is committed to the two-tier
//! [`x402_ledger::PaymentLedger`], which enforces each agent's daily budget
//! when an authoritative store is configured.
//!
//! Registry administration (`/agents`) needs `ADMIN_TOKEN`. Read routes
//! expose payment history, stats and advisory budget checks.

pub mod config;
pub mod cors;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod routes;
pub mod sources;
pub mod state;

pub use config::{RouteConfig, RouteConfigBuilder, ServerConfig};
pub use error::ServerError;
pub use gateway::{guarded, Gateway, PaymentContext};
pub use sources::{HttpJsonSource, QuerySource, SourceRegistry};
pub use state::AppState;

pub mod agents;
pub mod health;
pub mod payments;
pub mod query;

use actix_web::{web, HttpRequest};
use alloy::primitives::Address;
use x402::security::bearer_matches;

use crate::error::ServerError;
use crate::state::AppState;

/// Mount every route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    health::configure(cfg);
    query::configure(cfg);
    agents::configure(cfg);
    payments::configure(cfg);
}

pub(crate) fn parse_wallet(raw: &str) -> Result<Address, ServerError> {
    raw.parse::<Address>()
        .map_err(|_| ServerError::BadRequest(format!("invalid wallet address '{raw}'")))
}

pub(crate) fn parse_amount(raw: &str) -> Result<u128, ServerError> {
    raw.parse::<u128>()
        .map_err(|_| ServerError::BadRequest(format!("invalid amount '{raw}'")))
}

fn authorization(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
}

/// Registry mutations require `Authorization: Bearer <ADMIN_TOKEN>`.
pub(crate) fn require_admin(req: &HttpRequest, state: &AppState) -> Result<(), ServerError> {
    let expected = state
        .config
        .admin_token
        .as_deref()
        .ok_or(ServerError::AdminDisabled)?;
    if bearer_matches(authorization(req), expected.as_bytes()) {
        Ok(())
    } else {
        tracing::warn!(path = %req.path(), "rejected admin request");
        Err(ServerError::Unauthorized)
    }
}

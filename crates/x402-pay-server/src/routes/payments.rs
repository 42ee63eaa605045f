use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::ServerError;
use crate::state::AppState;

/// Upper bound on `/payments/recent?n=`.
pub const MAX_RECENT: usize = 500;

const DEFAULT_RECENT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub n: Option<usize>,
}

/// GET /payments/recent?n=... - the last n payments, oldest first
pub async fn recent(
    params: web::Query<RecentParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let n = params.n.unwrap_or(DEFAULT_RECENT).min(MAX_RECENT);
    let payments = state.ledger.recent(n)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "tier": state.ledger.tier(),
        "payments": payments,
    })))
}

/// GET /payments/count
pub async fn count(state: web::Data<AppState>) -> Result<HttpResponse, ServerError> {
    let count = state.ledger.payment_count()?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "tier": state.ledger.tier(),
        "count": count,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/payments/recent", web::get().to(recent))
        .route("/payments/count", web::get().to(count));
}

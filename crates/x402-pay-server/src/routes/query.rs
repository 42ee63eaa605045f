use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use alloy::primitives::hex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use x402_ledger::LedgerError;

use crate::config::{QUERY_PATH_PREFIX, REPORT_QUERY};
use crate::error::ServerError;
use crate::gateway::{guarded, PaymentContext};
use crate::metrics::LEDGER_COMMITS;
use crate::sources::validate_target;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub target: Option<String>,
}

/// `0x`-prefixed SHA-256 of the JSON payload handed to the payer.
pub fn data_hash(data: &serde_json::Value) -> Result<String, ServerError> {
    let bytes = serde_json::to_vec(data)
        .map_err(|e| ServerError::Internal(format!("failed to serialize payload: {e}")))?;
    Ok(hex::encode_prefixed(Sha256::digest(&bytes)))
}

/// GET /api/query - free price list
pub async fn list(state: web::Data<AppState>) -> HttpResponse {
    let mut routes: Vec<_> = state
        .routes
        .routes
        .iter()
        .map(|(key, price)| {
            serde_json::json!({
                "route": key,
                "price": price.price,
                "amount": price.amount.to_string(),
                "description": price.description,
            })
        })
        .collect();
    routes.sort_by(|a, b| a["route"].as_str().cmp(&b["route"].as_str()));

    HttpResponse::Ok().json(serde_json::json!({
        "receiver": format!("{:#x}", state.gateway.receiver()),
        "network": state.config.chain.network,
        "currency": state.config.chain.currency,
        "routes": routes,
    }))
}

/// GET /api/query/{query_type}?target=... - payment-gated data query
pub async fn query(
    req: HttpRequest,
    path: web::Path<String>,
    params: web::Query<QueryParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let query_type = path.into_inner();
    let resource = format!("{QUERY_PATH_PREFIX}{query_type}");

    // Unknown routes and bad input are rejected before asking for payment.
    let price = state
        .routes
        .get_route("GET", &resource)
        .map(|r| r.amount)
        .ok_or_else(|| ServerError::NotFound(format!("unknown query type '{query_type}'")))?;
    let target = params.into_inner().target.unwrap_or_default();
    validate_target(&target).map_err(ServerError::BadRequest)?;

    let app = state.get_ref();
    Ok(guarded(&app.gateway, &req, &resource, price, |ctx| async move {
        fulfil(app, &query_type, &target, &ctx)
            .await
            .unwrap_or_else(|e| e.error_response())
    })
    .await)
}

/// Runs after the payment is accepted: budget pre-check, fetch, commit.
async fn fulfil(
    state: &AppState,
    query_type: &str,
    target: &str,
    ctx: &PaymentContext,
) -> Result<HttpResponse, ServerError> {
    let amount = u128::try_from(ctx.amount)
        .map_err(|_| ServerError::BadRequest("payment amount out of range".to_string()))?;

    match state.ledger.check_spend(ctx.signer, amount) {
        Ok(()) | Err(LedgerError::RegistryUnavailable) => {}
        Err(e) if e.is_transport() => {
            tracing::warn!(payer = %ctx.signer, error = %e, "budget pre-check skipped");
        }
        Err(e) => {
            tracing::info!(payer = %ctx.signer, error = %e, "spend refused before fetch");
            return Err(e.into());
        }
    }

    let (provider, data) = if query_type == REPORT_QUERY {
        let report = state.sources.report(target).await;
        if report.results.is_empty() {
            return Err(ServerError::Upstream(format!(
                "every source failed for report on '{target}'"
            )));
        }
        let provider = report
            .results
            .keys()
            .filter_map(|qt| state.sources.get(qt))
            .map(|s| s.provider())
            .collect::<Vec<_>>()
            .join("+");
        let data = serde_json::to_value(&report)
            .map_err(|e| ServerError::Internal(format!("failed to serialize report: {e}")))?;
        (provider, data)
    } else {
        let source = state
            .sources
            .get(query_type)
            .ok_or_else(|| ServerError::NotFound(format!("unknown query type '{query_type}'")))?;
        let data = source
            .fetch(target)
            .await
            .map_err(|e| ServerError::Upstream(format!("{query_type}: {e}")))?;
        (source.provider().to_string(), data)
    };

    let hash = data_hash(&data)?;
    let receipt = match state
        .ledger
        .commit(ctx.signer, &provider, amount, &hash, query_type)
    {
        Ok(receipt) => {
            let tier = if receipt.authoritative {
                "authoritative"
            } else {
                "fallback"
            };
            LEDGER_COMMITS.with_label_values(&[tier, "committed"]).inc();
            receipt
        }
        Err(e) => {
            LEDGER_COMMITS
                .with_label_values(&[state.ledger.tier().as_str(), "rejected"])
                .inc();
            return Err(e.into());
        }
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "queryType": query_type,
        "target": target,
        "data": data,
        "payment": {
            "payer": format!("{:#x}", ctx.signer),
            "amount": amount.to_string(),
            "authoritative": receipt.authoritative,
            "id": receipt.record.id,
            "dataHash": hash,
        },
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/query", web::get().to(list))
        .route("/api/query/{query_type}", web::get().to(query));
}

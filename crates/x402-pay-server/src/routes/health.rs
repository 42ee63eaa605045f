use actix_web::{web, HttpRequest, HttpResponse};
use x402::security::bearer_matches;

use crate::metrics::metrics_output;
use crate::state::AppState;

/// GET /health - liveness and ledger tier
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let ledger = &state.ledger;
    let mut response = serde_json::json!({
        "status": "ok",
        "service": "x402-server",
        "version": env!("CARGO_PKG_VERSION"),
        "ledgerTier": ledger.tier().as_str(),
        "fallbackPayments": ledger.fallback().payment_count(),
        "receiver": format!("{:#x}", state.gateway.receiver()),
        "queryTypes": state.sources.query_types().collect::<Vec<_>>(),
    });

    // A configured authoritative store that errors means writes are degrading.
    if ledger.tier() == x402_ledger::Tier::Authoritative {
        if let Err(e) = ledger.payment_count() {
            tracing::warn!(error = %e, "authoritative ledger unreachable");
            response["status"] = serde_json::json!("degraded");
            response["ledgerError"] = serde_json::json!("authoritative store unreachable");
        }
    }

    if response["status"] == "degraded" {
        HttpResponse::ServiceUnavailable().json(response)
    } else {
        HttpResponse::Ok().json(response)
    }
}

/// GET /metrics - Prometheus metrics, Bearer-gated unless public
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if !state.config.public_metrics {
        let Some(expected) = state.config.metrics_token.as_deref() else {
            return HttpResponse::Forbidden().json(serde_json::json!({
                "error": "forbidden",
                "message": "Set METRICS_TOKEN or X402_PUBLIC_METRICS=true to expose /metrics"
            }));
        };
        let header = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        if !bearer_matches(header, expected.as_bytes()) {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Valid Bearer token required for /metrics"
            }));
        }
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics_output())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}

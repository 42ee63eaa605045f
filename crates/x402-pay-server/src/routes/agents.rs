use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use super::{parse_amount, parse_wallet, require_admin};
use crate::error::ServerError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgent {
    pub wallet: String,
    pub name: String,
    /// Minor units, as a decimal string.
    pub daily_budget: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBudget {
    pub daily_budget: String,
}

#[derive(Debug, Deserialize)]
pub struct CanSpendParams {
    pub amount: String,
}

/// POST /agents - register an agent (admin)
pub async fn register(
    req: HttpRequest,
    body: web::Json<RegisterAgent>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    require_admin(&req, &state)?;
    let wallet = parse_wallet(&body.wallet)?;
    let budget = parse_amount(&body.daily_budget)?;

    let agent = state.ledger.register_agent(wallet, &body.name, budget)?;
    Ok(HttpResponse::Created().json(agent))
}

/// PUT /agents/{wallet}/budget - change the daily budget (admin)
pub async fn update_budget(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateBudget>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    require_admin(&req, &state)?;
    let wallet = parse_wallet(&path)?;
    let budget = parse_amount(&body.daily_budget)?;

    let agent = state.ledger.update_budget(wallet, budget)?;
    Ok(HttpResponse::Ok().json(agent))
}

/// DELETE /agents/{wallet} - deactivate an agent, permanently (admin)
pub async fn deactivate(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    require_admin(&req, &state)?;
    let wallet = parse_wallet(&path)?;

    let agent = state.ledger.deactivate_agent(wallet)?;
    Ok(HttpResponse::Ok().json(agent))
}

/// GET /agents/count
pub async fn count(state: web::Data<AppState>) -> Result<HttpResponse, ServerError> {
    let count = state.ledger.agent_count()?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "count": count })))
}

/// GET /agents/{wallet}
pub async fn get(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let wallet = parse_wallet(&path)?;
    let agent = state
        .ledger
        .get_agent(wallet)?
        .ok_or_else(|| ServerError::NotFound(format!("agent {wallet:#x} is not registered")))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "agent": agent,
        "state": agent.state(),
    })))
}

/// GET /agents/{wallet}/payments - history and aggregates
pub async fn payments(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let wallet = parse_wallet(&path)?;
    let ledger = state.ledger.query(wallet)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "tier": state.ledger.tier(),
        "payments": ledger.records,
        "aggregates": ledger.aggregates,
    })))
}

/// GET /agents/{wallet}/stats
pub async fn stats(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let wallet = parse_wallet(&path)?;
    Ok(HttpResponse::Ok().json(state.ledger.stats(wallet)?))
}

/// GET /agents/{wallet}/can-spend?amount=... - advisory budget check
pub async fn can_spend(
    path: web::Path<String>,
    params: web::Query<CanSpendParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let wallet = parse_wallet(&path)?;
    let amount = parse_amount(&params.amount)?;
    let allowed = state.ledger.can_spend(wallet, amount)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "wallet": format!("{wallet:#x}"),
        "amount": amount.to_string(),
        "canSpend": allowed,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    // `/agents/count` before `/agents/{wallet}` so "count" is not taken as a wallet.
    cfg.route("/agents", web::post().to(register))
        .route("/agents/count", web::get().to(count))
        .route("/agents/{wallet}", web::get().to(get))
        .route("/agents/{wallet}", web::delete().to(deactivate))
        .route("/agents/{wallet}/budget", web::put().to(update_budget))
        .route("/agents/{wallet}/payments", web::get().to(payments))
        .route("/agents/{wallet}/stats", web::get().to(stats))
        .route("/agents/{wallet}/can-spend", web::get().to(can_spend));
}

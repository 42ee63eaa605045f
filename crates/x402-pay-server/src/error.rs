use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;
use x402_ledger::LedgerError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Admin routes are disabled when no `ADMIN_TOKEN` is configured.
    #[error("admin API disabled")]
    AdminDisabled,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn json_error(mut builder: actix_web::HttpResponseBuilder, error: &str, message: &str) -> HttpResponse {
    builder.json(serde_json::json!({
        "error": error,
        "message": message,
    }))
}

impl ResponseError for ServerError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ServerError::Ledger(e) => ledger_error_response(e),
            ServerError::BadRequest(msg) => json_error(HttpResponse::BadRequest(), "bad_request", msg),
            ServerError::NotFound(msg) => json_error(HttpResponse::NotFound(), "not_found", msg),
            ServerError::Unauthorized => json_error(
                HttpResponse::Unauthorized(),
                "unauthorized",
                "Valid Bearer token required",
            ),
            ServerError::AdminDisabled => json_error(
                HttpResponse::Forbidden(),
                "forbidden",
                "Set ADMIN_TOKEN to enable the admin API",
            ),
            ServerError::Upstream(msg) => {
                tracing::error!(error = %msg, "upstream data source failed");
                json_error(
                    HttpResponse::BadGateway(),
                    "upstream_error",
                    "Failed to reach upstream data source",
                )
            }
            ServerError::Config(msg) | ServerError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                json_error(
                    HttpResponse::InternalServerError(),
                    "internal_error",
                    "An internal error occurred",
                )
            }
        }
    }
}

fn ledger_error_response(e: &LedgerError) -> HttpResponse {
    let message = e.to_string();
    match e {
        LedgerError::BudgetExceeded { .. } => {
            json_error(HttpResponse::TooManyRequests(), "budget_exceeded", &message)
        }
        LedgerError::NotRegistered(_) => {
            json_error(HttpResponse::NotFound(), "agent_not_registered", &message)
        }
        LedgerError::AlreadyRegistered(_) => {
            json_error(HttpResponse::Conflict(), "agent_already_registered", &message)
        }
        LedgerError::Inactive(_) => json_error(HttpResponse::Forbidden(), "agent_inactive", &message),
        LedgerError::InvalidBudget(_) => {
            json_error(HttpResponse::BadRequest(), "invalid_budget", &message)
        }
        LedgerError::InvalidPayment(_) => {
            json_error(HttpResponse::BadRequest(), "invalid_payment", &message)
        }
        LedgerError::RegistryUnavailable => json_error(
            HttpResponse::ServiceUnavailable(),
            "registry_unavailable",
            "No authoritative ledger configured; set LEDGER_DB_PATH",
        ),
        LedgerError::Transport(detail) => {
            tracing::error!(error = %detail, "ledger store unavailable");
            json_error(
                HttpResponse::ServiceUnavailable(),
                "ledger_unavailable",
                "Ledger store is unavailable",
            )
        }
    }
}

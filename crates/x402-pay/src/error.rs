use thiserror::Error;

/// Errors returned by x402 operations.
///
/// Verification outcomes (expired, replayed, underpaid...) are not errors: they
/// come back as a [`VerificationResult`](crate::VerificationResult) with a reason.
/// Errors here are structural or environmental.
#[derive(Debug, Error)]
pub enum X402Error {
    /// Unparsable challenge body or proof encoding.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The payer side refused or was unable to authorize a payment.
    #[error("authorization error: {0}")]
    AuthorizationError(String),

    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    /// Transport failure talking to a remote party.
    #[error("http error: {0}")]
    HttpError(String),

    /// The server did not accept the paid retry.
    #[error("payment rejected ({status}): {reason}")]
    PaymentRejected { status: u16, reason: String },

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

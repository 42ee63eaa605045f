use alloy::primitives::Address;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::X402Error;

pub const REASON_EXPIRED: &str = "expired";
pub const REASON_NONCE_USED: &str = "nonce already used";
pub const REASON_INSUFFICIENT_AMOUNT: &str = "insufficient amount";
pub const REASON_RESOURCE_MISMATCH: &str = "resource mismatch";
pub const REASON_RECEIVER_MISMATCH: &str = "receiver mismatch";
pub const REASON_INVALID_SIGNATURE: &str = "invalid signature";

/// Outcome of [`ProofVerifier::verify`](crate::ProofVerifier::verify).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationResult {
    pub fn accepted(signer: Address) -> Self {
        Self {
            valid: true,
            signer: Some(signer),
            reason: None,
        }
    }

    pub fn rejected(reason: &str, signer: Option<Address>) -> Self {
        Self {
            valid: false,
            signer,
            reason: Some(reason.to_string()),
        }
    }
}

/// Out-of-band metadata attached to a paid response (`X-PAYMENT-RESPONSE`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub payer: Address,
    /// Minor units, decimal string.
    pub amount: String,
    pub service: String,
}

impl PaymentReceipt {
    pub fn encode(&self) -> Result<String, X402Error> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    /// Accepts base64(JSON) or plain JSON.
    pub fn decode(header_value: &str) -> Result<Self, X402Error> {
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(header_value) {
            if let Ok(receipt) = serde_json::from_slice(&bytes) {
                return Ok(receipt);
            }
        }
        serde_json::from_str(header_value)
            .map_err(|e| X402Error::ProtocolError(format!("invalid payment receipt: {e}")))
    }
}

//! Resource gateway: gates a handler behind a verified payment proof.
//!
//! - no `X-PAYMENT` header → 402 with a fresh requirement
//! - header present but unparsable → 400 `invalid_payment_header`
//! - proof rejected → 402 with a fresh requirement and the rejection reason
//! - proof accepted → handler runs with a [`PaymentContext`]; a successful
//!   response carries `X-PAYMENT-RESPONSE`
//!
//! The gateway never writes to the ledger.

use std::future::Future;

use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{HttpRequest, HttpResponse};
use alloy::primitives::{Address, U256};
use x402::{
    decode_proof, PaymentReceipt, PaymentRequiredBody, ProofVerifier, RequirementIssuer,
    PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER,
};

use crate::metrics::{PAYMENT_ATTEMPTS, REQUESTS};

/// What a guarded handler learns about the payment that let it run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentContext {
    /// Recovered signer of the proof.
    pub signer: Address,
    /// Amount the proof authorizes (may exceed the price).
    pub amount: U256,
    pub resource: String,
}

pub struct Gateway {
    issuer: RequirementIssuer,
    verifier: ProofVerifier,
    receiver: Address,
}

fn endpoint_label(req: &HttpRequest) -> String {
    // Route pattern, not raw path, to keep label cardinality bounded.
    req.match_pattern().unwrap_or_else(|| "unknown".to_string())
}

impl Gateway {
    /// The verifier is bound to `receiver`, so proofs paying anyone else are
    /// rejected without spending their nonce.
    pub fn new(issuer: RequirementIssuer, verifier: ProofVerifier, receiver: Address) -> Self {
        Self {
            issuer,
            verifier: verifier.with_receiver(receiver),
            receiver,
        }
    }

    pub fn receiver(&self) -> Address {
        self.receiver
    }

    pub fn verifier(&self) -> &ProofVerifier {
        &self.verifier
    }

    /// 402 carrying a freshly issued requirement.
    pub fn payment_required(&self, resource: &str, amount: U256, message: &str) -> HttpResponse {
        match self.issuer.issue(resource, amount, self.receiver) {
            Ok(requirement) => {
                HttpResponse::PaymentRequired().json(PaymentRequiredBody::new(requirement, message))
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to issue payment requirement");
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "failed to issue payment requirement"
                }))
            }
        }
    }

    /// Check the request's payment. `Ok` means the handler may run;
    /// `Err` is the response to send instead.
    pub fn guard(
        &self,
        req: &HttpRequest,
        resource: &str,
        required: U256,
    ) -> Result<PaymentContext, HttpResponse> {
        let endpoint = endpoint_label(req);

        let header = match req.headers().get(PAYMENT_HEADER) {
            Some(h) => h,
            None => {
                REQUESTS.with_label_values(&[endpoint.as_str(), "402"]).inc();
                return Err(self.payment_required(resource, required, "payment required"));
            }
        };

        let proof = match header
            .to_str()
            .map_err(|e| x402::X402Error::ProtocolError(format!("non-ASCII header: {e}")))
            .and_then(decode_proof)
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "invalid payment header");
                PAYMENT_ATTEMPTS.with_label_values(&["malformed"]).inc();
                REQUESTS.with_label_values(&[endpoint.as_str(), "400"]).inc();
                return Err(invalid_header(&e.to_string()));
            }
        };

        tracing::info!(
            payer = %proof.from,
            nonce = %format!("{:.8}", proof.nonce),
            resource = %resource,
            "payment attempt"
        );

        let result = match self.verifier.verify(&proof, resource, required) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(payer = %proof.from, error = %e, "malformed payment proof");
                PAYMENT_ATTEMPTS.with_label_values(&["malformed"]).inc();
                REQUESTS.with_label_values(&[endpoint.as_str(), "400"]).inc();
                return Err(invalid_header(&e.to_string()));
            }
        };

        match result.signer.filter(|_| result.valid) {
            Some(signer) => {
                PAYMENT_ATTEMPTS.with_label_values(&["success"]).inc();
                let amount = proof.amount_value().unwrap_or(required);
                Ok(PaymentContext {
                    signer,
                    amount,
                    resource: resource.to_string(),
                })
            }
            None => {
                let reason = result.reason.as_deref().unwrap_or("rejected");
                Err(self.reject(&endpoint, resource, required, proof.from, reason))
            }
        }
    }

    fn reject(
        &self,
        endpoint: &str,
        resource: &str,
        required: U256,
        payer: Address,
        reason: &str,
    ) -> HttpResponse {
        PAYMENT_ATTEMPTS.with_label_values(&["rejected"]).inc();
        REQUESTS.with_label_values(&[endpoint, "402"]).inc();
        tracing::warn!(payer = %payer, reason = %reason, "payment rejected");
        self.payment_required(resource, required, reason)
    }
}

fn invalid_header(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": "invalid_payment_header",
        "message": message,
    }))
}

/// Attach `X-PAYMENT-RESPONSE` to a successful response.
pub fn attach_receipt(resp: &mut HttpResponse, ctx: &PaymentContext) {
    if !resp.status().is_success() {
        return;
    }
    let receipt = PaymentReceipt {
        payer: ctx.signer,
        amount: ctx.amount.to_string(),
        service: ctx.resource.clone(),
    };
    let encoded = match receipt.encode() {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode payment receipt");
            return;
        }
    };
    match (
        HeaderName::try_from(PAYMENT_RESPONSE_HEADER),
        HeaderValue::from_str(&encoded),
    ) {
        (Ok(name), Ok(value)) => {
            resp.headers_mut().insert(name, value);
        }
        _ => tracing::error!("failed to build payment response header"),
    }
}

/// Run `handler` only if the request carries an accepted payment for
/// `resource` at `required` minor units.
pub async fn guarded<F, Fut>(
    gateway: &Gateway,
    req: &HttpRequest,
    resource: &str,
    required: U256,
    handler: F,
) -> HttpResponse
where
    F: FnOnce(PaymentContext) -> Fut,
    Fut: Future<Output = HttpResponse>,
{
    let ctx = match gateway.guard(req, resource, required) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let mut resp = handler(ctx.clone()).await;
    attach_receipt(&mut resp, &ctx);
    REQUESTS
        .with_label_values(&[endpoint_label(req).as_str(), resp.status().as_str()])
        .inc();
    resp
}

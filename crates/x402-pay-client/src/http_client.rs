use alloy::primitives::U256;
use serde::Serialize;
use x402::{
    encode_proof, parse_amount, parse_challenge, ChainConfig, PaymentReceipt, ProofSigner,
    X402Error, PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER,
};

/// Result of [`X402Client::pay_and_fetch`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidResponse {
    pub status: u16,
    /// Response body; JSON when it parses as JSON, otherwise a string.
    pub data: serde_json::Value,
    pub paid: bool,
    /// Minor units, present when a payment was made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_paid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PaymentReceipt>,
}

/// HTTP client that pays 402 challenges with signed proofs.
///
/// Sends the request once; on a 402 it parses the challenge, signs a proof via
/// the provided [`ProofSigner`] and retries exactly once with an `X-PAYMENT`
/// header. A failed retry is terminal.
pub struct X402Client<S: ProofSigner> {
    http: reqwest::Client,
    signer: S,
    config: ChainConfig,
    max_amount: Option<U256>,
}

impl<S: ProofSigner> X402Client<S> {
    pub fn new(signer: S) -> Result<Self, X402Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| X402Error::HttpError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(signer, http))
    }

    /// Create a client with a custom reqwest::Client.
    pub fn with_http_client(signer: S, http: reqwest::Client) -> Self {
        Self {
            http,
            signer,
            config: ChainConfig::default(),
            max_amount: None,
        }
    }

    /// Chain defaults used for fields a challenge leaves out.
    pub fn with_chain_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    /// Refuse to pay challenges above `max` minor units.
    pub fn with_max_amount(mut self, max: U256) -> Self {
        self.max_amount = Some(max);
        self
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    /// GET `url`, paying once if the server answers 402.
    pub async fn pay_and_fetch(&self, url: &str) -> Result<PaidResponse, X402Error> {
        let default_resource = reqwest::Url::parse(url)
            .map_err(|e| X402Error::ConfigError(format!("invalid URL '{url}': {e}")))?
            .path()
            .to_string();

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| X402Error::HttpError(format!("request failed: {e}")))?;

        let status = resp.status().as_u16();
        if status != 402 {
            let data = read_body(resp).await?;
            return Ok(PaidResponse {
                status,
                data,
                paid: false,
                amount_paid: None,
                receipt: None,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| X402Error::HttpError(format!("failed to read 402 body: {e}")))?;
        let requirement = parse_challenge(&body)?.resolve(&default_resource, &self.config)?;

        if let Some(max) = self.max_amount {
            if parse_amount(&requirement.amount)? > max {
                return Err(X402Error::AuthorizationError(format!(
                    "challenge asks {} which exceeds the configured maximum {max}",
                    requirement.amount
                )));
            }
        }

        tracing::info!(
            resource = %requirement.resource,
            amount = %requirement.amount,
            receiver = %requirement.receiver,
            "paying x402 challenge"
        );

        let proof = self.signer.sign_proof(&requirement)?;
        let encoded = encode_proof(&proof)?;

        let resp = self
            .http
            .get(url)
            .header(PAYMENT_HEADER, encoded)
            .send()
            .await
            .map_err(|e| X402Error::HttpError(format!("paid request failed: {e}")))?;

        let status = resp.status();
        let receipt = resp
            .headers()
            .get(PAYMENT_RESPONSE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| PaymentReceipt::decode(s).ok());
        let data = read_body(resp).await?;

        if !status.is_success() {
            let reason = rejection_reason(&data);
            tracing::warn!(status = status.as_u16(), reason = %reason, "paid retry rejected");
            return Err(X402Error::PaymentRejected {
                status: status.as_u16(),
                reason,
            });
        }

        Ok(PaidResponse {
            status: status.as_u16(),
            data,
            paid: true,
            amount_paid: Some(requirement.amount),
            receipt,
        })
    }
}

async fn read_body(resp: reqwest::Response) -> Result<serde_json::Value, X402Error> {
    let text = resp
        .text()
        .await
        .map_err(|e| X402Error::HttpError(format!("failed to read response body: {e}")))?;
    Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
}

/// Best reason string from a rejection body: `message`, then `error`, then the raw body.
fn rejection_reason(body: &serde_json::Value) -> String {
    ["message", "error"]
        .iter()
        .find_map(|key| body.get(key).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match body {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

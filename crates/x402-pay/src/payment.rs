use std::fmt;

use alloy::primitives::{Address, B256, U256};
use base64::Engine;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::eip712::random_nonce;
use crate::{unix_now, ChainConfig, PaymentAuthorization, X402Error};

/// Unsigned payment challenge, issued fresh for every 402 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Integer minor units, decimal string.
    pub amount: String,
    pub currency: String,
    pub receiver: Address,
    pub resource: String,
    pub network: String,
    pub chain_id: u64,
    pub nonce: B256,
    /// Unix seconds; proofs are accepted only while `now < expiry`.
    pub expiry: u64,
}

/// A requirement as it arrives in an untrusted 402 body.
///
/// Only `amount` and `receiver` are mandatory. Missing fields are filled by
/// [`ChallengeRequirement::resolve`]:
///
/// | field      | default                                  |
/// |------------|------------------------------------------|
/// | `resource` | path of the URL that was requested       |
/// | `currency` | [`ChainConfig::currency`]                |
/// | `network`  | [`ChainConfig::network`]                 |
/// | `chainId`  | [`ChainConfig::chain_id`]                |
/// | `nonce`    | fresh random nonce                       |
/// | `expiry`   | now + [`ChainConfig::requirement_ttl_secs`] |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequirement {
    #[serde(deserialize_with = "amount_string")]
    pub amount: String,
    pub receiver: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

impl ChallengeRequirement {
    /// Fill in documented defaults and validate the amount.
    pub fn resolve(
        self,
        default_resource: &str,
        config: &ChainConfig,
    ) -> Result<PaymentRequirement, X402Error> {
        parse_amount(&self.amount)?;
        let expiry = match self.expiry {
            Some(expiry) => expiry,
            None => unix_now()? + config.requirement_ttl_secs,
        };
        Ok(PaymentRequirement {
            amount: self.amount,
            currency: self.currency.unwrap_or_else(|| config.currency.clone()),
            receiver: self.receiver,
            resource: self
                .resource
                .unwrap_or_else(|| default_resource.to_string()),
            network: self.network.unwrap_or_else(|| config.network.clone()),
            chain_id: self.chain_id.unwrap_or(config.chain_id),
            nonce: self.nonce.unwrap_or_else(random_nonce),
            expiry,
        })
    }
}

impl From<PaymentRequirement> for ChallengeRequirement {
    fn from(r: PaymentRequirement) -> Self {
        Self {
            amount: r.amount,
            receiver: r.receiver,
            resource: Some(r.resource),
            currency: Some(r.currency),
            network: Some(r.network),
            chain_id: Some(r.chain_id),
            nonce: Some(r.nonce),
            expiry: Some(r.expiry),
        }
    }
}

/// The 402 response body returned by a gated resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub error: String,
    pub code: u16,
    pub payment_requirement: PaymentRequirement,
    pub message: String,
}

impl PaymentRequiredBody {
    pub fn new(requirement: PaymentRequirement, message: impl Into<String>) -> Self {
        Self {
            error: "Payment Required".to_string(),
            code: 402,
            payment_requirement: requirement,
            message: message.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChallengeEnvelope {
    Wrapped {
        #[serde(rename = "paymentRequirement")]
        payment_requirement: ChallengeRequirement,
    },
    Bare(ChallengeRequirement),
}

/// Parse a 402 body that holds either `{paymentRequirement: {...}}` or a bare requirement.
pub fn parse_challenge(body: &[u8]) -> Result<ChallengeRequirement, X402Error> {
    match serde_json::from_slice::<ChallengeEnvelope>(body) {
        Ok(ChallengeEnvelope::Wrapped {
            payment_requirement,
        }) => Ok(payment_requirement),
        Ok(ChallengeEnvelope::Bare(requirement)) => Ok(requirement),
        Err(e) => Err(X402Error::ProtocolError(format!(
            "unrecognised payment challenge: {e}"
        ))),
    }
}

/// Signed mirror of a [`PaymentRequirement`]. Sent base64(JSON) in the `X-PAYMENT` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    /// 0x-prefixed 65-byte signature.
    pub signature: String,
    pub from: Address,
    pub to: Address,
    #[serde(deserialize_with = "amount_string")]
    pub amount: String,
    pub resource: String,
    pub nonce: B256,
    pub expiry: u64,
}

impl PaymentProof {
    pub fn amount_value(&self) -> Result<U256, X402Error> {
        parse_amount(&self.amount)
    }

    /// The canonical structured value the signature is computed over.
    pub fn authorization(&self) -> Result<PaymentAuthorization, X402Error> {
        Ok(PaymentAuthorization {
            from: self.from,
            to: self.to,
            amount: self.amount_value()?,
            resource: self.resource.clone(),
            nonce: self.nonce,
            expiry: U256::from(self.expiry),
        })
    }
}

/// Base64-encode a proof for the `X-PAYMENT` header.
pub fn encode_proof(proof: &PaymentProof) -> Result<String, X402Error> {
    let json = serde_json::to_vec(proof)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

/// Decode an `X-PAYMENT` header value. Rejects anything that is not a
/// well-formed proof with a decimal amount.
pub fn decode_proof(header_value: &str) -> Result<PaymentProof, X402Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(header_value.trim())
        .map_err(|e| X402Error::ProtocolError(format!("invalid base64: {e}")))?;
    let proof: PaymentProof = serde_json::from_slice(&bytes)
        .map_err(|e| X402Error::ProtocolError(format!("invalid JSON payload: {e}")))?;
    proof.amount_value()?;
    Ok(proof)
}

/// Parse a decimal minor-unit amount.
pub fn parse_amount(amount: &str) -> Result<U256, X402Error> {
    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return Err(X402Error::ProtocolError(format!(
            "amount must be a decimal integer, got '{amount}'"
        )));
    }
    U256::from_str_radix(amount, 10)
        .map_err(|e| X402Error::ProtocolError(format!("invalid amount '{amount}': {e}")))
}

/// Amounts are accepted as JSON strings or integers and normalised to a decimal string.
///
/// JSON numbers are only exact up to `u64::MAX`; larger amounts must be sent as
/// strings and a larger bare number is rejected rather than rounded.
fn amount_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct AmountVisitor;

    impl Visitor<'_> for AmountVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a decimal string or a non-negative integer")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Err(E::custom(format!(
                "numeric amount {v} is not an exact integer; send amounts above u64::MAX as strings"
            )))
        }
    }

    deserializer.deserialize_any(AmountVisitor)
}

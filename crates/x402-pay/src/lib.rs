//! x402 pay-per-request protocol.
//!
//! A caller pays a data provider per request by attaching an EIP-712 signed
//! authorization instead of an API key. The provider answers an unpaid request
//! with HTTP 402 and a [`PaymentRequirement`]; the caller signs a matching
//! [`PaymentProof`] and retries once.
//!
//! # Parties
//!
//! - **Signer** ([`PaymentSigner`]) — holds the key, signs proofs
//! - **Issuer** ([`RequirementIssuer`]) — builds fresh, single-use challenges
//! - **Verifier** ([`ProofVerifier`]) — checks expiry, replay, amount, resource and signature
//!
//! # Quick example
//!
//! ```no_run
//! use alloy::primitives::{Address, U256};
//! use x402::{PaymentSigner, ProofSigner, ProofVerifier, RequirementIssuer};
//!
//! let signer = PaymentSigner::random();
//! let issuer = RequirementIssuer::new();
//! let verifier = ProofVerifier::new();
//!
//! let requirement = issuer
//!     .issue("/api/query/price", U256::from(1000u64), Address::ZERO)
//!     .unwrap();
//! let proof = signer.sign_proof(&requirement).unwrap();
//! let result = verifier.verify(&proof, "/api/query/price", U256::from(1000u64)).unwrap();
//! assert!(result.valid);
//! ```

// Core types and traits
pub mod constants;
pub mod error;
pub mod payment;
pub mod response;
pub mod scheme;

// Protocol implementation
pub mod eip712;
pub mod issuer;
pub mod price;
pub mod replay_store;
pub mod security;
pub mod signer;
pub mod verifier;

use alloy::sol;

// EIP-712 struct for payment authorizations.
// The sol! macro derives SolStruct which provides eip712_signing_hash().
sol! {
    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct PaymentAuthorization {
        address from;
        address to;
        uint256 amount;
        string resource;
        bytes32 nonce;
        uint256 expiry;
    }
}

// Re-exports
pub use constants::ChainConfig;
pub use constants::*;
pub use error::X402Error;
pub use payment::*;
pub use response::*;
pub use scheme::*;

pub use issuer::RequirementIssuer;
pub use replay_store::{InMemoryReplayStore, ReplayStore, SqliteReplayStore};
pub use signer::PaymentSigner;
pub use verifier::ProofVerifier;

/// Current unix time in seconds.
pub fn unix_now() -> Result<u64, X402Error> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| X402Error::ConfigError(format!("system time error: {e}")))
}

//! Trait seams between the protocol parties.
//!
//! - [`ProofSigner`] — payer side: turns a requirement into a signed proof
//!
//! See [`crate::signer::PaymentSigner`] for the local-key implementation.

use crate::error::X402Error;
use crate::payment::{PaymentProof, PaymentRequirement};
use alloy::primitives::Address;

/// Payer side: signs payment proofs.
pub trait ProofSigner: Send + Sync {
    /// Address proofs are signed from.
    fn address(&self) -> Address;

    /// Sign a proof that mirrors `requirement` exactly.
    fn sign_proof(&self, requirement: &PaymentRequirement) -> Result<PaymentProof, X402Error>;
}

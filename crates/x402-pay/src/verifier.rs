use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};

use crate::eip712::{decode_signature_hex, verify_signature};
use crate::replay_store::{InMemoryReplayStore, ReplayStore};
use crate::response::{
    REASON_EXPIRED, REASON_INSUFFICIENT_AMOUNT, REASON_INVALID_SIGNATURE, REASON_NONCE_USED,
    REASON_RECEIVER_MISMATCH, REASON_RESOURCE_MISMATCH,
};
use crate::{unix_now, ChainConfig, PaymentProof, VerificationResult, X402Error};

/// Validates signed payment proofs and owns the replay set.
///
/// Checks run in a fixed order and stop at the first failure:
///
/// 1. `expiry > now`
/// 2. `(from, nonce)` not yet spent
/// 3. `amount >= expected` (overpayment is accepted)
/// 4. `resource == expected`, exactly, and `to` is this verifier's receiver
///    when one is bound with [`ProofVerifier::with_receiver`]
/// 5. EIP-712 recovery yields `from`
///
/// Only a proof that passes all five is recorded as spent, and recording is an
/// atomic claim: of two concurrent identical proofs exactly one is accepted.
pub struct ProofVerifier {
    config: ChainConfig,
    replay_store: Arc<dyn ReplayStore>,
    receiver: Option<Address>,
}

impl Default for ProofVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProofVerifier {
    /// Verifier with default chain config and an in-memory replay set.
    ///
    /// # Warning
    /// The in-memory replay set is lost on restart. Proofs that were spent and
    /// have not yet expired become replayable. Use `.with_replay_store(sqlite)`
    /// in production.
    pub fn new() -> Self {
        Self {
            config: ChainConfig::default(),
            replay_store: Arc::new(InMemoryReplayStore::new()),
            receiver: None,
        }
    }

    pub fn with_chain_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_replay_store(mut self, store: Arc<dyn ReplayStore>) -> Self {
        self.replay_store = store;
        self
    }

    /// Only accept proofs that pay `receiver`.
    pub fn with_receiver(mut self, receiver: Address) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn receiver(&self) -> Option<Address> {
        self.receiver
    }

    pub fn replay_store(&self) -> &Arc<dyn ReplayStore> {
        &self.replay_store
    }

    /// Verify against the current wall clock.
    ///
    /// Returns `Err` only for structural problems (an amount that is not a
    /// decimal integer, a broken clock). Every protocol rejection is an `Ok`
    /// with `valid == false` and a reason.
    pub fn verify(
        &self,
        proof: &PaymentProof,
        expected_resource: &str,
        expected_amount: U256,
    ) -> Result<VerificationResult, X402Error> {
        self.verify_at(proof, expected_resource, expected_amount, unix_now()?)
    }

    pub fn verify_at(
        &self,
        proof: &PaymentProof,
        expected_resource: &str,
        expected_amount: U256,
        now: u64,
    ) -> Result<VerificationResult, X402Error> {
        // 1. Expiry
        if proof.expiry <= now {
            tracing::debug!(payer = %proof.from, expiry = proof.expiry, now, "expired proof rejected");
            return Ok(VerificationResult::rejected(REASON_EXPIRED, Some(proof.from)));
        }

        // 2. Replay (read; the atomic claim happens after all checks pass)
        if self.replay_store.is_used(&proof.from, &proof.nonce) {
            tracing::warn!(
                nonce = %format!("{:.8}", proof.nonce),
                payer = %proof.from,
                "replayed nonce rejected"
            );
            return Ok(VerificationResult::rejected(REASON_NONCE_USED, Some(proof.from)));
        }

        // 3. Amount
        let amount = proof.amount_value()?;
        if amount < expected_amount {
            tracing::info!(
                payer = %proof.from,
                amount = %amount,
                required = %expected_amount,
                "underpaid proof rejected"
            );
            return Ok(VerificationResult::rejected(
                REASON_INSUFFICIENT_AMOUNT,
                Some(proof.from),
            ));
        }

        // 4. Resource binding
        if proof.resource != expected_resource {
            tracing::info!(
                payer = %proof.from,
                resource = %proof.resource,
                expected = %expected_resource,
                "proof for a different resource rejected"
            );
            return Ok(VerificationResult::rejected(
                REASON_RESOURCE_MISMATCH,
                Some(proof.from),
            ));
        }
        if let Some(receiver) = self.receiver.filter(|r| *r != proof.to) {
            tracing::info!(
                payer = %proof.from,
                to = %proof.to,
                receiver = %receiver,
                "proof paying another receiver rejected"
            );
            return Ok(VerificationResult::rejected(
                REASON_RECEIVER_MISMATCH,
                Some(proof.from),
            ));
        }

        // 5. Signature
        let auth = proof.authorization()?;
        let recovered = decode_signature_hex(&proof.signature)
            .and_then(|sig| verify_signature(&auth, &sig, &self.config));
        match recovered {
            Ok(addr) if addr == proof.from => {}
            Ok(addr) => {
                tracing::warn!(claimed = %proof.from, recovered = %addr, "signer mismatch");
                return Ok(VerificationResult::rejected(REASON_INVALID_SIGNATURE, None));
            }
            Err(e) => {
                tracing::warn!(payer = %proof.from, error = %e, "signature recovery failed");
                return Ok(VerificationResult::rejected(REASON_INVALID_SIGNATURE, None));
            }
        }

        if !self
            .replay_store
            .try_claim(proof.from, proof.nonce, proof.expiry)
        {
            tracing::warn!(
                nonce = %format!("{:.8}", proof.nonce),
                payer = %proof.from,
                "nonce race: a concurrent proof claimed it first"
            );
            return Ok(VerificationResult::rejected(REASON_NONCE_USED, Some(proof.from)));
        }

        tracing::info!(
            payer = %proof.from,
            amount = %amount,
            resource = %proof.resource,
            nonce = %format!("{:.8}", proof.nonce),
            "payment proof accepted"
        );

        Ok(VerificationResult::accepted(proof.from))
    }

    /// Spawn a background task that purges expired replay entries every `every`.
    /// Must be called from within a tokio runtime.
    pub fn start_replay_cleanup(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.replay_store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let now = match unix_now() {
                    Ok(now) => now,
                    Err(e) => {
                        tracing::error!(error = %e, "skipping replay purge");
                        continue;
                    }
                };
                let purged = store.purge_expired(now);
                if purged > 0 {
                    tracing::info!(purged, "purged expired replay entries");
                }
            }
        })
    }
}

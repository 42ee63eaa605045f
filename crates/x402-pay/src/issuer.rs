use alloy::primitives::{Address, U256};

use crate::eip712::random_nonce;
use crate::{unix_now, ChainConfig, PaymentRequirement, X402Error};

/// Builds payment challenges.
///
/// Every call draws a new nonce and stamps a new expiry, even for identical
/// `(resource, amount, receiver)`. Nothing is cached; the verifier does not need
/// to remember what was issued.
#[derive(Debug, Clone, Default)]
pub struct RequirementIssuer {
    config: ChainConfig,
}

impl RequirementIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain_config(config: ChainConfig) -> Self {
        Self { config }
    }

    /// Override the requirement lifetime.
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.config.requirement_ttl_secs = ttl_secs;
        self
    }

    pub fn ttl_secs(&self) -> u64 {
        self.config.requirement_ttl_secs
    }

    pub fn issue(
        &self,
        resource: &str,
        amount: U256,
        receiver: Address,
    ) -> Result<PaymentRequirement, X402Error> {
        let now = unix_now()?;
        Ok(PaymentRequirement {
            amount: amount.to_string(),
            currency: self.config.currency.clone(),
            receiver,
            resource: resource.to_string(),
            network: self.config.network.clone(),
            chain_id: self.config.chain_id,
            nonce: random_nonce(),
            expiry: now.saturating_add(self.config.requirement_ttl_secs),
        })
    }
}

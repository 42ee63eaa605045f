use std::fmt;

use alloy::primitives::{Address, Signature, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::{Eip712Domain, SolStruct};

use crate::eip712::{encode_signature_hex, payment_domain};
use crate::{
    parse_amount, ChainConfig, PaymentAuthorization, PaymentProof, PaymentRequirement,
    ProofSigner, X402Error,
};

/// The process's single signing key.
///
/// Loaded once at startup and held only in memory. `Debug` prints the address,
/// never the key.
pub struct PaymentSigner {
    signer: PrivateKeySigner,
    config: ChainConfig,
}

impl PaymentSigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self {
            signer,
            config: ChainConfig::default(),
        }
    }

    /// Parse a hex private key (with or without 0x).
    pub fn from_private_key(key: &str) -> Result<Self, X402Error> {
        let signer: PrivateKeySigner = key
            .trim()
            .parse()
            .map_err(|_| X402Error::ConfigError("invalid private key".to_string()))?;
        Ok(Self::new(signer))
    }

    /// Ephemeral key, for tests and local development.
    pub fn random() -> Self {
        Self::new(PrivateKeySigner::random())
    }

    pub fn with_chain_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    /// Sign any EIP-712 struct under the given domain.
    pub fn sign<T: SolStruct>(
        &self,
        domain: &Eip712Domain,
        value: &T,
    ) -> Result<Signature, X402Error> {
        let hash = value.eip712_signing_hash(domain);
        self.signer
            .sign_hash_sync(&hash)
            .map_err(|e| X402Error::SignatureError(format!("signing failed: {e}")))
    }
}

impl fmt::Debug for PaymentSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentSigner")
            .field("address", &self.address())
            .field("chain_id", &self.config.chain_id)
            .finish()
    }
}

impl ProofSigner for PaymentSigner {
    fn address(&self) -> Address {
        PaymentSigner::address(self)
    }

    fn sign_proof(&self, requirement: &PaymentRequirement) -> Result<PaymentProof, X402Error> {
        if requirement.chain_id != self.config.chain_id {
            return Err(X402Error::AuthorizationError(format!(
                "requirement is for chain {}, signer is configured for {}",
                requirement.chain_id, self.config.chain_id
            )));
        }

        let amount = parse_amount(&requirement.amount)?;
        let auth = PaymentAuthorization {
            from: self.address(),
            to: requirement.receiver,
            amount,
            resource: requirement.resource.clone(),
            nonce: requirement.nonce,
            expiry: U256::from(requirement.expiry),
        };
        let sig = self.sign(&payment_domain(&self.config), &auth)?;

        Ok(PaymentProof {
            signature: encode_signature_hex(&sig),
            from: self.address(),
            to: requirement.receiver,
            amount: amount.to_string(),
            resource: requirement.resource.clone(),
            nonce: requirement.nonce,
            expiry: requirement.expiry,
        })
    }
}

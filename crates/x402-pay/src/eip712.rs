//! EIP-712 typed-data hashing, signature recovery, and nonce generation.
//!
//! - [`payment_domain`] builds the domain separator every proof is signed under
//! - [`signing_hash`] hashes a [`PaymentAuthorization`] under that domain
//! - [`verify_signature`] recovers the signer, rejecting malleable signatures (EIP-2)
//! - [`random_nonce`] produces single-use 32-byte nonces

use std::borrow::Cow;

use alloy::primitives::{keccak256, Address, Signature, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};

use crate::{ChainConfig, PaymentAuthorization, X402Error};

/// Build the EIP-712 domain for a chain config.
pub fn payment_domain(config: &ChainConfig) -> Eip712Domain {
    Eip712Domain {
        name: Some(Cow::Owned(config.eip712_domain_name.clone())),
        version: Some(Cow::Owned(config.eip712_domain_version.clone())),
        chain_id: Some(U256::from(config.chain_id)),
        verifying_contract: None,
        salt: None,
    }
}

/// Compute the EIP-712 signing hash of an authorization.
pub fn signing_hash(auth: &PaymentAuthorization, config: &ChainConfig) -> B256 {
    auth.eip712_signing_hash(&payment_domain(config))
}

/// secp256k1 curve order N / 2 — signatures with s > this are malleable (EIP-2).
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xBFD25E8CD0364140,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0x7FFFFFFFFFFFFFFF,
]);

/// Recover the address that signed `auth`.
pub fn verify_signature(
    auth: &PaymentAuthorization,
    signature_bytes: &[u8],
    config: &ChainConfig,
) -> Result<Address, X402Error> {
    if signature_bytes.len() != 65 {
        return Err(X402Error::SignatureError(format!(
            "signature must be 65 bytes, got {}",
            signature_bytes.len()
        )));
    }

    // from_raw accepts v in {0, 1, 27, 28} and rejects anything else.
    let sig = Signature::from_raw(signature_bytes)
        .map_err(|e| X402Error::SignatureError(format!("invalid signature: {e}")))?;

    if sig.s() > SECP256K1_N_DIV_2 {
        return Err(X402Error::SignatureError(
            "high-s signature rejected (EIP-2 malleability)".to_string(),
        ));
    }

    let hash = signing_hash(auth, config);
    sig.recover_address_from_prehash(&hash)
        .map_err(|e| X402Error::SignatureError(format!("recovery failed: {e}")))
}

/// Random 32-byte nonce: keccak256 of 32 bytes from the OS CSPRNG.
pub fn random_nonce() -> B256 {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    keccak256(bytes)
}

/// 0x-prefixed hex of the 65-byte signature (v = 27/28).
pub fn encode_signature_hex(sig: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(sig.as_bytes()))
}

/// Decode a signature from hex, with or without the 0x prefix.
pub fn decode_signature_hex(sig: &str) -> Result<Vec<u8>, X402Error> {
    alloy::hex::decode(sig.strip_prefix("0x").unwrap_or(sig))
        .map_err(|e| X402Error::SignatureError(format!("invalid hex signature: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    fn sample_auth(from: Address) -> PaymentAuthorization {
        PaymentAuthorization {
            from,
            to: Address::repeat_byte(0x11),
            amount: U256::from(1000u64),
            resource: "/api/query/price".to_string(),
            nonce: B256::ZERO,
            expiry: U256::from(u64::MAX),
        }
    }

    #[test]
    fn test_sign_and_recover() {
        let signer = PrivateKeySigner::random();
        let config = ChainConfig::default();
        let auth = sample_auth(signer.address());

        let sig = signer
            .sign_hash_sync(&signing_hash(&auth, &config))
            .unwrap();
        let sig_bytes = decode_signature_hex(&encode_signature_hex(&sig)).unwrap();

        let recovered = verify_signature(&auth, &sig_bytes, &config).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn test_domain_separates_chains() {
        let signer = PrivateKeySigner::random();
        let config = ChainConfig::default();
        let other = ChainConfig {
            chain_id: 1,
            ..ChainConfig::default()
        };
        let auth = sample_auth(signer.address());

        let sig = signer
            .sign_hash_sync(&signing_hash(&auth, &config))
            .unwrap();
        let recovered = verify_signature(&auth, &sig.as_bytes(), &other).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn test_rejects_short_signature() {
        let auth = sample_auth(Address::ZERO);
        let result = verify_signature(&auth, &[0xde, 0xad], &ChainConfig::default());
        assert!(matches!(result, Err(X402Error::SignatureError(_))));
    }

    #[test]
    fn test_rejects_high_s() {
        let signer = PrivateKeySigner::random();
        let config = ChainConfig::default();
        let auth = sample_auth(signer.address());
        let sig = signer
            .sign_hash_sync(&signing_hash(&auth, &config))
            .unwrap();

        // Flip to the malleable twin (n - s, opposite parity).
        let n = SECP256K1_N_DIV_2 * U256::from(2u64) + U256::from(1u64);
        let high = Signature::new(sig.r(), n - sig.s(), !sig.v());
        let result = verify_signature(&auth, &high.as_bytes(), &config);
        assert!(matches!(result, Err(X402Error::SignatureError(_))));
    }

    #[test]
    fn test_random_nonce_is_unique() {
        assert_ne!(random_nonce(), random_nonce());
    }
}

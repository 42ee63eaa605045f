/// Base Sepolia chain ID.
pub const DEFAULT_CHAIN_ID: u64 = 84532;

/// Network name advertised in payment challenges.
pub const DEFAULT_NETWORK: &str = "base-sepolia";

/// Settlement asset symbol advertised in payment challenges.
pub const DEFAULT_CURRENCY: &str = "ETH";

/// Minor units per whole unit of the settlement asset (wei).
pub const TOKEN_DECIMALS: u32 = 18;

/// Default lifetime of an issued requirement, and of client-side defaults
/// when a server omits `expiry`.
pub const REQUIREMENT_TTL_SECS: u64 = 300;

/// Request header carrying the base64-encoded payment proof.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Response header carrying the base64-encoded payment receipt.
pub const PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

pub const EIP712_DOMAIN_NAME: &str = "x402-pay";
pub const EIP712_DOMAIN_VERSION: &str = "1";

/// Runtime chain and protocol configuration shared by the issuer, signer and verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub network: String,
    pub currency: String,
    pub token_decimals: u32,
    pub requirement_ttl_secs: u64,
    pub eip712_domain_name: String,
    pub eip712_domain_version: String,
}

impl Default for ChainConfig {
    /// Defaults to Base Sepolia, native ETH in wei.
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            network: DEFAULT_NETWORK.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            token_decimals: TOKEN_DECIMALS,
            requirement_ttl_secs: REQUIREMENT_TTL_SECS,
            eip712_domain_name: EIP712_DOMAIN_NAME.to_string(),
            eip712_domain_version: EIP712_DOMAIN_VERSION.to_string(),
        }
    }
}

//! x402 client SDK for pay-per-request APIs.
//!
//! Handles the payment handshake: request -> 402 challenge -> sign -> retry once.
//!
//! # Quick Example
//!
//! ```no_run
//! use x402::PaymentSigner;
//! use x402_client::X402Client;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), x402::X402Error> {
//! let signer = PaymentSigner::from_private_key("0xYOUR_KEY")?;
//! let client = X402Client::new(signer)?;
//!
//! let resp = client
//!     .pay_and_fetch("http://localhost:4021/api/query/security?target=0xabc")
//!     .await?;
//!
//! if let Some(receipt) = resp.receipt {
//!     println!("paid {} as {}", receipt.amount, receipt.payer);
//! }
//! # Ok(())
//! # }
//! ```

mod http_client;

pub use http_client::{PaidResponse, X402Client};

// Re-export commonly needed types from core
pub use x402::{
    decode_proof, encode_proof, ChainConfig, PaymentProof, PaymentReceipt, PaymentRequirement,
    PaymentSigner, ProofSigner, X402Error, PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER,
};

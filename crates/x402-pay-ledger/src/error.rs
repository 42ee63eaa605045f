use alloy::primitives::Address;
use thiserror::Error;

/// Errors returned by the registry and ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The spend would push the agent past its daily budget. Fatal for this
    /// spend: nothing was persisted and nothing is retried.
    #[error("daily budget exceeded: spent {spent} + {amount} > budget {budget}")]
    BudgetExceeded {
        spent: u128,
        amount: u128,
        budget: u128,
    },

    #[error("agent {0} is not registered")]
    NotRegistered(Address),

    #[error("agent {0} is already registered")]
    AlreadyRegistered(Address),

    #[error("agent {0} is deactivated")]
    Inactive(Address),

    #[error("invalid budget: {0}")]
    InvalidBudget(String),

    #[error("invalid payment: {0}")]
    InvalidPayment(String),

    /// No authoritative store is configured, so registry operations are unavailable.
    #[error("budget registry not configured")]
    RegistryUnavailable,

    /// The authoritative store is unreachable or failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl LedgerError {
    /// Transport failures are the only errors that degrade a commit to the fallback tier.
    pub fn is_transport(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Transport(format!("sqlite: {e}"))
    }
}

use alloy::primitives::Address;
use chrono::{DateTime, Utc};

use crate::budget::AgentRecord;
use crate::error::LedgerError;
use crate::record::{AgentAggregates, AgentStats, NewPayment, PaymentRecord};

/// The authoritative tier: budget registry plus payment log in one durable store.
///
/// Any failure to reach the store must surface as [`LedgerError::Transport`];
/// that is the only error the ledger degrades to the fallback on.
pub trait AuthoritativeStore: Send + Sync {
    /// Unregistered → Active.
    fn register_agent(
        &self,
        wallet: Address,
        name: &str,
        daily_budget: u128,
        now: DateTime<Utc>,
    ) -> Result<AgentRecord, LedgerError>;

    /// Active agents only.
    fn update_budget(&self, wallet: Address, daily_budget: u128)
        -> Result<AgentRecord, LedgerError>;

    /// Active → Deactivated. Records are kept.
    fn deactivate_agent(&self, wallet: Address) -> Result<AgentRecord, LedgerError>;

    fn get_agent(&self, wallet: Address) -> Result<Option<AgentRecord>, LedgerError>;

    fn agent_count(&self) -> Result<u64, LedgerError>;

    /// Advisory check. The authoritative answer is whether `log_payment` succeeds.
    fn can_spend(&self, wallet: Address, amount: u128, today: i64) -> Result<bool, LedgerError> {
        Ok(self
            .get_agent(wallet)?
            .is_some_and(|agent| agent.can_spend(amount, today)))
    }

    /// Record the spend against the agent's budget, append the payment and
    /// update the aggregates as one all-or-nothing unit.
    fn log_payment(
        &self,
        payment: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord, LedgerError>;

    fn payment_count(&self) -> Result<u64, LedgerError>;

    /// Oldest first.
    fn payments_by_agent(&self, wallet: Address) -> Result<Vec<PaymentRecord>, LedgerError>;

    /// The last `n` payments, oldest first.
    fn recent_payments(&self, n: usize) -> Result<Vec<PaymentRecord>, LedgerError>;

    fn agent_stats(&self, wallet: Address) -> Result<AgentStats, LedgerError>;

    fn aggregates(&self, wallet: Address) -> Result<AgentAggregates, LedgerError>;
}

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::Address;
use chrono::{DateTime, Utc};

use crate::error::LedgerError;
use crate::record::{AgentAggregates, AgentStats, NewPayment, PaymentRecord};

#[derive(Default)]
struct FallbackState {
    records: Vec<PaymentRecord>,
    aggregates: HashMap<Address, AgentAggregates>,
    next_id: u64,
}

/// In-memory ledger used when the authoritative store is absent or unreachable.
///
/// Same record schema and aggregate rules as the authoritative tier, but no
/// budget enforcement. Lost on restart.
#[derive(Default)]
pub struct FallbackLedger {
    state: Mutex<FallbackState>,
}

impl FallbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FallbackState> {
        match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => {
                tracing::error!("fallback ledger mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Append a record and update the aggregates under one lock.
    pub fn append(
        &self,
        payment: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord, LedgerError> {
        payment.validate()?;

        let mut state = self.state();
        state.next_id += 1;
        let record = payment.into_record(state.next_id, now.timestamp());
        state
            .aggregates
            .entry(record.agent)
            .or_default()
            .apply(&record);
        state.records.push(record.clone());
        Ok(record)
    }

    pub fn payment_count(&self) -> u64 {
        self.state().records.len() as u64
    }

    /// Oldest first.
    pub fn payments_by_agent(&self, wallet: Address) -> Vec<PaymentRecord> {
        self.state()
            .records
            .iter()
            .filter(|r| r.agent == wallet)
            .cloned()
            .collect()
    }

    /// The last `n` records, in commit order.
    pub fn recent(&self, n: usize) -> Vec<PaymentRecord> {
        let state = self.state();
        let skip = state.records.len().saturating_sub(n);
        state.records[skip..].to_vec()
    }

    pub fn aggregates(&self, wallet: Address) -> AgentAggregates {
        self.state()
            .aggregates
            .get(&wallet)
            .cloned()
            .unwrap_or_default()
    }

    pub fn agent_stats(&self, wallet: Address) -> AgentStats {
        let state = self.state();
        let mut timestamps = state
            .records
            .iter()
            .filter(|r| r.agent == wallet)
            .map(|r| r.timestamp);
        let first = timestamps.next();
        let last = timestamps.last().or(first);
        let agg = state.aggregates.get(&wallet).cloned().unwrap_or_default();
        AgentStats {
            total_spent: agg.total_spent,
            payment_count: agg.payment_count,
            first_payment: first,
            last_payment: last,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_append_assigns_ids_and_aggregates() {
        let ledger = FallbackLedger::new();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);

        let r1 = ledger
            .append(NewPayment::new(a, "goplus", 10, "0x1", "security"), now())
            .unwrap();
        let r2 = ledger
            .append(NewPayment::new(b, "goplus", 20, "0x2", "security"), now())
            .unwrap();
        ledger
            .append(NewPayment::new(a, "whale-alert", 5, "0x3", "whale"), now())
            .unwrap();

        assert!(r2.id > r1.id);
        assert_eq!(ledger.payment_count(), 3);
        assert_eq!(ledger.payments_by_agent(a).len(), 2);
        assert_eq!(ledger.aggregates(a).total_spent, 15);
        assert_eq!(ledger.aggregates(a).spent_by_source["whale-alert"], 5);
        assert_eq!(ledger.recent(1)[0].amount, 5);
        let ids: Vec<u64> = ledger.recent(2).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![r2.id, r2.id + 1]);
        assert_eq!(ledger.recent(10).len(), 3);
    }

    #[test]
    fn test_no_budget_enforcement() {
        let ledger = FallbackLedger::new();
        let unregistered = Address::repeat_byte(9);
        assert!(ledger
            .append(
                NewPayment::new(unregistered, "goplus", u128::MAX / 2, "0x", "security"),
                now()
            )
            .is_ok());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let ledger = FallbackLedger::new();
        assert!(ledger
            .append(NewPayment::new(Address::ZERO, "goplus", 0, "0x", "security"), now())
            .is_err());
        assert_eq!(ledger.payment_count(), 0);
    }

    #[test]
    fn test_stats_single_record_first_equals_last() {
        let ledger = FallbackLedger::new();
        let a = Address::repeat_byte(1);
        ledger
            .append(NewPayment::new(a, "goplus", 10, "0x1", "security"), now())
            .unwrap();
        let stats = ledger.agent_stats(a);
        assert_eq!(stats.first_payment, stats.last_payment);
        assert_eq!(stats.payment_count, 1);
        assert_eq!(ledger.agent_stats(Address::ZERO), AgentStats::default());
    }
}

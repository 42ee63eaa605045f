use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};

use x402_ledger::{
    AgentAggregates, AgentRecord, AgentStats, AuthoritativeStore, LedgerError, ManualClock,
    NewPayment, PaymentLedger, PaymentRecord, SqliteStore, Tier,
};

const DAY_START: i64 = 20_000 * 86_400;

/// Delegates to SQLite until switched offline, then fails every call as a transport error.
struct FlakyStore {
    inner: SqliteStore,
    offline: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            offline: AtomicBool::new(false),
        }
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

impl AuthoritativeStore for FlakyStore {
    fn register_agent(
        &self,
        wallet: Address,
        name: &str,
        daily_budget: u128,
        now: DateTime<Utc>,
    ) -> Result<AgentRecord, LedgerError> {
        self.check()?;
        self.inner.register_agent(wallet, name, daily_budget, now)
    }

    fn update_budget(
        &self,
        wallet: Address,
        daily_budget: u128,
    ) -> Result<AgentRecord, LedgerError> {
        self.check()?;
        self.inner.update_budget(wallet, daily_budget)
    }

    fn deactivate_agent(&self, wallet: Address) -> Result<AgentRecord, LedgerError> {
        self.check()?;
        self.inner.deactivate_agent(wallet)
    }

    fn get_agent(&self, wallet: Address) -> Result<Option<AgentRecord>, LedgerError> {
        self.check()?;
        self.inner.get_agent(wallet)
    }

    fn agent_count(&self) -> Result<u64, LedgerError> {
        self.check()?;
        self.inner.agent_count()
    }

    fn log_payment(
        &self,
        payment: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord, LedgerError> {
        self.check()?;
        self.inner.log_payment(payment, now)
    }

    fn payment_count(&self) -> Result<u64, LedgerError> {
        self.check()?;
        self.inner.payment_count()
    }

    fn payments_by_agent(&self, wallet: Address) -> Result<Vec<PaymentRecord>, LedgerError> {
        self.check()?;
        self.inner.payments_by_agent(wallet)
    }

    fn recent_payments(&self, n: usize) -> Result<Vec<PaymentRecord>, LedgerError> {
        self.check()?;
        self.inner.recent_payments(n)
    }

    fn agent_stats(&self, wallet: Address) -> Result<AgentStats, LedgerError> {
        self.check()?;
        self.inner.agent_stats(wallet)
    }

    fn aggregates(&self, wallet: Address) -> Result<AgentAggregates, LedgerError> {
        self.check()?;
        self.inner.aggregates(wallet)
    }
}

fn agent() -> Address {
    Address::repeat_byte(0xA1)
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::at(DAY_START + 60))
}

#[test]
fn test_daily_budget_scenario() {
    let ledger = PaymentLedger::new()
        .with_store(Arc::new(SqliteStore::open_in_memory().unwrap()))
        .with_clock(clock());
    ledger.register_agent(agent(), "scanner", 1_000_000).unwrap();

    ledger
        .commit(agent(), "goplus", 500_000, "0x01", "security")
        .unwrap();
    assert_eq!(ledger.get_agent(agent()).unwrap().unwrap().spent_today, 500_000);

    let err = ledger
        .commit(agent(), "goplus", 600_000, "0x02", "security")
        .unwrap_err();
    assert!(matches!(err, LedgerError::BudgetExceeded { .. }));
    assert_eq!(ledger.get_agent(agent()).unwrap().unwrap().spent_today, 500_000);
    assert_eq!(ledger.payment_count().unwrap(), 1);
}

#[test]
fn test_transport_failure_degrades_to_fallback() {
    let store = Arc::new(FlakyStore::new());
    let ledger = PaymentLedger::new()
        .with_store(store.clone())
        .with_clock(clock());
    ledger.register_agent(agent(), "scanner", 1_000).unwrap();

    store.set_offline(true);
    let receipt = ledger
        .commit(agent(), "goplus", 10, "0x01", "security")
        .unwrap();
    assert!(receipt.success);
    assert!(!receipt.authoritative);
    assert_eq!(ledger.fallback().payment_count(), 1);

    // Reads stay on the configured tier and surface the outage.
    assert!(matches!(ledger.payment_count(), Err(LedgerError::Transport(_))));
    assert!(matches!(ledger.query(agent()), Err(LedgerError::Transport(_))));

    store.set_offline(false);
    let receipt = ledger
        .commit(agent(), "goplus", 10, "0x02", "security")
        .unwrap();
    assert!(receipt.authoritative);
    assert_eq!(ledger.tier(), Tier::Authoritative);
    assert_eq!(ledger.payment_count().unwrap(), 1);
}

#[test]
fn test_concurrent_commits_never_exceed_budget() {
    let ledger = Arc::new(
        PaymentLedger::new()
            .with_store(Arc::new(SqliteStore::open_in_memory().unwrap()))
            .with_clock(clock()),
    );
    ledger.register_agent(agent(), "scanner", 1_000).unwrap();

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ledger.commit(agent(), "goplus", 100, &format!("0x{i:02x}"), "security")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 10);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::BudgetExceeded { .. })));

    let agent_record = ledger.get_agent(agent()).unwrap().unwrap();
    assert_eq!(agent_record.spent_today, 1_000);
    assert!(agent_record.spent_today <= agent_record.daily_budget);
}

#[test]
fn test_aggregates_equal_sum_of_records() {
    let ledger = PaymentLedger::new()
        .with_store(Arc::new(SqliteStore::open_in_memory().unwrap()))
        .with_clock(clock());
    ledger.register_agent(agent(), "scanner", u128::MAX).unwrap();

    let sources = ["goplus", "coingecko", "whale-alert"];
    for (i, amount) in [7u128, 50_000_000_000_000, 3, 999, 12].into_iter().enumerate() {
        ledger
            .commit(agent(), sources[i % sources.len()], amount, "0x", "report")
            .unwrap();
    }

    let history = ledger.query(agent()).unwrap();
    let sum: u128 = history.records.iter().map(|r| r.amount).sum();
    assert_eq!(history.aggregates.total_spent, sum);
    assert_eq!(history.aggregates.payment_count, history.records.len() as u64);
    assert_eq!(
        history.aggregates.spent_by_source.values().sum::<u128>(),
        sum
    );
    assert_eq!(ledger.stats(agent()).unwrap().total_spent, sum);
}

#[test]
fn test_deactivated_agent_commit_is_rejected() {
    let ledger = PaymentLedger::new()
        .with_store(Arc::new(SqliteStore::open_in_memory().unwrap()))
        .with_clock(clock());
    ledger.register_agent(agent(), "scanner", 1_000).unwrap();
    ledger.deactivate_agent(agent()).unwrap();

    assert!(matches!(
        ledger.commit(agent(), "goplus", 1, "0x", "security"),
        Err(LedgerError::Inactive(_))
    ));
    assert!(!ledger.can_spend(agent(), 1).unwrap());
    assert_eq!(ledger.fallback().payment_count(), 0);
}

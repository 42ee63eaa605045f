use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::Address;
use dashmap::DashMap;

use crate::budget::AgentRecord;
use crate::clock::{Clock, SystemClock};
use crate::error::LedgerError;
use crate::fallback::FallbackLedger;
use crate::record::{AgentLedger, AgentStats, CommitReceipt, NewPayment, PaymentRecord, Tier};
use crate::store::AuthoritativeStore;

/// Two-tier payment ledger.
///
/// Writes go to the authoritative store when one is configured; a
/// [`LedgerError::Transport`] from it degrades that write to the in-memory
/// fallback. Budget and registration errors are returned as-is.
/// Reads use the configured tier and never mix in fallback data.
///
/// `commit` does not check a payment proof. Callers must only reach it after
/// the payment has been verified.
pub struct PaymentLedger {
    store: Option<Arc<dyn AuthoritativeStore>>,
    fallback: FallbackLedger,
    agent_locks: Arc<DashMap<Address, Arc<Mutex<()>>>>,
    clock: Arc<dyn Clock>,
}

impl Default for PaymentLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentLedger {
    /// A ledger with no authoritative store: every commit lands in the fallback.
    pub fn new() -> Self {
        Self {
            store: None,
            fallback: FallbackLedger::new(),
            agent_locks: Arc::new(DashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn AuthoritativeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The tier reads and writes are directed to.
    pub fn tier(&self) -> Tier {
        if self.store.is_some() {
            Tier::Authoritative
        } else {
            Tier::Fallback
        }
    }

    pub fn fallback(&self) -> &FallbackLedger {
        &self.fallback
    }

    fn agent_lock(&self, agent: Address) -> Arc<Mutex<()>> {
        self.agent_locks
            .entry(agent)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn registry(&self) -> Result<&Arc<dyn AuthoritativeStore>, LedgerError> {
        self.store.as_ref().ok_or(LedgerError::RegistryUnavailable)
    }

    /// Commit one verified payment.
    pub fn commit(
        &self,
        agent: Address,
        provider: &str,
        amount: u128,
        data_hash: &str,
        query_type: &str,
    ) -> Result<CommitReceipt, LedgerError> {
        let payment = NewPayment::new(agent, provider, amount, data_hash, query_type);
        payment.validate()?;
        let now = self.clock.now();

        if let Some(store) = &self.store {
            let lock = self.agent_lock(agent);
            let result = {
                let _guard = lock_recovering(&lock);
                store.log_payment(payment.clone(), now)
            };

            match result {
                Ok(record) => {
                    tracing::info!(
                        agent = %agent,
                        provider = %provider,
                        amount = %amount,
                        id = record.id,
                        "payment committed"
                    );
                    return Ok(CommitReceipt {
                        success: true,
                        authoritative: true,
                        record,
                    });
                }
                Err(e) if e.is_transport() => {
                    tracing::warn!(
                        agent = %agent,
                        error = %e,
                        "authoritative store unavailable, committing to fallback"
                    );
                }
                Err(e) => {
                    tracing::warn!(agent = %agent, amount = %amount, error = %e, "payment commit rejected");
                    return Err(e);
                }
            }
        }

        let record = self.fallback.append(payment, now)?;
        tracing::info!(
            agent = %agent,
            provider = %provider,
            amount = %amount,
            id = record.id,
            "payment committed to fallback ledger"
        );
        Ok(CommitReceipt {
            success: true,
            authoritative: false,
            record,
        })
    }

    /// History and aggregates for one agent.
    pub fn query(&self, agent: Address) -> Result<AgentLedger, LedgerError> {
        match &self.store {
            Some(store) => Ok(AgentLedger {
                records: store.payments_by_agent(agent)?,
                aggregates: store.aggregates(agent)?,
            }),
            None => Ok(AgentLedger {
                records: self.fallback.payments_by_agent(agent),
                aggregates: self.fallback.aggregates(agent),
            }),
        }
    }

    /// The `n` most recent payments, as a suffix of commit order.
    pub fn recent(&self, n: usize) -> Result<Vec<PaymentRecord>, LedgerError> {
        match &self.store {
            Some(store) => store.recent_payments(n),
            None => Ok(self.fallback.recent(n)),
        }
    }

    pub fn stats(&self, agent: Address) -> Result<AgentStats, LedgerError> {
        match &self.store {
            Some(store) => store.agent_stats(agent),
            None => Ok(self.fallback.agent_stats(agent)),
        }
    }

    pub fn payment_count(&self) -> Result<u64, LedgerError> {
        match &self.store {
            Some(store) => store.payment_count(),
            None => Ok(self.fallback.payment_count()),
        }
    }

    // Budget registry. Requires an authoritative store.

    pub fn register_agent(
        &self,
        wallet: Address,
        name: &str,
        daily_budget: u128,
    ) -> Result<AgentRecord, LedgerError> {
        let store = self.registry()?;
        let lock = self.agent_lock(wallet);
        let _guard = lock_recovering(&lock);
        store.register_agent(wallet, name, daily_budget, self.clock.now())
    }

    pub fn update_budget(
        &self,
        wallet: Address,
        daily_budget: u128,
    ) -> Result<AgentRecord, LedgerError> {
        let store = self.registry()?;
        let lock = self.agent_lock(wallet);
        let _guard = lock_recovering(&lock);
        store.update_budget(wallet, daily_budget)
    }

    pub fn deactivate_agent(&self, wallet: Address) -> Result<AgentRecord, LedgerError> {
        let store = self.registry()?;
        let lock = self.agent_lock(wallet);
        let _guard = lock_recovering(&lock);
        store.deactivate_agent(wallet)
    }

    pub fn get_agent(&self, wallet: Address) -> Result<Option<AgentRecord>, LedgerError> {
        self.registry()?.get_agent(wallet)
    }

    pub fn agent_count(&self) -> Result<u64, LedgerError> {
        self.registry()?.agent_count()
    }

    /// Advisory budget check against today's window. A later `commit` may
    /// still be rejected.
    pub fn can_spend(&self, wallet: Address, amount: u128) -> Result<bool, LedgerError> {
        self.registry()?
            .can_spend(wallet, amount, self.clock.today())
    }

    /// Advisory check that names the reason a spend would be refused:
    /// `NotRegistered`, `Inactive` or `BudgetExceeded`.
    pub fn check_spend(&self, wallet: Address, amount: u128) -> Result<(), LedgerError> {
        let agent = self
            .registry()?
            .get_agent(wallet)?
            .ok_or(LedgerError::NotRegistered(wallet))?;
        agent.apply_spend(amount, self.clock.today()).map(|_| ())
    }

    /// Drop per-agent locks nobody holds. Returns the number removed.
    pub fn cleanup_idle_locks(&self) -> usize {
        let before = self.agent_locks.len();
        self.agent_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        before.saturating_sub(self.agent_locks.len())
    }

    /// Start a background task that drops idle per-agent locks every `every`.
    pub fn start_lock_cleanup(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = ledger.cleanup_idle_locks();
                if removed > 0 {
                    tracing::info!(removed, "cleaned up idle agent locks");
                }
            }
        })
    }
}

fn lock_recovering(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    match lock.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::error!("agent lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

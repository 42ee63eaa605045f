//! Budget registry and payment ledger for x402 agents.
//!
//! Every verified payment is committed through [`PaymentLedger::commit`], which
//! writes to one of two tiers:
//!
//! - **Authoritative** ([`SqliteStore`], or any [`AuthoritativeStore`]) — the
//!   agent's daily budget is checked and incremented in the same transaction
//!   that appends the record and updates the aggregates.
//! - **Fallback** ([`FallbackLedger`]) — in-memory, same schema and aggregate
//!   rules, used when no authoritative store is configured or it is
//!   unreachable. The fallback does **not** enforce budgets.
//!
//! # Modules
//!
//! - [`budget`] — agent record and the shared day-rollover rule
//! - [`clock`] — injectable wall clock
//! - [`record`] — payment records, aggregates and stats
//! - [`store`] — the authoritative store trait
//! - [`sqlite`] — SQLite authoritative store
//! - [`fallback`] — in-memory fallback
//! - [`ledger`] — two-tier commit and read selection

pub mod budget;
pub mod clock;
pub mod error;
pub mod fallback;
pub mod ledger;
pub mod record;
pub mod sqlite;
pub mod store;

pub use budget::{utc_day, AgentRecord, AgentState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::LedgerError;
pub use fallback::FallbackLedger;
pub use ledger::PaymentLedger;
pub use record::{
    AgentAggregates, AgentLedger, AgentStats, CommitReceipt, NewPayment, PaymentRecord, Tier,
};
pub use sqlite::SqliteStore;
pub use store::AuthoritativeStore;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::record::amount_string;

const SECONDS_PER_DAY: i64 = 86_400;

/// UTC day index: whole days since the unix epoch.
pub fn utc_day(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(SECONDS_PER_DAY)
}

/// Lifecycle of a wallet in the registry. `Deactivated` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Unregistered,
    Active,
    Deactivated,
}

impl AgentState {
    pub fn of(record: Option<&AgentRecord>) -> Self {
        match record {
            None => AgentState::Unregistered,
            Some(r) if r.active => AgentState::Active,
            Some(_) => AgentState::Deactivated,
        }
    }
}

/// The daily spend window. Both the advisory check and the authoritative
/// spend go through [`BudgetWindow::rolled`] and [`BudgetWindow::admits`],
/// so the day boundary and comparison cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetWindow {
    pub daily_budget: u128,
    pub spent_today: u128,
    pub last_reset_day: i64,
}

impl BudgetWindow {
    /// The window as seen on `today`. A new day zeroes the spend; a clock
    /// that moved backwards never moves `last_reset_day` back.
    pub fn rolled(self, today: i64) -> Self {
        if self.last_reset_day < today {
            Self {
                spent_today: 0,
                last_reset_day: today,
                ..self
            }
        } else {
            self
        }
    }

    pub fn admits(&self, amount: u128) -> bool {
        self.spent_today
            .checked_add(amount)
            .is_some_and(|total| total <= self.daily_budget)
    }

    pub fn remaining(&self) -> u128 {
        self.daily_budget.saturating_sub(self.spent_today)
    }

    /// Roll to `today`, then apply `amount`. Returns the window to persist.
    pub fn spend(self, amount: u128, today: i64) -> Result<Self, LedgerError> {
        let rolled = self.rolled(today);
        if !rolled.admits(amount) {
            return Err(LedgerError::BudgetExceeded {
                spent: rolled.spent_today,
                amount,
                budget: rolled.daily_budget,
            });
        }
        Ok(Self {
            spent_today: rolled.spent_today + amount,
            ..rolled
        })
    }
}

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub wallet: Address,
    pub name: String,
    #[serde(with = "amount_string")]
    pub daily_budget: u128,
    #[serde(with = "amount_string")]
    pub spent_today: u128,
    pub last_reset_day: i64,
    pub active: bool,
    /// Unix seconds.
    pub registered_at: i64,
}

impl AgentRecord {
    pub fn new(wallet: Address, name: impl Into<String>, daily_budget: u128, now: DateTime<Utc>) -> Self {
        Self {
            wallet,
            name: name.into(),
            daily_budget,
            spent_today: 0,
            last_reset_day: utc_day(now),
            active: true,
            registered_at: now.timestamp(),
        }
    }

    pub fn window(&self) -> BudgetWindow {
        BudgetWindow {
            daily_budget: self.daily_budget,
            spent_today: self.spent_today,
            last_reset_day: self.last_reset_day,
        }
    }

    pub fn state(&self) -> AgentState {
        AgentState::of(Some(self))
    }

    /// Spend already counted against `today`'s budget.
    pub fn effective_spent(&self, today: i64) -> u128 {
        self.window().rolled(today).spent_today
    }

    pub fn remaining(&self, today: i64) -> u128 {
        self.window().rolled(today).remaining()
    }

    /// Advisory: false for deactivated agents or when `amount` would exceed the budget.
    pub fn can_spend(&self, amount: u128, today: i64) -> bool {
        self.active && self.window().rolled(today).admits(amount)
    }

    /// The record after spending `amount` on `today`. `self` is untouched,
    /// so a rejected spend leaves nothing to persist.
    pub(crate) fn apply_spend(&self, amount: u128, today: i64) -> Result<AgentRecord, LedgerError> {
        if !self.active {
            return Err(LedgerError::Inactive(self.wallet));
        }
        let window = self.window().spend(amount, today)?;
        Ok(AgentRecord {
            spent_today: window.spent_today,
            last_reset_day: window.last_reset_day,
            ..self.clone()
        })
    }
}

pub(crate) fn validate_budget(daily_budget: u128) -> Result<(), LedgerError> {
    if daily_budget == 0 {
        return Err(LedgerError::InvalidBudget("daily budget must be positive".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), LedgerError> {
    if name.trim().is_empty() {
        return Err(LedgerError::InvalidBudget("agent name must not be empty".to_string()));
    }
    if name.len() > 128 {
        return Err(LedgerError::InvalidBudget("agent name too long".to_string()));
    }
    Ok(())
}

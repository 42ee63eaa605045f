use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::budget::{utc_day, validate_budget, validate_name, AgentRecord};
use crate::error::LedgerError;
use crate::record::{AgentAggregates, AgentStats, NewPayment, PaymentRecord};
use crate::store::AuthoritativeStore;

/// SQLite-backed authoritative store.
///
/// Addresses are stored as lowercase hex TEXT, amounts as decimal TEXT
/// (SQLite INTEGER cannot hold a `u128`). Every budget-mutating operation
/// runs inside an `IMMEDIATE` transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a ledger database at `path`.
    ///
    /// On Unix the file is restricted to 0600.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::from_connection(conn)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to restrict ledger database permissions to 0600"
                );
            }
        }

        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                wallet TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                daily_budget TEXT NOT NULL,
                spent_today TEXT NOT NULL DEFAULT '0',
                last_reset_day INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                registered_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS payments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent TEXT NOT NULL,
                data_source TEXT NOT NULL,
                amount TEXT NOT NULL,
                data_hash TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                query_type TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_payments_agent ON payments(agent, id);

            CREATE TABLE IF NOT EXISTS agent_totals (
                agent TEXT PRIMARY KEY,
                total_spent TEXT NOT NULL DEFAULT '0',
                payment_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS agent_source_totals (
                agent TEXT NOT NULL,
                data_source TEXT NOT NULL,
                total_spent TEXT NOT NULL DEFAULT '0',
                PRIMARY KEY (agent, data_source)
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Transport("ledger database lock poisoned".to_string()))
    }
}

fn wallet_key(wallet: &Address) -> String {
    wallet.to_string().to_lowercase()
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn get_address(row: &Row<'_>, idx: usize) -> rusqlite::Result<Address> {
    let s: String = row.get(idx)?;
    s.parse::<Address>().map_err(|e| conversion_error(idx, e))
}

fn get_amount(row: &Row<'_>, idx: usize) -> rusqlite::Result<u128> {
    let s: String = row.get(idx)?;
    s.parse::<u128>().map_err(|e| conversion_error(idx, e))
}

fn parse_amount(s: &str) -> Result<u128, LedgerError> {
    s.parse::<u128>()
        .map_err(|e| LedgerError::Transport(format!("corrupt amount '{s}': {e}")))
}

const AGENT_COLUMNS: &str =
    "wallet, name, daily_budget, spent_today, last_reset_day, active, registered_at";

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<AgentRecord> {
    Ok(AgentRecord {
        wallet: get_address(row, 0)?,
        name: row.get(1)?,
        daily_budget: get_amount(row, 2)?,
        spent_today: get_amount(row, 3)?,
        last_reset_day: row.get(4)?,
        active: row.get::<_, i32>(5)? == 1,
        registered_at: row.get(6)?,
    })
}

const PAYMENT_COLUMNS: &str = "id, agent, data_source, amount, data_hash, timestamp, query_type";

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentRecord> {
    Ok(PaymentRecord {
        id: row.get::<_, i64>(0)? as u64,
        agent: get_address(row, 1)?,
        data_source: row.get(2)?,
        amount: get_amount(row, 3)?,
        data_hash: row.get(4)?,
        timestamp: row.get(5)?,
        query_type: row.get(6)?,
    })
}

fn load_agent(conn: &Connection, wallet: &Address) -> Result<Option<AgentRecord>, LedgerError> {
    let agent = conn
        .query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE wallet = ?1"),
            params![wallet_key(wallet)],
            agent_from_row,
        )
        .optional()?;
    Ok(agent)
}

fn load_active_agent(conn: &Connection, wallet: Address) -> Result<AgentRecord, LedgerError> {
    let agent = load_agent(conn, &wallet)?.ok_or(LedgerError::NotRegistered(wallet))?;
    if !agent.active {
        return Err(LedgerError::Inactive(wallet));
    }
    Ok(agent)
}

/// Check-then-increment for one spend, with the lazy day reset. Must run
/// inside the caller's transaction; a rejected spend writes nothing.
pub(crate) fn record_spend(
    conn: &Connection,
    wallet: Address,
    amount: u128,
    today: i64,
) -> Result<AgentRecord, LedgerError> {
    let agent = load_active_agent(conn, wallet)?;
    let updated = agent.apply_spend(amount, today)?;
    conn.execute(
        "UPDATE agents SET spent_today = ?1, last_reset_day = ?2 WHERE wallet = ?3",
        params![
            updated.spent_today.to_string(),
            updated.last_reset_day,
            wallet_key(&wallet)
        ],
    )?;
    Ok(updated)
}

fn bump_totals(conn: &Connection, record: &PaymentRecord) -> Result<(), LedgerError> {
    let agent = wallet_key(&record.agent);

    let current: Option<(String, i64)> = conn
        .query_row(
            "SELECT total_spent, payment_count FROM agent_totals WHERE agent = ?1",
            params![agent],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (total, count) = match current {
        Some((total, count)) => (parse_amount(&total)?, count),
        None => (0, 0),
    };
    conn.execute(
        "INSERT OR REPLACE INTO agent_totals (agent, total_spent, payment_count) VALUES (?1, ?2, ?3)",
        params![agent, total.saturating_add(record.amount).to_string(), count + 1],
    )?;

    let by_source: Option<String> = conn
        .query_row(
            "SELECT total_spent FROM agent_source_totals WHERE agent = ?1 AND data_source = ?2",
            params![agent, record.data_source],
            |row| row.get(0),
        )
        .optional()?;
    let by_source = match by_source {
        Some(s) => parse_amount(&s)?,
        None => 0,
    };
    conn.execute(
        "INSERT OR REPLACE INTO agent_source_totals (agent, data_source, total_spent) VALUES (?1, ?2, ?3)",
        params![
            agent,
            record.data_source,
            by_source.saturating_add(record.amount).to_string()
        ],
    )?;

    Ok(())
}

impl AuthoritativeStore for SqliteStore {
    fn register_agent(
        &self,
        wallet: Address,
        name: &str,
        daily_budget: u128,
        now: DateTime<Utc>,
    ) -> Result<AgentRecord, LedgerError> {
        validate_name(name)?;
        validate_budget(daily_budget)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if load_agent(&tx, &wallet)?.is_some() {
            return Err(LedgerError::AlreadyRegistered(wallet));
        }

        let agent = AgentRecord::new(wallet, name, daily_budget, now);
        tx.execute(
            &format!("INSERT INTO agents ({AGENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)"),
            params![
                wallet_key(&wallet),
                agent.name,
                agent.daily_budget.to_string(),
                agent.spent_today.to_string(),
                agent.last_reset_day,
                agent.registered_at
            ],
        )?;
        tx.commit()?;

        tracing::info!(agent = %wallet, name = %agent.name, daily_budget = %daily_budget, "agent registered");
        Ok(agent)
    }

    fn update_budget(
        &self,
        wallet: Address,
        daily_budget: u128,
    ) -> Result<AgentRecord, LedgerError> {
        validate_budget(daily_budget)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut agent = load_active_agent(&tx, wallet)?;
        tx.execute(
            "UPDATE agents SET daily_budget = ?1 WHERE wallet = ?2",
            params![daily_budget.to_string(), wallet_key(&wallet)],
        )?;
        tx.commit()?;

        agent.daily_budget = daily_budget;
        tracing::info!(agent = %wallet, daily_budget = %daily_budget, "agent budget updated");
        Ok(agent)
    }

    fn deactivate_agent(&self, wallet: Address) -> Result<AgentRecord, LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut agent = load_active_agent(&tx, wallet)?;
        let rows = tx.execute(
            "UPDATE agents SET active = 0 WHERE wallet = ?1 AND active = 1",
            params![wallet_key(&wallet)],
        )?;
        if rows == 0 {
            return Err(LedgerError::Inactive(wallet));
        }
        tx.commit()?;

        agent.active = false;
        tracing::info!(agent = %wallet, "agent deactivated");
        Ok(agent)
    }

    fn get_agent(&self, wallet: Address) -> Result<Option<AgentRecord>, LedgerError> {
        let conn = self.conn()?;
        load_agent(&conn, &wallet)
    }

    fn agent_count(&self) -> Result<u64, LedgerError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM agents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn log_payment(
        &self,
        payment: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord, LedgerError> {
        payment.validate()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        record_spend(&tx, payment.agent, payment.amount, utc_day(now))?;

        let timestamp = now.timestamp();
        tx.execute(
            "INSERT INTO payments (agent, data_source, amount, data_hash, timestamp, query_type) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                wallet_key(&payment.agent),
                payment.data_source,
                payment.amount.to_string(),
                payment.data_hash,
                timestamp,
                payment.query_type
            ],
        )?;
        let id = tx.last_insert_rowid() as u64;
        let record = payment.into_record(id, timestamp);

        bump_totals(&tx, &record)?;
        tx.commit()?;

        Ok(record)
    }

    fn payment_count(&self) -> Result<u64, LedgerError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM payments", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn payments_by_agent(&self, wallet: Address) -> Result<Vec<PaymentRecord>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE agent = ?1 ORDER BY id ASC"
        ))?;
        let records = stmt
            .query_map(params![wallet_key(&wallet)], payment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn recent_payments(&self, n: usize) -> Result<Vec<PaymentRecord>, LedgerError> {
        let conn = self.conn()?;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM (SELECT {PAYMENT_COLUMNS} FROM payments ORDER BY id DESC LIMIT ?1) ORDER BY id ASC"
        ))?;
        let records = stmt
            .query_map(params![limit], payment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn agent_stats(&self, wallet: Address) -> Result<AgentStats, LedgerError> {
        let conn = self.conn()?;
        let key = wallet_key(&wallet);

        let totals: Option<(String, i64)> = conn
            .query_row(
                "SELECT total_spent, payment_count FROM agent_totals WHERE agent = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (first_payment, last_payment): (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM payments WHERE agent = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (total_spent, payment_count) = match totals {
            Some((total, count)) => (parse_amount(&total)?, count as u64),
            None => (0, 0),
        };
        Ok(AgentStats {
            total_spent,
            payment_count,
            first_payment,
            last_payment,
        })
    }

    fn aggregates(&self, wallet: Address) -> Result<AgentAggregates, LedgerError> {
        let conn = self.conn()?;
        let key = wallet_key(&wallet);

        let totals: Option<(String, i64)> = conn
            .query_row(
                "SELECT total_spent, payment_count FROM agent_totals WHERE agent = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (total_spent, payment_count) = match totals {
            Some((total, count)) => (parse_amount(&total)?, count as u64),
            None => (0, 0),
        };

        let mut stmt = conn.prepare(
            "SELECT data_source, total_spent FROM agent_source_totals WHERE agent = ?1",
        )?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, get_amount(row, 1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AgentAggregates {
            total_spent,
            payment_count,
            spent_by_source: rows.into_iter().collect::<BTreeMap<_, _>>(),
        })
    }
}

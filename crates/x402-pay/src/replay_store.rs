use std::sync::{Mutex, MutexGuard};

use alloy::primitives::{Address, B256};
use dashmap::DashMap;

/// Replay set for spent `(signer, nonce)` pairs.
///
/// An entry must survive at least until its proof's `expiry` has passed; after
/// that the verifier rejects the proof on expiry alone and the entry may be purged.
/// Implementations must be thread-safe (`Send + Sync`).
pub trait ReplayStore: Send + Sync {
    /// Whether `(signer, nonce)` has already been spent.
    fn is_used(&self, signer: &Address, nonce: &B256) -> bool;

    /// Atomically mark `(signer, nonce)` as spent.
    /// Returns `true` if this call claimed it, `false` if it was already spent.
    fn try_claim(&self, signer: Address, nonce: B256, expiry: u64) -> bool;

    /// Remove entries whose expiry is strictly before `now`. Returns number purged.
    fn purge_expired(&self, now: u64) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory replay set backed by DashMap. Fast but lost on restart.
#[derive(Default)]
pub struct InMemoryReplayStore {
    entries: DashMap<(Address, B256), u64>,
}

impl InMemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayStore for InMemoryReplayStore {
    fn is_used(&self, signer: &Address, nonce: &B256) -> bool {
        self.entries.contains_key(&(*signer, *nonce))
    }

    fn try_claim(&self, signer: Address, nonce: B256, expiry: u64) -> bool {
        // The entry API holds the shard lock across check and insert.
        use dashmap::mapref::entry::Entry;
        match self.entries.entry((signer, nonce)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(expiry);
                true
            }
        }
    }

    fn purge_expired(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expiry| *expiry >= now);
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Persistent replay set backed by SQLite. Survives restarts.
pub struct SqliteReplayStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteReplayStore {
    /// Open (or create) a replay database at `path`.
    ///
    /// On Unix the file is restricted to 0600.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS spent_nonces (
                signer BLOB NOT NULL,
                nonce BLOB NOT NULL,
                expiry INTEGER NOT NULL,
                PRIMARY KEY (signer, nonce)
            );
            CREATE INDEX IF NOT EXISTS idx_spent_nonces_expiry ON spent_nonces(expiry);
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to restrict replay database permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("replay store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// SQLite INTEGER is signed; clamp instead of wrapping.
fn to_sql_time(t: u64) -> i64 {
    i64::try_from(t).unwrap_or(i64::MAX)
}

impl ReplayStore for SqliteReplayStore {
    fn is_used(&self, signer: &Address, nonce: &B256) -> bool {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM spent_nonces WHERE signer = ?1 AND nonce = ?2",
                rusqlite::params![signer.as_slice(), nonce.as_slice()],
                |row| row.get(0),
            )
            // Fail secure: a read error counts as spent.
            .unwrap_or(1);
        count > 0
    }

    fn try_claim(&self, signer: Address, nonce: B256, expiry: u64) -> bool {
        // The primary key makes the insert the atomic claim, across processes too.
        match self.conn().execute(
            "INSERT INTO spent_nonces (signer, nonce, expiry) VALUES (?1, ?2, ?3)",
            rusqlite::params![signer.as_slice(), nonce.as_slice(), to_sql_time(expiry)],
        ) {
            Ok(_) => true,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to record spent nonce, rejecting proof");
                false
            }
        }
    }

    fn purge_expired(&self, now: u64) -> usize {
        self.conn()
            .execute(
                "DELETE FROM spent_nonces WHERE expiry < ?1",
                rusqlite::params![to_sql_time(now)],
            )
            .unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.conn()
            .query_row("SELECT COUNT(*) FROM spent_nonces", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| usize::try_from(n).unwrap_or(0))
            .unwrap_or(0)
    }
}

//! Durable lock state: the Lock Registry and the Unlock Ledger.
//!
//! Backed by a single SQLite key-value table. All methods take `&self` and
//! use an internal `Mutex<Connection>`; writes are synchronous (rusqlite is
//! sync) but fast, so both the poll task and the CLI call in directly.
//!
//! Keys:
//! - `locked_set` — JSON array of locked package identifiers
//! - `unlocked_<pkg>` — last successful unlock, ms since the Unix epoch
//! - `unlocked_set` — JSON array of packages ever unlocked (auxiliary)

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

// ── Errors ──────────────────────────────────────────────────────

/// Lock store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite database error.
    #[error("database error: {0}")]
    Database(String),
    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// ── Schema ──────────────────────────────────────────────────────

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lock_state (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const KEY_LOCKED_SET: &str = "locked_set";
const KEY_UNLOCKED_SET: &str = "unlocked_set";
const PREFIX_UNLOCKED_TIME: &str = "unlocked_";

// ── LockStore ───────────────────────────────────────────────────

/// SQLite-backed store for the Lock Registry and Unlock Ledger.
///
/// Single writer per process; individual reads and writes are atomic at the
/// SQLite level, which is the only consistency the gate requires.
pub struct LockStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for LockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockStore").finish()
    }
}

impl LockStore {
    /// Open a store backed by a file, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── kv helpers ───────────────────────────────────────────────

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        conn.query_row(
            "SELECT value FROM lock_state WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::from)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO lock_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_set(&self, key: &str) -> Result<BTreeSet<String>, StoreError> {
        match self.get(key)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(BTreeSet::new()),
        }
    }

    fn put_set(&self, key: &str, set: &BTreeSet<String>) -> Result<(), StoreError> {
        self.put(key, &serde_json::to_string(set)?)
    }

    // ── Lock Registry ────────────────────────────────────────────

    /// Whether a package is a member of the locked set.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn is_locked(&self, pkg: &str) -> Result<bool, StoreError> {
        Ok(self.locked_set()?.contains(pkg))
    }

    /// The current locked set.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn locked_set(&self) -> Result<BTreeSet<String>, StoreError> {
        self.get_set(KEY_LOCKED_SET)
    }

    /// Replace the locked set wholesale.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn set_locked_set(&self, pkgs: &BTreeSet<String>) -> Result<(), StoreError> {
        debug!(count = pkgs.len(), "locked set replaced");
        self.put_set(KEY_LOCKED_SET, pkgs)
    }

    /// Toggle a package in or out of the locked set.
    ///
    /// Returns `true` if the package is locked after the call. This is the
    /// only registry mutation the user-facing surface exposes.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn toggle_locked(&self, pkg: &str) -> Result<bool, StoreError> {
        let mut set = self.locked_set()?;
        let now_locked = if set.remove(pkg) {
            false
        } else {
            set.insert(pkg.to_owned());
            true
        };
        self.set_locked_set(&set)?;
        debug!(package = %pkg, locked = now_locked, "locked set toggled");
        Ok(now_locked)
    }

    // ── Unlock Ledger ────────────────────────────────────────────

    /// Record a successful unlock for a package at the current time.
    ///
    /// Overwrites any prior entry and adds the package to the auxiliary
    /// ever-unlocked set.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn record_unlock(&self, pkg: &str) -> Result<(), StoreError> {
        self.record_unlock_at(pkg, Utc::now())
    }

    /// Record a successful unlock at an explicit instant.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn record_unlock_at(&self, pkg: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.put(
            &format!("{PREFIX_UNLOCKED_TIME}{pkg}"),
            &at.timestamp_millis().to_string(),
        )?;
        let mut ever = self.get_set(KEY_UNLOCKED_SET)?;
        if ever.insert(pkg.to_owned()) {
            self.put_set(KEY_UNLOCKED_SET, &ever)?;
        }
        debug!(package = %pkg, at_ms = at.timestamp_millis(), "unlock recorded");
        Ok(())
    }

    /// Last successful unlock time for a package.
    ///
    /// Returns the Unix epoch when no entry exists, so a missing entry
    /// always falls outside any grace window.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn last_unlock_time(&self, pkg: &str) -> Result<DateTime<Utc>, StoreError> {
        let ms = match self.get(&format!("{PREFIX_UNLOCKED_TIME}{pkg}"))? {
            Some(v) => v
                .parse::<i64>()
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => 0,
        };
        Ok(Utc.timestamp_millis_opt(ms).single().unwrap_or_default())
    }

    /// Packages that have ever been unlocked (auxiliary, for bulk queries).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn ever_unlocked(&self) -> Result<BTreeSet<String>, StoreError> {
        self.get_set(KEY_UNLOCKED_SET)
    }
}

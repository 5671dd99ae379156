//! SQLite-backed document store shared by every persisted collection.
//!
//! One database file holds four logical collections:
//!
//! ```text
//! credentials         0..1 row   (singleton)
//! tokens              0..1 row   (singleton)
//! mirrored_resources  keyed by (kind, id)
//! audit_logs          append-only
//! ```
//!
//! Every operation runs on a blocking thread and is bounded by the configured
//! store timeout, so a stalled database cannot hold an inbound request forever.

mod cipher;

pub use cipher::{Sealed, SecretCipher};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default bound for a single store operation.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    slot                INTEGER PRIMARY KEY CHECK (slot = 1),
    client_id           TEXT NOT NULL,
    client_secret       TEXT NOT NULL,
    client_secret_nonce TEXT NOT NULL,
    token_url           TEXT NOT NULL,
    revision            TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    slot               INTEGER PRIMARY KEY CHECK (slot = 1),
    access_token       TEXT NOT NULL,
    access_token_nonce TEXT NOT NULL,
    expiry             TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mirrored_resources (
    kind       TEXT NOT NULL,
    id         TEXT NOT NULL,
    document   TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (kind, id)
);

CREATE TABLE IF NOT EXISTS audit_logs (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT UNIQUE NOT NULL,
    user        TEXT NOT NULL,
    action      TEXT NOT NULL,
    resource    TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    details     TEXT NOT NULL,
    timestamp   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_resource ON audit_logs(resource);
"#;

/// Handle to the gateway database. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    op_timeout: Duration,
}

impl Database {
    /// Opens (or creates) the database and ensures every table exists.
    ///
    /// Use `":memory:"` for a throwaway store in tests.
    pub fn open<P: AsRef<Path>>(path: P, op_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.busy_timeout(op_timeout)
            .context("Failed to set busy timeout")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            op_timeout,
        })
    }

    /// Opens an in-memory database with the default operation timeout.
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:", DEFAULT_OP_TIMEOUT)
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    /// Runs `f` against the connection on a blocking thread.
    ///
    /// `op` names the operation in error messages. Exceeding the store timeout
    /// fails the call; the blocking work itself is not cancelled.
    pub async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow!("database connection lock poisoned"))?;
            f(&guard)
        });

        match tokio::time::timeout(self.op_timeout, task).await {
            Ok(joined) => joined
                .with_context(|| format!("{} task failed", op))?
                .with_context(|| format!("{} failed", op)),
            Err(_) => Err(anyhow!("{} timed out after {:?}", op, self.op_timeout)),
        }
    }
}

//! SqliteStore: every version is a row of one append-only table
//!
//! ```sql
//! CREATE TABLE data (
//!     "key"   TEXT    NOT NULL,
//!     version INTEGER NOT NULL,
//!     value   BLOB    NOT NULL,
//!     time    INTEGER NOT NULL DEFAULT (<now in microseconds>),
//!     PRIMARY KEY ("key", version)
//! )
//! ```
//!
//! `put` computes `MAX(version) + 1` and inserts in one statement, inside an
//! IMMEDIATE transaction, so the database serializes concurrent writers even
//! when they hold separate connections to the same file.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use kiwi_core::{Error, Result, Timestamp, Version, VersionedStore};

/// Default time a writer waits for another connection's lock
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS data (
    "key"   TEXT    NOT NULL,
    version INTEGER NOT NULL,
    value   BLOB    NOT NULL,
    time    INTEGER NOT NULL
            DEFAULT (CAST(ROUND((julianday('now') - 2440587.5) * 86400000.0) AS INTEGER) * 1000),
    PRIMARY KEY ("key", version)
);
"#;

const Q_PUT: &str = r#"
INSERT INTO data ("key", version, value)
SELECT ?1, COALESCE(MAX(version) + 1, 0), ?2 FROM data WHERE "key" = ?1
RETURNING version
"#;

const Q_HAS_ANY: &str = r#"SELECT EXISTS(SELECT 1 FROM data WHERE "key" = ?1)"#;
const Q_HAS: &str = r#"SELECT EXISTS(SELECT 1 FROM data WHERE "key" = ?1 AND version = ?2)"#;
const Q_GET_LATEST: &str =
    r#"SELECT value FROM data WHERE "key" = ?1 ORDER BY version DESC LIMIT 1"#;
const Q_GET: &str = r#"SELECT value FROM data WHERE "key" = ?1 AND version = ?2"#;
const Q_TIME_LATEST: &str =
    r#"SELECT time FROM data WHERE "key" = ?1 ORDER BY version DESC LIMIT 1"#;
const Q_TIME: &str = r#"SELECT time FROM data WHERE "key" = ?1 AND version = ?2"#;
const Q_REM: &str = r#"DELETE FROM data WHERE "key" = ?1"#;
const Q_LIST: &str = r#"SELECT DISTINCT "key" FROM data"#;

/// SQLite-backed versioned store
///
/// The connection sits behind a mutex so one store can be shared across
/// threads. Separate stores opened on the same file are serialized by
/// SQLite itself.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a database file with the default busy timeout
    ///
    /// # Errors
    ///
    /// `Error::Config` if the file cannot be opened or the schema cannot
    /// be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open (or create) a database file
    ///
    /// `busy_timeout` bounds how long a writer waits on another
    /// connection's lock before SQLite reports `SQLITE_BUSY`.
    pub fn open_with_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            Error::Config(format!("cannot open database '{}': {}", path.display(), e))
        })?;
        conn.busy_timeout(busy_timeout).map_err(config_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(config_err)?;
        let store = Self::init(conn)?;
        info!(target: "kiwi::sqlite", path = ?path, "Opened sqlite store");
        Ok(store)
    }

    /// Create a private in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(config_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(config_err)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn query_exists(&self, key: &str, version: Option<Version>) -> Result<bool> {
        let conn = self.conn.lock();
        let exists = match version {
            Some(v) => conn.query_row(Q_HAS, params![key, to_sql_version(v)?], |row| row.get(0)),
            None => conn.query_row(Q_HAS_ANY, params![key], |row| row.get(0)),
        };
        exists.map_err(db_err)
    }
}

impl VersionedStore for SqliteStore {
    fn has(&self, key: &str, version: Option<Version>) -> Result<bool> {
        self.query_exists(key, version)
    }

    fn get(&self, key: &str, version: Option<Version>) -> Result<Vec<u8>> {
        let conn = self.conn.lock();
        let value: Option<Vec<u8>> = match version {
            Some(v) => conn
                .query_row(Q_GET, params![key, to_sql_version(v)?], |row| row.get(0))
                .optional(),
            None => conn
                .query_row(Q_GET_LATEST, params![key], |row| row.get(0))
                .optional(),
        }
        .map_err(db_err)?;
        value.ok_or_else(|| Error::not_found(key, version))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<Version> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let version: i64 = tx
            .query_row(Q_PUT, params![key, value], |row| row.get(0))
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        let version = from_sql_version(version)?;
        debug!(target: "kiwi::sqlite", key = %key, version = %version, bytes = value.len(), "put");
        Ok(version)
    }

    fn rem(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(Q_REM, params![key]).map_err(db_err)?;
        debug!(target: "kiwi::sqlite", key = %key, versions = removed, "rem");
        Ok(removed > 0)
    }

    fn list(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(Q_LIST).map_err(db_err)?;
        let keys = stmt
            .query_map([], |row| row.get(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(db_err)?;
        Ok(keys)
    }

    fn time(&self, key: &str, version: Option<Version>) -> Result<Timestamp> {
        let conn = self.conn.lock();
        let micros: Option<i64> = match version {
            Some(v) => conn
                .query_row(Q_TIME, params![key, to_sql_version(v)?], |row| row.get(0))
                .optional(),
            None => conn
                .query_row(Q_TIME_LATEST, params![key], |row| row.get(0))
                .optional(),
        }
        .map_err(db_err)?;
        let micros = micros.ok_or_else(|| Error::not_found(key, version))?;
        Ok(Timestamp::from_micros(micros.max(0) as u64))
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn config_err(e: rusqlite::Error) -> Error {
    Error::Config(format!("cannot initialize database: {}", e))
}

fn to_sql_version(v: Version) -> Result<i64> {
    i64::try_from(v.as_u64())
        .map_err(|_| Error::Database(format!("version {v} exceeds the INTEGER range")))
}

fn from_sql_version(n: i64) -> Result<Version> {
    u64::try_from(n)
        .map(Version::new)
        .map_err(|_| Error::Corruption(format!("negative version {n} in database")))
}

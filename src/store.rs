//! Entry store for persisting response versions to disk
//!
//! Versions live in a single SQLite file. Each fingerprint owns an entry row
//! (which keeps the original template and canonical parameters) and an
//! append-only list of versions numbered from 1. Appends run inside
//! `BEGIN IMMEDIATE` transactions, so writers in other threads or processes
//! sharing the file are serialized by SQLite's write lock and never reuse a
//! sequence number.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::StorageError;
use crate::key::{Fingerprint, Params, RequestKey};
use crate::policy::PrunePolicy;

/// Schema version written to `PRAGMA user_version`
const SCHEMA_VERSION: i64 = 1;

/// How long a writer waits for another connection's lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        fingerprint TEXT PRIMARY KEY,
        template TEXT NOT NULL,
        params TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS versions (
        fingerprint TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        payload TEXT NOT NULL,
        PRIMARY KEY (fingerprint, sequence)
    );
    CREATE INDEX IF NOT EXISTS idx_entries_template ON entries(template);
";

/// One immutable snapshot of a fetched payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub fingerprint: Fingerprint,
    /// Position in the entry's history, starting at 1
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
}

/// Listing row for one stored entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySummary {
    pub fingerprint: Fingerprint,
    pub template: String,
    pub params: Params,
    pub versions: u64,
    pub latest_at: Option<DateTime<Utc>>,
}

/// Row counts across the whole store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub entries: u64,
    pub versions: u64,
}

/// Durable table of versions keyed by fingerprint
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens (or creates) the store file at `path`
    ///
    /// Missing parent directories are created. The file is switched to WAL
    /// journaling so readers in other processes are not blocked by writers.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.migrate()?;
        debug!("Opened entry store at {}", path.display());
        Ok(store)
    }

    /// Opens a private store that lives only as long as this value
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Location of the backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if found > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchema {
                found,
                supported: SCHEMA_VERSION,
            });
        }

        conn.execute_batch(SCHEMA)?;
        if found < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    /// Appends a new version stamped with the current time
    pub fn put(&self, key: &RequestKey, payload: &Value) -> Result<Version, StorageError> {
        self.put_at(key, payload, Utc::now())
    }

    /// Appends a new version with an explicit creation time (for backfills)
    ///
    /// The version is committed to disk before this returns.
    pub fn put_at(
        &self,
        key: &RequestKey,
        payload: &Value,
        created_at: DateTime<Utc>,
    ) -> Result<Version, StorageError> {
        let fingerprint = key.fingerprint();
        let micros = created_at.timestamp_micros();
        let body = payload.to_string();

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT OR IGNORE INTO entries (fingerprint, template, params, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                fingerprint.as_str(),
                key.template(),
                key.canonical_params(),
                micros
            ],
        )?;
        let sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM versions WHERE fingerprint = ?1",
            params![fingerprint.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO versions (fingerprint, sequence, created_at, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![fingerprint.as_str(), sequence, micros, body],
        )?;
        tx.commit()?;

        debug!("Stored version {} for {}", sequence, fingerprint);
        Ok(Version {
            fingerprint: fingerprint.clone(),
            sequence: sequence as u64,
            created_at: timestamp(fingerprint, sequence, micros)?,
            payload: payload.clone(),
        })
    }

    /// Returns the newest version for a fingerprint
    pub fn latest(&self, fingerprint: &Fingerprint) -> Result<Option<Version>, StorageError> {
        let row: Option<(i64, i64, String)> = self
            .conn()?
            .query_row(
                "SELECT sequence, created_at, payload FROM versions
                 WHERE fingerprint = ?1 ORDER BY sequence DESC LIMIT 1",
                params![fingerprint.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(sequence, micros, payload)| decode(fingerprint, sequence, micros, payload))
            .transpose()
    }

    /// Returns every stored version for a fingerprint, oldest first
    pub fn versions(&self, fingerprint: &Fingerprint) -> Result<Vec<Version>, StorageError> {
        let rows: Vec<(i64, i64, String)> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT sequence, created_at, payload FROM versions
                 WHERE fingerprint = ?1 ORDER BY sequence ASC",
            )?;
            let rows = stmt.query_map(params![fingerprint.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        rows.into_iter()
            .map(|(sequence, micros, payload)| decode(fingerprint, sequence, micros, payload))
            .collect()
    }

    /// Checks whether any version exists for a fingerprint
    pub fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StorageError> {
        let found: bool = self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM versions WHERE fingerprint = ?1)",
            params![fingerprint.as_str()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Lists every entry with its template, parameters and version count
    pub fn entries(&self) -> Result<Vec<EntrySummary>, StorageError> {
        let rows: Vec<(String, String, String, i64, Option<i64>)> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT e.fingerprint, e.template, e.params,
                        COUNT(v.sequence),
                        (SELECT newest.created_at FROM versions newest
                         WHERE newest.fingerprint = e.fingerprint
                         ORDER BY newest.sequence DESC LIMIT 1)
                 FROM entries e
                 LEFT JOIN versions v ON v.fingerprint = e.fingerprint
                 GROUP BY e.fingerprint
                 ORDER BY e.template, e.fingerprint",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        rows.into_iter()
            .map(|(fingerprint, template, params, versions, latest)| {
                let fingerprint = Fingerprint::from(fingerprint);
                let params: Params =
                    serde_json::from_str(&params).map_err(|e| StorageError::Corrupt {
                        fingerprint: fingerprint.to_string(),
                        sequence: 0,
                        reason: format!("invalid params: {}", e),
                    })?;
                let latest_at = latest
                    .map(|micros| timestamp(&fingerprint, 0, micros))
                    .transpose()?;

                Ok(EntrySummary {
                    fingerprint,
                    template,
                    params,
                    versions: versions as u64,
                    latest_at,
                })
            })
            .collect()
    }

    /// Removes every entry whose template starts with `prefix`
    ///
    /// Returns the number of entries removed. An empty prefix matches all.
    pub fn delete_by_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM versions WHERE fingerprint IN (
                 SELECT fingerprint FROM entries
                 WHERE substr(template, 1, length(?1)) = ?1
             )",
            params![prefix],
        )?;
        let removed = tx.execute(
            "DELETE FROM entries WHERE substr(template, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        tx.commit()?;

        debug!("Deleted {} entries with prefix {:?}", removed, prefix);
        Ok(removed)
    }

    /// Removes superseded versions according to `policy`
    ///
    /// Returns the number of versions removed. The newest version of each
    /// entry is never removed.
    pub fn prune(&self, policy: PrunePolicy) -> Result<usize, StorageError> {
        let conn = self.conn()?;
        let removed = match policy {
            PrunePolicy::KeepLatest(retain) => {
                let retain = i64::try_from(retain.max(1)).unwrap_or(i64::MAX);
                conn.execute(
                    "DELETE FROM versions WHERE rowid IN (
                         SELECT rid FROM (
                             SELECT rowid AS rid, ROW_NUMBER() OVER (
                                 PARTITION BY fingerprint ORDER BY sequence DESC
                             ) AS rank
                             FROM versions
                         ) WHERE rank > ?1
                     )",
                    params![retain],
                )?
            }
            PrunePolicy::OlderThan(age) => {
                let now = Utc::now();
                let cutoff = chrono::Duration::from_std(age)
                    .ok()
                    .and_then(|age| now.checked_sub_signed(age))
                    .map(|t| t.timestamp_micros())
                    .unwrap_or(i64::MIN);
                conn.execute(
                    "DELETE FROM versions
                     WHERE created_at < ?1
                       AND sequence < (
                           SELECT MAX(newer.sequence) FROM versions AS newer
                           WHERE newer.fingerprint = versions.fingerprint
                       )",
                    params![cutoff],
                )?
            }
        };

        debug!("Pruned {} versions ({:?})", removed, policy);
        Ok(removed)
    }

    /// Counts entries and versions
    pub fn counts(&self) -> Result<StoreCounts, StorageError> {
        let (entries, versions): (i64, i64) = self.conn()?.query_row(
            "SELECT (SELECT COUNT(*) FROM entries), (SELECT COUNT(*) FROM versions)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(StoreCounts {
            entries: entries as u64,
            versions: versions as u64,
        })
    }
}

fn decode(
    fingerprint: &Fingerprint,
    sequence: i64,
    micros: i64,
    payload: String,
) -> Result<Version, StorageError> {
    let payload = serde_json::from_str(&payload).map_err(|e| StorageError::Corrupt {
        fingerprint: fingerprint.to_string(),
        sequence: sequence as u64,
        reason: format!("invalid payload: {}", e),
    })?;

    Ok(Version {
        fingerprint: fingerprint.clone(),
        sequence: sequence as u64,
        created_at: timestamp(fingerprint, sequence, micros)?,
        payload,
    })
}

fn timestamp(
    fingerprint: &Fingerprint,
    sequence: i64,
    micros: i64,
) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StorageError::Corrupt {
        fingerprint: fingerprint.to_string(),
        sequence: sequence as u64,
        reason: format!("timestamp out of range: {}", micros),
    })
}

use std::fs;
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::cache::{CacheBackend, CacheRecord};
use crate::domain::{FreshnessWindow, from_millis, to_millis};
use crate::error::GatorError;

/// Latest schema version of the `datacache` table.
pub const SCHEMA_VERSION: f64 = 1.3;

const TABLE: &str = "datacache";
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Ordered schema steps. Each runs once, recorded in `versions`.
const MIGRATIONS: &[(f64, &str)] = &[
    (
        1.0,
        "CREATE TABLE IF NOT EXISTS datacache (
            agi TEXT,
            service TEXT,
            retrieved REAL,
            data TEXT
        )",
    ),
    (1.1, "ALTER TABLE datacache RENAME COLUMN agi TO acc"),
    (
        1.2,
        "CREATE INDEX IF NOT EXISTS datacache_acc ON datacache(acc);
         CREATE INDEX IF NOT EXISTS datacache_acc_service ON datacache(acc, service);",
    ),
    (
        1.3,
        "CREATE INDEX IF NOT EXISTS datacache_service ON datacache(service)",
    ),
];

/// Embedded relational backend with full retrieval history.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: &Utf8Path) -> Result<Self, GatorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| GatorError::Filesystem(err.to_string()))?;
        }
        let conn = Connection::open(path.as_std_path())?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, GatorError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, GatorError> {
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<Option<f64>, GatorError> {
        current_version(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn current_version(conn: &Connection) -> Result<Option<f64>, GatorError> {
    let version: Option<f64> = conn.query_row(
        "SELECT MAX(version) FROM versions WHERE tablename = ?1",
        params![TABLE],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn migrate(conn: &Connection) -> Result<(), GatorError> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS versions (version REAL, tablename TEXT)")?;
    let mut current = current_version(conn)?;
    for (version, sql) in MIGRATIONS {
        if current.is_some_and(|applied| applied + 1e-9 >= *version) {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO versions (version, tablename) VALUES (?1, ?2)",
            params![version, TABLE],
        )?;
        tx.commit()?;
        tracing::debug!(version, "migrated datacache schema");
        current = Some(*version);
    }
    Ok(())
}

impl CacheBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn fetch(
        &self,
        accession: &str,
        service: &str,
        window: &FreshnessWindow,
    ) -> Result<Option<CacheRecord>, GatorError> {
        let conn = self.lock();
        let record = conn
            .query_row(
                "SELECT acc, service, retrieved, data FROM datacache
                 WHERE acc = ?1 AND service = ?2 AND retrieved >= ?3 AND retrieved <= ?4
                 ORDER BY retrieved DESC, rowid DESC LIMIT 1",
                params![
                    accession,
                    service,
                    window.start_millis(),
                    window.end_millis()
                ],
                |row| {
                    Ok(CacheRecord {
                        accession: row.get(0)?,
                        service: row.get(1)?,
                        retrieved: from_millis(row.get(2)?),
                        data: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn insert(&self, record: &CacheRecord) -> Result<(), GatorError> {
        self.lock().execute(
            "INSERT INTO datacache (acc, service, retrieved, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.accession,
                record.service,
                to_millis(record.retrieved),
                record.data
            ],
        )?;
        Ok(())
    }

    fn services(&self, prefix: &str) -> Result<Vec<String>, GatorError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT service FROM datacache
             WHERE substr(service, 1, length(?1)) = ?1 ORDER BY service",
        )?;
        let services = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(services)
    }

    fn accessions(&self, service: &str) -> Result<Vec<String>, GatorError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT acc FROM datacache WHERE service = ?1 ORDER BY acc")?;
        let accessions = stmt
            .query_map(params![service], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(accessions)
    }

    fn timestamps(
        &self,
        service: &str,
        window: &FreshnessWindow,
    ) -> Result<Vec<DateTime<Utc>>, GatorError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT retrieved FROM datacache
             WHERE service = ?1 AND retrieved >= ?2 AND retrieved <= ?3
             ORDER BY retrieved ASC",
        )?;
        let stamps = stmt
            .query_map(
                params![service, window.start_millis(), window.end_millis()],
                |row| row.get::<_, f64>(0),
            )?
            .map(|stamp| stamp.map(from_millis))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stamps)
    }

    fn remove(&self, service_prefix: &str, accession: Option<&str>) -> Result<usize, GatorError> {
        let conn = self.lock();
        let removed = match accession {
            Some(acc) => conn.execute(
                "DELETE FROM datacache WHERE substr(service, 1, length(?1)) = ?1 AND acc = ?2",
                params![service_prefix, acc],
            )?,
            None => conn.execute(
                "DELETE FROM datacache WHERE substr(service, 1, length(?1)) = ?1",
                params![service_prefix],
            )?,
        };
        Ok(removed)
    }

    fn sweep(&self, before: DateTime<Utc>) -> Result<usize, GatorError> {
        let removed = self.lock().execute(
            "DELETE FROM datacache WHERE retrieved <= ?1",
            params![to_millis(before)],
        )?;
        Ok(removed)
    }

    fn begin_transaction(&self) -> Result<(), GatorError> {
        self.lock().execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&self) -> Result<(), GatorError> {
        self.lock().execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<(), GatorError> {
        let conn = self.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

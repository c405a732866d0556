//! Persistent store of raw service payloads keyed by accession, service and
//! retrieval day.
//!
//! [`CacheStore`] applies the shared policy (freshness bounds, bulk scopes,
//! payload filtering, timestamp bucketing, best-effort failure handling) on
//! top of a [`CacheBackend`]:
//!
//! - [`SqliteBackend`] keeps full history in an embedded database.
//! - [`MemoryBackend`] keeps full history in process, with staged transactions.
//! - [`KeyValueBackend`] keeps only the latest payload per key, one file each.
//! - [`NoopBackend`] stores nothing.

mod keyvalue;
mod memory;
mod noop;
mod sqlite;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{FreshnessWindow, day_bucket};
use crate::error::GatorError;
use crate::transport::RawPayload;

pub use keyvalue::KeyValueBackend;
pub use memory::MemoryBackend;
pub use noop::NoopBackend;
pub use sqlite::{SCHEMA_VERSION, SqliteBackend};

/// One persisted payload. Never mutated once written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub accession: String,
    pub service: String,
    pub retrieved: DateTime<Utc>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload {
    pub data: Value,
    pub retrieved: DateTime<Utc>,
}

pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Most recent record for the key whose timestamp lies in `window`.
    fn fetch(
        &self,
        accession: &str,
        service: &str,
        window: &FreshnessWindow,
    ) -> Result<Option<CacheRecord>, GatorError>;

    fn insert(&self, record: &CacheRecord) -> Result<(), GatorError>;

    fn services(&self, prefix: &str) -> Result<Vec<String>, GatorError>;

    fn accessions(&self, service: &str) -> Result<Vec<String>, GatorError>;

    /// Distinct retrieval timestamps, ascending.
    fn timestamps(
        &self,
        service: &str,
        window: &FreshnessWindow,
    ) -> Result<Vec<DateTime<Utc>>, GatorError>;

    /// Deletes records whose service starts with `service_prefix`, optionally
    /// only for one accession. Returns the number of records removed.
    fn remove(&self, service_prefix: &str, accession: Option<&str>) -> Result<usize, GatorError>;

    /// Deletes records retrieved at or before `before`.
    fn sweep(&self, before: DateTime<Utc>) -> Result<usize, GatorError>;

    fn begin_transaction(&self) -> Result<(), GatorError> {
        Ok(())
    }

    fn commit(&self) -> Result<(), GatorError> {
        Ok(())
    }

    /// Abandons an open transaction, discarding its writes.
    fn rollback(&self) -> Result<(), GatorError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Memory,
    Keyvalue,
    Noop,
}

/// Opens the configured backend. `path` is the database file for `sqlite` and
/// the root directory for `keyvalue`; the other kinds ignore it.
pub fn open_backend(
    kind: BackendKind,
    path: &Utf8Path,
) -> Result<Arc<dyn CacheBackend>, GatorError> {
    Ok(match kind {
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(path)?),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Keyvalue => Arc::new(KeyValueBackend::open(path)?),
        BackendKind::Noop => Arc::new(NoopBackend),
    })
}

#[derive(Debug, Default, Clone, Copy)]
struct AgeBounds {
    min: Option<DateTime<Utc>>,
    max: Option<DateTime<Utc>>,
}

pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    bounds: Mutex<AgeBounds>,
    bulk: AtomicBool,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            bounds: Mutex::new(AgeBounds::default()),
            bulk: AtomicBool::new(false),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Records retrieved before `when` are never served.
    pub fn set_minimum_age(&self, when: Option<DateTime<Utc>>) {
        self.bounds.lock().unwrap_or_else(PoisonError::into_inner).min = when;
    }

    /// Records retrieved after `when` are never served, and services stop
    /// going to the network while this is set.
    pub fn set_maximum_age(&self, when: Option<DateTime<Utc>>) {
        self.bounds.lock().unwrap_or_else(PoisonError::into_inner).max = when;
    }

    pub fn minimum_age(&self) -> Option<DateTime<Utc>> {
        self.bounds.lock().unwrap_or_else(PoisonError::into_inner).min
    }

    pub fn maximum_age(&self) -> Option<DateTime<Utc>> {
        self.bounds.lock().unwrap_or_else(PoisonError::into_inner).max
    }

    /// The window `get` uses when the caller does not narrow it further.
    pub fn default_window(&self) -> FreshnessWindow {
        let bounds = *self.bounds.lock().unwrap_or_else(PoisonError::into_inner);
        FreshnessWindow::new(
            bounds.min.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            bounds.max.unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    pub fn in_bulk(&self) -> bool {
        self.bulk.load(Ordering::SeqCst)
    }

    /// Freshest payload in `window` (intersected with the configured age
    /// bounds). Misses while a bulk scope is open; backend failures count as
    /// misses.
    pub fn get(
        &self,
        accession: &str,
        service: &str,
        window: Option<FreshnessWindow>,
    ) -> Option<CachedPayload> {
        if self.in_bulk() {
            return None;
        }
        let mut effective = self.default_window();
        if let Some(window) = window {
            effective = effective.intersect(&window);
        }
        if effective.is_empty() {
            return None;
        }
        let record = match self
            .backend
            .fetch(&accession.to_lowercase(), service, &effective)
        {
            Ok(record) => record?,
            Err(err) => {
                tracing::warn!(accession, service, error = %err, "cache lookup failed");
                return None;
            }
        };
        match serde_json::from_str(&record.data) {
            Ok(data) => Some(CachedPayload {
                data,
                retrieved: record.retrieved,
            }),
            Err(err) => {
                tracing::warn!(accession, service, error = %err, "discarding unreadable cache record");
                None
            }
        }
    }

    pub fn put(&self, accession: &str, service: &str, payload: &RawPayload) {
        self.put_at(accession, service, payload, Utc::now());
    }

    /// Appends a record filed under the UTC day of `when`. Only JSON objects
    /// and arrays are stored; failures are logged and swallowed.
    pub fn put_at(&self, accession: &str, service: &str, payload: &RawPayload, when: DateTime<Utc>) {
        let Some(value) = payload.as_json() else {
            tracing::debug!(accession, service, "not caching non-JSON payload");
            return;
        };
        self.put_value_at(accession, service, value, when);
    }

    pub fn put_value_at(&self, accession: &str, service: &str, value: &Value, when: DateTime<Utc>) {
        if !(value.is_object() || value.is_array()) {
            return;
        }
        let data = match serde_json::to_string(value) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(accession, service, error = %err, "failed to serialize payload");
                return;
            }
        };
        let record = CacheRecord {
            accession: accession.to_lowercase(),
            service: service.to_string(),
            retrieved: day_bucket(when),
            data,
        };
        if let Err(err) = self.backend.insert(&record) {
            tracing::warn!(accession, service, error = %err, "failed to write cache record");
        }
    }

    pub fn services_matching_prefix(&self, prefix: &str) -> Result<Vec<String>, GatorError> {
        self.backend.services(prefix)
    }

    pub fn accessions_for_service(&self, service: &str) -> Result<Vec<String>, GatorError> {
        self.backend.accessions(service)
    }

    pub fn retrieval_timestamps(
        &self,
        service: &str,
        window: Option<FreshnessWindow>,
    ) -> Result<Vec<DateTime<Utc>>, GatorError> {
        self.backend
            .timestamps(service, &window.unwrap_or_else(FreshnessWindow::unbounded))
    }

    pub fn clear(&self, service: &str, accession: Option<&str>) -> Result<usize, GatorError> {
        let accession = accession.map(str::to_lowercase);
        let removed = self.backend.remove(service, accession.as_deref())?;
        tracing::debug!(service, removed, "cleared cache records");
        Ok(removed)
    }

    pub fn sweep(&self, before: DateTime<Utc>) -> Result<usize, GatorError> {
        let removed = self.backend.sweep(before)?;
        tracing::debug!(%before, removed, "swept cache");
        Ok(removed)
    }

    /// Opens the single bulk scope. Reads miss until the scope ends.
    pub fn begin_bulk(self: &Arc<Self>) -> Result<BulkScope, GatorError> {
        if self
            .bulk
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(GatorError::BulkInProgress);
        }
        if let Err(err) = self.backend.begin_transaction() {
            self.bulk.store(false, Ordering::SeqCst);
            return Err(err);
        }
        Ok(BulkScope {
            store: Some(self.clone()),
        })
    }

    /// Commits the bulk transaction. A failed commit is rolled back so the
    /// backend is never left inside an open transaction.
    fn finish_bulk(&self) -> Result<(), GatorError> {
        let committed = self.backend.commit();
        if let Err(err) = &committed {
            tracing::warn!(error = %err, "bulk commit failed, rolling back");
            if let Err(rollback) = self.backend.rollback() {
                tracing::warn!(error = %rollback, "bulk rollback failed");
            }
        }
        self.bulk.store(false, Ordering::SeqCst);
        committed
    }
}

/// An open bulk scope. Commits on [`BulkScope::end`] or when dropped.
pub struct BulkScope {
    store: Option<Arc<CacheStore>>,
}

impl std::fmt::Debug for BulkScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkScope")
            .field("open", &self.store.is_some())
            .finish()
    }
}

impl BulkScope {
    pub fn end(mut self) -> Result<(), GatorError> {
        match self.store.take() {
            Some(store) => store.finish_bulk(),
            None => Ok(()),
        }
    }
}

impl Drop for BulkScope {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            if let Err(err) = store.finish_bulk() {
                tracing::warn!(error = %err, "failed to commit bulk cache scope");
            }
        }
    }
}

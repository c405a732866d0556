use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::cache::{CacheBackend, CacheRecord};
use crate::domain::FreshnessWindow;
use crate::error::GatorError;

#[derive(Default)]
struct MemoryState {
    rows: Vec<CacheRecord>,
    staged: Option<Vec<CacheRecord>>,
}

/// In-process history store with the same row shape as the SQL backend.
/// Writes made inside a transaction become visible together on commit.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn fetch(
        &self,
        accession: &str,
        service: &str,
        window: &FreshnessWindow,
    ) -> Result<Option<CacheRecord>, GatorError> {
        let state = self.lock();
        // Later rows win ties, matching insertion order in the SQL backend.
        let record = state
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.accession == accession
                    && row.service == service
                    && window.contains(row.retrieved)
            })
            .max_by_key(|(idx, row)| (row.retrieved, *idx))
            .map(|(_, row)| row.clone());
        Ok(record)
    }

    fn insert(&self, record: &CacheRecord) -> Result<(), GatorError> {
        let mut state = self.lock();
        match state.staged.as_mut() {
            Some(staged) => staged.push(record.clone()),
            None => state.rows.push(record.clone()),
        }
        Ok(())
    }

    fn services(&self, prefix: &str) -> Result<Vec<String>, GatorError> {
        let state = self.lock();
        let services: BTreeSet<String> = state
            .rows
            .iter()
            .filter(|row| row.service.starts_with(prefix))
            .map(|row| row.service.clone())
            .collect();
        Ok(services.into_iter().collect())
    }

    fn accessions(&self, service: &str) -> Result<Vec<String>, GatorError> {
        let state = self.lock();
        let accessions: BTreeSet<String> = state
            .rows
            .iter()
            .filter(|row| row.service == service)
            .map(|row| row.accession.clone())
            .collect();
        Ok(accessions.into_iter().collect())
    }

    fn timestamps(
        &self,
        service: &str,
        window: &FreshnessWindow,
    ) -> Result<Vec<DateTime<Utc>>, GatorError> {
        let state = self.lock();
        let stamps: BTreeSet<DateTime<Utc>> = state
            .rows
            .iter()
            .filter(|row| row.service == service && window.contains(row.retrieved))
            .map(|row| row.retrieved)
            .collect();
        Ok(stamps.into_iter().collect())
    }

    fn remove(&self, service_prefix: &str, accession: Option<&str>) -> Result<usize, GatorError> {
        let mut state = self.lock();
        let before = state.rows.len();
        state.rows.retain(|row| {
            let matches = row.service.starts_with(service_prefix)
                && accession.is_none_or(|acc| row.accession == acc);
            !matches
        });
        Ok(before - state.rows.len())
    }

    fn sweep(&self, before: DateTime<Utc>) -> Result<usize, GatorError> {
        let mut state = self.lock();
        let count = state.rows.len();
        state.rows.retain(|row| row.retrieved > before);
        Ok(count - state.rows.len())
    }

    fn begin_transaction(&self) -> Result<(), GatorError> {
        let mut state = self.lock();
        if state.staged.is_some() {
            return Err(GatorError::BulkInProgress);
        }
        state.staged = Some(Vec::new());
        Ok(())
    }

    fn rollback(&self) -> Result<(), GatorError> {
        self.lock().staged = None;
        Ok(())
    }

    fn commit(&self) -> Result<(), GatorError> {
        let mut state = self.lock();
        if let Some(staged) = state.staged.take() {
            state.rows.extend(staged);
        }
        Ok(())
    }
}

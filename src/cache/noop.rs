use chrono::{DateTime, Utc};

use crate::cache::{CacheBackend, CacheRecord};
use crate::domain::FreshnessWindow;
use crate::error::GatorError;

/// Used when no persistence is available: writes vanish, reads miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl CacheBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn fetch(
        &self,
        _accession: &str,
        _service: &str,
        _window: &FreshnessWindow,
    ) -> Result<Option<CacheRecord>, GatorError> {
        Ok(None)
    }

    fn insert(&self, _record: &CacheRecord) -> Result<(), GatorError> {
        Ok(())
    }

    fn services(&self, _prefix: &str) -> Result<Vec<String>, GatorError> {
        Ok(Vec::new())
    }

    fn accessions(&self, _service: &str) -> Result<Vec<String>, GatorError> {
        Ok(Vec::new())
    }

    fn timestamps(
        &self,
        _service: &str,
        _window: &FreshnessWindow,
    ) -> Result<Vec<DateTime<Utc>>, GatorError> {
        Ok(Vec::new())
    }

    fn remove(&self, _service_prefix: &str, _accession: Option<&str>) -> Result<usize, GatorError> {
        Ok(0)
    }

    fn sweep(&self, _before: DateTime<Utc>) -> Result<usize, GatorError> {
        Ok(0)
    }
}

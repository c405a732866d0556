use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GatorError;

/// Identifier of the entity being queried, e.g. an AGI locus `AT1G01010.1`.
///
/// The caller's spelling is kept for requests and results; cache keys always
/// use the lower-cased form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn cache_key(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = GatorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(GatorError::InvalidAccession(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Async,
    Sync,
}

/// Identity of one data source. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    name: String,
    endpoint: Option<String>,
    dataset: Option<String>,
    mode: TransportMode,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.filter(|url| !url.trim().is_empty()),
            dataset: None,
            mode: TransportMode::Async,
        }
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn dataset(&self) -> Option<&str> {
        self.dataset.as_deref()
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Name records are filed under in the cache. Sub-datasets share the
    /// service prefix so clearing a service also clears its variants.
    pub fn cache_name(&self) -> String {
        match &self.dataset {
            Some(dataset) => format!("{}.{}", self.name, dataset),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Inclusive range of retrieval timestamps a cached record may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FreshnessWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Everything up to and including `end`.
    pub fn until(end: DateTime<Utc>) -> Self {
        Self {
            start: DateTime::<Utc>::UNIX_EPOCH,
            end,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            start: DateTime::<Utc>::UNIX_EPOCH,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn contains(&self, when: DateTime<Utc>) -> bool {
        self.start <= when && when <= self.end
    }

    pub fn intersect(&self, other: &FreshnessWindow) -> FreshnessWindow {
        FreshnessWindow {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn start_millis(&self) -> f64 {
        to_millis(self.start)
    }

    pub fn end_millis(&self) -> f64 {
        to_millis(self.end)
    }
}

/// Truncates a timestamp to midnight UTC of the same day.
pub fn day_bucket(when: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&when.date_naive().and_time(NaiveTime::MIN))
}

pub fn to_millis(when: DateTime<Utc>) -> f64 {
    when.timestamp_millis() as f64
}

pub fn from_millis(millis: f64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis as i64).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, GatorError> {
    let trimmed = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| GatorError::InvalidDate(value.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn accession_keeps_case_but_keys_lowercase() {
        let acc: Accession = " AT1G01010.1 ".parse().unwrap();
        assert_eq!(acc.as_str(), "AT1G01010.1");
        assert_eq!(acc.cache_key(), "at1g01010.1");
    }

    #[test]
    fn accession_rejects_blank() {
        let err = "   ".parse::<Accession>().unwrap_err();
        assert_matches!(err, GatorError::InvalidAccession(_));
    }

    #[test]
    fn day_bucket_truncates_to_midnight() {
        let when = parse_date("2024-03-05T17:42:10Z").unwrap();
        assert_eq!(day_bucket(when), parse_date("2024-03-05").unwrap());
    }

    #[test]
    fn cache_name_includes_dataset() {
        let desc = ServiceDescriptor::new("suba", None).with_dataset("ms");
        assert_eq!(desc.cache_name(), "suba.ms");
        assert_eq!(desc.to_string(), "suba");
    }
}

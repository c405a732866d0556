use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::GatorError;
use crate::transport::RawPayload;

/// Reader-specific view of the data returned for one accession.
///
/// `merge` must be additive: it is called once per payload, so array payloads
/// and multi-phase protocols fold into a single value.
pub trait ResultData: Clone + Send + Sync + 'static {
    fn empty() -> Self;

    fn merge(&mut self, payload: &RawPayload) -> Result<(), GatorError>;

    fn from_payload(payload: &RawPayload) -> Result<Self, GatorError> {
        let mut data = Self::empty();
        data.merge(payload)?;
        Ok(data)
    }
}

/// Stock result type: a JSON object whose fields are overwritten by each
/// payload merged into it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonResult(Map<String, Value>);

impl JsonResult {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl ResultData for JsonResult {
    fn empty() -> Self {
        Self::default()
    }

    fn merge(&mut self, payload: &RawPayload) -> Result<(), GatorError> {
        match payload {
            RawPayload::Json(Value::Object(fields)) => {
                for (key, value) in fields {
                    self.0.insert(key.clone(), value.clone());
                }
            }
            RawPayload::Json(other) => {
                self.0.insert("value".to_string(), other.clone());
            }
            RawPayload::Text(text) => {
                self.0.insert("text".to_string(), Value::String(text.clone()));
            }
            RawPayload::Xml(doc) => {
                self.0
                    .insert("xml".to_string(), Value::String(doc.as_str().to_string()));
            }
        }
        Ok(())
    }
}

/// The payloads a result was built from, in the order they arrived.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawData {
    pub phases: Vec<RawPayload>,
    pub retrieved: Option<DateTime<Utc>>,
}

impl RawData {
    pub fn data(&self) -> Option<&RawPayload> {
        self.phases.last()
    }

    /// JSON form suitable for the cache: the payload itself for single-phase
    /// retrievals, an array of phases otherwise. `None` when any phase is not
    /// JSON.
    pub fn cacheable(&self) -> Option<Value> {
        let values = self
            .phases
            .iter()
            .map(|phase| phase.as_json().cloned())
            .collect::<Option<Vec<_>>>()?;
        match values.len() {
            0 => None,
            1 => values.into_iter().next(),
            _ => Some(Value::Array(values)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceResult<D> {
    pub agi: String,
    pub retrieved: Option<DateTime<Utc>>,
    pub raw_data: RawData,
    pub data: D,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Updated,
    Empty,
    Failed(GatorError),
}

/// Builds one retrieval's result from the payloads it receives.
#[derive(Debug)]
pub struct ResultAssembler<D> {
    result: Option<ServiceResult<D>>,
}

impl<D: ResultData> Default for ResultAssembler<D> {
    fn default() -> Self {
        Self { result: None }
    }
}

impl<D: ResultData> ResultAssembler<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self) -> Option<&ServiceResult<D>> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<ServiceResult<D>> {
        self.result
    }

    /// Folds `payload` into the result. On failure the previous state is left
    /// untouched.
    pub fn ingest(
        &mut self,
        accession: &str,
        payload: Option<RawPayload>,
        retrieved: Option<DateTime<Utc>>,
    ) -> IngestOutcome {
        let Some(payload) = payload else {
            return IngestOutcome::Empty;
        };
        if matches!(payload, RawPayload::Json(Value::Null)) {
            return IngestOutcome::Empty;
        }

        let existing = self.result.as_ref().map(|result| result.data.clone());
        let data = match apply(existing, &payload) {
            Ok(data) => data,
            Err(err) => return IngestOutcome::Failed(err),
        };

        let result = self.result.get_or_insert_with(|| ServiceResult {
            agi: accession.to_string(),
            retrieved: None,
            raw_data: RawData::default(),
            data: data.clone(),
        });
        result.data = data;
        result.raw_data.phases.push(payload);
        if let Some(retrieved) = retrieved {
            result.retrieved = Some(retrieved);
            result.raw_data.retrieved = Some(retrieved);
        }
        result.agi = accession.to_string();
        IngestOutcome::Updated
    }
}

fn apply<D: ResultData>(existing: Option<D>, payload: &RawPayload) -> Result<D, GatorError> {
    if let Some(message) = remote_error(payload) {
        return Err(GatorError::Remote(message));
    }
    match payload {
        RawPayload::Json(Value::Array(items)) => {
            let mut current = existing;
            for item in items {
                if item.is_null() {
                    continue;
                }
                current = Some(apply(current, &RawPayload::Json(item.clone()))?);
            }
            Ok(current.unwrap_or_else(D::empty))
        }
        _ => match existing {
            Some(mut data) => {
                data.merge(payload)?;
                Ok(data)
            }
            None => D::from_payload(payload),
        },
    }
}

fn remote_error(payload: &RawPayload) -> Option<String> {
    let error = payload.as_json()?.as_object()?.get("error")?;
    let truthy = match error {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(num) => num.as_f64() != Some(0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    };
    if !truthy {
        return None;
    }
    Some(match error {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    })
}

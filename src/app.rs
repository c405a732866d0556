use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::assembler::JsonResult;
use crate::context::Gator;
use crate::domain::{Accession, ServiceDescriptor, TransportMode};
use crate::error::GatorError;
use crate::reader::Reader;
use crate::service::Retrieval;
use crate::transport::{HttpMethod, ResponseFormat, TransportRequest};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub service: String,
    pub endpoint: Option<String>,
    pub dataset: Option<String>,
    pub method: HttpMethod,
    pub format: ResponseFormat,
    pub mode: TransportMode,
    pub use_cache: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub service: String,
    pub accession: String,
    pub found: bool,
    pub retrieved: Option<DateTime<Utc>>,
    pub source: String,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServicesResult {
    pub prefix: String,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessionsResult {
    pub service: String,
    pub accessions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResult {
    pub service: String,
    pub retrieved: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub service: Option<String>,
    pub accession: Option<String>,
    pub removed: usize,
}

/// Operations behind the `gator` command line.
#[derive(Clone)]
pub struct App {
    gator: Arc<Gator>,
}

impl App {
    pub fn new(gator: Arc<Gator>) -> Self {
        Self { gator }
    }

    pub fn gator(&self) -> &Arc<Gator> {
        &self.gator
    }

    /// Retrieves one accession through an ad-hoc JSON reader.
    pub async fn fetch(
        &self,
        accession: Accession,
        options: FetchOptions,
    ) -> Result<FetchResult, GatorError> {
        let mut descriptor = ServiceDescriptor::new(&options.service, options.endpoint.clone())
            .with_mode(options.mode);
        if let Some(dataset) = &options.dataset {
            descriptor = descriptor.with_dataset(dataset);
        }
        let (method, format) = (options.method, options.format);
        let reader = Reader::<JsonResult>::new(descriptor).with_planner(move |acc, desc| {
            vec![
                TransportRequest::new(method, desc.endpoint().map(str::to_string))
                    .param("agi", acc.as_str())
                    .param("service", desc.name())
                    .with_format(format)
                    .with_mode(desc.mode()),
            ]
        });
        if options.use_cache {
            self.gator.enable_caching_for(&options.service);
        }
        let service = self.gator.service(reader)?;

        let outcome = service.retrieve(&accession).await?;
        Ok(match outcome {
            Retrieval::Received(result) => FetchResult {
                service: options.service,
                accession: result.agi.clone(),
                found: true,
                retrieved: result.retrieved,
                source: if result.retrieved.is_some() {
                    "cache".to_string()
                } else {
                    "network".to_string()
                },
                data: Some(result.data.clone().into_value()),
            },
            Retrieval::NoData => FetchResult {
                service: options.service,
                accession: accession.to_string(),
                found: false,
                retrieved: None,
                source: "none".to_string(),
                data: None,
            },
        })
    }

    pub fn services(&self, prefix: &str) -> Result<ServicesResult, GatorError> {
        Ok(ServicesResult {
            prefix: prefix.to_string(),
            services: self.gator.find_cached_services(prefix)?,
        })
    }

    pub fn accessions(&self, service: &str) -> Result<AccessionsResult, GatorError> {
        Ok(AccessionsResult {
            service: service.to_string(),
            accessions: self.gator.list_cached_accessions(service)?,
        })
    }

    pub fn history(&self, service: &str) -> Result<HistoryResult, GatorError> {
        Ok(HistoryResult {
            service: service.to_string(),
            retrieved: self.gator.history_for_service(service)?,
        })
    }

    pub fn clear(&self, service: &str, accession: Option<&str>) -> Result<ClearResult, GatorError> {
        Ok(ClearResult {
            service: Some(service.to_string()),
            accession: accession.map(str::to_string),
            removed: self.gator.clear_cache(service, accession)?,
        })
    }

    pub fn sweep(&self, before: DateTime<Utc>) -> Result<ClearResult, GatorError> {
        Ok(ClearResult {
            service: None,
            accession: None,
            removed: self.gator.sweep_cache(before)?,
        })
    }
}

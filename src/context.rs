use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::assembler::ResultData;
use crate::cache::{BulkScope, CacheBackend, CacheStore, NoopBackend, open_backend};
use crate::config::ResolvedConfig;
use crate::domain::{FreshnessWindow, ServiceDescriptor};
use crate::error::GatorError;
use crate::events::EventBus;
use crate::reader::Reader;
use crate::scheduler::RequestScheduler;
use crate::service::Service;
use crate::transport::{HttpTransport, Transport};

/// Everything services share: the registry of known data sources, the event
/// bus, the request scheduler, the cache and the transport.
///
/// Build one per application (or per test) and hand out services from it.
pub struct Gator {
    bus: Arc<EventBus>,
    scheduler: Arc<RequestScheduler>,
    cache: Arc<CacheStore>,
    transport: Arc<dyn Transport>,
    services: Mutex<HashMap<String, ServiceDescriptor>>,
    cached: Mutex<HashSet<String>>,
    next_id: AtomicU64,
}

impl Gator {
    pub fn new(transport: Arc<dyn Transport>, backend: Arc<dyn CacheBackend>) -> Arc<Self> {
        Arc::new(Self {
            bus: Arc::new(EventBus::new()),
            scheduler: Arc::new(RequestScheduler::new(None)),
            cache: Arc::new(CacheStore::new(backend)),
            transport,
            services: Mutex::new(HashMap::new()),
            cached: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// A context with no persistence.
    pub fn uncached(transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::new(transport, Arc::new(NoopBackend))
    }

    pub fn from_config(config: &ResolvedConfig) -> Result<Arc<Self>, GatorError> {
        let transport = Arc::new(HttpTransport::new(config.timeout)?);
        let backend = open_backend(config.backend, &config.cache_path)?;
        let gator = Self::new(transport, backend);
        gator.scheduler.set_max_concurrent(config.max_concurrent);
        gator.cache.set_minimum_age(config.min_age);
        gator.cache.set_maximum_age(config.max_age);
        for name in &config.cached_services {
            gator.enable_caching_for(name);
        }
        tracing::debug!(
            backend = gator.cache.backend_name(),
            max_concurrent = ?config.max_concurrent,
            "gator context ready"
        );
        Ok(gator)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<RequestScheduler> {
        &self.scheduler
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers a data source. Re-registering an identical descriptor is a
    /// no-op; a different descriptor under a taken name is refused.
    pub fn register(&self, descriptor: &ServiceDescriptor) -> Result<(), GatorError> {
        let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
        match services.get(descriptor.name()) {
            Some(existing) if existing == descriptor => Ok(()),
            Some(_) => Err(GatorError::DuplicateService(descriptor.name().to_string())),
            None => {
                services.insert(descriptor.name().to_string(), descriptor.clone());
                Ok(())
            }
        }
    }

    pub fn descriptor(&self, name: &str) -> Option<ServiceDescriptor> {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn registered_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Creates a service instance for `reader`, registering its descriptor.
    pub fn service<D: ResultData>(self: &Arc<Self>, reader: Reader<D>) -> Result<Service<D>, GatorError> {
        self.register(reader.descriptor())?;
        Ok(Service::new(self.clone(), reader))
    }

    /// Routes retrievals for `service` through the cache.
    pub fn enable_caching_for(&self, service: &str) {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.to_string());
    }

    pub fn disable_caching_for(&self, service: &str) {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service);
    }

    pub fn caching_enabled(&self, service: &str) -> bool {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(service)
    }

    pub fn set_minimum_age(&self, when: Option<DateTime<Utc>>) {
        self.cache.set_minimum_age(when);
    }

    pub fn set_maximum_age(&self, when: Option<DateTime<Utc>>) {
        self.cache.set_maximum_age(when);
    }

    pub fn sweep_cache(&self, before: DateTime<Utc>) -> Result<usize, GatorError> {
        self.cache.sweep(before)
    }

    pub fn find_cached_services(&self, prefix: &str) -> Result<Vec<String>, GatorError> {
        self.cache.services_matching_prefix(prefix)
    }

    pub fn list_cached_accessions(&self, service: &str) -> Result<Vec<String>, GatorError> {
        self.cache.accessions_for_service(service)
    }

    pub fn clear_cache(&self, service: &str, accession: Option<&str>) -> Result<usize, GatorError> {
        self.cache.clear(service, accession)
    }

    /// Days on which `service` data was retrieved, within the configured age
    /// bounds.
    pub fn history_for_service(&self, service: &str) -> Result<Vec<DateTime<Utc>>, GatorError> {
        let window: FreshnessWindow = self.cache.default_window();
        self.cache.retrieval_timestamps(service, Some(window))
    }

    pub fn begin_bulk_operation(&self) -> Result<BulkScope, GatorError> {
        self.cache.begin_bulk()
    }
}

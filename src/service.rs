use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::assembler::{IngestOutcome, ResultAssembler, ResultData, ServiceResult};
use crate::context::Gator;
use crate::domain::{Accession, ServiceDescriptor};
use crate::error::GatorError;
use crate::events::{EventBus, EventKind, ListenerId, ServiceEvent, Target};
use crate::reader::Reader;
use crate::transport::RawPayload;

const TERMINAL_EVENTS: [EventKind; 3] = [
    EventKind::ResultReceived,
    EventKind::Error,
    EventKind::RequestComplete,
];

/// What a retrieval produced.
#[derive(Debug)]
pub enum Retrieval<D> {
    Received(Arc<ServiceResult<D>>),
    /// The request completed but yielded nothing usable (no endpoint, empty
    /// body, cache-only miss).
    NoData,
}

impl<D> Retrieval<D> {
    pub fn result(&self) -> Option<&Arc<ServiceResult<D>>> {
        match self {
            Retrieval::Received(result) => Some(result),
            Retrieval::NoData => None,
        }
    }
}

/// One data source bound to a [`Gator`] context. Cloning yields another
/// handle to the same instance.
pub struct Service<D> {
    inner: Arc<ServiceInner<D>>,
}

struct ServiceInner<D> {
    gator: Arc<Gator>,
    reader: Reader<D>,
    instance: u64,
    generation: AtomicU64,
    accession: Mutex<Option<Accession>>,
    result: Mutex<Option<Arc<ServiceResult<D>>>>,
}

impl<D> Clone for Service<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: ResultData> fmt::Display for Service<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.reader.descriptor().name())
    }
}

impl<D: ResultData> Service<D> {
    pub(crate) fn new(gator: Arc<Gator>, reader: Reader<D>) -> Self {
        let instance = gator.next_id();
        Self {
            inner: Arc::new(ServiceInner {
                gator,
                reader,
                instance,
                generation: AtomicU64::new(0),
                accession: Mutex::new(None),
                result: Mutex::new(None),
            }),
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        self.inner.reader.descriptor()
    }

    pub fn target(&self) -> Target {
        Target::Instance(self.inner.instance)
    }

    pub fn accession(&self) -> Option<Accession> {
        self.inner
            .accession
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_result(&self) -> Option<Arc<ServiceResult<D>>> {
        self.inner
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn bind<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        self.inner.gator.bus().on(self.target(), kind, handler)
    }

    pub fn unbind(&self, id: ListenerId) -> bool {
        self.inner.gator.bus().off(id)
    }

    /// Retrieves data for `accession`, from the cache when caching is enabled
    /// for this service and a fresh record exists, otherwise from the network.
    ///
    /// Resolves with the first terminal event fired for this call. A newer
    /// `retrieve` on the same instance supersedes this one.
    pub async fn retrieve(&self, accession: &Accession) -> Result<Retrieval<D>, GatorError> {
        let request_id = self.inner.gator.next_id();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .inner
            .accession
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(accession.clone());

        let (tx, rx) = oneshot::channel();
        let first = FirstEvent::subscribe(self.inner.gator.bus(), self.target(), request_id, tx);

        let produced = self.run(accession, request_id, generation).await;
        drop(first);

        match rx.await {
            Ok((EventKind::ResultReceived, _)) => Ok(produced
                .map(Retrieval::Received)
                .unwrap_or(Retrieval::NoData)),
            Ok((EventKind::Error, error)) => Err(error.unwrap_or_else(|| {
                GatorError::Transport("retrieval failed without detail".to_string())
            })),
            Ok((EventKind::RequestComplete, _)) | Err(_) => Ok(Retrieval::NoData),
        }
    }

    /// Callback form of [`Service::retrieve`]: `callback` runs exactly once,
    /// on a spawned task.
    pub fn retrieve_with<F>(&self, accession: Accession, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Retrieval<D>, GatorError>) + Send + 'static,
    {
        let service = self.clone();
        tokio::spawn(async move {
            let outcome = service.retrieve(&accession).await;
            callback(outcome);
        })
    }

    async fn run(
        &self,
        accession: &Accession,
        request_id: u64,
        generation: u64,
    ) -> Option<Arc<ServiceResult<D>>> {
        let gator = &self.inner.gator;
        let descriptor = self.descriptor();
        let caching = gator.caching_enabled(descriptor.name());
        let cache_name = descriptor.cache_name();
        let mut assembler = ResultAssembler::<D>::new();

        if caching {
            let hit = gator
                .cache()
                .get(&accession.cache_key(), &cache_name, None);
            if let Some(hit) = hit {
                tracing::debug!(service = %descriptor, %accession, "cache hit");
                let outcome = assembler.ingest(
                    accession.as_str(),
                    Some(RawPayload::Json(hit.data)),
                    Some(hit.retrieved),
                );
                return self.conclude(accession, request_id, generation, assembler, outcome);
            }
            tracing::debug!(service = %descriptor, %accession, "cache miss");
        }

        let cache_only = caching && gator.cache().maximum_age().is_some();
        let mut last = IngestOutcome::Empty;
        for request in self.inner.reader.plan(accession) {
            let request = if cache_only {
                request.without_endpoint()
            } else {
                request
            };
            let permit = gator.scheduler().admit().await;
            let response = gator.transport().perform(&request).await;
            permit.release();

            let payload = match response {
                Ok(payload) => payload,
                Err(err) => {
                    return self.conclude(
                        accession,
                        request_id,
                        generation,
                        assembler,
                        IngestOutcome::Failed(err),
                    );
                }
            };
            match assembler.ingest(accession.as_str(), payload, None) {
                IngestOutcome::Failed(err) => {
                    return self.conclude(
                        accession,
                        request_id,
                        generation,
                        assembler,
                        IngestOutcome::Failed(err),
                    );
                }
                IngestOutcome::Updated => last = IngestOutcome::Updated,
                IngestOutcome::Empty => {}
            }
        }

        if caching && !cache_only {
            if let Some(value) = assembler.result().and_then(|r| r.raw_data.cacheable()) {
                gator
                    .cache()
                    .put_value_at(&accession.cache_key(), &cache_name, &value, Utc::now());
            }
        }
        self.conclude(accession, request_id, generation, assembler, last)
    }

    /// Fires the terminal events for one retrieval and, unless superseded,
    /// replaces the instance's current result. A superseded retrieval always
    /// ends in `Superseded`, whatever it produced.
    fn conclude(
        &self,
        accession: &Accession,
        request_id: u64,
        generation: u64,
        assembler: ResultAssembler<D>,
        outcome: IngestOutcome,
    ) -> Option<Arc<ServiceResult<D>>> {
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(service = %self, %accession, "discarding superseded retrieval");
            self.emit(
                EventKind::Error,
                accession,
                request_id,
                Some(GatorError::Superseded),
            );
            self.emit(EventKind::RequestComplete, accession, request_id, None);
            return None;
        }

        let produced = match outcome {
            IngestOutcome::Failed(err) => {
                tracing::warn!(service = %self, %accession, error = %err, "retrieval failed");
                self.emit(EventKind::Error, accession, request_id, Some(err));
                self.emit(EventKind::RequestComplete, accession, request_id, None);
                return None;
            }
            IngestOutcome::Empty => None,
            IngestOutcome::Updated => assembler.into_result().map(Arc::new),
        };

        let Some(result) = produced else {
            self.emit(EventKind::RequestComplete, accession, request_id, None);
            return None;
        };

        *self
            .inner
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        self.emit(EventKind::ResultReceived, accession, request_id, None);
        self.emit(EventKind::RequestComplete, accession, request_id, None);
        Some(result)
    }

    /// Fires on the instance first, then on the global target.
    fn emit(
        &self,
        kind: EventKind,
        accession: &Accession,
        request_id: u64,
        error: Option<GatorError>,
    ) {
        let event = ServiceEvent {
            kind,
            service: self.descriptor().name().to_string(),
            accession: accession.to_string(),
            request_id,
            error,
        };
        let bus = self.inner.gator.bus();
        bus.emit(self.target(), &event);
        bus.emit(Target::Global, &event);
    }
}

type FirstSender = oneshot::Sender<(EventKind, Option<GatorError>)>;

/// Listens for the first terminal event of one request and unsubscribes from
/// all of them when dropped.
struct FirstEvent {
    bus: Arc<EventBus>,
    listeners: Vec<ListenerId>,
}

impl FirstEvent {
    fn subscribe(bus: &Arc<EventBus>, target: Target, request_id: u64, tx: FirstSender) -> Self {
        let slot = Arc::new(Mutex::new(Some(tx)));
        let listeners = TERMINAL_EVENTS
            .iter()
            .map(|kind| {
                let slot = slot.clone();
                bus.on(target, *kind, move |event| {
                    if event.request_id != request_id {
                        return;
                    }
                    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                    if let Some(sender) = sender {
                        let _ = sender.send((event.kind, event.error.clone()));
                    }
                })
            })
            .collect();
        Self {
            bus: bus.clone(),
            listeners,
        }
    }
}

impl Drop for FirstEvent {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.bus.off(id);
        }
    }
}

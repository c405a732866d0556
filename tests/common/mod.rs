#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use mascp_gator::error::GatorError;
use mascp_gator::transport::{RawPayload, Transport, TransportRequest};

type Response = Result<Option<RawPayload>, GatorError>;

/// Scripted transport. Responses are served in order; once the script runs
/// out the fallback is returned. An optional gate holds every call until the
/// test releases permits.
pub struct StubTransport {
    script: Mutex<VecDeque<Response>>,
    fallback: Response,
    gate: Option<Arc<Semaphore>>,
    pub requests: Mutex<Vec<TransportRequest>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl StubTransport {
    pub fn json(value: Value) -> Self {
        Self::new(Ok(Some(RawPayload::Json(value))))
    }

    pub fn new(fallback: Response) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            gate: None,
            requests: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn then(self, response: Response) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn perform(&self, request: &TransportRequest) -> Result<Option<RawPayload>, GatorError> {
        self.requests.lock().unwrap().push(request.clone());
        if request.endpoint().is_none() {
            return Ok(None);
        }
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

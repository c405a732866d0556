use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::assembler::ResultData;
use crate::domain::{Accession, ServiceDescriptor};
use crate::transport::{HttpMethod, TransportRequest};

/// Builds the ordered list of requests one retrieval performs. Most services
/// need a single request; multi-phase protocols return several and the
/// result is merged across all of them.
pub type RequestPlanner =
    Arc<dyn Fn(&Accession, &ServiceDescriptor) -> Vec<TransportRequest> + Send + Sync>;

/// Plug-in describing one data source: who it is, how to ask it for an
/// accession, and (through `D`) how to read the answer.
pub struct Reader<D> {
    descriptor: ServiceDescriptor,
    planner: RequestPlanner,
    _result: PhantomData<fn() -> D>,
}

impl<D: ResultData> Reader<D> {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor,
            planner: Arc::new(default_plan),
            _result: PhantomData,
        }
    }

    pub fn with_planner<F>(mut self, planner: F) -> Self
    where
        F: Fn(&Accession, &ServiceDescriptor) -> Vec<TransportRequest> + Send + Sync + 'static,
    {
        self.planner = Arc::new(planner);
        self
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn plan(&self, accession: &Accession) -> Vec<TransportRequest> {
        (self.planner)(accession, &self.descriptor)
    }
}

impl<D> Clone for Reader<D> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            planner: self.planner.clone(),
            _result: PhantomData,
        }
    }
}

impl<D> fmt::Debug for Reader<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// `GET <endpoint>?agi=<accession>&service=<name>`, or an endpoint-less
/// request when the service has no URL.
pub fn default_plan(accession: &Accession, descriptor: &ServiceDescriptor) -> Vec<TransportRequest> {
    let request = TransportRequest::new(
        HttpMethod::Get,
        descriptor.endpoint().map(str::to_string),
    )
    .param("agi", accession.as_str())
    .param("service", descriptor.name())
    .with_mode(descriptor.mode());
    vec![request]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::JsonResult;

    #[test]
    fn default_plan_sends_agi_and_service() {
        let reader = Reader::<JsonResult>::new(ServiceDescriptor::new(
            "tair",
            Some("https://example.org/tair".to_string()),
        ));
        let acc: Accession = "AT1G01010".parse().unwrap();
        let plan = reader.plan(&acc);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].endpoint(), Some("https://example.org/tair"));
        assert_eq!(
            plan[0].params,
            vec![
                ("agi".to_string(), "AT1G01010".to_string()),
                ("service".to_string(), "tair".to_string()),
            ]
        );
    }

    #[test]
    fn endpointless_service_plans_empty_request() {
        let reader = Reader::<JsonResult>::new(ServiceDescriptor::new("populate", None));
        let acc: Accession = "AT1G01010".parse().unwrap();
        assert_eq!(reader.plan(&acc)[0].endpoint(), None);
    }
}

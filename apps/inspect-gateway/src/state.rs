use std::sync::Arc;

use coordinator_link::SessionHandle;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::resolver::Resolver;

#[derive(Clone)]
pub struct AppState {
    resolver: Arc<Resolver>,
    coordinator: Option<SessionHandle>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
            coordinator: None,
            metrics: None,
        }
    }

    pub fn with_coordinator(mut self, session: SessionHandle) -> Self {
        self.coordinator = Some(session);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Coordinator session state for health reporting; `"disabled"` when the
    /// gateway runs without a coordinator.
    pub fn coordinator_status(&self) -> &'static str {
        self.coordinator
            .as_ref()
            .map(|session| session.current().as_str())
            .unwrap_or("disabled")
    }

    pub fn render_metrics(&self) -> String {
        self.metrics
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }
}

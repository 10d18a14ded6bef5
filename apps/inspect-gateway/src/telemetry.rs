use anyhow::{anyhow, Context, Result};
use metrics::{KeyName, Recorder, SharedString, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::{global, trace::TracerProvider, KeyValue};
use opentelemetry_sdk::{
    resource::Resource,
    trace::{Sampler, SdkTracer, SdkTracerProvider},
};
use opentelemetry_stdout::SpanExporter;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "inspect-gateway";
const OTEL_STDOUT_ENV: &str = "INSPECT_GATEWAY_OTEL_STDOUT";

#[derive(Debug, Clone, Copy)]
enum Kind {
    Counter,
    Gauge,
    Histogram,
}

/// Every series the gateway and its crates emit.
const METRICS: &[(&str, Kind, Option<Unit>, &str)] = &[
    (
        "inspect_resolve_total",
        Kind::Counter,
        None,
        "Item resolutions by outcome.",
    ),
    (
        "inspect_http_fetch_seconds",
        Kind::Histogram,
        Some(Unit::Seconds),
        "REST fetch latency including backoff waits.",
    ),
    (
        "inspect_http_fetch_failures_total",
        Kind::Counter,
        None,
        "REST fetches that gave up, by reason.",
    ),
    (
        "inspect_http_retries_total",
        Kind::Counter,
        None,
        "REST retries after a 429 or transport error.",
    ),
    (
        "inspect_coordinator_session_transitions_total",
        Kind::Counter,
        None,
        "Coordinator session state changes, by target state.",
    ),
    (
        "inspect_coordinator_duplicate_dispatch_total",
        Kind::Counter,
        None,
        "Dispatches rejected because the item was already in flight.",
    ),
    (
        "inspect_coordinator_timeouts_total",
        Kind::Counter,
        None,
        "Coordinator requests that received no reply in time.",
    ),
    (
        "inspect_coordinator_pending_requests",
        Kind::Gauge,
        Some(Unit::Count),
        "Coordinator requests awaiting a reply.",
    ),
    (
        "inspect_coordinator_response_ms",
        Kind::Histogram,
        Some(Unit::Milliseconds),
        "Time from dispatch to matched coordinator reply.",
    ),
    (
        "inspect_coordinator_unmatched_responses_total",
        Kind::Counter,
        None,
        "Coordinator replies with no waiting caller, by reason.",
    ),
    (
        "inspect_coordinator_protocol_faults_total",
        Kind::Counter,
        None,
        "Frames the coordinator link could not decode.",
    ),
];

fn describe_metrics(recorder: &dyn Recorder) {
    for &(name, kind, unit, help) in METRICS {
        let (key, help) = (KeyName::from(name), SharedString::from(help));
        match kind {
            Kind::Counter => recorder.describe_counter(key, unit, help),
            Kind::Gauge => recorder.describe_gauge(key, unit, help),
            Kind::Histogram => recorder.describe_histogram(key, unit, help),
        }
    }
}

/// Process-wide logging, tracing and metrics setup. Keep it alive for the
/// lifetime of the process; dropping it flushes pending spans.
pub struct Telemetry {
    metrics_handle: PrometheusHandle,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    pub fn init() -> Result<Self> {
        let recorder = PrometheusBuilder::new().build_recorder();
        describe_metrics(&recorder);
        let metrics_handle = recorder.handle();
        metrics::set_boxed_recorder(Box::new(recorder))
            .map_err(|_| anyhow!("a metrics recorder is already installed"))?;

        let tracer_provider = env_truthy(OTEL_STDOUT_ENV).then(stdout_tracer_provider);
        let tracer = tracer_provider
            .as_ref()
            .map(|provider| provider.tracer(SERVICE_NAME));
        init_subscriber(tracer)?;
        if tracer_provider.is_some() {
            info!("OpenTelemetry stdout exporter enabled ({OTEL_STDOUT_ENV}=1)");
        }

        Ok(Self {
            metrics_handle,
            tracer_provider,
        })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics_handle.clone()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = &self.tracer_provider {
            if let Err(err) = provider.shutdown() {
                warn!(error = %err, "failed to shut down OpenTelemetry tracer provider");
            }
        }
    }
}

fn stdout_tracer_provider() -> SdkTracerProvider {
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(SpanExporter::default())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(
            Resource::builder()
                .with_attributes(vec![KeyValue::new("service.name", SERVICE_NAME)])
                .build(),
        )
        .build();
    global::set_tracer_provider(provider.clone());
    provider
}

/// `RUST_LOG` filter (default `info`) and fmt output, plus span export when a tracer is given.
fn init_subscriber(tracer: Option<SdkTracer>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let otel = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(otel)
        .try_init()
        .context("failed to initialise tracing subscriber")
}

fn env_truthy(key: &str) -> bool {
    std::env::var(key).is_ok_and(|val| is_truthy(&val))
}

fn is_truthy(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

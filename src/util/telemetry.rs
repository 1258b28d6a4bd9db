//! Tracing subscriber setup for binaries and tests that embed the client.
//!
//! Without the `telemetry` feature only a local `fmt` layer is installed, filtered
//! by `RUST_LOG` (default `info`). With the feature, and when any of the standard
//! `OTEL_EXPORTER_OTLP_*` variables is present, spans are also exported over OTLP.

use std::env;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(feature = "telemetry")]
use opentelemetry::{KeyValue, trace::TracerProvider as _};
#[cfg(feature = "telemetry")]
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("A global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
    #[cfg(feature = "telemetry")]
    #[error("Failed to build OTLP span exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn otlp_requested() -> bool {
    env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
        || env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok()
        || env::var("OTEL_EXPORTER_OTLP_PROTOCOL").is_ok()
}

#[cfg(feature = "telemetry")]
fn resource() -> Resource {
    let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_attributes([
            KeyValue::new(
                opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::attribute::DEPLOYMENT_ENVIRONMENT_NAME,
                deployment_env,
            ),
        ])
        .build()
}

/// Keeps exporter state alive; flushes on drop.
pub struct Telemetry {
    #[cfg(feature = "telemetry")]
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Installs the global subscriber.
    pub fn try_init() -> Result<Self, TelemetryError> {
        #[cfg(feature = "telemetry")]
        if otlp_requested() {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .build()?;
            let tracer_provider = SdkTracerProvider::builder()
                .with_resource(resource())
                .with_batch_exporter(exporter)
                .build();
            let tracer = tracer_provider.tracer("x402-client");
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_opentelemetry::OpenTelemetryLayer::new(tracer))
                .try_init()?;
            tracing::info!("OpenTelemetry span export enabled");
            return Ok(Self {
                tracer_provider: Some(tracer_provider),
            });
        }

        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
        if otlp_requested() {
            tracing::warn!("OTEL_EXPORTER_OTLP_* is set but the telemetry feature is disabled");
        }
        Ok(Self {
            #[cfg(feature = "telemetry")]
            tracer_provider: None,
        })
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        #[cfg(feature = "telemetry")]
        if let Some(tracer_provider) = self.tracer_provider.take() {
            if let Err(err) = tracer_provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
    }
}

//! Logging and trace export for CrewSafe processes.
//!
//! Call [`init_tracing`] once at startup, before the Tokio runtime is built,
//! and keep the returned guard alive until exit.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `CREWSAFE_LOG_FORMAT=json` | Newline-delimited JSON instead of the compact console format. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL. When set, spans are exported. |
//!
//! # Example
//!
//! ```rust,no_run
//! use crewsafe_runtime::telemetry::{init_tracing, TelemetryConfig};
//!
//! let _guard = init_tracing(&TelemetryConfig::from_env("crewsafe"));
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

/// Output settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub json: bool,
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    pub fn from_env(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            json: std::env::var("CREWSAFE_LOG_FORMAT")
                .is_ok_and(|v| v.eq_ignore_ascii_case("json")),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

/// Install the global subscriber.
///
/// Layers are stacked as: `EnvFilter`, then the OpenTelemetry layer when an
/// endpoint is configured, then exactly one console formatter.  If a global
/// subscriber is already installed (tests, embedding) the call leaves it in
/// place.
pub fn init_tracing(config: &TelemetryConfig) -> TracerProviderGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let provider = config
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| build_provider(&config.service_name, endpoint));
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("crewsafe")));

    let (json_layer, compact_layer) = if config.json {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer().compact()))
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("[crewsafe] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

/// Flushes and shuts down the span exporter on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[crewsafe] OpenTelemetry shutdown error: {e}");
            }
        }
    }
}

fn build_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[crewsafe] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: the CLI builds its Tokio runtime after this call, so a
    // batch exporter would have nothing to spawn onto.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_only_without_endpoint() {
        let config = TelemetryConfig {
            service_name: "crewsafe-test".into(),
            json: false,
            otlp_endpoint: None,
        };
        let guard = init_tracing(&config);
        assert!(!guard.is_exporting());
    }

    #[test]
    fn second_init_does_not_panic() {
        let config = TelemetryConfig {
            service_name: "crewsafe-test".into(),
            json: true,
            otlp_endpoint: None,
        };
        let _first = init_tracing(&config);
        let _second = init_tracing(&config);
    }

    #[test]
    fn empty_guard_drops_cleanly() {
        drop(TracerProviderGuard(None));
    }
}

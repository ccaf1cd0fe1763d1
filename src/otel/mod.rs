//! Observability for calendar-sync
//!
//! Structured logging through `tracing-subscriber`, with optional OTLP export
//! of spans and metrics. Export is off by default; the meter still works
//! locally so instrumented code never branches on it.

use crate::config::{LoggingConfig, OtelConfig};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as _,
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::models::{Platform, SyncStatus};

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer or subscriber
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Tracer and meter providers for the process
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    service_name: String,
}

impl OtelProvider {
    /// Build providers; OTLP exporters are attached only when enabled
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);

        let (tracer_provider, meter_provider) = match (config.enabled, &config.endpoint) {
            (false, _) => (
                None,
                SdkMeterProvider::builder().with_resource(resource).build(),
            ),
            (true, None) => {
                return Err(OtelError::Config(
                    "OTLP endpoint is required when enabled".into(),
                ))
            }
            (true, Some(endpoint)) => {
                let tracer_provider = Self::otlp_tracer_provider(endpoint, &resource)?;
                global::set_tracer_provider(tracer_provider.clone());
                (
                    Some(tracer_provider),
                    Self::otlp_meter_provider(endpoint, &resource)?,
                )
            }
        };

        Ok(Self {
            tracer_provider,
            meter_provider,
            service_name: config.service_name.clone(),
        })
    }

    fn otlp_tracer_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(
                Config::default()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_resource(resource.clone()),
            )
            .build())
    }

    fn otlp_meter_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
            .build())
    }

    /// Tracer for the `tracing-opentelemetry` layer, when export is enabled
    pub fn tracer(&self, name: &'static str) -> Option<opentelemetry_sdk::trace::Tracer> {
        self.tracer_provider.as_ref().map(|tp| tp.tracer(name))
    }

    /// Meter for the engine's instruments
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.service_name.clone())
    }

    /// Whether OTLP export is on
    pub fn is_enabled(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// Flush and stop exporters
    pub fn shutdown(&self) -> Result<(), OtelError> {
        self.meter_provider
            .shutdown()
            .map_err(|e| OtelError::Shutdown(format!("Meter shutdown failed: {:?}", e)))?;

        if let Some(ref tp) = self.tracer_provider {
            for result in tp.force_flush() {
                result
                    .map_err(|e| OtelError::Shutdown(format!("Tracer flush failed: {:?}", e)))?;
            }
        }

        Ok(())
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Sync engine instruments
pub struct Metrics {
    /// Terminal sync attempts by platform and status
    pub attempts_total: Counter<u64>,

    /// Attempts that hit an anti-bot challenge
    pub captcha_total: Counter<u64>,

    /// Attempts cancelled because no session was free
    pub pool_exhausted_total: Counter<u64>,

    /// Availability rows upserted
    pub availabilities_written_total: Counter<u64>,

    /// Attempt duration from start to terminal state
    pub duration_seconds: Histogram<f64>,
}

impl Metrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            attempts_total: meter
                .u64_counter("calendar_sync_attempts_total")
                .with_description("Terminal sync attempts by platform and status")
                .init(),
            captcha_total: meter
                .u64_counter("calendar_sync_captcha_total")
                .with_description("Sync attempts stopped by an anti-bot challenge")
                .init(),
            pool_exhausted_total: meter
                .u64_counter("calendar_sync_pool_exhausted_total")
                .with_description("Sync attempts cancelled for lack of a session")
                .init(),
            availabilities_written_total: meter
                .u64_counter("calendar_sync_availabilities_written_total")
                .with_description("Availability rows upserted")
                .init(),
            duration_seconds: meter
                .f64_histogram("calendar_sync_duration_seconds")
                .with_description("Sync attempt duration in seconds")
                .init(),
        }
    }

    /// Record a finished attempt
    pub fn record_attempt(&self, platform: Platform, status: SyncStatus, duration_secs: f64) {
        let platform = KeyValue::new("platform", platform.as_str());
        self.attempts_total.add(
            1,
            &[platform.clone(), KeyValue::new("status", status.as_str())],
        );
        self.duration_seconds.record(duration_secs, &[platform]);
    }

    /// Record a challenge hit
    pub fn record_captcha(&self, platform: Platform) {
        self.captcha_total
            .add(1, &[KeyValue::new("platform", platform.as_str())]);
    }

    /// Record a pool exhaustion
    pub fn record_pool_exhausted(&self) {
        self.pool_exhausted_total.add(1, &[]);
    }

    /// Record written rows
    pub fn record_written(&self, platform: Platform, rows: u64) {
        self.availabilities_written_total
            .add(rows, &[KeyValue::new("platform", platform.as_str())]);
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides `logging.level` when set. `logging.format` selects
/// `json` (default) or `pretty` output.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| OtelError::Config(format!("invalid log level: {}", e)))?;

    let fmt_layer = match logging.format.to_lowercase().as_str() {
        "pretty" | "text" => tracing_subscriber::fmt::layer().pretty().boxed(),
        _ => tracing_subscriber::fmt::layer().json().boxed(),
    };

    let otel_layer = otel
        .tracer("calendar-sync")
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| OtelError::TracerInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled() -> OtelProvider {
        OtelProvider::new(&OtelConfig::default()).unwrap()
    }

    // Test 1: Disabled provider has no tracer
    #[test]
    fn test_otel_provider_disabled() {
        let provider = disabled();
        assert!(!provider.is_enabled());
        assert!(provider.tracer("test").is_none());
    }

    // Test 2: Enabled provider requires an endpoint
    #[test]
    fn test_otel_provider_requires_endpoint_when_enabled() {
        let config = OtelConfig {
            enabled: true,
            endpoint: None,
            ..OtelConfig::default()
        };

        match OtelProvider::new(&config) {
            Err(OtelError::Config(msg)) => assert!(msg.contains("endpoint is required")),
            _ => panic!("Expected OtelError::Config"),
        }
    }

    // Test 3: Engine metrics record without an exporter
    #[test]
    fn test_metrics_record() {
        let provider = disabled();
        let metrics = Metrics::new(&provider.meter());

        metrics.record_attempt(Platform::Airbnb, SyncStatus::Success, 4.2);
        metrics.record_attempt(Platform::Booking, SyncStatus::CriticalError, 0.8);
        metrics.record_captcha(Platform::Vrbo);
        metrics.record_pool_exhausted();
        metrics.record_written(Platform::Airbnb, 365);
    }

    // Test 4: Shutdown of a disabled provider succeeds
    #[test]
    fn test_otel_provider_shutdown() {
        assert!(disabled().shutdown().is_ok());
    }

    // Test 5: Default config
    #[test]
    fn test_default_otel_config() {
        let config = OtelConfig::default();
        assert!(!config.enabled);
        assert!(config.endpoint.is_none());
        assert_eq!(config.service_name, "calendar-sync");
    }

    // Test 6: Error display
    #[test]
    fn test_otel_error_display() {
        assert_eq!(
            OtelError::Config("bad".to_string()).to_string(),
            "Configuration error: bad"
        );
        assert_eq!(
            OtelError::Shutdown("x".to_string()).to_string(),
            "Failed to shutdown: x"
        );
    }
}

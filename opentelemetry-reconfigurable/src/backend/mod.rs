//! Telemetry backends installed behind the reconfigurable providers.
//!
//! A [`TelemetryBackend`] bundles one provider per signal. Backends are built
//! by a [`BackendFactory`] from the resolved configuration and the merged
//! resource, and are owned by [`ReconfigurableTelemetry`] until replaced.
//!
//! [`ReconfigurableTelemetry`]: crate::ReconfigurableTelemetry
mod sdk;

pub use sdk::{
    PipelineCustomizer, SdkBackend, SdkBackendFactory, TRACES_SAMPLER, TRACES_SAMPLER_ARG,
};

use crate::config::ConfigProperties;
use crate::error::ConfigureResult;
use crate::logs::DynLoggerProvider;
use crate::metrics::{MeterPipeline, NoopMeterProvider};
use crate::trace::DynTracerProvider;
use opentelemetry::logs::NoopLoggerProvider;
use opentelemetry::trace::noop::NoopTracerProvider;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::Resource;
use std::fmt;
use std::sync::Arc;

/// Property selecting the OTLP endpoint of every signal.
pub const OTLP_ENDPOINT: &str = "otel.exporter.otlp.endpoint";
/// Property selecting the span exporter.
pub const TRACES_EXPORTER: &str = "otel.traces.exporter";
/// Property selecting the metric exporter.
pub const METRICS_EXPORTER: &str = "otel.metrics.exporter";
/// Property selecting the log record exporter.
pub const LOGS_EXPORTER: &str = "otel.logs.exporter";

/// Properties whose presence selects a configured backend instead of the
/// no-op one.
pub const EXPORTER_KEYS: [&str; 4] = [OTLP_ENDPOINT, TRACES_EXPORTER, METRICS_EXPORTER, LOGS_EXPORTER];

/// Exporter selection value that turns a signal off.
pub const EXPORTER_NONE: &str = "none";

/// A bundle of signal providers built from one configuration.
pub trait TelemetryBackend: Send + Sync {
    /// Provider installed behind the reconfigurable tracer provider.
    fn tracer_provider(&self) -> Arc<DynTracerProvider>;

    /// Metrics pipeline, closed separately through a
    /// [`CloseableMeterProvider`](crate::metrics::CloseableMeterProvider).
    fn meter_provider(&self) -> Arc<dyn MeterPipeline>;

    /// Provider installed behind the reconfigurable logger provider.
    fn logger_provider(&self) -> Arc<DynLoggerProvider>;

    /// Provider installed behind the reconfigurable event logger provider.
    fn event_logger_provider(&self) -> Arc<DynLoggerProvider>;

    /// Flush and release everything but the metrics pipeline.
    fn shutdown(&self) -> OTelSdkResult;
}

/// Builds a [`TelemetryBackend`] for a configuration.
pub trait BackendFactory: Send + Sync {
    /// Build a backend from `config`, attaching `resource` to every signal.
    ///
    /// The factory must not install anything globally: on error the
    /// currently live backend stays in place.
    fn create(
        &self,
        config: &ConfigProperties,
        resource: &Resource,
    ) -> ConfigureResult<Box<dyn TelemetryBackend>>;
}

/// Backend used while telemetry is disabled. Performs no I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend {
    _private: (),
}

impl NoopBackend {
    /// Create a new no-op backend.
    pub fn new() -> Self {
        NoopBackend { _private: () }
    }
}

impl TelemetryBackend for NoopBackend {
    fn tracer_provider(&self) -> Arc<DynTracerProvider> {
        Arc::new(NoopTracerProvider::new())
    }

    fn meter_provider(&self) -> Arc<dyn MeterPipeline> {
        Arc::new(NoopMeterProvider::new())
    }

    fn logger_provider(&self) -> Arc<DynLoggerProvider> {
        Arc::new(NoopLoggerProvider::new())
    }

    fn event_logger_provider(&self) -> Arc<DynLoggerProvider> {
        Arc::new(NoopLoggerProvider::new())
    }

    fn shutdown(&self) -> OTelSdkResult {
        Ok(())
    }
}

impl fmt::Debug for dyn TelemetryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TelemetryBackend")
    }
}

impl fmt::Debug for dyn BackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BackendFactory")
    }
}

/// Returns `true` if `config` selects at least one exporter.
pub(crate) fn selects_exporter(config: &ConfigProperties) -> bool {
    EXPORTER_KEYS.iter().any(|key| config.contains_key(key))
}

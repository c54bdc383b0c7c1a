use super::{
    BackendFactory, TelemetryBackend, EXPORTER_NONE, LOGS_EXPORTER, METRICS_EXPORTER,
    TRACES_EXPORTER,
};
use crate::config::ConfigProperties;
use crate::error::{ConfigureError, ConfigureResult};
use crate::logs::DynLoggerProvider;
use crate::metrics::MeterPipeline;
use crate::trace::DynTracerProvider;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::{LoggerProviderBuilder, SdkLoggerProvider};
use opentelemetry_sdk::metrics::{MeterProviderBuilder, SdkMeterProvider};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, TracerProviderBuilder};
use opentelemetry_sdk::Resource;
use std::fmt;
use std::sync::Arc;

/// Property selecting the sampler of the tracer provider.
pub const TRACES_SAMPLER: &str = "otel.traces.sampler";
/// Property holding the sampler argument, the ratio of ratio based samplers.
pub const TRACES_SAMPLER_ARG: &str = "otel.traces.sampler.arg";

const DEFAULT_SAMPLER: &str = "parentbased_always_on";

/// Customizes the SDK builder of one signal, typically by attaching
/// exporters and processors.
pub type PipelineCustomizer<B> =
    Box<dyn Fn(&ConfigProperties, B) -> ConfigureResult<B> + Send + Sync>;

/// A backend made of the SDK providers.
#[derive(Debug, Clone)]
pub struct SdkBackend {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    logger_provider: SdkLoggerProvider,
}

impl SdkBackend {
    /// Bundle already built SDK providers. The logger provider also serves
    /// events.
    pub fn new(
        tracer_provider: SdkTracerProvider,
        meter_provider: SdkMeterProvider,
        logger_provider: SdkLoggerProvider,
    ) -> Self {
        SdkBackend {
            tracer_provider,
            meter_provider,
            logger_provider,
        }
    }
}

impl TelemetryBackend for SdkBackend {
    fn tracer_provider(&self) -> Arc<DynTracerProvider> {
        Arc::new(self.tracer_provider.clone())
    }

    fn meter_provider(&self) -> Arc<dyn MeterPipeline> {
        Arc::new(self.meter_provider.clone())
    }

    fn logger_provider(&self) -> Arc<DynLoggerProvider> {
        Arc::new(self.logger_provider.clone())
    }

    fn event_logger_provider(&self) -> Arc<DynLoggerProvider> {
        Arc::new(self.logger_provider.clone())
    }

    fn shutdown(&self) -> OTelSdkResult {
        let traces = self.tracer_provider.shutdown();
        let logs = self.logger_provider.shutdown();
        traces.and(logs)
    }
}

/// Builds [`SdkBackend`]s.
///
/// Every provider gets the merged resource, and the tracer provider the
/// sampler selected by `otel.traces.sampler`. Exporters are attached by the
/// registered pipeline customizers. A signal whose exporter property is
/// `none` is built without running its customizers.
#[derive(Default)]
pub struct SdkBackendFactory {
    tracer_customizers: Vec<PipelineCustomizer<TracerProviderBuilder>>,
    meter_customizers: Vec<PipelineCustomizer<MeterProviderBuilder>>,
    logger_customizers: Vec<PipelineCustomizer<LoggerProviderBuilder>>,
}

impl SdkBackendFactory {
    /// Create a factory without customizers.
    pub fn new() -> Self {
        SdkBackendFactory::default()
    }

    /// Register a customizer for the tracer provider builder.
    pub fn with_tracer_customizer<F>(mut self, customizer: F) -> Self
    where
        F: Fn(&ConfigProperties, TracerProviderBuilder) -> ConfigureResult<TracerProviderBuilder>
            + Send
            + Sync
            + 'static,
    {
        self.tracer_customizers.push(Box::new(customizer));
        self
    }

    /// Register a customizer for the meter provider builder.
    pub fn with_meter_customizer<F>(mut self, customizer: F) -> Self
    where
        F: Fn(&ConfigProperties, MeterProviderBuilder) -> ConfigureResult<MeterProviderBuilder>
            + Send
            + Sync
            + 'static,
    {
        self.meter_customizers.push(Box::new(customizer));
        self
    }

    /// Register a customizer for the logger provider builder.
    pub fn with_logger_customizer<F>(mut self, customizer: F) -> Self
    where
        F: Fn(&ConfigProperties, LoggerProviderBuilder) -> ConfigureResult<LoggerProviderBuilder>
            + Send
            + Sync
            + 'static,
    {
        self.logger_customizers.push(Box::new(customizer));
        self
    }
}

impl fmt::Debug for SdkBackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkBackendFactory")
            .field("tracer_customizers", &self.tracer_customizers.len())
            .field("meter_customizers", &self.meter_customizers.len())
            .field("logger_customizers", &self.logger_customizers.len())
            .finish()
    }
}

impl BackendFactory for SdkBackendFactory {
    fn create(
        &self,
        config: &ConfigProperties,
        resource: &Resource,
    ) -> ConfigureResult<Box<dyn TelemetryBackend>> {
        let tracer_builder = SdkTracerProvider::builder()
            .with_sampler(sampler(config)?)
            .with_resource(resource.clone());
        let tracer_builder = customize(
            config,
            TRACES_EXPORTER,
            &self.tracer_customizers,
            tracer_builder,
        )?;

        let meter_builder = SdkMeterProvider::builder().with_resource(resource.clone());
        let meter_builder = customize(
            config,
            METRICS_EXPORTER,
            &self.meter_customizers,
            meter_builder,
        )?;

        let logger_builder = SdkLoggerProvider::builder().with_resource(resource.clone());
        let logger_builder = customize(
            config,
            LOGS_EXPORTER,
            &self.logger_customizers,
            logger_builder,
        )?;

        // Nothing is built until every customizer succeeded.
        Ok(Box::new(SdkBackend::new(
            tracer_builder.build(),
            meter_builder.build(),
            logger_builder.build(),
        )))
    }
}

fn customize<B>(
    config: &ConfigProperties,
    exporter_key: &str,
    customizers: &[PipelineCustomizer<B>],
    builder: B,
) -> ConfigureResult<B> {
    if config
        .get(exporter_key)
        .is_some_and(|exporter| exporter.eq_ignore_ascii_case(EXPORTER_NONE))
    {
        return Ok(builder);
    }
    customizers
        .iter()
        .try_fold(builder, |builder, customizer| customizer(config, builder))
}

/// Parses `otel.traces.sampler` and its argument.
fn sampler(config: &ConfigProperties) -> ConfigureResult<Sampler> {
    let name = config.get(TRACES_SAMPLER).unwrap_or(DEFAULT_SAMPLER);
    let ratio = || -> ConfigureResult<f64> {
        match config.get_f64(TRACES_SAMPLER_ARG)? {
            None => Ok(1.0),
            Some(ratio) if (0.0..=1.0).contains(&ratio) => Ok(ratio),
            Some(ratio) => Err(ConfigureError::invalid_property(
                TRACES_SAMPLER_ARG,
                ratio.to_string(),
                "sampling ratio must be between 0 and 1",
            )),
        }
    };
    match name.to_ascii_lowercase().as_str() {
        "always_on" => Ok(Sampler::AlwaysOn),
        "always_off" => Ok(Sampler::AlwaysOff),
        "traceidratio" => Ok(Sampler::TraceIdRatioBased(ratio()?)),
        "parentbased_always_on" => Ok(Sampler::ParentBased(Box::new(Sampler::AlwaysOn))),
        "parentbased_always_off" => Ok(Sampler::ParentBased(Box::new(Sampler::AlwaysOff))),
        "parentbased_traceidratio" => Ok(Sampler::ParentBased(Box::new(
            Sampler::TraceIdRatioBased(ratio()?),
        ))),
        _ => Err(ConfigureError::invalid_property(
            TRACES_SAMPLER,
            name,
            "unknown sampler",
        )),
    }
}

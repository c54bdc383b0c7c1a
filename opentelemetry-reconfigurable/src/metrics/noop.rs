use super::MeterPipeline;
use opentelemetry::metrics::{InstrumentProvider, Meter, MeterProvider};
use opentelemetry::InstrumentationScope;
use opentelemetry_sdk::error::OTelSdkResult;
use std::sync::Arc;

/// A meter pipeline that records nothing and owns no resources.
///
/// Every instrument it creates is inert.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMeterProvider {
    _private: (),
}

impl NoopMeterProvider {
    /// Create a new no-op meter provider.
    pub fn new() -> Self {
        NoopMeterProvider { _private: () }
    }
}

impl MeterProvider for NoopMeterProvider {
    fn meter_with_scope(&self, _scope: InstrumentationScope) -> Meter {
        Meter::new(Arc::new(NoopInstrumentProvider))
    }
}

impl MeterPipeline for NoopMeterProvider {
    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown(&self) -> OTelSdkResult {
        Ok(())
    }
}

/// Relies on the default, inert, instruments of [`InstrumentProvider`].
struct NoopInstrumentProvider;

impl InstrumentProvider for NoopInstrumentProvider {}

use super::NoopMeterProvider;
use crate::timeout::run_with_timeout;
use opentelemetry::metrics::{Meter, MeterProvider};
use opentelemetry::{otel_debug, otel_warn, InstrumentationScope};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A meter provider that owns resources which must be released explicitly,
/// such as exporter connections and periodic reader threads.
pub trait MeterPipeline: MeterProvider + Send + Sync {
    /// Flush all pending measurements to the exporters.
    fn force_flush(&self) -> OTelSdkResult;

    /// Release the resources held by the pipeline. Measurements recorded
    /// afterwards are dropped.
    fn shutdown(&self) -> OTelSdkResult;
}

impl MeterPipeline for SdkMeterProvider {
    fn force_flush(&self) -> OTelSdkResult {
        SdkMeterProvider::force_flush(self)
    }

    fn shutdown(&self) -> OTelSdkResult {
        SdkMeterProvider::shutdown(self)
    }
}

/// Wraps a [`MeterPipeline`] so it can be drained and released exactly once,
/// within a bounded time, before it is replaced.
///
/// Closing is idempotent. After close, meters obtained from this wrapper are
/// inert.
pub struct CloseableMeterProvider {
    pipeline: Arc<dyn MeterPipeline>,
    closed: AtomicBool,
    timeout: Duration,
}

impl CloseableMeterProvider {
    /// Wrap `pipeline`, allowing `timeout` for the flush and shutdown on close.
    pub fn new(pipeline: Arc<dyn MeterPipeline>, timeout: Duration) -> Self {
        CloseableMeterProvider {
            pipeline,
            closed: AtomicBool::new(false),
            timeout,
        }
    }

    /// Flush then shut down the wrapped pipeline, waiting at most the
    /// configured timeout.
    ///
    /// Failures are logged and returned for inspection; they never leave the
    /// wrapper open. Closing an already closed wrapper does nothing.
    pub fn close(&self) -> OTelSdkResult {
        if self.closed.swap(true, Ordering::SeqCst) {
            otel_debug!(name: "CloseableMeterProvider.AlreadyClosed");
            return Ok(());
        }

        let pipeline = self.pipeline.clone();
        let result = run_with_timeout("MeterPipeline.Close", self.timeout, move || {
            let flushed = pipeline.force_flush();
            let shutdown = pipeline.shutdown();
            flushed.and(shutdown)
        });
        if let Err(err) = &result {
            otel_warn!(
                name: "CloseableMeterProvider.CloseFailed",
                error = format!("{err}"),
                message = "Meter pipeline could not be flushed and shut down cleanly; pending measurements may be lost."
            );
        }
        result
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CloseableMeterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseableMeterProvider")
            .field("closed", &self.is_closed())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MeterProvider for CloseableMeterProvider {
    fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter {
        if self.is_closed() {
            return NoopMeterProvider::new().meter_with_scope(scope);
        }
        self.pipeline.meter_with_scope(scope)
    }
}

//! Process-wide [`ReconfigurableTelemetry`] instance.
//!
//! Code that cannot be handed a [`ReconfigurableTelemetry`] explicitly can
//! reach the registered one through [`telemetry`]. Installing also makes the
//! reconfigurable tracer and meter providers, and the reconfigurable text map
//! propagator, the ones returned by [`opentelemetry::global`].
use crate::metrics::NoopMeterProvider;
use crate::propagation;
use crate::telemetry::ReconfigurableTelemetry;
use opentelemetry::trace::noop::NoopTracerProvider;
use opentelemetry::{otel_debug, otel_warn};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

static GLOBAL_TELEMETRY: OnceLock<RwLock<Option<Arc<ReconfigurableTelemetry>>>> = OnceLock::new();

#[inline]
fn global_telemetry() -> &'static RwLock<Option<Arc<ReconfigurableTelemetry>>> {
    GLOBAL_TELEMETRY.get_or_init(|| RwLock::new(None))
}

/// Registers `telemetry` as the process-wide instance.
///
/// Returns `false`, logging a warning, when another instance is already
/// registered; that instance stays in place and `telemetry` keeps working as
/// a local instance. Registering the same instance twice is a no-op.
pub fn install(telemetry: Arc<ReconfigurableTelemetry>) -> bool {
    let mut global = global_telemetry()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(current) = global.as_ref() {
        if Arc::ptr_eq(current, &telemetry) {
            return true;
        }
        otel_warn!(
            name: "ReconfigurableTelemetry.GlobalAlreadySet",
            message = "A process-wide telemetry instance is already registered; the new instance stays local."
        );
        return false;
    }

    opentelemetry::global::set_tracer_provider(telemetry.tracer_provider().clone());
    opentelemetry::global::set_meter_provider(telemetry.meter_provider().clone());
    opentelemetry::global::set_text_map_propagator(telemetry.propagator().clone());
    *global = Some(telemetry);
    otel_debug!(name: "ReconfigurableTelemetry.GlobalInstalled");
    true
}

/// Returns the process-wide instance, if one is registered.
pub fn telemetry() -> Option<Arc<ReconfigurableTelemetry>> {
    global_telemetry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Unregisters the process-wide instance and resets the
/// [`opentelemetry::global`] providers to no-ops.
pub fn uninstall() -> Option<Arc<ReconfigurableTelemetry>> {
    let previous = global_telemetry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if previous.is_some() {
        opentelemetry::global::set_tracer_provider(NoopTracerProvider::new());
        opentelemetry::global::set_meter_provider(NoopMeterProvider::new());
        opentelemetry::global::set_text_map_propagator(propagation::inert());
        otel_debug!(name: "ReconfigurableTelemetry.GlobalUninstalled");
    }
    previous
}

/// Unregisters `telemetry` if it is the process-wide instance.
pub(crate) fn uninstall_if(telemetry: &ReconfigurableTelemetry) {
    let registered = telemetry_is_registered(telemetry);
    if registered {
        uninstall();
    }
}

fn telemetry_is_registered(telemetry: &ReconfigurableTelemetry) -> bool {
    global_telemetry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), telemetry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryState;
    use opentelemetry::baggage::BaggageExt;
    use opentelemetry::propagation::TextMapPropagator;
    use opentelemetry::trace::{Span, Tracer};
    use opentelemetry::{Context, KeyValue};
    use opentelemetry_sdk::Resource;
    use std::collections::HashMap;

    fn globally_injected_headers() -> Vec<String> {
        let cx = Context::new().with_baggage(vec![KeyValue::new("build", "42")]);
        let mut carrier: HashMap<String, String> = HashMap::new();
        opentelemetry::global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&cx, &mut carrier)
        });
        carrier.into_keys().collect()
    }

    // The registration is process-wide, so everything runs in one test.
    #[test]
    fn install_lookup_and_uninstall() {
        assert!(telemetry().is_none());

        let first = ReconfigurableTelemetry::builder()
            .with_environment(false)
            .with_global_install(true)
            .build();
        let registered = telemetry().expect("first instance is registered");
        assert!(Arc::ptr_eq(&registered, &first));
        assert!(install(first.clone()));

        // the global propagator follows the registered instance
        assert!(globally_injected_headers().is_empty());
        let mut otlp = HashMap::new();
        otlp.insert("otel.traces.exporter".to_string(), "otlp".to_string());
        first
            .configure(otlp, Resource::builder_empty().build())
            .unwrap();
        assert_eq!(globally_injected_headers(), vec!["baggage"]);

        let second = ReconfigurableTelemetry::builder()
            .with_environment(false)
            .build();
        assert!(!install(second.clone()));
        assert!(Arc::ptr_eq(&telemetry().unwrap(), &first));

        // the second instance still works locally
        second
            .configure(HashMap::new(), Resource::builder_empty().build())
            .unwrap();
        assert_eq!(second.state(), TelemetryState::NoOp);

        // shutting down a local instance leaves the registration alone
        second.shutdown();
        assert!(telemetry().is_some());

        first.shutdown();
        assert!(telemetry().is_none());
        assert!(uninstall().is_none());
        assert!(globally_injected_headers().is_empty());

        let mut span = opentelemetry::global::tracer("after-uninstall").start("inert");
        assert!(!span.is_recording());
        span.end();
    }
}

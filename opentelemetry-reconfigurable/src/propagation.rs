//! Reconfigurable context propagation.
//!
//! [`ReconfigurablePropagator`] is a [`TextMapPropagator`] that injects and
//! extracts with the propagators selected by the live configuration. It can be
//! installed once, for example with
//! [`opentelemetry::global::set_text_map_propagator`], and follows every later
//! reconfiguration.
use crate::config::ConfigProperties;
use crate::delegate::{DelegateCell, Installed};
use crate::error::{ConfigureError, ConfigureResult};
use opentelemetry::otel_debug;
use opentelemetry::propagation::text_map_propagator::FieldIter;
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use std::fmt;
use std::sync::Arc;

/// Property selecting the context propagators.
pub const PROPAGATORS: &str = "otel.propagators";

/// Propagators used when [`PROPAGATORS`] is not set.
pub const DEFAULT_PROPAGATORS: [&str; 2] = [TRACE_CONTEXT, BAGGAGE];

const TRACE_CONTEXT: &str = "tracecontext";
const BAGGAGE: &str = "baggage";
const NONE: &str = "none";

/// Text map propagator installed as a delegate.
pub type DynTextMapPropagator = dyn TextMapPropagator + Send + Sync;

/// A [`TextMapPropagator`] whose propagators can be replaced at runtime.
///
/// Cloning creates a new reference to the same propagator.
#[derive(Clone)]
pub struct ReconfigurablePropagator {
    delegate: Arc<DelegateCell<DynTextMapPropagator>>,
    fields: Arc<Vec<String>>,
}

impl Default for ReconfigurablePropagator {
    fn default() -> Self {
        ReconfigurablePropagator::new()
    }
}

impl ReconfigurablePropagator {
    /// Create a propagator that neither injects nor extracts anything.
    pub fn new() -> Self {
        let fields: Vec<String> = TraceContextPropagator::new()
            .fields()
            .chain(BaggagePropagator::new().fields())
            .map(str::to_owned)
            .collect();
        ReconfigurablePropagator {
            delegate: Arc::new(DelegateCell::new(Arc::new(inert()))),
            fields: Arc::new(fields),
        }
    }

    /// Installs `propagator`, returning the previous one.
    pub fn set_delegate<P>(&self, propagator: P) -> Arc<DynTextMapPropagator>
    where
        P: TextMapPropagator + Send + Sync + 'static,
    {
        self.set_dyn_delegate(Arc::new(propagator))
    }

    /// Installs an already type-erased propagator.
    pub fn set_dyn_delegate(
        &self,
        propagator: Arc<DynTextMapPropagator>,
    ) -> Arc<DynTextMapPropagator> {
        let previous = self.delegate.set(propagator);
        otel_debug!(
            name: "ReconfigurablePropagator.DelegateSet",
            generation = self.delegate.get().generation()
        );
        previous
    }

    /// Returns the currently installed propagator.
    pub fn delegate(&self) -> Arc<Installed<DynTextMapPropagator>> {
        self.delegate.get()
    }
}

impl fmt::Debug for ReconfigurablePropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconfigurablePropagator")
            .field("delegate", &self.delegate)
            .finish()
    }
}

impl TextMapPropagator for ReconfigurablePropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        self.delegate.get().provider().inject_context(cx, injector)
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.delegate
            .get()
            .provider()
            .extract_with_context(cx, extractor)
    }

    /// Fields of every propagator that can be configured, whichever is live.
    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(&self.fields)
    }
}

/// A propagator that neither injects nor extracts anything.
pub(crate) fn inert() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(Vec::new())
}

/// Builds the propagators listed in `otel.propagators`.
///
/// Unset or blank selects [`DEFAULT_PROPAGATORS`]. `none` disables
/// propagation and cannot be combined with other entries.
pub(crate) fn propagator_from_config(
    config: &ConfigProperties,
) -> ConfigureResult<TextMapCompositePropagator> {
    let mut names = config.get_list(PROPAGATORS);
    if names.is_empty() {
        names = DEFAULT_PROPAGATORS.iter().map(|&name| name.to_owned()).collect();
    }
    let invalid = |reason: String| {
        ConfigureError::invalid_property(
            PROPAGATORS,
            config.get(PROPAGATORS).unwrap_or_default(),
            reason,
        )
    };

    if names.iter().any(|name| name == NONE) {
        if names.len() > 1 {
            return Err(invalid(format!("`{NONE}` cannot be combined with other propagators")));
        }
        return Ok(inert());
    }

    let mut propagators: Vec<Box<DynTextMapPropagator>> = Vec::with_capacity(names.len());
    for name in &names {
        match name.as_str() {
            TRACE_CONTEXT => propagators.push(Box::new(TraceContextPropagator::new())),
            BAGGAGE => propagators.push(Box::new(BaggagePropagator::new())),
            other => return Err(invalid(format!("unsupported propagator `{other}`"))),
        }
    }
    Ok(TextMapCompositePropagator::new(propagators))
}

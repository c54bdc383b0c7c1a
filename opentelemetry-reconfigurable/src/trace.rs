//! Reconfigurable tracing.
//!
//! [`ReconfigurableTracerProvider`] hands out [`ReconfigurableTracer`]s that
//! stay valid for the lifetime of the process. A tracer does not hold on to a
//! backend tracer directly: each span start goes through the provider's
//! [`DelegateCell`], so replacing the delegate reroutes every tracer already
//! handed out.
//!
//! Spans started before a swap keep their original backend and are exported by
//! it when they end.
use crate::delegate::{Binding, DelegateCell, Installed, Rebinding};
use opentelemetry::global::{BoxedSpan, BoxedTracer, ObjectSafeTracerProvider};
use opentelemetry::trace::noop::NoopTracerProvider;
use opentelemetry::trace::{Span, SpanBuilder, Tracer, TracerProvider};
use opentelemetry::{otel_debug, Context, InstrumentationScope};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Object safe tracer provider installed as a delegate.
pub type DynTracerProvider = dyn ObjectSafeTracerProvider + Send + Sync;

/// A [`TracerProvider`] whose backend can be replaced at runtime.
///
/// Cloning creates a new reference to the same provider.
#[derive(Clone)]
pub struct ReconfigurableTracerProvider {
    delegate: Arc<DelegateCell<DynTracerProvider>>,
    tracers: Arc<Mutex<HashMap<InstrumentationScope, ReconfigurableTracer>>>,
}

impl Default for ReconfigurableTracerProvider {
    fn default() -> Self {
        ReconfigurableTracerProvider::new()
    }
}

impl ReconfigurableTracerProvider {
    /// Create a provider delegating to a no-op tracer provider.
    pub fn new() -> Self {
        ReconfigurableTracerProvider {
            delegate: Arc::new(DelegateCell::new(Arc::new(NoopTracerProvider::new()))),
            tracers: Arc::default(),
        }
    }

    /// Returns the tracer for `scope`, creating it on first use.
    ///
    /// The same tracer is returned for equal scopes for the lifetime of this
    /// provider, regardless of how many times the delegate is replaced.
    pub fn get_or_create(&self, scope: InstrumentationScope) -> ReconfigurableTracer {
        let mut tracers = self.tracers.lock().unwrap_or_else(PoisonError::into_inner);
        tracers
            .entry(scope)
            .or_insert_with_key(|scope| ReconfigurableTracer {
                inner: Arc::new(TracerInner {
                    scope: scope.clone(),
                    delegate: self.delegate.clone(),
                    bound: Rebinding::new(),
                }),
            })
            .clone()
    }

    /// Installs `provider` as the backend of every tracer issued by this
    /// provider, returning the previous backend.
    pub fn set_delegate<P, T, S>(&self, provider: P) -> Arc<DynTracerProvider>
    where
        S: Span + Send + Sync + 'static,
        T: Tracer<Span = S> + Send + Sync + 'static,
        P: TracerProvider<Tracer = T> + Send + Sync + 'static,
    {
        self.set_dyn_delegate(Arc::new(provider))
    }

    /// Installs an already type-erased backend.
    pub fn set_dyn_delegate(&self, provider: Arc<DynTracerProvider>) -> Arc<DynTracerProvider> {
        let previous = self.delegate.set(provider);
        otel_debug!(
            name: "ReconfigurableTracerProvider.DelegateSet",
            generation = self.delegate.get().generation()
        );
        previous
    }

    /// Returns the currently installed backend.
    pub fn delegate(&self) -> Arc<Installed<DynTracerProvider>> {
        self.delegate.get()
    }
}

impl fmt::Debug for ReconfigurableTracerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconfigurableTracerProvider")
            .field("delegate", &self.delegate)
            .finish()
    }
}

impl TracerProvider for ReconfigurableTracerProvider {
    type Tracer = ReconfigurableTracer;

    fn tracer_with_scope(&self, scope: InstrumentationScope) -> Self::Tracer {
        self.get_or_create(scope)
    }
}

/// A long-lived [`Tracer`] handle that starts spans on whatever backend its
/// provider currently delegates to.
#[derive(Clone)]
pub struct ReconfigurableTracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    scope: InstrumentationScope,
    delegate: Arc<DelegateCell<DynTracerProvider>>,
    bound: Rebinding<BoxedTracer>,
}

impl ReconfigurableTracer {
    /// Instrumentation scope of this tracer.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.inner.scope
    }

    /// Returns `true` if both values are handles to the same tracer.
    pub fn ptr_eq(&self, other: &ReconfigurableTracer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn current(&self) -> Arc<Binding<BoxedTracer>> {
        let installed = self.inner.delegate.get();
        self.inner.bound.get_or_bind(installed.generation(), || {
            BoxedTracer::new(installed.provider().boxed_tracer(self.inner.scope.clone()))
        })
    }
}

impl fmt::Debug for ReconfigurableTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconfigurableTracer")
            .field("scope", &self.inner.scope)
            .finish()
    }
}

impl Tracer for ReconfigurableTracer {
    type Span = BoxedSpan;

    fn build_with_context(&self, builder: SpanBuilder, parent_cx: &Context) -> Self::Span {
        self.current().build_with_context(builder, parent_cx)
    }
}

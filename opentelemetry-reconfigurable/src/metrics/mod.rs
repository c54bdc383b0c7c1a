//! Reconfigurable metrics.
//!
//! [`ReconfigurableMeterProvider`] caches one [`ReconfigurableMeter`] per
//! instrumentation scope. Synchronous instruments created from it resolve
//! their backend instrument lazily and rebuild it after every delegate swap,
//! so a counter created at startup keeps counting into whichever pipeline is
//! current.
//!
//! Observable instruments are registered with each delegate in turn: their
//! callbacks are kept by the meter and replayed onto a new delegate as soon
//! as it is installed.
mod closeable;
mod noop;

pub use closeable::{CloseableMeterProvider, MeterPipeline};
pub use noop::NoopMeterProvider;

use crate::delegate::{Binding, DelegateCell, Installed, Rebinding};
use opentelemetry::metrics::{
    AsyncInstrument, AsyncInstrumentBuilder, Counter, Gauge, Histogram, HistogramBuilder,
    InstrumentBuilder, InstrumentProvider, Meter, MeterProvider, ObservableCounter,
    ObservableGauge, ObservableUpDownCounter, SyncInstrument, UpDownCounter,
};
use opentelemetry::{otel_debug, InstrumentationScope, KeyValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Meter provider installed as a delegate.
pub type DynMeterProvider = dyn MeterProvider + Send + Sync;

/// A [`MeterProvider`] whose backend can be replaced at runtime.
///
/// Cloning creates a new reference to the same provider.
#[derive(Clone)]
pub struct ReconfigurableMeterProvider {
    delegate: Arc<DelegateCell<DynMeterProvider>>,
    meters: Arc<Mutex<HashMap<InstrumentationScope, ReconfigurableMeter>>>,
}

impl Default for ReconfigurableMeterProvider {
    fn default() -> Self {
        ReconfigurableMeterProvider::new()
    }
}

impl ReconfigurableMeterProvider {
    /// Create a provider delegating to a [`NoopMeterProvider`].
    pub fn new() -> Self {
        ReconfigurableMeterProvider {
            delegate: Arc::new(DelegateCell::new(Arc::new(NoopMeterProvider::new()))),
            meters: Arc::default(),
        }
    }

    /// Returns the meter for `scope`, creating it on first use.
    pub fn get_or_create(&self, scope: InstrumentationScope) -> ReconfigurableMeter {
        let mut meters = self.meters.lock().unwrap_or_else(PoisonError::into_inner);
        meters
            .entry(scope)
            .or_insert_with_key(|scope| ReconfigurableMeter {
                inner: Arc::new(MeterInner {
                    scope: scope.clone(),
                    delegate: self.delegate.clone(),
                    bound: Rebinding::new(),
                    observables: Mutex::new(Observables::default()),
                }),
            })
            .clone()
    }

    /// Installs `provider` as the backend of every meter issued by this
    /// provider, returning the previous backend.
    pub fn set_delegate<P>(&self, provider: P) -> Arc<DynMeterProvider>
    where
        P: MeterProvider + Send + Sync + 'static,
    {
        self.set_dyn_delegate(Arc::new(provider))
    }

    /// Installs an already type-erased backend.
    ///
    /// Observable instruments of every meter are registered with the new
    /// backend before this returns.
    pub fn set_dyn_delegate(&self, provider: Arc<DynMeterProvider>) -> Arc<DynMeterProvider> {
        let previous = self.delegate.set(provider);
        let meters: Vec<ReconfigurableMeter> = self
            .meters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for meter in &meters {
            meter.inner.replay_observables();
        }
        otel_debug!(
            name: "ReconfigurableMeterProvider.DelegateSet",
            generation = self.delegate.get().generation(),
            meters = meters.len()
        );
        previous
    }

    /// Returns the currently installed backend.
    pub fn delegate(&self) -> Arc<Installed<DynMeterProvider>> {
        self.delegate.get()
    }
}

impl fmt::Debug for ReconfigurableMeterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconfigurableMeterProvider")
            .field("delegate", &self.delegate)
            .finish()
    }
}

impl MeterProvider for ReconfigurableMeterProvider {
    fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter {
        self.get_or_create(scope).meter()
    }
}

/// A long-lived meter whose instruments record into whatever backend its
/// provider currently delegates to.
#[derive(Clone)]
pub struct ReconfigurableMeter {
    inner: Arc<MeterInner>,
}

type Registration = dyn Fn(&Meter) + Send + Sync;

#[derive(Default)]
struct Observables {
    // generation the registrations were last replayed onto
    generation: Option<u64>,
    registrations: Vec<Arc<Registration>>,
}

struct MeterInner {
    scope: InstrumentationScope,
    delegate: Arc<DelegateCell<DynMeterProvider>>,
    bound: Rebinding<Meter>,
    observables: Mutex<Observables>,
}

impl MeterInner {
    fn current(&self) -> Arc<Binding<Meter>> {
        let installed = self.delegate.get();
        self.bound.get_or_bind(installed.generation(), || {
            installed.provider().meter_with_scope(self.scope.clone())
        })
    }

    /// Brings the registered observables up to date with the current
    /// delegate. Must be called with the observables lock held.
    fn sync_observables(&self, observables: &mut Observables) -> Arc<Binding<Meter>> {
        let meter = self.current();
        if observables.generation != Some(meter.generation()) {
            let delegate: &Meter = &meter;
            for register in &observables.registrations {
                register(delegate);
            }
            observables.generation = Some(meter.generation());
        }
        meter
    }

    fn replay_observables(&self) {
        let mut observables = self
            .observables
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.sync_observables(&mut observables);
    }

    fn register_observable(&self, register: Arc<Registration>) {
        let mut observables = self
            .observables
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let meter = self.sync_observables(&mut observables);
        let delegate: &Meter = &meter;
        register(delegate);
        observables.registrations.push(register);
    }
}

impl ReconfigurableMeter {
    /// Returns an API [`Meter`] backed by this handle.
    pub fn meter(&self) -> Meter {
        Meter::new(Arc::new(self.clone()))
    }

    /// Instrumentation scope of this meter.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.inner.scope
    }

    /// Returns `true` if both values are handles to the same meter.
    pub fn ptr_eq(&self, other: &ReconfigurableMeter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ReconfigurableMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconfigurableMeter")
            .field("scope", &self.inner.scope)
            .finish()
    }
}

/// Records a value on a backend synchronous instrument.
trait Measure<T>: Send + Sync {
    fn measure(&self, value: T, attributes: &[KeyValue]);
}

impl<T> Measure<T> for Counter<T> {
    fn measure(&self, value: T, attributes: &[KeyValue]) {
        self.add(value, attributes)
    }
}

impl<T> Measure<T> for UpDownCounter<T> {
    fn measure(&self, value: T, attributes: &[KeyValue]) {
        self.add(value, attributes)
    }
}

impl<T> Measure<T> for Gauge<T> {
    fn measure(&self, value: T, attributes: &[KeyValue]) {
        self.record(value, attributes)
    }
}

impl<T> Measure<T> for Histogram<T> {
    fn measure(&self, value: T, attributes: &[KeyValue]) {
        self.record(value, attributes)
    }
}

/// A synchronous instrument that rebuilds its backend instrument from the
/// current delegate meter after every swap.
struct RebindingInstrument<I> {
    meter: Arc<MeterInner>,
    build: Box<dyn Fn(&Meter) -> I + Send + Sync>,
    bound: Rebinding<I>,
}

impl<I> RebindingInstrument<I> {
    fn new<F>(meter: Arc<MeterInner>, build: F) -> Self
    where
        F: Fn(&Meter) -> I + Send + Sync + 'static,
    {
        RebindingInstrument {
            meter,
            build: Box::new(build),
            bound: Rebinding::new(),
        }
    }
}

impl<T, I> SyncInstrument<T> for RebindingInstrument<I>
where
    I: Measure<T>,
{
    fn measure(&self, measurement: T, attributes: &[KeyValue]) {
        let meter = self.meter.current();
        let delegate: &Meter = &meter;
        self.bound
            .get_or_bind(meter.generation(), || (self.build)(delegate))
            .measure(measurement, attributes)
    }
}

macro_rules! describe {
    ($builder:ident, $description:expr, $unit:expr) => {{
        let mut builder = $builder;
        if let Some(description) = $description {
            builder = builder.with_description(description.clone());
        }
        if let Some(unit) = $unit {
            builder = builder.with_unit(unit.clone());
        }
        builder
    }};
}

macro_rules! sync_instrument {
    ($method:ident, $instrument:ident, $value:ty) => {
        fn $method(&self, builder: InstrumentBuilder<'_, $instrument<$value>>) -> $instrument<$value> {
            let InstrumentBuilder {
                name,
                description,
                unit,
                ..
            } = builder;
            $instrument::new(Arc::new(RebindingInstrument::new(
                self.inner.clone(),
                move |meter: &Meter| {
                    let delegate = meter.$method(name.clone());
                    describe!(delegate, &description, &unit).build()
                },
            )))
        }
    };
}

macro_rules! histogram {
    ($method:ident, $value:ty) => {
        fn $method(&self, builder: HistogramBuilder<'_, Histogram<$value>>) -> Histogram<$value> {
            let HistogramBuilder {
                name,
                description,
                unit,
                boundaries,
                ..
            } = builder;
            Histogram::new(Arc::new(RebindingInstrument::new(
                self.inner.clone(),
                move |meter: &Meter| {
                    let mut delegate = meter.$method(name.clone());
                    if let Some(boundaries) = &boundaries {
                        delegate = delegate.with_boundaries(boundaries.clone());
                    }
                    describe!(delegate, &description, &unit).build()
                },
            )))
        }
    };
}

macro_rules! observable_instrument {
    ($method:ident, $instrument:ident, $value:ty) => {
        fn $method(
            &self,
            builder: AsyncInstrumentBuilder<'_, $instrument<$value>, $value>,
        ) -> $instrument<$value> {
            let AsyncInstrumentBuilder {
                name,
                description,
                unit,
                callbacks,
                ..
            } = builder;
            let callbacks = Arc::new(callbacks);
            self.inner.register_observable(Arc::new(move |meter: &Meter| {
                let callbacks = callbacks.clone();
                let delegate = meter.$method(name.clone()).with_callback(
                    move |observer: &dyn AsyncInstrument<$value>| {
                        callbacks.iter().for_each(|callback| callback(observer))
                    },
                );
                describe!(delegate, &description, &unit).build();
            }));
            $instrument::new()
        }
    };
}

impl InstrumentProvider for ReconfigurableMeter {
    sync_instrument!(u64_counter, Counter, u64);
    sync_instrument!(f64_counter, Counter, f64);
    sync_instrument!(i64_up_down_counter, UpDownCounter, i64);
    sync_instrument!(f64_up_down_counter, UpDownCounter, f64);
    sync_instrument!(u64_gauge, Gauge, u64);
    sync_instrument!(f64_gauge, Gauge, f64);
    sync_instrument!(i64_gauge, Gauge, i64);

    histogram!(f64_histogram, f64);
    histogram!(u64_histogram, u64);

    observable_instrument!(u64_observable_counter, ObservableCounter, u64);
    observable_instrument!(f64_observable_counter, ObservableCounter, f64);
    observable_instrument!(i64_observable_up_down_counter, ObservableUpDownCounter, i64);
    observable_instrument!(f64_observable_up_down_counter, ObservableUpDownCounter, f64);
    observable_instrument!(u64_observable_gauge, ObservableGauge, u64);
    observable_instrument!(i64_observable_gauge, ObservableGauge, i64);
    observable_instrument!(f64_observable_gauge, ObservableGauge, f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::Callback;

    /// Everything the recording backends saw, tagged with the backend label.
    #[derive(Clone, Default)]
    struct Recorder {
        measurements: Arc<Mutex<Vec<(&'static str, String, f64)>>>,
        gauges: Arc<Mutex<Vec<(&'static str, Option<String>, Callback<u64>)>>>,
    }

    impl Recorder {
        fn measurements(&self) -> Vec<(&'static str, String, f64)> {
            self.measurements.lock().unwrap().clone()
        }

        fn gauge_registrations(&self, label: &str) -> usize {
            let gauges = self.gauges.lock().unwrap();
            gauges.iter().filter(|(l, _, _)| *l == label).count()
        }

        fn observe(&self, label: &str) -> Vec<u64> {
            let observer = CollectingObserver::default();
            let instrument: &dyn AsyncInstrument<u64> = &observer;
            for (l, _, callback) in self.gauges.lock().unwrap().iter() {
                if *l == label {
                    callback(instrument);
                }
            }
            let observed = observer.values.lock().unwrap().clone();
            observed
        }
    }

    #[derive(Default)]
    struct CollectingObserver {
        values: Mutex<Vec<u64>>,
    }

    impl AsyncInstrument<u64> for CollectingObserver {
        fn observe(&self, measurement: u64, _attributes: &[KeyValue]) {
            self.values.lock().unwrap().push(measurement);
        }
    }

    struct RecordingMeterProvider {
        label: &'static str,
        recorder: Recorder,
    }

    impl MeterProvider for RecordingMeterProvider {
        fn meter_with_scope(&self, _scope: InstrumentationScope) -> Meter {
            Meter::new(Arc::new(RecordingInstruments {
                label: self.label,
                recorder: self.recorder.clone(),
            }))
        }
    }

    struct RecordingInstruments {
        label: &'static str,
        recorder: Recorder,
    }

    impl RecordingInstruments {
        fn instrument(&self, name: &str) -> Arc<RecordingInstrument> {
            Arc::new(RecordingInstrument {
                label: self.label,
                name: name.to_owned(),
                recorder: self.recorder.clone(),
            })
        }
    }

    impl InstrumentProvider for RecordingInstruments {
        fn u64_counter(&self, builder: InstrumentBuilder<'_, Counter<u64>>) -> Counter<u64> {
            Counter::new(self.instrument(&builder.name))
        }

        fn f64_histogram(&self, builder: HistogramBuilder<'_, Histogram<f64>>) -> Histogram<f64> {
            Histogram::new(self.instrument(&builder.name))
        }

        fn u64_observable_gauge(
            &self,
            builder: AsyncInstrumentBuilder<'_, ObservableGauge<u64>, u64>,
        ) -> ObservableGauge<u64> {
            let mut gauges = self.recorder.gauges.lock().unwrap();
            for callback in builder.callbacks {
                gauges.push((
                    self.label,
                    builder.unit.as_ref().map(|u| u.to_string()),
                    callback,
                ));
            }
            ObservableGauge::new()
        }
    }

    struct RecordingInstrument {
        label: &'static str,
        name: String,
        recorder: Recorder,
    }

    impl SyncInstrument<u64> for RecordingInstrument {
        fn measure(&self, measurement: u64, _attributes: &[KeyValue]) {
            self.recorder.measurements.lock().unwrap().push((
                self.label,
                self.name.clone(),
                measurement as f64,
            ));
        }
    }

    impl SyncInstrument<f64> for RecordingInstrument {
        fn measure(&self, measurement: f64, _attributes: &[KeyValue]) {
            self.recorder.measurements.lock().unwrap().push((
                self.label,
                self.name.clone(),
                measurement,
            ));
        }
    }

    fn recording(label: &'static str, recorder: &Recorder) -> RecordingMeterProvider {
        RecordingMeterProvider {
            label,
            recorder: recorder.clone(),
        }
    }

    #[test]
    fn same_scope_yields_same_meter() {
        let provider = ReconfigurableMeterProvider::new();
        let scope = InstrumentationScope::builder("build-server").build();

        let first = provider.get_or_create(scope.clone());
        provider.set_delegate(NoopMeterProvider::new());
        let second = provider.get_or_create(scope);
        let other = provider.get_or_create(InstrumentationScope::builder("other").build());

        assert!(first.ptr_eq(&second));
        assert!(!first.ptr_eq(&other));
        assert_eq!(first.scope().name(), "build-server");
    }

    #[test]
    fn measurements_before_any_delegate_are_dropped() {
        let provider = ReconfigurableMeterProvider::new();
        let counter = provider.meter("startup").u64_counter("jobs").build();
        counter.add(1, &[]);

        let recorder = Recorder::default();
        provider.set_delegate(recording("first", &recorder));
        assert!(recorder.measurements().is_empty());
    }

    #[test]
    fn instruments_follow_the_delegate() {
        let recorder = Recorder::default();
        let provider = ReconfigurableMeterProvider::new();
        let meter = provider.meter("build-server");
        let counter = meter.u64_counter("builds.started").build();
        let histogram = meter.f64_histogram("build.duration").build();

        provider.set_delegate(recording("first", &recorder));
        counter.add(2, &[]);
        histogram.record(1.5, &[KeyValue::new("result", "SUCCESS")]);

        provider.set_delegate(recording("second", &recorder));
        counter.add(3, &[]);

        assert_eq!(
            recorder.measurements(),
            vec![
                ("first", "builds.started".to_string(), 2.0),
                ("first", "build.duration".to_string(), 1.5),
                ("second", "builds.started".to_string(), 3.0),
            ]
        );
    }

    #[test]
    fn observable_callbacks_are_registered_on_every_delegate() {
        let recorder = Recorder::default();
        let provider = ReconfigurableMeterProvider::new();
        let _gauge = provider
            .meter("build-server")
            .u64_observable_gauge("executors.available")
            .with_unit("{executor}")
            .with_callback(|observer| observer.observe(4, &[]))
            .build();

        provider.set_delegate(recording("first", &recorder));
        provider.set_delegate(recording("second", &recorder));

        assert_eq!(recorder.gauge_registrations("first"), 1);
        assert_eq!(recorder.gauge_registrations("second"), 1);
        assert_eq!(recorder.observe("second"), vec![4]);

        let gauges = recorder.gauges.lock().unwrap();
        assert_eq!(gauges[1].1.as_deref(), Some("{executor}"));
    }

    #[test]
    fn observables_created_after_a_swap_register_once() {
        let recorder = Recorder::default();
        let provider = ReconfigurableMeterProvider::new();
        provider.set_delegate(recording("first", &recorder));

        let meter = provider.meter("build-server");
        let _queue = meter
            .u64_observable_gauge("queue.length")
            .with_callback(|observer| observer.observe(7, &[]))
            .build();
        let _agents = meter
            .u64_observable_gauge("agents.online")
            .with_callback(|observer| observer.observe(2, &[]))
            .build();

        assert_eq!(recorder.gauge_registrations("first"), 2);
        assert_eq!(recorder.observe("first"), vec![7, 2]);
    }
}

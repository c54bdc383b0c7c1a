use super::BufferedLogRecord;
use crate::delegate::{Binding, DelegateCell, Installed, Rebinding};
use opentelemetry::logs::{Logger, LoggerProvider, NoopLoggerProvider};
use opentelemetry::{otel_debug, InstrumentationScope};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Object safe view of a [`Logger`].
pub trait ObjectSafeLogger: Send + Sync {
    /// Emit `record` through this logger.
    fn emit_buffered(&self, record: BufferedLogRecord);
}

impl<L> ObjectSafeLogger for L
where
    L: Logger + Send + Sync,
{
    fn emit_buffered(&self, buffered: BufferedLogRecord) {
        let mut record = self.create_log_record();
        buffered.apply_to(&mut record);
        self.emit(record);
    }
}

/// Object safe view of a [`LoggerProvider`].
pub trait ObjectSafeLoggerProvider: Send + Sync {
    /// Returns a boxed logger for `scope`.
    fn boxed_logger(&self, scope: InstrumentationScope) -> Box<dyn ObjectSafeLogger>;
}

impl<P> ObjectSafeLoggerProvider for P
where
    P: LoggerProvider + Send + Sync,
    P::Logger: Send + Sync + 'static,
{
    fn boxed_logger(&self, scope: InstrumentationScope) -> Box<dyn ObjectSafeLogger> {
        Box::new(self.logger_with_scope(scope))
    }
}

/// Logger provider installed as a delegate.
pub type DynLoggerProvider = dyn ObjectSafeLoggerProvider + Send + Sync;

/// A [`LoggerProvider`] whose backend can be replaced at runtime.
///
/// Cloning creates a new reference to the same provider.
#[derive(Clone)]
pub struct ReconfigurableLoggerProvider {
    delegate: Arc<DelegateCell<DynLoggerProvider>>,
    loggers: Arc<Mutex<HashMap<InstrumentationScope, ReconfigurableLogger>>>,
}

impl Default for ReconfigurableLoggerProvider {
    fn default() -> Self {
        ReconfigurableLoggerProvider::new()
    }
}

impl ReconfigurableLoggerProvider {
    /// Create a provider delegating to a no-op logger provider.
    pub fn new() -> Self {
        ReconfigurableLoggerProvider {
            delegate: Arc::new(DelegateCell::new(Arc::new(NoopLoggerProvider::new()))),
            loggers: Arc::default(),
        }
    }

    /// Returns the logger for `scope`, creating it on first use.
    pub fn get_or_create(&self, scope: InstrumentationScope) -> ReconfigurableLogger {
        let mut loggers = self.loggers.lock().unwrap_or_else(PoisonError::into_inner);
        loggers
            .entry(scope)
            .or_insert_with_key(|scope| ReconfigurableLogger {
                inner: Arc::new(LoggerInner {
                    scope: scope.clone(),
                    delegate: self.delegate.clone(),
                    bound: Rebinding::new(),
                }),
            })
            .clone()
    }

    /// Installs `provider` as the backend of every logger issued by this
    /// provider, returning the previous backend.
    pub fn set_delegate<P>(&self, provider: P) -> Arc<DynLoggerProvider>
    where
        P: ObjectSafeLoggerProvider + 'static,
    {
        self.set_dyn_delegate(Arc::new(provider))
    }

    /// Installs an already type-erased backend.
    pub fn set_dyn_delegate(&self, provider: Arc<DynLoggerProvider>) -> Arc<DynLoggerProvider> {
        let previous = self.delegate.set(provider);
        otel_debug!(
            name: "ReconfigurableLoggerProvider.DelegateSet",
            generation = self.delegate.get().generation()
        );
        previous
    }

    /// Returns the currently installed backend.
    pub fn delegate(&self) -> Arc<Installed<DynLoggerProvider>> {
        self.delegate.get()
    }
}

impl fmt::Debug for ReconfigurableLoggerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconfigurableLoggerProvider")
            .field("delegate", &self.delegate)
            .finish()
    }
}

impl LoggerProvider for ReconfigurableLoggerProvider {
    type Logger = ReconfigurableLogger;

    fn logger_with_scope(&self, scope: InstrumentationScope) -> Self::Logger {
        self.get_or_create(scope)
    }
}

/// A long-lived [`Logger`] handle that emits through whatever backend its
/// provider currently delegates to.
#[derive(Clone)]
pub struct ReconfigurableLogger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    scope: InstrumentationScope,
    delegate: Arc<DelegateCell<DynLoggerProvider>>,
    bound: Rebinding<Box<dyn ObjectSafeLogger>>,
}

impl ReconfigurableLogger {
    /// Instrumentation scope of this logger.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.inner.scope
    }

    /// Returns `true` if both values are handles to the same logger.
    pub fn ptr_eq(&self, other: &ReconfigurableLogger) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn current(&self) -> Arc<Binding<Box<dyn ObjectSafeLogger>>> {
        let installed = self.inner.delegate.get();
        self.inner.bound.get_or_bind(installed.generation(), || {
            installed.provider().boxed_logger(self.inner.scope.clone())
        })
    }
}

impl fmt::Debug for ReconfigurableLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconfigurableLogger")
            .field("scope", &self.inner.scope)
            .finish()
    }
}

impl Logger for ReconfigurableLogger {
    type LogRecord = BufferedLogRecord;

    fn create_log_record(&self) -> Self::LogRecord {
        BufferedLogRecord::default()
    }

    fn emit(&self, record: Self::LogRecord) {
        self.current().emit_buffered(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::logs::{AnyValue, LogRecord, Severity};
    use opentelemetry_sdk::logs::{InMemoryLogExporter, SdkLoggerProvider};

    fn sdk_provider() -> (SdkLoggerProvider, InMemoryLogExporter) {
        let exporter = InMemoryLogExporter::default();
        let provider = SdkLoggerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    fn emitted_bodies(exporter: &InMemoryLogExporter) -> Vec<AnyValue> {
        exporter
            .get_emitted_logs()
            .unwrap()
            .into_iter()
            .filter_map(|log| log.record.body().cloned())
            .collect()
    }

    fn emit(logger: &ReconfigurableLogger, body: &'static str) {
        let mut record = logger.create_log_record();
        record.set_severity_number(Severity::Info);
        record.set_body(body.into());
        logger.emit(record);
    }

    #[test]
    fn same_scope_yields_same_logger() {
        let provider = ReconfigurableLoggerProvider::new();
        let first = provider.logger("build-server");
        provider.set_delegate(sdk_provider().0);
        let second = provider.logger("build-server");

        assert!(first.ptr_eq(&second));
        assert!(!first.ptr_eq(&provider.logger("other")));
    }

    #[test]
    fn records_before_any_delegate_are_dropped() {
        let provider = ReconfigurableLoggerProvider::new();
        let logger = provider.logger("startup");
        emit(&logger, "too early");

        let (sdk, exporter) = sdk_provider();
        provider.set_delegate(sdk);
        assert!(emitted_bodies(&exporter).is_empty());
    }

    #[test]
    fn existing_loggers_follow_the_delegate() {
        let provider = ReconfigurableLoggerProvider::new();
        let logger = provider.logger("pipeline");

        let (first_sdk, first_exporter) = sdk_provider();
        provider.set_delegate(first_sdk);
        emit(&logger, "first");
        assert_eq!(emitted_bodies(&first_exporter), vec![AnyValue::from("first")]);

        let (second_sdk, second_exporter) = sdk_provider();
        provider.set_delegate(second_sdk);
        emit(&logger, "second");

        assert_eq!(emitted_bodies(&second_exporter), vec![AnyValue::from("second")]);

        let logs = second_exporter.get_emitted_logs().unwrap();
        assert_eq!(logs[0].instrumentation.name(), "pipeline");
        assert_eq!(logs[0].record.severity_number(), Some(Severity::Info));
    }

    #[test]
    fn attributes_reach_the_backend() {
        let provider = ReconfigurableLoggerProvider::new();
        let (sdk, exporter) = sdk_provider();
        provider.set_delegate(sdk);

        let logger = provider.logger("pipeline");
        let mut record = logger.create_log_record();
        record.set_body("stage finished".into());
        record.add_attribute("stage", "deploy");
        logger.emit(record);

        let logs = exporter.get_emitted_logs().unwrap();
        let attributes: Vec<_> = logs[0]
            .record
            .attributes_iter()
            .map(|(k, v)| (k.as_str().to_owned(), v.clone()))
            .collect();
        assert_eq!(
            attributes,
            vec![("stage".to_string(), AnyValue::from("deploy"))]
        );
    }
}

use super::{
    BufferedLogRecord, DynLoggerProvider, ObjectSafeLoggerProvider, ReconfigurableLogger,
    ReconfigurableLoggerProvider,
};
use crate::delegate::Installed;
use opentelemetry::logs::{LogRecord, Logger};
use opentelemetry::InstrumentationScope;
use std::borrow::Cow;
use std::sync::Arc;

/// Issues event loggers whose backend can be replaced at runtime.
///
/// Events are log records carrying an event name. The provider keeps its own
/// delegate, separate from the one of [`ReconfigurableLoggerProvider`], so an
/// event backend can be installed independently of the log backend.
#[derive(Clone, Debug, Default)]
pub struct ReconfigurableEventLoggerProvider {
    loggers: ReconfigurableLoggerProvider,
}

impl ReconfigurableEventLoggerProvider {
    /// Create a provider delegating to a no-op logger provider.
    pub fn new() -> Self {
        ReconfigurableEventLoggerProvider::default()
    }

    /// Returns the event logger for `scope`, creating it on first use.
    pub fn get_or_create(&self, scope: InstrumentationScope) -> ReconfigurableEventLogger {
        ReconfigurableEventLogger {
            logger: self.loggers.get_or_create(scope),
        }
    }

    /// Returns the event logger for an unversioned scope called `name`.
    pub fn event_logger(&self, name: impl Into<Cow<'static, str>>) -> ReconfigurableEventLogger {
        self.get_or_create(InstrumentationScope::builder(name).build())
    }

    /// Installs `provider` as the backend of every event logger issued by
    /// this provider, returning the previous backend.
    pub fn set_delegate<P>(&self, provider: P) -> Arc<DynLoggerProvider>
    where
        P: ObjectSafeLoggerProvider + 'static,
    {
        self.loggers.set_delegate(provider)
    }

    /// Installs an already type-erased backend.
    pub fn set_dyn_delegate(&self, provider: Arc<DynLoggerProvider>) -> Arc<DynLoggerProvider> {
        self.loggers.set_dyn_delegate(provider)
    }

    /// Returns the currently installed backend.
    pub fn delegate(&self) -> Arc<Installed<DynLoggerProvider>> {
        self.loggers.delegate()
    }
}

/// A long-lived event logger handle.
#[derive(Clone, Debug)]
pub struct ReconfigurableEventLogger {
    logger: ReconfigurableLogger,
}

impl ReconfigurableEventLogger {
    /// Starts a record for the event `name`.
    pub fn create_event(&self, name: &'static str) -> BufferedLogRecord {
        let mut record = self.logger.create_log_record();
        record.set_event_name(name);
        record
    }

    /// Emits an event through the current backend.
    pub fn emit(&self, event: BufferedLogRecord) {
        self.logger.emit(event)
    }

    /// Instrumentation scope of this event logger.
    pub fn scope(&self) -> &InstrumentationScope {
        self.logger.scope()
    }

    /// Returns `true` if both values are handles to the same event logger.
    pub fn ptr_eq(&self, other: &ReconfigurableEventLogger) -> bool {
        self.logger.ptr_eq(&other.logger)
    }
}

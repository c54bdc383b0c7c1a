//! Reconfigurable logs and events.
//!
//! The logs API is generic over the record type of each backend, which rules
//! out trait objects. Handles here produce [`BufferedLogRecord`]s instead and
//! copy them into a record of the current backend on emit, through the object
//! safe [`ObjectSafeLogger`] and [`ObjectSafeLoggerProvider`] traits.
mod event;
mod logger;
mod record;

pub use event::{ReconfigurableEventLogger, ReconfigurableEventLoggerProvider};
pub use logger::{
    DynLoggerProvider, ObjectSafeLogger, ObjectSafeLoggerProvider, ReconfigurableLogger,
    ReconfigurableLoggerProvider,
};
pub use record::BufferedLogRecord;

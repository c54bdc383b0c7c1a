//! # OpenTelemetry Reconfigurable
//!
//! Long-lived tracer, meter and logger handles whose telemetry backend can be
//! replaced while the process runs.
//!
//! Components of a long running process typically acquire a tracer or a meter
//! once and keep it. [`ReconfigurableTelemetry`] hands out providers whose
//! handles never need to be fetched again: every operation on a handle is
//! routed through the backend that is live at the time of the call, and
//! [`configure`](ReconfigurableTelemetry::configure) swaps that backend for
//! all handles at once.
//!
//! ```no_run
//! use opentelemetry::trace::{Tracer, TracerProvider};
//! use opentelemetry_reconfigurable::ReconfigurableTelemetry;
//! use opentelemetry_sdk::Resource;
//! use std::collections::HashMap;
//!
//! let telemetry = ReconfigurableTelemetry::builder().build();
//! let tracer = telemetry.tracer_provider().tracer("my-component");
//!
//! // Spans are inert until the first configuration.
//! tracer.in_span("startup", |_cx| {});
//!
//! let mut properties = HashMap::new();
//! properties.insert("otel.traces.exporter".to_string(), "otlp".to_string());
//! telemetry.configure(properties, Resource::builder_empty().build())?;
//!
//! // The same tracer now records through the configured backend.
//! tracer.in_span("work", |_cx| {});
//! # Ok::<(), opentelemetry_reconfigurable::ConfigureError>(())
//! ```
//!
//! Configuring without any exporter property disables telemetry: every
//! handle becomes a no-op until the next configuration.
//!
//! ## Crate Feature Flags
//!
//! * `internal-logs`: enabled by default. Emits the crate's own diagnostics,
//!   such as backend swaps and shutdown timeouts, as `tracing` events.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/open-telemetry/opentelemetry-rust/main/assets/logo.svg"
)]

pub mod backend;
pub mod config;
pub mod delegate;
mod error;
pub mod global;
pub mod lifecycle;
pub mod logs;
pub mod metrics;
pub mod propagation;
pub mod resource;
mod telemetry;
mod timeout;
pub mod trace;

pub use config::ConfigProperties;
pub use error::{ConfigureError, ConfigureResult};
pub use lifecycle::LifecycleObserver;
pub use telemetry::{
    PropertiesCustomizer, ReconfigurableTelemetry, ReconfigurableTelemetryBuilder,
    ResourceCustomizer, TelemetryState, SDK_DISABLED,
};

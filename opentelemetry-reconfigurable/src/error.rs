//! Errors raised by the administrative side of reconfigurable telemetry.
//!
//! Telemetry emission (starting spans, recording measurements, emitting log
//! records) never returns errors; only [`configure`] and the diagnostic
//! accessors do.
//!
//! [`configure`]: crate::ReconfigurableTelemetry::configure
use thiserror::Error;

/// Errors returned when configuring or inspecting [`ReconfigurableTelemetry`].
///
/// [`ReconfigurableTelemetry`]: crate::ReconfigurableTelemetry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigureError {
    /// A configuration property could not be interpreted.
    #[error("invalid value {value:?} for property `{key}`: {reason}")]
    InvalidProperty {
        /// Normalized property key.
        key: String,
        /// Raw property value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The backend factory failed to construct a backend.
    #[error("failed to build telemetry backend: {0}")]
    Backend(String),

    /// The resource or config snapshot was read before the first successful
    /// call to `configure`.
    #[error("telemetry has not been configured yet")]
    NotConfigured,

    /// The telemetry instance received its final shutdown and can no longer
    /// be configured.
    #[error("telemetry has been shut down")]
    Closed,
}

impl ConfigureError {
    pub(crate) fn invalid_property(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigureError::InvalidProperty {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigureResult<T> = Result<T, ConfigureError>;

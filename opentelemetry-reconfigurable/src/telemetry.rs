//! The configuration orchestrator.
//!
//! [`ReconfigurableTelemetry`] owns the four reconfigurable providers and the
//! backend currently installed behind them. Each call to
//! [`configure`](ReconfigurableTelemetry::configure) builds a replacement
//! backend, retires the live one and swaps every provider's delegate.
//!
//! The lifecycle state, the resource and the config snapshot are readable
//! without taking the administrative lock, so lifecycle observers may inspect
//! the instance while it is being reconfigured.
use crate::backend::{
    selects_exporter, BackendFactory, NoopBackend, SdkBackendFactory, TelemetryBackend,
};
use crate::config::ConfigProperties;
use crate::error::{ConfigureError, ConfigureResult};
use crate::global;
use crate::lifecycle::{LifecycleObserver, Observers};
use crate::logs::{ReconfigurableEventLoggerProvider, ReconfigurableLoggerProvider};
use crate::metrics::{
    CloseableMeterProvider, DynMeterProvider, NoopMeterProvider, ReconfigurableMeterProvider,
};
use crate::propagation::{self, DynTextMapPropagator, ReconfigurablePropagator};
use crate::resource::{display_resource, merge_resource};
use crate::timeout::run_with_timeout;
use crate::trace::ReconfigurableTracerProvider;
use arc_swap::{ArcSwap, ArcSwapOption};
use opentelemetry::{otel_debug, otel_info, otel_warn};
use opentelemetry_sdk::Resource;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Property that disables telemetry regardless of exporter selection.
pub const SDK_DISABLED: &str = "otel.sdk.disabled";

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Returns additional properties for a resolved configuration. Returned
/// properties override the resolved ones.
pub type PropertiesCustomizer =
    Box<dyn Fn(&ConfigProperties) -> HashMap<String, String> + Send + Sync>;

/// Rewrites the merged resource of a configured backend.
pub type ResourceCustomizer = Box<dyn Fn(&ConfigProperties, Resource) -> Resource + Send + Sync>;

/// Lifecycle state of a [`ReconfigurableTelemetry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TelemetryState {
    /// `configure` was never called. Every signal is a no-op.
    Uninitialized,
    /// Telemetry is disabled. Every signal is a no-op.
    NoOp,
    /// A backend built from the configuration is live.
    Configured,
    /// The last backend was closed; waiting for the next `configure`.
    Pending,
    /// Final shutdown happened. The instance cannot be configured again.
    Closed,
}

struct Snapshot {
    config: ConfigProperties,
    resource: Resource,
}

struct Replacement {
    backend: Arc<dyn TelemetryBackend>,
    propagator: Arc<DynTextMapPropagator>,
    config: ConfigProperties,
    resource: Resource,
    state: TelemetryState,
}

struct LiveBackend {
    backend: Arc<dyn TelemetryBackend>,
    meter_provider: Arc<CloseableMeterProvider>,
}

struct Admin {
    live: Option<LiveBackend>,
}

/// Long-lived telemetry providers whose backend is replaced on every
/// [`configure`](Self::configure).
///
/// Tracers, meters and loggers obtained from the providers of this instance
/// stay valid across reconfiguration and always use the live backend.
///
/// Administrative operations (`configure`, `close`, `shutdown`) are
/// serialized. Telemetry emission never waits on them.
pub struct ReconfigurableTelemetry {
    tracer_provider: ReconfigurableTracerProvider,
    meter_provider: ReconfigurableMeterProvider,
    logger_provider: ReconfigurableLoggerProvider,
    event_logger_provider: ReconfigurableEventLoggerProvider,
    propagator: ReconfigurablePropagator,
    factory: Arc<dyn BackendFactory>,
    observers: Observers,
    properties_customizers: Vec<PropertiesCustomizer>,
    resource_customizers: Vec<ResourceCustomizer>,
    read_environment: bool,
    shutdown_timeout: Duration,
    admin: Mutex<Admin>,
    state: ArcSwap<TelemetryState>,
    snapshot: ArcSwapOption<Snapshot>,
}

impl ReconfigurableTelemetry {
    /// Create a [`ReconfigurableTelemetryBuilder`].
    pub fn builder() -> ReconfigurableTelemetryBuilder {
        ReconfigurableTelemetryBuilder::default()
    }

    /// Applies a new configuration.
    ///
    /// A backend is built by the backend factory only if `properties` itself
    /// selects an exporter (see [`EXPORTER_KEYS`](crate::backend::EXPORTER_KEYS)).
    /// Otherwise, or when `otel.sdk.disabled` is `true`, telemetry is
    /// disabled: an empty map always turns telemetry off. The values the
    /// backend is built from are `properties` resolved on top of the `OTEL_*`
    /// environment, then adjusted by the properties customizers.
    ///
    /// The replacement is built before the live backend is retired: if
    /// building fails, the error is returned and the live backend stays in
    /// place untouched.
    pub fn configure(
        &self,
        properties: HashMap<String, String>,
        resource: Resource,
    ) -> ConfigureResult<()> {
        let mut admin = self.admin.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() == TelemetryState::Closed {
            return Err(ConfigureError::Closed);
        }

        let selected = selects_exporter(
            &ConfigProperties::builder()
                .with_property_map(&properties)
                .build(),
        );
        let config = self.resolve_config(&properties);
        let disabled = config.get_bool(SDK_DISABLED)?.unwrap_or(false);
        let Replacement {
            backend,
            propagator,
            config,
            resource,
            state,
        } = if !disabled && selected {
            let resource = self.resolve_resource(&config, &resource)?;
            let propagator = propagation::propagator_from_config(&config)?;
            let backend = self.factory.create(&config, &resource)?;
            Replacement {
                backend: Arc::from(backend),
                propagator: Arc::new(propagator),
                config,
                resource,
                state: TelemetryState::Configured,
            }
        } else {
            Replacement {
                backend: Arc::new(NoopBackend::new()),
                propagator: Arc::new(propagation::inert()),
                config: ConfigProperties::empty(),
                resource: Resource::builder().build(),
                state: TelemetryState::NoOp,
            }
        };

        self.retire(&mut admin);
        self.install(&mut admin, backend, propagator, state);
        let snapshot = Arc::new(Snapshot { config, resource });
        self.snapshot.store(Some(snapshot.clone()));
        let Snapshot { config, resource } = snapshot.as_ref();
        self.observers.after_sdk_initialized(config, resource);

        if state == TelemetryState::Configured {
            otel_info!(
                name: "ReconfigurableTelemetry.Configured",
                config = format!("{config}"),
                resource = display_resource(resource)
            );
        } else {
            otel_info!(
                name: "ReconfigurableTelemetry.ConfiguredAsNoop",
                disabled = disabled,
                resource = display_resource(resource)
            );
        }
        Ok(())
    }

    /// Retires the live backend without building a replacement.
    ///
    /// Observers are notified, the backend is shut down within the shutdown
    /// timeout, and every provider falls back to a no-op until the next
    /// `configure`. Closing when nothing is live does nothing.
    pub fn close(&self) {
        let mut admin = self.admin.lock().unwrap_or_else(PoisonError::into_inner);
        self.close_locked(&mut admin);
    }

    /// Final teardown: closes the live backend, unregisters this instance if
    /// it is the process-wide one, and rejects any later `configure`.
    pub fn shutdown(&self) {
        let mut admin = self.admin.lock().unwrap_or_else(PoisonError::into_inner);
        self.close_locked(&mut admin);
        self.state.store(Arc::new(TelemetryState::Closed));
        drop(admin);
        global::uninstall_if(self);
        otel_debug!(name: "ReconfigurableTelemetry.Shutdown");
    }

    /// Resource of the last configuration.
    ///
    /// Fails with [`ConfigureError::NotConfigured`] before the first
    /// successful `configure`.
    pub fn resource(&self) -> ConfigureResult<Resource> {
        self.snapshot
            .load()
            .as_ref()
            .map(|snapshot| snapshot.resource.clone())
            .ok_or(ConfigureError::NotConfigured)
    }

    /// Configuration snapshot of the last configuration.
    ///
    /// Fails with [`ConfigureError::NotConfigured`] before the first
    /// successful `configure`.
    pub fn config(&self) -> ConfigureResult<ConfigProperties> {
        self.snapshot
            .load()
            .as_ref()
            .map(|snapshot| snapshot.config.clone())
            .ok_or(ConfigureError::NotConfigured)
    }

    /// Current lifecycle state. Never blocks.
    pub fn state(&self) -> TelemetryState {
        **self.state.load()
    }

    /// The reconfigurable tracer provider.
    pub fn tracer_provider(&self) -> &ReconfigurableTracerProvider {
        &self.tracer_provider
    }

    /// The reconfigurable meter provider.
    pub fn meter_provider(&self) -> &ReconfigurableMeterProvider {
        &self.meter_provider
    }

    /// The reconfigurable logger provider.
    pub fn logger_provider(&self) -> &ReconfigurableLoggerProvider {
        &self.logger_provider
    }

    /// The reconfigurable event logger provider.
    pub fn event_logger_provider(&self) -> &ReconfigurableEventLoggerProvider {
        &self.event_logger_provider
    }

    /// The context propagators selected by `otel.propagators`.
    ///
    /// Propagation is off until the first configuration that selects an
    /// exporter, and while telemetry is disabled or closed.
    pub fn propagator(&self) -> &ReconfigurablePropagator {
        &self.propagator
    }

    fn resolve_config(&self, properties: &HashMap<String, String>) -> ConfigProperties {
        let mut builder = ConfigProperties::builder();
        if self.read_environment {
            builder = builder.with_environment();
        }
        let mut config = builder.with_property_map(properties).build();
        for customizer in &self.properties_customizers {
            let overrides = customizer(&config);
            config = ConfigProperties::builder()
                .with_properties(config.iter())
                .with_property_map(&overrides)
                .build();
        }
        config
    }

    fn resolve_resource(
        &self,
        config: &ConfigProperties,
        explicit: &Resource,
    ) -> ConfigureResult<Resource> {
        let merged = merge_resource(config, explicit)?;
        Ok(self
            .resource_customizers
            .iter()
            .fold(merged, |resource, customizer| customizer(config, resource)))
    }

    fn close_locked(&self, admin: &mut Admin) {
        if admin.live.is_none() {
            otel_debug!(name: "ReconfigurableTelemetry.NothingToClose");
            return;
        }
        self.retire(admin);
        self.install_delegates(
            &NoopBackend::new(),
            Arc::new(NoopMeterProvider::new()),
            Arc::new(propagation::inert()),
        );
        if self.state() != TelemetryState::Closed {
            self.state.store(Arc::new(TelemetryState::Pending));
        }
    }

    /// Notifies observers then shuts the live backend down, waiting at most
    /// the shutdown timeout for each of the metrics pipeline and the rest.
    fn retire(&self, admin: &mut Admin) {
        let Some(live) = admin.live.take() else {
            return;
        };
        self.observers.before_sdk_shutdown();

        // Failures are logged by the wrapper.
        let _ = live.meter_provider.close();

        let backend = live.backend;
        let result = run_with_timeout("Backend.Shutdown", self.shutdown_timeout, move || {
            backend.shutdown()
        });
        if let Err(err) = result {
            otel_warn!(
                name: "ReconfigurableTelemetry.ShutdownFailed",
                error = format!("{err}"),
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                message = "Previous telemetry backend did not shut down cleanly; proceeding with reconfiguration."
            );
        }
    }

    fn install(
        &self,
        admin: &mut Admin,
        backend: Arc<dyn TelemetryBackend>,
        propagator: Arc<DynTextMapPropagator>,
        state: TelemetryState,
    ) {
        let meter_provider = Arc::new(CloseableMeterProvider::new(
            backend.meter_provider(),
            self.shutdown_timeout,
        ));
        self.install_delegates(backend.as_ref(), meter_provider.clone(), propagator);
        admin.live = Some(LiveBackend {
            backend,
            meter_provider,
        });
        self.state.store(Arc::new(state));
    }

    fn install_delegates(
        &self,
        backend: &dyn TelemetryBackend,
        meter_provider: Arc<DynMeterProvider>,
        propagator: Arc<DynTextMapPropagator>,
    ) {
        self.tracer_provider
            .set_dyn_delegate(backend.tracer_provider());
        self.meter_provider.set_dyn_delegate(meter_provider);
        self.logger_provider
            .set_dyn_delegate(backend.logger_provider());
        self.event_logger_provider
            .set_dyn_delegate(backend.event_logger_provider());
        self.propagator.set_dyn_delegate(propagator);
    }
}

impl fmt::Debug for ReconfigurableTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconfigurableTelemetry")
            .field("state", &self.state())
            .field("observers", &self.observers)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

/// Builder for [`ReconfigurableTelemetry`].
pub struct ReconfigurableTelemetryBuilder {
    factory: Option<Arc<dyn BackendFactory>>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    properties_customizers: Vec<PropertiesCustomizer>,
    resource_customizers: Vec<ResourceCustomizer>,
    read_environment: bool,
    shutdown_timeout: Duration,
    install_global: bool,
}

impl Default for ReconfigurableTelemetryBuilder {
    fn default() -> Self {
        ReconfigurableTelemetryBuilder {
            factory: None,
            observers: Vec::new(),
            properties_customizers: Vec::new(),
            resource_customizers: Vec::new(),
            read_environment: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            install_global: false,
        }
    }
}

impl ReconfigurableTelemetryBuilder {
    /// Backend factory used when a configuration selects an exporter.
    /// Defaults to an [`SdkBackendFactory`] without customizers.
    pub fn with_backend_factory<F>(mut self, factory: F) -> Self
    where
        F: BackendFactory + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Register an observer notified around backend replacement.
    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: LifecycleObserver + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Register a properties customizer. Customizers run in registration
    /// order, each seeing the output of the previous one.
    pub fn with_properties_customizer<F>(mut self, customizer: F) -> Self
    where
        F: Fn(&ConfigProperties) -> HashMap<String, String> + Send + Sync + 'static,
    {
        self.properties_customizers.push(Box::new(customizer));
        self
    }

    /// Register a resource customizer. Customizers run in registration
    /// order, after the explicit resource was merged.
    pub fn with_resource_customizer<F>(mut self, customizer: F) -> Self
    where
        F: Fn(&ConfigProperties, Resource) -> Resource + Send + Sync + 'static,
    {
        self.resource_customizers.push(Box::new(customizer));
        self
    }

    /// Whether `OTEL_*` environment variables are part of every configuration.
    /// Defaults to `true`.
    pub fn with_environment(mut self, read_environment: bool) -> Self {
        self.read_environment = read_environment;
        self
    }

    /// Maximum time to wait for each part of a retired backend to shut down.
    /// Defaults to one second.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Register the built instance as the process-wide one, see
    /// [`global::install`].
    pub fn with_global_install(mut self, install_global: bool) -> Self {
        self.install_global = install_global;
        self
    }

    /// Create the instance. Every signal is a no-op until the first
    /// `configure`.
    pub fn build(self) -> Arc<ReconfigurableTelemetry> {
        let telemetry = Arc::new(ReconfigurableTelemetry {
            tracer_provider: ReconfigurableTracerProvider::new(),
            meter_provider: ReconfigurableMeterProvider::new(),
            logger_provider: ReconfigurableLoggerProvider::new(),
            event_logger_provider: ReconfigurableEventLoggerProvider::new(),
            propagator: ReconfigurablePropagator::new(),
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(SdkBackendFactory::new())),
            observers: Observers::new(self.observers),
            properties_customizers: self.properties_customizers,
            resource_customizers: self.resource_customizers,
            read_environment: self.read_environment,
            shutdown_timeout: self.shutdown_timeout,
            admin: Mutex::new(Admin { live: None }),
            state: ArcSwap::from_pointee(TelemetryState::Uninitialized),
            snapshot: ArcSwapOption::empty(),
        });
        if self.install_global {
            global::install(telemetry.clone());
        }
        telemetry
    }
}

impl fmt::Debug for ReconfigurableTelemetryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconfigurableTelemetryBuilder")
            .field("observers", &self.observers.len())
            .field("read_environment", &self.read_environment)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("install_global", &self.install_global)
            .finish()
    }
}

//! Hooks for collaborators that cache state tied to the live backend.
use crate::config::ConfigProperties;
use opentelemetry::otel_debug;
use opentelemetry_sdk::Resource;
use std::fmt;
use std::sync::Arc;

/// Notified around backend replacement.
///
/// Observers run on the thread calling
/// [`configure`](crate::ReconfigurableTelemetry::configure) or
/// [`close`](crate::ReconfigurableTelemetry::close), in ascending
/// `(ordinal, name)` order.
pub trait LifecycleObserver: Send + Sync {
    /// Called before the live backend is shut down, while it still accepts
    /// telemetry. Flush cached aggregations here.
    fn before_sdk_shutdown(&self) {}

    /// Called once a new backend is live.
    fn after_sdk_initialized(&self, _config: &ConfigProperties, _resource: &Resource) {}

    /// Sort key. Lower values are notified first.
    fn ordinal(&self) -> i32 {
        0
    }

    /// Tie breaker for observers sharing an ordinal.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Observers in notification order.
#[derive(Clone, Default)]
pub(crate) struct Observers {
    sorted: Vec<Arc<dyn LifecycleObserver>>,
}

impl Observers {
    pub(crate) fn new(mut observers: Vec<Arc<dyn LifecycleObserver>>) -> Self {
        observers.sort_by(|a, b| {
            a.ordinal()
                .cmp(&b.ordinal())
                .then_with(|| a.name().cmp(b.name()))
        });
        Observers { sorted: observers }
    }

    pub(crate) fn before_sdk_shutdown(&self) {
        otel_debug!(
            name: "ReconfigurableTelemetry.NotifyBeforeShutdown",
            observers = format!("{:?}", self.names())
        );
        for observer in &self.sorted {
            observer.before_sdk_shutdown();
        }
    }

    pub(crate) fn after_sdk_initialized(&self, config: &ConfigProperties, resource: &Resource) {
        otel_debug!(
            name: "ReconfigurableTelemetry.NotifyAfterInitialized",
            observers = format!("{:?}", self.names())
        );
        for observer in &self.sorted {
            observer.after_sdk_initialized(config, resource);
        }
    }

    pub(crate) fn names(&self) -> Vec<&str> {
        self.sorted.iter().map(|o| o.name()).collect()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Named {
        name: &'static str,
        ordinal: i32,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl LifecycleObserver for Named {
        fn before_sdk_shutdown(&self) {
            self.calls.lock().unwrap().push(format!("before:{}", self.name));
        }

        fn after_sdk_initialized(&self, _config: &ConfigProperties, _resource: &Resource) {
            self.calls.lock().unwrap().push(format!("after:{}", self.name));
        }

        fn ordinal(&self) -> i32 {
            self.ordinal
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    struct Defaults;

    impl LifecycleObserver for Defaults {}

    #[test]
    fn notified_by_ordinal_then_name() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let observer = |name, ordinal| -> Arc<dyn LifecycleObserver> {
            Arc::new(Named {
                name,
                ordinal,
                calls: calls.clone(),
            })
        };
        let observers = Observers::new(vec![
            observer("queue-metrics", 10),
            observer("build-metrics", 10),
            observer("agent-metrics", -5),
        ]);

        observers.before_sdk_shutdown();
        observers.after_sdk_initialized(&ConfigProperties::empty(), &Resource::builder_empty().build());

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "before:agent-metrics",
                "before:build-metrics",
                "before:queue-metrics",
                "after:agent-metrics",
                "after:build-metrics",
                "after:queue-metrics",
            ]
        );
    }

    #[test]
    fn default_hooks_do_nothing() {
        let observer: Arc<dyn LifecycleObserver> = Arc::new(Defaults);
        let observers = Observers::new(vec![observer]);
        observers.before_sdk_shutdown();
        assert_eq!(observers.names().len(), 1);
        assert!(observers.names()[0].ends_with("Defaults"));
    }
}

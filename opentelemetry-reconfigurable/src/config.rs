//! Resolved configuration snapshot.
//!
//! [`ConfigProperties`] is the immutable view of the configuration a backend
//! was built from. Keys are normalized so that environment variable spelling
//! (`OTEL_TRACES_EXPORTER`) and property spelling (`otel.traces.exporter`)
//! address the same entry.
use crate::error::{ConfigureError, ConfigureResult};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Prefix of environment variables picked up by [`ConfigPropertiesBuilder::with_environment`].
const ENV_PREFIX: &str = "OTEL_";

/// Keys whose values are never rendered by [`ConfigProperties`]'s `Display`.
const MASKED_KEY_FRAGMENTS: [&str; 3] = ["headers", "password", "token"];

/// Normalize a configuration key: trimmed, lower case, with `_` and `-`
/// replaced by `.`.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace(['_', '-'], ".")
}

/// Immutable mapping of resolved configuration keys to values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConfigProperties {
    properties: BTreeMap<String, String>,
}

impl ConfigProperties {
    /// A snapshot without any property.
    pub fn empty() -> Self {
        ConfigProperties::default()
    }

    /// Create a [`ConfigPropertiesBuilder`].
    pub fn builder() -> ConfigPropertiesBuilder {
        ConfigPropertiesBuilder::default()
    }

    /// Returns the raw value of `key`, treating blank values as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(&normalize_key(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Returns `true` if `key` has a non blank value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Parses `key` as a boolean (`true` / `false`, case insensitive).
    pub fn get_bool(&self, key: &str) -> ConfigureResult<Option<bool>> {
        self.parse(key, |value| {
            if value.eq_ignore_ascii_case("true") {
                Ok(true)
            } else if value.eq_ignore_ascii_case("false") {
                Ok(false)
            } else {
                Err("expected `true` or `false`".to_string())
            }
        })
    }

    /// Parses `key` as a floating point number.
    pub fn get_f64(&self, key: &str) -> ConfigureResult<Option<f64>> {
        self.parse(key, |value| {
            value
                .parse::<f64>()
                .map_err(|err| format!("expected a number: {err}"))
        })
    }

    /// Parses `key` as a duration such as `500ms`, `10s`, `1m`, `2h` or `1d`.
    /// Values without a unit are milliseconds.
    pub fn get_duration(&self, key: &str) -> ConfigureResult<Option<Duration>> {
        self.parse(key, parse_duration)
    }

    /// Splits `key` on commas, dropping blank entries.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parses `key` as a `k1=v1,k2=v2` map.
    pub fn get_map(&self, key: &str) -> ConfigureResult<Vec<(String, String)>> {
        let Some(value) = self.get(key) else {
            return Ok(Vec::new());
        };
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) if !k.trim().is_empty() => {
                    Ok((k.trim().to_owned(), v.trim().to_owned()))
                }
                _ => Err(ConfigureError::invalid_property(
                    normalize_key(key),
                    value,
                    format!("map entry `{entry}` is not of the form key=value"),
                )),
            })
            .collect()
    }

    /// Iterates over all properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns `true` if there are no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    fn parse<T>(
        &self,
        key: &str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> ConfigureResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => parse(value)
                .map(Some)
                .map_err(|reason| ConfigureError::invalid_property(normalize_key(key), value, reason)),
        }
    }
}

impl fmt::Debug for ConfigProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigProperties")
            .field("len", &self.properties.len())
            .finish()
    }
}

/// Renders the properties as a sorted `{key=value, ...}` listing, masking
/// values of credential-like keys.
impl fmt::Display for ConfigProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if MASKED_KEY_FRAGMENTS.iter().any(|m| key.contains(m)) {
                write!(f, "{key}=***")?;
            } else {
                write!(f, "{key}={value}")?;
            }
        }
        f.write_str("}")
    }
}

/// Builder for [`ConfigProperties`]. Later sources override earlier ones.
#[derive(Debug, Default)]
pub struct ConfigPropertiesBuilder {
    properties: BTreeMap<String, String>,
}

impl ConfigPropertiesBuilder {
    /// Adds every `OTEL_*` variable of the process environment.
    pub fn with_environment(self) -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .filter(|(k, _)| k.starts_with(ENV_PREFIX));
        self.with_properties(vars)
    }

    /// Adds the given properties, normalizing their keys.
    pub fn with_properties<I, K, V>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in properties {
            self.properties
                .insert(normalize_key(key.as_ref()), value.into());
        }
        self
    }

    /// Adds the given map of properties.
    pub fn with_property_map(self, properties: &HashMap<String, String>) -> Self {
        self.with_properties(properties.iter().map(|(k, v)| (k, v.clone())))
    }

    /// Creates the snapshot.
    pub fn build(self) -> ConfigProperties {
        ConfigProperties {
            properties: self.properties,
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| "expected a duration such as `500ms` or `10s`".to_string())?;
    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 60 * 60)),
        "d" => Ok(Duration::from_secs(amount * 60 * 60 * 24)),
        other => Err(format!("unknown duration unit `{other}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn keys_are_normalized() {
        let config = ConfigProperties::builder()
            .with_properties([("OTEL_TRACES_EXPORTER", "otlp"), ("otel-service-name", "ci")])
            .build();

        assert_eq!(config.get("otel.traces.exporter"), Some("otlp"));
        assert_eq!(config.get("OTEL_SERVICE_NAME"), Some("ci"));
        assert!(config.contains_key("otel.service.name"));
    }

    #[test]
    fn later_sources_override_earlier_ones() {
        let config = ConfigProperties::builder()
            .with_properties([("otel.traces.exporter", "none")])
            .with_properties([("OTEL_TRACES_EXPORTER", "otlp")])
            .build();
        assert_eq!(config.get("otel.traces.exporter"), Some("otlp"));
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn environment_is_a_fallback_for_explicit_properties() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("http://env:4317")),
                ("OTEL_METRIC_EXPORT_INTERVAL", Some("5000")),
                ("NOT_OTEL", Some("ignored")),
            ],
            || {
                let config = ConfigProperties::builder()
                    .with_environment()
                    .with_properties([("otel.exporter.otlp.endpoint", "http://props:4317")])
                    .build();

                assert_eq!(
                    config.get("otel.exporter.otlp.endpoint"),
                    Some("http://props:4317")
                );
                assert_eq!(
                    config.get_duration("otel.metric.export.interval").unwrap(),
                    Some(Duration::from_secs(5))
                );
                assert_eq!(config.get("not.otel"), None);
            },
        );
    }

    #[test]
    fn blank_values_are_absent() {
        let config = ConfigProperties::builder()
            .with_properties([("otel.traces.exporter", "  ")])
            .build();
        assert_eq!(config.get("otel.traces.exporter"), None);
        assert!(!config.contains_key("otel.traces.exporter"));
        assert_eq!(config.get_bool("otel.traces.exporter").unwrap(), None);
    }

    #[rstest]
    #[case("250", Duration::from_millis(250))]
    #[case("250ms", Duration::from_millis(250))]
    #[case("10s", Duration::from_secs(10))]
    #[case("2m", Duration::from_secs(120))]
    #[case("1h", Duration::from_secs(3600))]
    #[case("1d", Duration::from_secs(86_400))]
    fn durations(#[case] raw: &str, #[case] expected: Duration) {
        let config = ConfigProperties::builder()
            .with_properties([("otel.bsp.schedule.delay", raw)])
            .build();
        assert_eq!(
            config.get_duration("otel.bsp.schedule.delay").unwrap(),
            Some(expected)
        );
    }

    #[test]
    fn invalid_values_report_the_property() {
        let config = ConfigProperties::builder()
            .with_properties([
                ("otel.bsp.schedule.delay", "10 years"),
                ("otel.sdk.disabled", "maybe"),
                ("otel.traces.sampler.arg", "half"),
            ])
            .build();

        assert!(matches!(
            config.get_duration("otel.bsp.schedule.delay"),
            Err(ConfigureError::InvalidProperty { ref key, .. }) if key == "otel.bsp.schedule.delay"
        ));
        assert!(config.get_bool("otel.sdk.disabled").is_err());
        assert!(config.get_f64("otel.traces.sampler.arg").is_err());
    }

    #[test]
    fn lists_and_maps() {
        let config = ConfigProperties::builder()
            .with_properties([
                ("otel.propagators", "tracecontext, baggage,,"),
                ("otel.resource.attributes", "service.namespace=ci, host.name = agent-1"),
                ("otel.exporter.otlp.headers", "authorization"),
            ])
            .build();

        assert_eq!(config.get_list("otel.propagators"), vec!["tracecontext", "baggage"]);
        assert_eq!(
            config.get_map("otel.resource.attributes").unwrap(),
            vec![
                ("service.namespace".to_string(), "ci".to_string()),
                ("host.name".to_string(), "agent-1".to_string()),
            ]
        );
        assert!(config.get_map("otel.exporter.otlp.headers").is_err());
        assert!(config.get_map("otel.missing").unwrap().is_empty());
        assert!(config.get_list("otel.missing").is_empty());
    }

    #[test]
    fn display_is_sorted_and_masks_credentials() {
        let config = ConfigProperties::builder()
            .with_properties([
                ("otel.traces.exporter", "otlp"),
                ("otel.exporter.otlp.headers", "authorization=Bearer secret"),
                ("otel.exporter.otlp.endpoint", "http://collector:4317"),
            ])
            .build();

        assert_eq!(
            config.to_string(),
            "{otel.exporter.otlp.endpoint=http://collector:4317, otel.exporter.otlp.headers=***, otel.traces.exporter=otlp}"
        );
        assert_eq!(ConfigProperties::empty().to_string(), "{}");
    }
}

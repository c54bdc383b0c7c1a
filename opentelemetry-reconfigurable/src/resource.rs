//! Resource construction for a configured backend.
use crate::config::ConfigProperties;
use crate::error::ConfigureResult;
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

/// Property holding extra `k=v,...` resource attributes.
pub const RESOURCE_ATTRIBUTES: &str = "otel.resource.attributes";
/// Property holding the `service.name` resource attribute.
pub const SERVICE_NAME_PROPERTY: &str = "otel.service.name";

/// Builds the resource of a configured backend.
///
/// Attributes are merged in the following order, later sources winning on key
/// collision:
///
/// 1. the SDK default resource (SDK provided, telemetry SDK and
///    `OTEL_RESOURCE_ATTRIBUTES` detectors),
/// 2. `otel.resource.attributes` from `config`,
/// 3. `otel.service.name` from `config`,
/// 4. the explicitly supplied `explicit` resource.
pub(crate) fn merge_resource(
    config: &ConfigProperties,
    explicit: &Resource,
) -> ConfigureResult<Resource> {
    let mut builder = Resource::builder().with_attributes(
        config
            .get_map(RESOURCE_ATTRIBUTES)?
            .into_iter()
            .map(|(k, v)| KeyValue::new(k, v)),
    );
    if let Some(service_name) = config.get(SERVICE_NAME_PROPERTY) {
        builder = builder.with_service_name(service_name.to_owned());
    }
    let merged = builder
        .with_attributes(
            explicit
                .iter()
                .map(|(k, v)| KeyValue::new(k.clone(), v.clone())),
        )
        .build();
    // the explicit resource's schema url survives the attribute merge
    Ok(match explicit.schema_url() {
        Some(schema_url) => Resource::builder_empty()
            .with_schema_url(
                merged.iter().map(|(k, v)| KeyValue::new(k.clone(), v.clone())),
                schema_url.to_owned(),
            )
            .build(),
        None => merged,
    })
}

/// Renders resource attributes as a sorted `{key=value, ...}` listing.
pub(crate) fn display_resource(resource: &Resource) -> String {
    let mut attributes: Vec<String> = resource
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    attributes.sort();
    format!("{{{}}}", attributes.join(", "))
}

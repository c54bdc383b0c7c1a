use opentelemetry::logs::{AnyValue, LogRecord, Severity};
use opentelemetry::trace::{SpanId, TraceFlags, TraceId};
use opentelemetry::Key;
use std::borrow::Cow;
use std::time::SystemTime;

/// A log record that is not tied to any backend.
///
/// Records are filled in by the caller and copied field by field into a
/// record of the backend that is current when they are emitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferedLogRecord {
    event_name: Option<&'static str>,
    target: Option<Cow<'static, str>>,
    timestamp: Option<SystemTime>,
    observed_timestamp: Option<SystemTime>,
    severity_text: Option<&'static str>,
    severity_number: Option<Severity>,
    body: Option<AnyValue>,
    attributes: Vec<(Key, AnyValue)>,
    trace_context: Option<(TraceId, SpanId, Option<TraceFlags>)>,
}

impl BufferedLogRecord {
    /// Event name, set for records created by an event logger.
    pub fn event_name(&self) -> Option<&'static str> {
        self.event_name
    }

    /// Target of the record, usually a module path.
    pub fn target(&self) -> Option<&Cow<'static, str>> {
        self.target.as_ref()
    }

    /// Time the event occurred.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// Severity number.
    pub fn severity_number(&self) -> Option<Severity> {
        self.severity_number
    }

    /// Severity text.
    pub fn severity_text(&self) -> Option<&'static str> {
        self.severity_text
    }

    /// Body of the record.
    pub fn body(&self) -> Option<&AnyValue> {
        self.body.as_ref()
    }

    /// Attributes in insertion order.
    pub fn attributes(&self) -> impl Iterator<Item = &(Key, AnyValue)> {
        self.attributes.iter()
    }

    /// Copies every field that was set onto a backend record.
    pub(crate) fn apply_to<R: LogRecord>(self, record: &mut R) {
        if let Some(name) = self.event_name {
            record.set_event_name(name);
        }
        if let Some(target) = self.target {
            record.set_target(target);
        }
        if let Some(timestamp) = self.timestamp {
            record.set_timestamp(timestamp);
        }
        if let Some(timestamp) = self.observed_timestamp {
            record.set_observed_timestamp(timestamp);
        }
        if let Some(text) = self.severity_text {
            record.set_severity_text(text);
        }
        if let Some(number) = self.severity_number {
            record.set_severity_number(number);
        }
        if let Some(body) = self.body {
            record.set_body(body);
        }
        if !self.attributes.is_empty() {
            record.add_attributes(self.attributes);
        }
        if let Some((trace_id, span_id, trace_flags)) = self.trace_context {
            record.set_trace_context(trace_id, span_id, trace_flags);
        }
    }
}

impl LogRecord for BufferedLogRecord {
    fn set_event_name(&mut self, name: &'static str) {
        self.event_name = Some(name);
    }

    fn set_target<T>(&mut self, target: T)
    where
        T: Into<Cow<'static, str>>,
    {
        self.target = Some(target.into());
    }

    fn set_timestamp(&mut self, timestamp: SystemTime) {
        self.timestamp = Some(timestamp);
    }

    fn set_observed_timestamp(&mut self, timestamp: SystemTime) {
        self.observed_timestamp = Some(timestamp);
    }

    fn set_severity_text(&mut self, text: &'static str) {
        self.severity_text = Some(text);
    }

    fn set_severity_number(&mut self, number: Severity) {
        self.severity_number = Some(number);
    }

    fn set_body(&mut self, body: AnyValue) {
        self.body = Some(body);
    }

    fn add_attributes<I, K, V>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<AnyValue>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    fn add_attribute<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Key>,
        V: Into<AnyValue>,
    {
        self.attributes.push((key.into(), value.into()));
    }

    fn set_trace_context(
        &mut self,
        trace_id: TraceId,
        span_id: SpanId,
        trace_flags: Option<TraceFlags>,
    ) {
        self.trace_context = Some((trace_id, span_id, trace_flags));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_keep_insertion_order() {
        let mut record = BufferedLogRecord::default();
        record.add_attribute("job", "deploy");
        record.add_attributes([("build", 42_i64), ("attempt", 1_i64)]);

        let keys: Vec<&str> = record.attributes().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["job", "build", "attempt"]);
    }

    #[test]
    fn unset_fields_are_not_copied() {
        let mut source = BufferedLogRecord::default();
        source.set_body("step finished".into());
        source.set_severity_number(Severity::Info);

        let mut target = BufferedLogRecord::default();
        target.set_target("pipeline");
        source.clone().apply_to(&mut target);

        assert_eq!(target.target().map(|t| t.as_ref()), Some("pipeline"));
        assert_eq!(target.body(), source.body());
        assert_eq!(target.severity_number(), Some(Severity::Info));
        assert_eq!(target.event_name(), None);
    }
}

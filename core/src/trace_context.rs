//! Opaque trace-context carrier.
//!
//! Producers attach W3C `traceparent`/`tracestate` (and whatever else their
//! instrumentation emits, e.g. Spring's `__TypeId__`) as message headers. The
//! inventory core never interprets them: it lifts them off the inbound message
//! and writes the same pairs onto the outcome it publishes, so the trace
//! continues across the hop.

use std::collections::BTreeMap;

/// Key/value bag carried alongside every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    entries: BTreeMap<String, String>,
}

impl TraceContext {
    /// An empty carrier.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Build from raw broker headers.
    ///
    /// Headers without a value or with a non-UTF-8 value cannot be represented
    /// as text and are dropped.
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a [u8]>)>,
    {
        let entries = headers
            .into_iter()
            .filter_map(|(key, value)| {
                let value = std::str::from_utf8(value?).ok()?;
                Some((key.to_string(), value.to_string()))
            })
            .collect();
        Self { entries }
    }

    /// Add or replace one entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Look up one entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Iterate entries in key order, for injection into outbound headers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the carrier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TraceContext {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

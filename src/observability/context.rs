//! Log annotations carried by fibers.
//!
//! [`LogAnnotations`] are structured key/value fields attached to every log
//! line a fiber emits. They live in a fiber-local value, so a forked child
//! starts with its parent's annotations and later changes stay local to the
//! fiber that made them.

use crate::effect::{Effect, Shareable};
use crate::fiber_ref::FiberRef;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// Structured fields attached to log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogAnnotations {
    fields: BTreeMap<String, String>,
}

impl LogAnnotations {
    /// Creates an empty set of annotations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Merges another set into this one. Fields from `other` win.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (k, v) in &other.fields {
            merged.fields.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Iterates fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for LogAnnotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.fields {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

/// The annotations of the running fiber.
pub static LOG_ANNOTATIONS: LazyLock<FiberRef<LogAnnotations>> =
    LazyLock::new(|| FiberRef::new(LogAnnotations::new()));

impl<A: Send + 'static, E: Shareable> Effect<A, E> {
    /// Runs the effect with `key=value` added to its log annotations.
    #[must_use]
    pub fn annotate_logs(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        let annotations = &*LOG_ANNOTATIONS;
        let this = self;
        annotations.get::<E>().flat_map(move |current| {
            annotations.locally(current.with(key.clone(), value.clone()), this.clone())
        })
    }
}

//! Resolution of report fields against a watched instance.
//!
//! A [`CallSpec`] says where a value comes from: a literal, an accessor
//! looked up by name on the instance, or a computed rule that receives the
//! instance. [`resolve`] is the only place the three are told apart.
use serde_json::Value;
use std::{fmt, sync::Arc};
use thiserror::Error;

/// An object that report definitions can read values from.
///
/// Usually implemented through `#[derive(Watchable)]`.
pub trait Watchable: Send + Sync {
    /// Returns the value of the named accessor, or `None` when the instance
    /// has no such accessor. An accessor that exists but holds nothing
    /// returns `Some(Value::Null)`.
    fn attribute(&self, name: &str) -> Option<Value>;

    /// Type name used as the trigger target of model bindings.
    fn model_name(&self) -> &str;
}

impl Watchable for Value {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.as_object().and_then(|map| map.get(name).cloned())
    }

    fn model_name(&self) -> &str {
        "Value"
    }
}

impl Watchable for () {
    fn attribute(&self, _name: &str) -> Option<Value> {
        None
    }

    fn model_name(&self) -> &str {
        "()"
    }
}

pub type Rule = Arc<dyn Fn(&dyn Watchable) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Clone, Default)]
pub enum CallSpec {
    #[default]
    Nil,
    Literal(Value),
    Accessor(String),
    Computed(Rule),
}

impl CallSpec {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn accessor(name: impl Into<String>) -> Self {
        Self::Accessor(name.into())
    }

    /// Wraps a rule that computes the value from the instance. Rules that
    /// ignore their argument act as zero-argument blocks.
    pub fn computed<F>(rule: F) -> Self
    where
        F: Fn(&dyn Watchable) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(rule))
    }

    /// Current UTC time as an RFC 3339 string, evaluated at resolution.
    pub fn now() -> Self {
        Self::computed(|_| Ok(Value::String(chrono::Utc::now().to_rfc3339())))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
}

impl fmt::Debug for CallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("Nil"),
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Accessor(name) => f.debug_tuple("Accessor").field(name).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("unresolved attribute: {0}")]
    Unresolved(String),

    #[error(transparent)]
    Raised(#[from] anyhow::Error),
}

/// Resolves `spec` against `instance`.
///
/// Literals come back unchanged and `Nil` yields `Value::Null` without
/// touching the instance. A missing accessor is `ResolveError::Unresolved`;
/// an error raised by a computed rule is passed through as
/// `ResolveError::Raised` for the caller to judge.
pub fn resolve(spec: &CallSpec, instance: &dyn Watchable) -> Result<Value, ResolveError> {
    match spec {
        CallSpec::Nil => Ok(Value::Null),
        CallSpec::Literal(value) => Ok(value.clone()),
        CallSpec::Accessor(name) => instance
            .attribute(name)
            .ok_or_else(|| ResolveError::Unresolved(name.clone())),
        CallSpec::Computed(rule) => Ok(rule(instance)?),
    }
}

/// `null` and `false` are falsy, everything else is truthy.
pub fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

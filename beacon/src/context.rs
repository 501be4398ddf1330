use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::{
    config::IdentityConfig,
    definition::ReportDefinition,
    error::{ReportError, Result},
    resolver::{CallSpec, ResolveError, Watchable, resolve, truthy},
};

const NAME_FIELD: &str = "name";

/// One report run: a definition resolved against the instance that fired it.
///
/// Built fresh for every trigger firing and dropped once its
/// [`Action`](crate::Action) has been built.
pub struct RecordContext<'a> {
    definition: &'a ReportDefinition,
    instance: &'a dyn Watchable,
    name: String,
    user: Value,
    group: Value,
    created_at: Value,
    metrics: BTreeMap<String, Value>,
    aggregates: BTreeMap<String, Value>,
}

impl<'a> RecordContext<'a> {
    /// [`with_identity`](Self::with_identity) with the default identity.
    pub fn build(definition: &'a ReportDefinition, instance: &'a dyn Watchable) -> Result<Self> {
        Self::with_identity(definition, instance, &IdentityConfig::default())
    }

    /// Resolves every field of `definition` against `instance`.
    ///
    /// Missing accessors read as null for every field but the name; a name
    /// that cannot be resolved, or resolves to null, fails with
    /// `UnresolvedAttribute`. Errors raised by computed rules are returned
    /// as `ReportError::Rule`. User and group are read through the
    /// definition's own accessors, falling back to `identity`, and reported
    /// as `{"id", "display"}` objects.
    pub fn with_identity(
        definition: &'a ReportDefinition,
        instance: &'a dyn Watchable,
        identity: &IdentityConfig,
    ) -> Result<Self> {
        let name = resolve_name(definition.name_spec(), instance)?;

        let user_display = identity.user_display.as_deref();
        let user = if definition.acts_on_user() {
            identify_instance(instance, &identity.user_id, user_display)
        } else {
            let spec = definition
                .user_spec()
                .cloned()
                .unwrap_or_else(|| CallSpec::accessor(identity.user_call.clone()));
            identify(
                resolve_optional("user", &spec, instance)?,
                &identity.user_id,
                user_display,
            )
        };

        let group_spec = match definition.group_spec() {
            Some(spec) => spec.clone(),
            None => identity
                .group_call
                .clone()
                .map(CallSpec::accessor)
                .unwrap_or_default(),
        };
        let group = identify(
            resolve_optional("group", &group_spec, instance)?,
            &identity.group_id,
            identity.group_display.as_deref(),
        );

        Ok(Self {
            definition,
            instance,
            name,
            user,
            group,
            created_at: resolve_optional("created_at", definition.created_at_spec(), instance)?,
            metrics: resolve_sparse(definition.metrics().iter(), instance)?,
            aggregates: resolve_sparse(definition.aggregates().iter(), instance)?,
        })
    }

    /// Whether the report should be sent. True without a condition;
    /// otherwise the truthiness of the condition. A condition naming a
    /// missing accessor reads as false, a raising rule is an error.
    pub fn should_run(&self) -> Result<bool> {
        let Some(condition) = self.definition.condition() else {
            return Ok(true);
        };
        match resolve(condition, self.instance) {
            Ok(value) => Ok(truthy(&value)),
            Err(ResolveError::Unresolved(accessor)) => {
                tracing::debug!("condition accessor {} is missing, report suppressed", accessor);
                Ok(false)
            }
            Err(ResolveError::Raised(e)) => Err(ReportError::ConditionEvaluation(e)),
        }
    }

    /// Aggregates with `user`, `group`, `created_at` and `measure` merged in
    /// at the same level. The fixed keys are merged last and win.
    pub fn options(&self) -> Map<String, Value> {
        let mut options: Map<String, Value> = self
            .aggregates
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        options.insert("user".to_string(), self.user.clone());
        options.insert("group".to_string(), self.group.clone());
        options.insert("created_at".to_string(), self.created_at.clone());
        options.insert(
            "measure".to_string(),
            Value::Object(
                self.metrics
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        );
        options
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user(&self) -> &Value {
        &self.user
    }

    pub fn group(&self) -> &Value {
        &self.group
    }

    pub fn created_at(&self) -> &Value {
        &self.created_at
    }

    pub fn metrics(&self) -> &BTreeMap<String, Value> {
        &self.metrics
    }

    pub fn aggregates(&self) -> &BTreeMap<String, Value> {
        &self.aggregates
    }
}

fn resolve_name(spec: &CallSpec, instance: &dyn Watchable) -> Result<String> {
    let unresolved = || ReportError::UnresolvedAttribute {
        accessor: match spec {
            CallSpec::Accessor(name) => name.clone(),
            _ => NAME_FIELD.to_string(),
        },
    };
    match resolve(spec, instance) {
        Ok(Value::Null) | Err(ResolveError::Unresolved(_)) => Err(unresolved()),
        Ok(Value::String(name)) => Ok(name),
        Ok(other) => Ok(other.to_string()),
        Err(ResolveError::Raised(source)) => Err(ReportError::Rule {
            field: NAME_FIELD.to_string(),
            source,
        }),
    }
}

fn resolve_optional(field: &str, spec: &CallSpec, instance: &dyn Watchable) -> Result<Value> {
    match resolve(spec, instance) {
        Ok(value) => Ok(value),
        Err(ResolveError::Unresolved(accessor)) => {
            tracing::debug!("{} accessor {} is missing, reported as null", field, accessor);
            Ok(Value::Null)
        }
        Err(ResolveError::Raised(source)) => Err(ReportError::Rule {
            field: field.to_string(),
            source,
        }),
    }
}

/// `{"id", "display"}` for a resolved user or group. Objects are read
/// through the id and display accessors; scalars are their own id.
fn identify(value: Value, id_accessor: &str, display_accessor: Option<&str>) -> Value {
    if value.is_object() {
        return identify_instance(&value, id_accessor, display_accessor);
    }
    let display = display_text(&value);
    identity_value(value, display)
}

fn identify_instance(
    subject: &dyn Watchable,
    id_accessor: &str,
    display_accessor: Option<&str>,
) -> Value {
    let id = subject.attribute(id_accessor).unwrap_or(Value::Null);
    let display = display_accessor
        .and_then(|accessor| subject.attribute(accessor))
        .filter(|display| !display.is_null())
        .unwrap_or_else(|| display_text(&id));
    identity_value(id, display)
}

fn identity_value(id: Value, display: Value) -> Value {
    if id.is_null() && display.is_null() {
        return Value::Null;
    }
    let mut identity = Map::new();
    identity.insert("id".to_string(), id);
    identity.insert("display".to_string(), display);
    Value::Object(identity)
}

fn display_text(value: &Value) -> Value {
    match value {
        Value::Null | Value::String(_) => value.clone(),
        other => Value::String(other.to_string()),
    }
}

fn resolve_sparse<'s>(
    specs: impl Iterator<Item = (&'s String, &'s CallSpec)>,
    instance: &dyn Watchable,
) -> Result<BTreeMap<String, Value>> {
    let mut resolved = BTreeMap::new();
    for (key, spec) in specs {
        let value = resolve_optional(key, spec, instance)?;
        if !value.is_null() {
            resolved.insert(key.clone(), value);
        }
    }
    Ok(resolved)
}

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::context::RecordContext;

/// The finished report payload handed to a [`Sender`](crate::sender::Sender).
///
/// Holds no reference to the instance it was built from. Serializes to the
/// flat wire object `{name, measure, user, group, created_at, <aggregates>}`
/// where unresolved `user`, `group` and `created_at` are explicit nulls.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    name: String,
    user: Option<Value>,
    group: Option<Value>,
    created_at: Option<Value>,
    measures: BTreeMap<String, Value>,
    aggregates: BTreeMap<String, Value>,
}

impl Action {
    pub fn from_context(context: &RecordContext<'_>) -> Self {
        Self {
            name: context.name().to_string(),
            user: non_null(context.user()),
            group: non_null(context.group()),
            created_at: non_null(context.created_at()),
            measures: context.metrics().clone(),
            aggregates: context.aggregates().clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user(&self) -> Option<&Value> {
        self.user.as_ref()
    }

    pub fn group(&self) -> Option<&Value> {
        self.group.as_ref()
    }

    pub fn created_at(&self) -> Option<&Value> {
        self.created_at.as_ref()
    }

    pub fn measures(&self) -> &BTreeMap<String, Value> {
        &self.measures
    }

    pub fn aggregates(&self) -> &BTreeMap<String, Value> {
        &self.aggregates
    }

    /// The wire object. Aggregates go in first so the fixed keys win on
    /// collision.
    pub fn payload(&self) -> Map<String, Value> {
        let mut payload: Map<String, Value> = self
            .aggregates
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        payload.insert("user".to_string(), self.user.clone().unwrap_or(Value::Null));
        payload.insert("group".to_string(), self.group.clone().unwrap_or(Value::Null));
        payload.insert(
            "created_at".to_string(),
            self.created_at.clone().unwrap_or(Value::Null),
        );
        payload.insert(
            "measure".to_string(),
            Value::Object(
                self.measures
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        );
        payload.insert("name".to_string(), Value::String(self.name.clone()));
        payload
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload().serialize(serializer)
    }
}

fn non_null(value: &Value) -> Option<Value> {
    (!value.is_null()).then(|| value.clone())
}

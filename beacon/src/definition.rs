//! Declarative report definitions.
//!
//! A [`ReportDefinition`] records what a report captures (name, timestamp,
//! acting user and group, metrics, aggregates, send condition) and which
//! [`Trigger`] it is bound to. Definitions are assembled with chained
//! builder calls at startup and never change after being committed.
use std::collections::HashMap;

use crate::{
    error::{ReportError, Result},
    registry::{ReportHandle, ReportRegistry},
    resolver::CallSpec,
};

/// Lifecycle event used by model bindings unless another one is given.
pub const DEFAULT_EVENT: &str = "create";

const CONTROLLER_SUFFIX: &str = "Controller";

/// What fires a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A lifecycle event on a model type.
    Model { model: String, event: String },
    /// An action on a controller class.
    Controller { controller: String, action: String },
    /// Not indexed by any target; run explicitly through its hook.
    Generic,
}

impl Trigger {
    pub fn model(model: impl Into<String>) -> Self {
        Self::Model {
            model: model.into(),
            event: DEFAULT_EVENT.to_string(),
        }
    }

    /// Parses a `"controller#action"` catalyst. The controller part is
    /// normalised to its class name: `admin_users#index` binds
    /// `AdminUsersController`.
    pub fn controller(catalyst: &str) -> Result<Self> {
        let (controller, action) = catalyst.split_once('#').ok_or_else(|| {
            ReportError::configuration(format!(
                "catalyst `{catalyst}` must look like `controller#action`"
            ))
        })?;
        let (controller, action) = (controller.trim(), action.trim());
        if controller.is_empty() || action.is_empty() || action.contains('#') {
            return Err(ReportError::configuration(format!(
                "catalyst `{catalyst}` must look like `controller#action`"
            )));
        }
        Ok(Self::Controller {
            controller: controller_class(controller),
            action: action.to_string(),
        })
    }

    /// The model or controller class the trigger is attached to.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Model { model, .. } => Some(model),
            Self::Controller { controller, .. } => Some(controller),
            Self::Generic => None,
        }
    }

    /// The event or action name under the target.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Model { event, .. } => Some(event),
            Self::Controller { action, .. } => Some(action),
            Self::Generic => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Model { .. } => "model",
            Self::Controller { .. } => "controller",
            Self::Generic => "generic",
        }
    }
}

fn controller_class(raw: &str) -> String {
    if raw.ends_with(CONTROLLER_SUFFIX) {
        return raw.to_string();
    }
    let mut class: String = raw
        .split(['_', '/'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    class.push_str(CONTROLLER_SUFFIX);
    class
}

#[derive(Debug, Clone)]
pub struct ReportDefinition {
    name: CallSpec,
    condition: Option<CallSpec>,
    created_at: CallSpec,
    // `None` defers to the configured identity.
    user: Option<CallSpec>,
    group: Option<CallSpec>,
    metrics: HashMap<String, CallSpec>,
    aggregates: HashMap<String, CallSpec>,
    act_on_user: bool,
    trigger: Option<Trigger>,
    // The name was taken from the bound model and follows a rebinding.
    name_from_model: bool,
}

impl Default for ReportDefinition {
    fn default() -> Self {
        Self {
            name: CallSpec::Nil,
            condition: None,
            created_at: CallSpec::accessor("created_at"),
            user: None,
            group: None,
            metrics: HashMap::new(),
            aggregates: HashMap::new(),
            act_on_user: false,
            trigger: None,
            name_from_model: false,
        }
    }
}

impl ReportDefinition {
    /// An unbound template. It cannot be committed until a trigger is bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches `event`s of `model`, `create` by default. The report is
    /// named after the model until [`name`](Self::name) says otherwise.
    pub fn model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            name: CallSpec::literal(model.clone()),
            trigger: Some(Trigger::model(model)),
            name_from_model: true,
            ..Self::default()
        }
    }

    /// Watches a controller action given as `"controller#action"`.
    pub fn controller(catalyst: &str) -> Result<Self> {
        Self::new().bind_trigger(Trigger::controller(catalyst)?)
    }

    /// A report fired on demand rather than by a model or controller.
    pub fn generic(name: CallSpec) -> Self {
        Self {
            name,
            trigger: Some(Trigger::Generic),
            ..Self::default()
        }
    }

    /// Sets the report name and, optionally, the condition that must be
    /// truthy for the report to be sent.
    pub fn name(mut self, name: CallSpec, condition: Option<CallSpec>) -> Self {
        self.name = name;
        self.condition = condition;
        self.name_from_model = false;
        self
    }

    /// Registers a metric. Without `spec` the key doubles as the accessor
    /// name. Registering a key again replaces its resolver.
    pub fn measure(mut self, key: impl Into<String>, spec: Option<CallSpec>) -> Self {
        let key = key.into();
        let spec = spec.unwrap_or_else(|| CallSpec::accessor(key.clone()));
        self.metrics.insert(key, spec);
        self
    }

    /// Same as [`measure`](Self::measure), kept in a separate map and
    /// reported at the top level of the payload.
    pub fn aggregate(mut self, key: impl Into<String>, spec: Option<CallSpec>) -> Self {
        let key = key.into();
        let spec = spec.unwrap_or_else(|| CallSpec::accessor(key.clone()));
        self.aggregates.insert(key, spec);
        self
    }

    /// Overrides the configured user accessor for this report.
    pub fn user(mut self, spec: CallSpec) -> Self {
        self.user = Some(spec);
        self
    }

    /// Overrides the configured group accessor for this report.
    pub fn group(mut self, spec: CallSpec) -> Self {
        self.group = Some(spec);
        self
    }

    pub fn created_at(mut self, spec: CallSpec) -> Self {
        self.created_at = spec;
        self
    }

    /// Marks the watched instance itself as the acting user.
    pub fn act_on_user(mut self, on: bool) -> Self {
        self.act_on_user = on;
        self
    }

    /// Binds the definition to `trigger`. Rebinding within the same kind
    /// replaces the previous binding; switching kinds is an error. A name
    /// taken from the previous model follows the new one.
    pub fn bind_trigger(mut self, trigger: Trigger) -> Result<Self> {
        if let Some(current) = &self.trigger {
            if current.kind() != trigger.kind() {
                return Err(ReportError::configuration(format!(
                    "definition is already bound to a {} trigger, cannot bind a {} trigger",
                    current.kind(),
                    trigger.kind()
                )));
            }
        }
        if self.name_from_model {
            if let Trigger::Model { model, .. } = &trigger {
                self.name = CallSpec::literal(model.clone());
            }
        }
        self.trigger = Some(trigger);
        Ok(self)
    }

    /// Changes the lifecycle event of a model binding.
    pub fn event(mut self, event: impl Into<String>) -> Result<Self> {
        match &mut self.trigger {
            Some(Trigger::Model { event: current, .. }) => {
                *current = event.into();
                Ok(self)
            }
            _ => Err(ReportError::configuration(
                "an event can only be set on a model binding",
            )),
        }
    }

    /// Registers the definition and returns the handle its hook is built from.
    pub fn commit(self, registry: &mut ReportRegistry) -> Result<ReportHandle> {
        registry.insert(self)
    }

    /// Templates without a trigger cannot be dispatched on their own.
    pub fn valid_for_push(&self) -> bool {
        self.trigger.is_some()
    }

    pub fn name_spec(&self) -> &CallSpec {
        &self.name
    }

    pub fn condition(&self) -> Option<&CallSpec> {
        self.condition.as_ref()
    }

    pub fn created_at_spec(&self) -> &CallSpec {
        &self.created_at
    }

    /// The user accessor set on this report, if any.
    pub fn user_spec(&self) -> Option<&CallSpec> {
        self.user.as_ref()
    }

    pub fn group_spec(&self) -> Option<&CallSpec> {
        self.group.as_ref()
    }

    pub fn metrics(&self) -> &HashMap<String, CallSpec> {
        &self.metrics
    }

    pub fn aggregates(&self) -> &HashMap<String, CallSpec> {
        &self.aggregates
    }

    pub fn acts_on_user(&self) -> bool {
        self.act_on_user
    }

    pub fn trigger(&self) -> Option<&Trigger> {
        self.trigger.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn accessor_name(spec: &CallSpec) -> Option<&str> {
        match spec {
            CallSpec::Accessor(name) => Some(name),
            _ => None,
        }
    }

    #[test]
    fn test_defaults() {
        let definition = ReportDefinition::new();
        assert_eq!(accessor_name(definition.created_at_spec()), Some("created_at"));
        assert!(definition.user_spec().is_none());
        assert!(definition.group_spec().is_none());
        assert!(definition.name_spec().is_nil());
        assert!(definition.condition().is_none());
        assert!(!definition.acts_on_user());
        assert!(!definition.valid_for_push());
    }

    #[test]
    fn test_model_binding_defaults() {
        let definition = ReportDefinition::model("Post");
        assert_eq!(
            definition.trigger(),
            Some(&Trigger::Model {
                model: "Post".to_string(),
                event: "create".to_string()
            })
        );
        assert!(matches!(definition.name_spec(), CallSpec::Literal(v) if v == "Post"));
        assert!(definition.valid_for_push());

        let renamed = definition.name(CallSpec::literal("New post"), None);
        assert!(matches!(renamed.name_spec(), CallSpec::Literal(v) if v == "New post"));
    }

    #[test]
    fn test_measure_defaults_to_key_accessor() {
        let definition = ReportDefinition::new()
            .measure("views", None)
            .measure("area", Some(CallSpec::accessor("km2")));
        assert_eq!(accessor_name(&definition.metrics()["views"]), Some("views"));
        assert_eq!(accessor_name(&definition.metrics()["area"]), Some("km2"));
        assert!(definition.aggregates().is_empty());
    }

    #[test]
    fn test_measure_last_write_wins() {
        let definition = ReportDefinition::new()
            .measure("views", None)
            .measure("views", Some(CallSpec::literal(3)));
        assert_eq!(definition.metrics().len(), 1);
        assert!(matches!(definition.metrics()["views"], CallSpec::Literal(_)));
    }

    #[test]
    fn test_aggregates_are_kept_apart_from_metrics() {
        let definition = ReportDefinition::new()
            .aggregate("rooms", None)
            .aggregate("area", Some(CallSpec::accessor("km2")));
        assert!(definition.metrics().is_empty());
        assert_eq!(accessor_name(&definition.aggregates()["rooms"]), Some("rooms"));
        assert_eq!(accessor_name(&definition.aggregates()["area"]), Some("km2"));
    }

    #[test]
    fn test_name_sets_condition() {
        let definition = ReportDefinition::new().name(
            CallSpec::literal("Post"),
            Some(CallSpec::accessor("published")),
        );
        assert_eq!(accessor_name(definition.condition().unwrap()), Some("published"));
    }

    #[test]
    fn test_controller_catalyst_parsing() {
        let cases = [
            ("posts#create", "PostsController", "create"),
            ("admin_users#index", "AdminUsersController", "index"),
            ("PostsController#show", "PostsController", "show"),
        ];
        for (catalyst, controller, action) in cases {
            assert_eq!(
                Trigger::controller(catalyst).unwrap(),
                Trigger::Controller {
                    controller: controller.to_string(),
                    action: action.to_string()
                }
            );
        }
    }

    #[test]
    fn test_invalid_catalyst() {
        for catalyst in ["posts", "#create", "posts#", "a#b#c"] {
            let result = Trigger::controller(catalyst);
            assert!(
                matches!(result, Err(ReportError::Configuration(_))),
                "{catalyst} should be rejected"
            );
        }
    }

    #[test]
    fn test_second_binding_kind_is_rejected() {
        let result = ReportDefinition::model("Post").bind_trigger(Trigger::controller("posts#create").unwrap());
        assert!(matches!(result, Err(ReportError::Configuration(_))));

        let rebound = ReportDefinition::model("Post")
            .bind_trigger(Trigger::model("Comment"))
            .unwrap();
        assert_eq!(rebound.trigger().and_then(Trigger::target), Some("Comment"));
    }

    #[test]
    fn test_rebinding_moves_the_model_name() {
        let rebound = ReportDefinition::model("Post")
            .bind_trigger(Trigger::model("Comment"))
            .unwrap();
        assert!(matches!(rebound.name_spec(), CallSpec::Literal(v) if v == "Comment"));

        let named = ReportDefinition::model("Post")
            .name(CallSpec::literal("Published"), None)
            .bind_trigger(Trigger::model("Comment"))
            .unwrap();
        assert!(matches!(named.name_spec(), CallSpec::Literal(v) if v == "Published"));
    }

    #[test]
    fn test_user_and_group_overrides() {
        let definition = ReportDefinition::new()
            .user(CallSpec::accessor("author"))
            .group(CallSpec::literal("editors"));
        assert_eq!(definition.user_spec().and_then(accessor_name), Some("author"));
        assert!(matches!(definition.group_spec(), Some(CallSpec::Literal(v)) if v == "editors"));
    }

    #[test]
    fn test_event_on_model_binding() {
        let definition = ReportDefinition::model("Post").event("update").unwrap();
        assert_eq!(definition.trigger().and_then(Trigger::key), Some("update"));

        let result = ReportDefinition::controller("posts#create").unwrap().event("update");
        assert!(matches!(result, Err(ReportError::Configuration(_))));
        assert!(ReportDefinition::new().event("update").is_err());
    }

    #[test]
    fn test_generic_definition() {
        let definition = ReportDefinition::generic(CallSpec::literal("Deploy"));
        assert!(definition.valid_for_push());
        assert_eq!(definition.trigger(), Some(&Trigger::Generic));
        assert_eq!(Trigger::Generic.target(), None);
    }
}

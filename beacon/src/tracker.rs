//! Startup configuration and the frozen runtime built from it.
//!
//! A [`TrackerBuilder`] owns the mutable configuration and the registry
//! while the application declares its reports. [`TrackerBuilder::build`]
//! freezes both into a [`Tracker`] that can be shared across tasks.
use std::sync::Arc;

use crate::{
    config::{Config, IdentityConfig, QueueSelection},
    deferred::{Deferrer, TokioDeferrer},
    definition::ReportDefinition,
    dispatcher::{Dispatcher, RunOutcome, Strategy},
    error::{ReportError, Result},
    queue::JobQueue,
    registry::{ReportHandle, ReportRegistry},
    resolver::Watchable,
    sender::Sender,
};

pub struct TrackerBuilder {
    config: Config,
    // Environment that `enable(None, ..)` applies to inside `config_for`.
    env_scope: Option<String>,
    registry: ReportRegistry,
    job_queue: Option<Arc<dyn JobQueue>>,
    deferrer: Option<Arc<dyn Deferrer>>,
}

impl TrackerBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            env_scope: None,
            registry: ReportRegistry::new(),
            job_queue: None,
            deferrer: None,
        }
    }

    /// Turns reporting on or off for one environment, or for all known
    /// environments when `environment` is `None`. Inside
    /// [`config_for`](Self::config_for) `None` means the scoped environment.
    pub fn enable(&mut self, environment: Option<&str>, flag: bool) -> &mut Self {
        let scope = self.env_scope.clone();
        self.config
            .enable
            .enable(environment.or(scope.as_deref()), flag);
        self
    }

    /// Runs `configure` only when the current environment is one of
    /// `environments`, or always when the list is empty.
    pub fn config_for<F>(&mut self, environments: &[&str], configure: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if environments.is_empty() {
            configure(&mut *self)?;
            return Ok(self);
        }
        let current = self.config.environment.clone();
        if environments.contains(&current.as_str()) {
            self.env_scope = Some(current);
            let result = configure(&mut *self);
            self.env_scope = None;
            result?;
        }
        Ok(self)
    }

    /// Names the user model and returns the identity settings for further
    /// configuration (id, display, group).
    pub fn user(&mut self, model: &str) -> &mut IdentityConfig {
        self.config.identity.user(model)
    }

    /// Selects the background system. It can be chosen once, either here or
    /// in the config file.
    pub fn queue(&mut self, selection: QueueSelection) -> Result<&mut Self> {
        if let Some(current) = self.config.queue {
            return Err(ReportError::configuration(format!(
                "queue system already set to {current}"
            )));
        }
        self.config.queue = Some(selection);
        Ok(self)
    }

    /// Job queue used by the `resque` strategy.
    pub fn job_queue(&mut self, queue: Arc<dyn JobQueue>) -> &mut Self {
        self.job_queue = Some(queue);
        self
    }

    /// Deferrer used by the `delayed_job` strategy; a [`TokioDeferrer`] when
    /// not given.
    pub fn deferrer(&mut self, deferrer: Arc<dyn Deferrer>) -> &mut Self {
        self.deferrer = Some(deferrer);
        self
    }

    /// Commits `definition` into the registry.
    pub fn register(&mut self, definition: ReportDefinition) -> Result<ReportHandle> {
        definition.commit(&mut self.registry)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn build(self, sender: Arc<dyn Sender>) -> Result<Tracker> {
        let strategy = match self.config.queue_selection() {
            QueueSelection::None => Strategy::Immediate,
            QueueSelection::Resque => Strategy::Queued(self.job_queue.ok_or_else(|| {
                ReportError::configuration("the resque strategy needs a job queue")
            })?),
            QueueSelection::DelayedJob => Strategy::Deferred(
                self.deferrer
                    .unwrap_or_else(|| Arc::new(TokioDeferrer::new())),
            ),
        };

        tracing::info!(
            "tracker ready: {} reports, environment {} ({}), queue {} ({}), sender {}",
            self.registry.len(),
            self.config.environment,
            if self.config.enabled() { "enabled" } else { "disabled" },
            self.config.queue_selection(),
            strategy.capability().unwrap_or("inline"),
            sender.name()
        );

        let config = Arc::new(self.config);
        Ok(Tracker {
            dispatcher: Dispatcher::new(config.clone(), sender, strategy),
            config,
            registry: Arc::new(self.registry),
        })
    }
}

/// Frozen configuration, registry and dispatcher.
#[derive(Clone)]
pub struct Tracker {
    config: Arc<Config>,
    registry: Arc<ReportRegistry>,
    dispatcher: Dispatcher,
}

impl Tracker {
    pub fn builder(config: Config) -> TrackerBuilder {
        TrackerBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ReportRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The callable external wiring installs as a lifecycle callback or
    /// post-action filter for the definition behind `handle`.
    pub fn hook(&self, handle: ReportHandle) -> Result<ReportHook> {
        let definition = self
            .registry
            .get(handle)
            .cloned()
            .ok_or_else(|| ReportError::configuration(format!("unknown report {handle:?}")))?;
        Ok(ReportHook {
            definition,
            dispatcher: self.dispatcher.clone(),
        })
    }

    /// Runs every definition registered for `key` on `target`, one result
    /// per definition in commit order. A failing run does not stop the
    /// others.
    pub async fn fire(
        &self,
        target: &str,
        key: &str,
        instance: &dyn Watchable,
    ) -> Vec<Result<RunOutcome>> {
        let mut results = Vec::new();
        for handle in self.registry.handles_for(target, key) {
            let Some(definition) = self.registry.get(*handle) else {
                continue;
            };
            let result = self.dispatcher.run(definition, instance).await;
            if let Err(e) = &result {
                tracing::warn!("report for {}#{} failed: {}", target, key, e);
            }
            results.push(result);
        }
        results
    }

    /// [`fire`](Self::fire) with the instance's model name as target.
    pub async fn fire_model(&self, instance: &dyn Watchable, event: &str) -> Vec<Result<RunOutcome>> {
        self.fire(instance.model_name(), event, instance).await
    }
}

/// One committed definition bound to the dispatcher, shaped as the
/// `(instance) -> outcome` callable host frameworks invoke.
#[derive(Clone)]
pub struct ReportHook {
    definition: Arc<ReportDefinition>,
    dispatcher: Dispatcher,
}

impl ReportHook {
    pub async fn call(&self, instance: &dyn Watchable) -> Result<RunOutcome> {
        self.dispatcher.run(&self.definition, instance).await
    }

    pub fn definition(&self) -> &ReportDefinition {
        &self.definition
    }
}

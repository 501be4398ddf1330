use std::sync::Arc;

use crate::{
    action::Action,
    config::Config,
    context::RecordContext,
    deferred::Deferrer,
    definition::ReportDefinition,
    error::{ReportError, Result},
    queue::{JobQueue, RUN_REPORT_JOB},
    resolver::Watchable,
    sender::Sender,
};

/// How a finished report leaves the process. Each variant carries the
/// capability it delivers through.
#[derive(Clone)]
pub enum Strategy {
    /// Call the sender from the running task.
    Immediate,
    /// Enqueue a `RunReport` job.
    Queued(Arc<dyn JobQueue>),
    /// Schedule a deferred call to the sender.
    Deferred(Arc<dyn Deferrer>),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Queued(_) => "queue",
            Self::Deferred(_) => "deferred",
        }
    }

    /// Name of the queue or deferrer behind the strategy.
    pub fn capability(&self) -> Option<&'static str> {
        match self {
            Self::Immediate => None,
            Self::Queued(queue) => Some(queue.name()),
            Self::Deferred(deferrer) => Some(deferrer.name()),
        }
    }
}

/// What a single report run ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Reporting is disabled for the current environment.
    Disabled,
    /// The report name could not be resolved.
    Abandoned,
    /// The send condition was falsy.
    Suppressed,
    Sent,
    Enqueued,
    Deferred,
}

/// Runs reports and routes the resulting actions through the configured
/// [`Strategy`], gated by the environment's enable flag.
///
/// Sender, queue and deferrer failures are returned to the caller
/// unretried.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<Config>,
    sender: Arc<dyn Sender>,
    strategy: Strategy,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>, sender: Arc<dyn Sender>, strategy: Strategy) -> Self {
        Self {
            config,
            sender,
            strategy,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Performs a full run of `definition` against `instance`: resolve,
    /// check the condition, build the action and deliver it.
    pub async fn run(
        &self,
        definition: &ReportDefinition,
        instance: &dyn Watchable,
    ) -> Result<RunOutcome> {
        if !self.config.enabled() {
            tracing::debug!("reporting disabled for {}", self.config.environment);
            return Ok(RunOutcome::Disabled);
        }

        let action = {
            let context = match RecordContext::with_identity(
                definition,
                instance,
                &self.config.identity,
            ) {
                Ok(context) => context,
                Err(ReportError::UnresolvedAttribute { accessor }) => {
                    tracing::debug!("report name {} unresolved, run abandoned", accessor);
                    return Ok(RunOutcome::Abandoned);
                }
                Err(e) => return Err(e),
            };
            if !context.should_run()? {
                tracing::debug!("report {} suppressed by its condition", context.name());
                return Ok(RunOutcome::Suppressed);
            }
            Action::from_context(&context)
        };

        self.deliver(action).await
    }

    /// Delivers an already built action, honouring the enable flag.
    pub async fn dispatch(&self, action: Action) -> Result<RunOutcome> {
        if !self.config.enabled() {
            tracing::debug!("reporting disabled for {}", self.config.environment);
            return Ok(RunOutcome::Disabled);
        }
        self.deliver(action).await
    }

    async fn deliver(&self, action: Action) -> Result<RunOutcome> {
        let strategy = self.strategy.name();
        let failed = |source| ReportError::Dispatch { strategy, source };
        tracing::debug!("delivering report {} via {}", action.name(), strategy);

        match &self.strategy {
            Strategy::Immediate => {
                self.sender.report(&action).await.map_err(failed)?;
                Ok(RunOutcome::Sent)
            }
            Strategy::Queued(queue) => {
                queue.enqueue(RUN_REPORT_JOB, action).await.map_err(failed)?;
                Ok(RunOutcome::Enqueued)
            }
            Strategy::Deferred(deferrer) => {
                deferrer
                    .defer(self.sender.clone(), action)
                    .map_err(failed)?;
                Ok(RunOutcome::Deferred)
            }
        }
    }
}

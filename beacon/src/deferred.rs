//! Deferred-call capability used by the `delayed_job` strategy.
use crate::{action::Action, sender::Sender};
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tokio::{runtime::Handle, task::JoinHandle};

#[cfg(test)]
use mockall::automock;

/// Schedules `sender.report(action)` to run later. Only the handoff can
/// fail; the outcome of the scheduled call is never observed by the caller.
#[cfg_attr(test, automock)]
pub trait Deferrer: Send + Sync {
    fn defer(&self, sender: Arc<dyn Sender>, action: Action) -> Result<()>;

    /// Returns the name of this deferrer for logging purposes.
    fn name(&self) -> &'static str;
}

/// Runs deferred reports as tasks on the current tokio runtime.
#[derive(Default)]
pub struct TokioDeferrer {
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioDeferrer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for every call scheduled so far.
    pub async fn drain(&self) {
        let pending = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending)
        };
        for handle in pending {
            if let Err(e) = handle.await {
                tracing::warn!("deferred report task failed: {}", e);
            }
        }
    }
}

impl Deferrer for TokioDeferrer {
    fn defer(&self, sender: Arc<dyn Sender>, action: Action) -> Result<()> {
        let runtime = Handle::try_current().context("no tokio runtime to defer the report on")?;
        let handle = runtime.spawn(async move {
            if let Err(e) = sender.report(&action).await {
                tracing::warn!(
                    "deferred report {} via '{}' failed: {:#}",
                    action.name(),
                    sender.name(),
                    e
                );
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tokio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallSpec, RecordContext, ReportDefinition, sender::MockSender};
    use anyhow::anyhow;

    fn action() -> Action {
        let definition = ReportDefinition::generic(CallSpec::literal("Deploy"));
        let context = RecordContext::build(&definition, &()).unwrap();
        Action::from_context(&context)
    }

    #[tokio::test]
    async fn test_deferred_call_runs_on_the_runtime() {
        let mut sender = MockSender::new();
        sender.expect_report().times(1).returning(|_| Ok(()));

        let deferrer = TokioDeferrer::new();
        deferrer.defer(Arc::new(sender), action()).unwrap();
        deferrer.drain().await;
    }

    #[tokio::test]
    async fn test_deferred_failure_is_not_returned() {
        let mut sender = MockSender::new();
        sender
            .expect_report()
            .times(1)
            .returning(|_| Err(anyhow!("collector down")));
        sender.expect_name().return_const("mock");

        let deferrer = TokioDeferrer::new();
        assert!(deferrer.defer(Arc::new(sender), action()).is_ok());
        deferrer.drain().await;
    }

    #[test]
    fn test_defer_without_runtime_fails() {
        let sender = MockSender::new();
        let deferrer = TokioDeferrer::new();
        assert!(deferrer.defer(Arc::new(sender), action()).is_err());
    }
}

//! Job queue capability used by the `resque` strategy, plus an in-process
//! implementation backed by a pool of tokio workers.
use crate::{action::Action, config::WorkerConfig, sender::Sender};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{
    Mutex as AsyncMutex,
    mpsc::{self, Receiver},
};

#[cfg(test)]
use mockall::automock;

/// Identifier of the job that delivers one report.
pub const RUN_REPORT_JOB: &str = "RunReport";

const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Hands reports to a background job system. The queue owns retry and
/// delivery guarantees; enqueueing is where the caller's part ends.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &str, action: Action) -> Result<()>;

    /// Returns the name of this queue for logging purposes.
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
struct Job {
    id: String,
    action: Action,
}

/// In-process job queue: a bounded channel drained by `num_instance`
/// workers that run `RunReport` jobs through the sender.
pub struct WorkerQueue {
    job_tx: Mutex<Option<mpsc::Sender<Job>>>,
    handles: Mutex<Vec<HandleHolder>>,
}

impl WorkerQueue {
    /// Spawns the workers on the current tokio runtime.
    pub fn start(conf: &WorkerConfig, sender: Arc<dyn Sender>) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job>(Self::calculate_channel_capacity(conf.num_instance));
        let job_rx = Arc::new(AsyncMutex::new(job_rx));

        let mut handles = Vec::with_capacity(conf.num_instance);
        for i in 0..conf.num_instance {
            let worker = Worker::new(i, sender.clone(), job_rx.clone());
            let name = worker.name.clone();
            let handle = tokio::spawn(async move {
                worker.run().await;
            });
            handles.push(HandleHolder { name, handle });
        }

        tracing::info!("WorkerQueue started with {} workers", conf.num_instance);
        Self {
            job_tx: Mutex::new(Some(job_tx)),
            handles: Mutex::new(handles),
        }
    }

    /// Closes the queue and waits for the workers to drain it.
    pub async fn shutdown(&self) {
        let handles = {
            let mut job_tx = self.job_tx.lock().unwrap_or_else(|e| e.into_inner());
            job_tx.take();
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *handles)
        };
        tracing::info!("Shutting down WorkerQueue with {} workers", handles.len());

        for holder in handles {
            match tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, holder.handle).await {
                Ok(_) => {
                    tracing::debug!("{} completed successfully", holder.name);
                }
                Err(_) => {
                    tracing::warn!("{} did not shut down in time, forcing termination", holder.name);
                }
            }
        }
        tracing::info!("WorkerQueue shutdown complete");
    }

    fn calculate_channel_capacity(worker_count: usize) -> usize {
        (worker_count * 2).clamp(1, 100)
    }
}

#[async_trait]
impl JobQueue for WorkerQueue {
    async fn enqueue(&self, job: &str, action: Action) -> Result<()> {
        let job_tx = self
            .job_tx
            .lock()
            .map_err(|_| anyhow!("job queue lock poisoned"))?
            .clone()
            .ok_or_else(|| anyhow!("job queue is shut down"))?;
        job_tx
            .send(Job {
                id: job.to_string(),
                action,
            })
            .await
            .with_context(|| format!("failed to enqueue {job}"))
    }

    fn name(&self) -> &'static str {
        "worker"
    }
}

struct HandleHolder {
    name: String,
    handle: tokio::task::JoinHandle<()>,
}

struct Worker {
    name: String,
    sender: Arc<dyn Sender>,
    rx: Arc<AsyncMutex<Receiver<Job>>>,
}

impl Worker {
    fn new(id: usize, sender: Arc<dyn Sender>, rx: Arc<AsyncMutex<Receiver<Job>>>) -> Self {
        Self {
            name: format!("Worker-{}", id),
            sender,
            rx,
        }
    }

    async fn run(&self) {
        tracing::debug!("{} started", self.name);

        while let Some(job) = self.receive().await {
            self.process_job(job).await;
        }

        tracing::debug!("{} stopped", self.name);
    }

    async fn receive(&self) -> Option<Job> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    async fn process_job(&self, job: Job) {
        if job.id != RUN_REPORT_JOB {
            tracing::warn!("{} dropping unknown job {}", self.name, job.id);
            return;
        }
        if let Err(e) = self.sender.report(&job.action).await {
            tracing::warn!(
                "{}: sender '{}' failed to deliver {}: {:#}",
                self.name,
                self.sender.name(),
                job.action.name(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallSpec, RecordContext, ReportDefinition, sender::MockSender};

    fn action(name: &str) -> Action {
        let definition = ReportDefinition::generic(CallSpec::literal(name));
        let context = RecordContext::build(&definition, &()).unwrap();
        Action::from_context(&context)
    }

    #[tokio::test]
    async fn test_run_report_jobs_reach_the_sender() {
        let mut sender = MockSender::new();
        sender
            .expect_report()
            .withf(|action| action.name() == "Deploy")
            .times(2)
            .returning(|_| Ok(()));

        let queue = WorkerQueue::start(&WorkerConfig { num_instance: 2 }, Arc::new(sender));
        queue.enqueue(RUN_REPORT_JOB, action("Deploy")).await.unwrap();
        queue.enqueue(RUN_REPORT_JOB, action("Deploy")).await.unwrap();
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_jobs_are_dropped() {
        let mut sender = MockSender::new();
        sender.expect_report().never();

        let queue = WorkerQueue::start(&WorkerConfig { num_instance: 1 }, Arc::new(sender));
        queue.enqueue("Cleanup", action("Deploy")).await.unwrap();
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_sender_failures_are_absorbed_by_the_worker() {
        let mut sender = MockSender::new();
        sender
            .expect_report()
            .times(1)
            .returning(|_| Err(anyhow!("collector down")));
        sender.expect_name().return_const("mock");

        let queue = WorkerQueue::start(&WorkerConfig { num_instance: 1 }, Arc::new(sender));
        queue.enqueue(RUN_REPORT_JOB, action("Deploy")).await.unwrap();
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let sender = MockSender::new();
        let queue = WorkerQueue::start(&WorkerConfig::default(), Arc::new(sender));
        queue.shutdown().await;
        assert!(queue.enqueue(RUN_REPORT_JOB, action("Deploy")).await.is_err());
    }

    #[test]
    fn test_channel_capacity_is_never_zero() {
        assert_eq!(WorkerQueue::calculate_channel_capacity(0), 1);
        assert_eq!(WorkerQueue::calculate_channel_capacity(4), 8);
        assert_eq!(WorkerQueue::calculate_channel_capacity(500), 100);
    }
}

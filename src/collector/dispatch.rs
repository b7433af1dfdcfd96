//! Background job dispatch
//!
//! [`spawn`] accepts a job, publishes it as `PENDING` and returns at once;
//! the job then runs on the tokio runtime. Separate jobs run as independent
//! tasks, each with its own orchestrator and credential pool.

use super::executor::CollectionOrchestrator;
use super::job::{CollectionJob, JobReport};
use super::CollectError;
use tokio::task::JoinHandle;
use tracing::info;

/// Handle to a running job
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    task: JoinHandle<(CollectionOrchestrator, Result<JobReport, CollectError>)>,
}

impl JobHandle {
    /// Identifier of the job.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Whether the job has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the job immediately; checkpoints already written stay valid.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the final report.
    pub async fn wait(self) -> Result<JobReport, CollectError> {
        self.wait_with_orchestrator().await.1
    }

    /// Wait for the final report and take the orchestrator back.
    pub async fn wait_with_orchestrator(
        self,
    ) -> (Option<CollectionOrchestrator>, Result<JobReport, CollectError>) {
        match self.task.await {
            Ok((orchestrator, result)) => (Some(orchestrator), result),
            Err(e) if e.is_cancelled() => (None, Err(CollectError::Aborted("task cancelled".to_string()))),
            Err(e) => (None, Err(CollectError::Aborted(e.to_string()))),
        }
    }
}

/// Start `job` in the background and return its handle immediately.
pub fn spawn(orchestrator: CollectionOrchestrator, mut job: CollectionJob) -> JobHandle {
    let job_id = job.id();
    orchestrator.announce(&job);
    info!(job_id = %job_id, "Job accepted");

    let task = tokio::spawn(async move {
        let mut orchestrator = orchestrator;
        let result = orchestrator.run(&mut job).await;
        (orchestrator, result)
    });

    JobHandle { job_id, task }
}

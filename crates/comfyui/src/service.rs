//! Submit-and-wait execution contract used by the pipeline.
//!
//! [`ExecutionService`] is the seam between the sequencer and the remote
//! executor. [`ComfyUIService`] implements it over the REST API by
//! polling `/history/{prompt_id}` until the prompt finishes or the
//! deadline passes.

use std::time::Duration;

use t2i2v_core::graph::WorkflowGraph;
use tokio::time::Instant;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::HistoryStatus;

/// Default interval between history polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Identifier the execution service assigned to a submitted job.
pub type JobId = String;

/// Terminal state of a submitted job as observed by the waiter.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The job finished; `outputs` is the service's per-node output map.
    Completed { outputs: serde_json::Value },
    /// The service reported an execution error.
    Failed { message: String },
    /// The deadline passed before the job finished.
    TimedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),
}

/// Remote executor for workflow graphs.
#[async_trait::async_trait]
pub trait ExecutionService: Send + Sync {
    /// Queue a graph for execution.
    async fn submit(&self, workflow: &WorkflowGraph) -> Result<JobId, ExecutionError>;

    /// Wait until `job` finishes or `timeout` elapses.
    ///
    /// A timeout is an outcome, not an error.
    async fn await_completion(
        &self,
        job: &JobId,
        timeout: Duration,
    ) -> Result<JobOutcome, ExecutionError>;
}

// ---------------------------------------------------------------------------
// ComfyUI implementation
// ---------------------------------------------------------------------------

/// [`ExecutionService`] backed by a ComfyUI instance.
pub struct ComfyUIService {
    api: ComfyUIApi,
    client_id: String,
    poll_interval: Duration,
}

impl ComfyUIService {
    /// Create a service for the instance at `api_url` with a fresh
    /// client id and the default poll interval.
    pub fn new(api_url: String) -> Self {
        Self {
            api: ComfyUIApi::new(api_url),
            client_id: uuid::Uuid::new_v4().to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Best-effort cleanup after a timed-out wait.
    async fn abandon(&self, prompt_id: &str) {
        if let Err(e) = self.api.cancel_execution(prompt_id).await {
            tracing::warn!(prompt_id, error = %e, "Failed to remove timed-out prompt from queue");
        }
        if let Err(e) = self.api.interrupt().await {
            tracing::warn!(prompt_id, error = %e, "Failed to interrupt timed-out prompt");
        }
    }
}

#[async_trait::async_trait]
impl ExecutionService for ComfyUIService {
    async fn submit(&self, workflow: &WorkflowGraph) -> Result<JobId, ExecutionError> {
        let queued = self.api.submit_workflow(workflow, &self.client_id).await?;

        tracing::info!(
            prompt_id = %queued.prompt_id,
            queue_position = queued.number,
            nodes = workflow.len(),
            "Workflow submitted",
        );
        Ok(queued.prompt_id)
    }

    async fn await_completion(
        &self,
        job: &JobId,
        timeout: Duration,
    ) -> Result<JobOutcome, ExecutionError> {
        let deadline = Instant::now() + timeout;

        loop {
            let poll = tokio::time::timeout_at(deadline, self.api.history(job)).await;
            match poll {
                Err(_elapsed) => break,
                Ok(Err(e)) => {
                    tracing::warn!(prompt_id = %job, error = %e, "History poll failed");
                }
                Ok(Ok(status)) => match status {
                    HistoryStatus::Pending => {}
                    HistoryStatus::Completed { outputs } => {
                        tracing::info!(prompt_id = %job, "Prompt completed");
                        return Ok(JobOutcome::Completed { outputs });
                    }
                    HistoryStatus::Failed { message } => {
                        tracing::error!(prompt_id = %job, error = %message, "Prompt failed");
                        return Ok(JobOutcome::Failed { message });
                    }
                },
            }

            if Instant::now() + self.poll_interval >= deadline {
                tokio::time::sleep_until(deadline).await;
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        tracing::warn!(
            prompt_id = %job,
            timeout_secs = timeout.as_secs(),
            "Timed out waiting for prompt",
        );
        self.abandon(job).await;
        Ok(JobOutcome::TimedOut)
    }
}

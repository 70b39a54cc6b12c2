use std::future::Future;

use tracing::{debug, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, FlowResult};
use crate::{bail, flow_error};

/// One statement handed to the query-execution facility.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySubmission {
    /// The SQL-like statement text.
    pub statement: String,
    /// Target catalog database.
    pub database: String,
    /// Location where the facility materializes results.
    pub output_location: String,
}

/// Status reported by the facility for a submitted execution.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryStatus {
    /// Still executing.
    Running,
    /// Terminal success.
    Succeeded,
    /// Terminal failure, with the facility's reason when it reports one.
    Failed(String),
    /// Terminal cancellation.
    Cancelled,
}

/// Terminal outcome of waiting for an execution.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
}

/// Asynchronous, latency-heavy query-execution facility.
///
/// The contract is submit-then-poll: [`QueryExecutor::submit`] returns an
/// execution identifier and [`QueryExecutor::poll`] reports its status until
/// a terminal state. Implementations must tolerate polls after a terminal
/// status has been observed.
pub trait QueryExecutor: Send + Sync {
    /// Submits a statement for execution and returns its execution id.
    fn submit(
        &self,
        submission: &QuerySubmission,
    ) -> impl Future<Output = FlowResult<String>> + Send;

    /// Reports the current status of an execution.
    fn poll(&self, execution_id: &str) -> impl Future<Output = FlowResult<QueryStatus>> + Send;
}

/// Submit-then-poll driver shared by the merge and aggregate stages.
///
/// Bundles the executor with the run's database, output location, polling
/// cadence and shutdown signal, so stages issue statements without repeating
/// the wait logic.
#[derive(Debug, Clone)]
pub struct QueryRunner<Q> {
    executor: Q,
    database: String,
    output_location: String,
    poll_interval: std::time::Duration,
    max_poll_attempts: u32,
    shutdown_rx: ShutdownRx,
}

impl<Q> QueryRunner<Q>
where
    Q: QueryExecutor,
{
    /// Creates a runner from the pipeline configuration.
    pub fn new(executor: Q, config: &PipelineConfig, shutdown_rx: ShutdownRx) -> Self {
        Self {
            executor,
            database: config.database.clone(),
            output_location: config.output_location.clone(),
            poll_interval: config.poll_interval,
            max_poll_attempts: config.max_poll_attempts,
            shutdown_rx,
        }
    }

    /// Executes a statement to completion, converting any non-success outcome
    /// into an error. This is the call sites' default: a failed or timed-out
    /// statement aborts the current stage.
    pub async fn execute(&self, statement: impl Into<String>) -> FlowResult<()> {
        let statement = statement.into();
        match self.run_to_outcome(statement.clone()).await? {
            QueryOutcome::Succeeded => Ok(()),
            QueryOutcome::Failed(reason) => Err(flow_error!(
                ErrorKind::QueryExecutionFailed,
                "Query execution failed",
                reason
            )),
            QueryOutcome::TimedOut => {
                bail!(
                    ErrorKind::QueryTimeout,
                    "Query execution timed out",
                    format!(
                        "no terminal state after {} polls",
                        self.max_poll_attempts
                    )
                )
            }
        }
    }

    /// Executes a statement where failure is acceptable, logging instead of
    /// propagating. Used for best-effort cleanup statements.
    pub async fn execute_best_effort(&self, statement: impl Into<String>) {
        if let Err(err) = self.execute(statement).await {
            warn!("best-effort statement failed: {}", err);
        }
    }

    /// Submits a statement and waits for a terminal outcome.
    ///
    /// The wait is bounded by the configured poll budget and observes the
    /// shutdown signal between polls; a shutdown request surfaces as a failed
    /// outcome so the run aborts without advancing the watermark.
    pub async fn run_to_outcome(&self, statement: String) -> FlowResult<QueryOutcome> {
        let submission = QuerySubmission {
            statement,
            database: self.database.clone(),
            output_location: self.output_location.clone(),
        };

        let execution_id = self.executor.submit(&submission).await?;
        debug!(execution_id = %execution_id, "query submitted");

        let mut shutdown_rx = self.shutdown_rx.clone();
        // Mark the current value as seen so only a signal sent after this
        // point interrupts the wait.
        shutdown_rx.mark_unchanged();

        for _ in 0..self.max_poll_attempts {
            match self.executor.poll(&execution_id).await? {
                QueryStatus::Succeeded => return Ok(QueryOutcome::Succeeded),
                QueryStatus::Failed(reason) => return Ok(QueryOutcome::Failed(reason)),
                QueryStatus::Cancelled => {
                    return Ok(QueryOutcome::Failed("execution cancelled".to_string()));
                }
                QueryStatus::Running => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                result = shutdown_rx.changed() => {
                    if result.is_ok() {
                        warn!(execution_id = %execution_id, "shutdown requested while waiting for query");
                        return Ok(QueryOutcome::Failed("shutdown requested".to_string()));
                    }
                    // The sender is gone, so shutdown can no longer be
                    // requested; keep the polling cadence.
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Ok(QueryOutcome::TimedOut)
    }
}

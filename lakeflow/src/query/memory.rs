use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::FlowResult;
use crate::query::executor::{QueryExecutor, QueryStatus, QuerySubmission};

#[derive(Debug)]
struct PlannedExecution {
    remaining_running_polls: u32,
    terminal: QueryStatus,
}

#[derive(Debug, Default)]
struct Inner {
    submissions: Vec<QuerySubmission>,
    executions: HashMap<String, PlannedExecution>,
    fail_contains: Vec<(String, String)>,
    delay_polls: u32,
    never_complete: bool,
}

/// In-memory query executor for testing and development purposes.
///
/// Records every submission and resolves executions according to a small
/// script: succeed after an optional number of `Running` polls, fail
/// statements matching a substring, or never reach a terminal state so
/// timeout handling can be exercised. Real set-based semantics live in the
/// external facility; tests assert on the recorded statement sequence.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueryExecutor {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryQueryExecutor {
    /// Creates an executor that completes every statement successfully on
    /// the first poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `Running` for the given number of polls before succeeding.
    pub async fn delay_polls(&self, polls: u32) {
        let mut inner = self.inner.lock().await;
        inner.delay_polls = polls;
    }

    /// Never reaches a terminal state, forcing callers into their timeout
    /// path.
    pub async fn never_complete(&self) {
        let mut inner = self.inner.lock().await;
        inner.never_complete = true;
    }

    /// Fails any statement containing `needle` with the given reason.
    pub async fn fail_when_contains(&self, needle: &str, reason: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .fail_contains
            .push((needle.to_string(), reason.to_string()));
    }

    /// Returns a copy of all submissions recorded so far.
    pub async fn submissions(&self) -> Vec<QuerySubmission> {
        let inner = self.inner.lock().await;
        inner.submissions.clone()
    }

    /// Returns the statement texts recorded so far, in submission order.
    pub async fn statements(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .submissions
            .iter()
            .map(|submission| submission.statement.clone())
            .collect()
    }

    /// Clears recorded submissions between test phases.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.submissions.clear();
        inner.executions.clear();
    }
}

impl QueryExecutor for MemoryQueryExecutor {
    async fn submit(&self, submission: &QuerySubmission) -> FlowResult<String> {
        let mut inner = self.inner.lock().await;
        inner.submissions.push(submission.clone());

        let terminal = inner
            .fail_contains
            .iter()
            .find(|(needle, _)| submission.statement.contains(needle))
            .map(|(_, reason)| QueryStatus::Failed(reason.clone()))
            .unwrap_or(QueryStatus::Succeeded);

        let remaining_running_polls = if inner.never_complete {
            u32::MAX
        } else {
            inner.delay_polls
        };

        let execution_id = Uuid::new_v4().to_string();
        inner.executions.insert(
            execution_id.clone(),
            PlannedExecution {
                remaining_running_polls,
                terminal,
            },
        );

        Ok(execution_id)
    }

    async fn poll(&self, execution_id: &str) -> FlowResult<QueryStatus> {
        let mut inner = self.inner.lock().await;
        let Some(execution) = inner.executions.get_mut(execution_id) else {
            return Ok(QueryStatus::Failed(format!(
                "unknown execution id {execution_id}"
            )));
        };

        if execution.remaining_running_polls > 0 {
            execution.remaining_running_polls -= 1;
            return Ok(QueryStatus::Running);
        }

        Ok(execution.terminal.clone())
    }
}

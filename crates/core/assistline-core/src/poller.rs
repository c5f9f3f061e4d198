//! Waits for a remote run to reach a terminal status

use crate::api::AssistantApi;
use crate::types::{Run, RunStatus};
use crate::{AssistlineError, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polling cadence and deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between status fetches
    pub interval: Duration,
    /// Give up after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Progress report emitted after every non-terminal status fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunProgress {
    /// 1-based fetch count
    pub attempt: u32,
    /// Status just observed
    pub status: RunStatus,
    /// Time since polling started
    pub elapsed: Duration,
}

/// How a terminal run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Status `completed`
    Completed(Run),
    /// Any other terminal status
    Failed(Run),
}

impl RunOutcome {
    /// The terminal run
    pub fn run(&self) -> &Run {
        match self {
            RunOutcome::Completed(run) | RunOutcome::Failed(run) => run,
        }
    }

    /// Whether the run completed
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    /// Turn a failed run into [`AssistlineError::RunFailed`]
    pub fn into_result(self) -> Result<Run> {
        match self {
            RunOutcome::Completed(run) => Ok(run),
            RunOutcome::Failed(run) => {
                let reason = run
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "the assistant did not finish the run".to_string());
                Err(AssistlineError::run_failed(run.id, run.status.as_str(), reason))
            }
        }
    }
}

impl From<Run> for RunOutcome {
    fn from(run: Run) -> Self {
        if run.status == RunStatus::Completed {
            RunOutcome::Completed(run)
        } else {
            RunOutcome::Failed(run)
        }
    }
}

/// Fixed-interval poller for one run at a time
pub struct RunPoller<'a, A: ?Sized> {
    api: &'a A,
    config: PollConfig,
    progress: Option<mpsc::UnboundedSender<RunProgress>>,
}

impl<'a, A> RunPoller<'a, A>
where
    A: AssistantApi + ?Sized,
{
    /// Create a poller over `api`
    pub fn new(api: &'a A, config: PollConfig) -> Self {
        Self {
            api,
            config,
            progress: None,
        }
    }

    /// Report every non-terminal status on `tx`
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<RunProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Poll until the run is terminal and classify it
    ///
    /// Returns [`AssistlineError::Timeout`] once the deadline passes, even
    /// while a status fetch is still outstanding, and
    /// [`AssistlineError::Cancelled`] when `cancel` fires. Errors from the
    /// API propagate unchanged.
    pub async fn wait(
        &self,
        thread_id: &str,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        let deadline = self.config.timeout.map(|timeout| started + timeout);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let fetch = self.api.get_run(thread_id, run_id);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AssistlineError::cancelled(format!("stopped waiting for run {run_id}")));
                }
                fetched = async {
                    match deadline {
                        Some(deadline) => tokio::time::timeout_at(deadline, fetch).await.ok(),
                        None => Some(fetch.await),
                    }
                } => fetched,
            };
            let Some(run) = fetched else {
                warn!("Status check of run {} did not answer before the deadline", run_id);
                return Err(AssistlineError::timeout(format!(
                    "no status for run {} within {:?}",
                    run_id,
                    started.elapsed()
                )));
            };
            let run = run?;
            debug!("Run {} status after attempt {}: {}", run_id, attempt, run.status);

            if run.status.is_terminal() {
                info!(
                    "Run {} finished with status {} after {:?}",
                    run_id,
                    run.status,
                    started.elapsed()
                );
                return Ok(RunOutcome::from(run));
            }

            if let Some(tx) = &self.progress {
                let _ = tx.send(RunProgress {
                    attempt,
                    status: run.status,
                    elapsed: started.elapsed(),
                });
            }

            let mut pause = self.config.interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    warn!("Run {} still {} at the deadline", run_id, run.status);
                    return Err(AssistlineError::timeout(format!(
                        "run {} was still {} after {:?}",
                        run_id,
                        run.status,
                        started.elapsed()
                    )));
                }
                pause = pause.min(deadline - now);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AssistlineError::cancelled(format!("stopped waiting for run {run_id}")));
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

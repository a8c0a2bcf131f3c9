//! Run monitor: poll, classify, maybe rerun, wait.
//!
//! One sequential loop owns the rerun counter. The only suspension point is the
//! wait between polls, which races the poll interval against cancellation.

use crate::error::{ApiError, MonitorError};
use crate::forge::ForgeApi;
use crate::model::{FailurePolicy, MonitorConfig, Outcome, PollResult, RunIdentity, WorkflowRun};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument, Span};

/// What ended a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    Elapsed,
    Cancelled,
}

/// Map a run's status/conclusion to a poll result.
pub fn classify(run: &WorkflowRun, policy: FailurePolicy) -> PollResult {
    if run.status_str() != "completed" {
        return PollResult::Pending;
    }
    match run.conclusion_str() {
        "success" => PollResult::Succeeded,
        c if policy.is_failure(c) => PollResult::Failed,
        other => PollResult::UnknownConclusion(other.to_string()),
    }
}

/// Block until `interval` elapses or `cancel` fires, whichever is first.
pub(crate) async fn tick(interval: Duration, cancel: &CancellationToken) -> Tick {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Tick::Cancelled,
        () = tokio::time::sleep(interval) => Tick::Elapsed,
    }
}

/// Bound a forge call; elapsing the timeout is reported like any other API failure.
async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(limit, call).await {
        Ok(res) => res,
        Err(_) => Err(ApiError::Timeout(limit)),
    }
}

pub struct Monitor<A> {
    api: A,
    run: RunIdentity,
    cfg: MonitorConfig,
    cancel: CancellationToken,
    span: Span,
    reruns: u32,
}

impl<A: ForgeApi> Monitor<A> {
    /// `span` carries the log context for every line the loop emits.
    pub fn new(
        api: A,
        run: RunIdentity,
        cfg: MonitorConfig,
        cancel: CancellationToken,
        span: Span,
    ) -> Self {
        Self {
            api,
            run,
            cfg,
            cancel,
            span,
            reruns: 0,
        }
    }

    pub async fn poll(&self) -> Result<PollResult, MonitorError> {
        let wf = with_timeout(self.cfg.api_call_timeout, self.api.workflow_run(&self.run))
            .await
            .map_err(|source| self.api_error("poll", source))?;

        tracing::debug!(id = wf.id, url = wf.html_url.as_deref(), "fetched workflow run");
        info!(
            status = wf.status_str(),
            conclusion = wf.conclusion_str(),
            attempt = wf.run_attempt,
            "workflow run"
        );

        let result = classify(&wf, self.cfg.failure_policy);
        if let PollResult::UnknownConclusion(c) = &result {
            info!(conclusion = %c, "workflow conclusion not acted on");
        }
        Ok(result)
    }

    pub async fn rerun(&self) -> Result<(), MonitorError> {
        with_timeout(
            self.cfg.api_call_timeout,
            self.api.rerun_failed_jobs(&self.run),
        )
        .await
        .map_err(|source| self.api_error("rerun", source))
    }

    /// Drive the loop to one of its terminal outcomes.
    pub async fn run(&mut self) -> Result<Outcome, MonitorError> {
        let span = self.span.clone();
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&mut self) -> Result<Outcome, MonitorError> {
        loop {
            match self.poll().await? {
                PollResult::Succeeded => {
                    info!(reruns = self.reruns, "workflow run succeeded");
                    return Ok(Outcome::Succeeded {
                        reruns: self.reruns,
                    });
                }
                PollResult::Failed => {
                    if self.cfg.budget_exhausted(self.reruns) {
                        warn!(
                            reruns = self.reruns,
                            max_reruns = self.cfg.max_reruns,
                            "workflow run failed and reached maximum number of reruns"
                        );
                        return Ok(Outcome::Exhausted {
                            reruns: self.reruns,
                        });
                    }

                    info!(
                        reruns = self.reruns,
                        max_reruns = self.cfg.max_reruns,
                        "workflow run failed, rerunning"
                    );
                    self.rerun().await?;
                    self.reruns += 1;
                }
                PollResult::Pending | PollResult::UnknownConclusion(_) => {}
            }

            info!(
                interval = %humantime::format_duration(self.cfg.interval),
                "wait for the next check"
            );
            if tick(self.cfg.interval, &self.cancel).await == Tick::Cancelled {
                info!(reruns = self.reruns, "cancelled, stopping");
                return Ok(Outcome::Cancelled {
                    reruns: self.reruns,
                });
            }
        }
    }

    fn api_error(&self, op: &'static str, source: ApiError) -> MonitorError {
        MonitorError::Api {
            op,
            run: self.run.to_string(),
            source,
        }
    }
}

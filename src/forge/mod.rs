//! Forge API surface used by the monitor.
//!
//! The monitor only ever needs two calls: look up a run, and ask the forge to
//! rerun that run's failed jobs. Keeping them behind a trait lets the loop be
//! driven by a scripted fake in tests.

mod github;

pub use github::GithubClient;

use crate::error::ApiError;
use crate::model::{RunIdentity, WorkflowRun};
use async_trait::async_trait;

#[async_trait]
pub trait ForgeApi: Send + Sync {
    /// Fetch the current status and conclusion of a run.
    async fn workflow_run(&self, run: &RunIdentity) -> Result<WorkflowRun, ApiError>;

    /// Request that the failed jobs of a run are executed again.
    async fn rerun_failed_jobs(&self, run: &RunIdentity) -> Result<(), ApiError>;
}

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Addresses one workflow run on the forge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub owner: String,
    pub repo: String,
    pub run_id: u64,
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.run_id)
    }
}

/// Which completed conclusions count as a failure worth rerunning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// `failure` and `cancelled` both trigger a rerun.
    FailureOrCancelled,
    /// Only `failure` triggers a rerun; `cancelled` is left alone.
    FailureOnly,
}

impl FailurePolicy {
    pub fn from_rerun_on_cancelled(rerun_on_cancelled: bool) -> Self {
        if rerun_on_cancelled {
            FailurePolicy::FailureOrCancelled
        } else {
            FailurePolicy::FailureOnly
        }
    }

    pub fn is_failure(self, conclusion: &str) -> bool {
        match self {
            FailurePolicy::FailureOrCancelled => matches!(conclusion, "failure" | "cancelled"),
            FailurePolicy::FailureOnly => conclusion == "failure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Wait between two polls.
    pub interval: Duration,
    /// Bound on each individual API call.
    pub api_call_timeout: Duration,
    /// Rerun ceiling; 0 means unlimited.
    pub max_reruns: u32,
    pub failure_policy: FailurePolicy,
}

impl MonitorConfig {
    /// True once `reruns` has used up a non-zero ceiling.
    pub fn budget_exhausted(&self, reruns: u32) -> bool {
        self.max_reruns > 0 && reruns >= self.max_reruns
    }
}

/// Settings for the HTTP client talking to the forge.
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub user_agent: String,
}

// Keeps the token out of logs.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Subset of the workflow run resource we care about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub run_attempt: Option<u32>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl WorkflowRun {
    pub fn status_str(&self) -> &str {
        self.status.as_deref().unwrap_or("")
    }

    pub fn conclusion_str(&self) -> &str {
        self.conclusion.as_deref().unwrap_or("")
    }
}

/// Classification of a single poll. Never stored between polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Pending,
    Succeeded,
    Failed,
    /// Completed with a conclusion that is neither success nor a failure.
    UnknownConclusion(String),
}

/// How the monitor loop ended. Every variant is a clean exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded { reruns: u32 },
    Exhausted { reruns: u32 },
    Cancelled { reruns: u32 },
}

impl Outcome {
    pub fn reruns(self) -> u32 {
        match self {
            Outcome::Succeeded { reruns }
            | Outcome::Exhausted { reruns }
            | Outcome::Cancelled { reruns } => reruns,
        }
    }
}

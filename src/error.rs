//! Error kinds for configuration and forge API calls.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Bad command-line input. Reported before any API call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid repository format {0:?}, expected owner/name")]
    InvalidRepo(String),
    #[error("invalid run ID: must be nonzero")]
    ZeroRunId,
    #[error("--{flag} must be greater than zero")]
    ZeroDuration { flag: &'static str },
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Any failure talking to the forge. None of these are retried.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("forge returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("cannot build request URL from {0:?}")]
    Url(String),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{op} failed for run {run}")]
    Api {
        op: &'static str,
        run: String,
        #[source]
        source: ApiError,
    },
}

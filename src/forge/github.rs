use crate::error::{ApiError, ConfigError};
use crate::forge::ForgeApi;
use crate::model::{ClientConfig, RunIdentity, WorkflowRun};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode, Url};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";
const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";

/// Last successful response for a run URL, replayed on `304 Not Modified`.
#[derive(Debug, Clone)]
struct CachedRun {
    etag: String,
    run: WorkflowRun,
}

pub struct GithubClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    cache: Mutex<HashMap<Url, CachedRun>>,
}

impl GithubClient {
    pub fn new(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let base_url = parse_base_url(&cfg.base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_GITHUB_JSON));
        headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));

        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url,
            token: cfg.token.clone().filter(|t| !t.trim().is_empty()),
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn run_url(&self, run: &RunIdentity) -> Result<Url, ApiError> {
        build_url(&self.base_url, run, &[])
    }

    pub(crate) fn rerun_url(&self, run: &RunIdentity) -> Result<Url, ApiError> {
        build_url(&self.base_url, run, &["rerun-failed-jobs"])
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    // Entries are whole values, so a panic elsewhere cannot leave one half-written.
    fn lock_cache(&self) -> MutexGuard<'_, HashMap<Url, CachedRun>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, url: &Url) -> Option<CachedRun> {
        self.lock_cache().get(url).cloned()
    }

    fn remember(&self, url: Url, etag: String, run: WorkflowRun) {
        self.lock_cache().insert(url, CachedRun { etag, run });
    }
}

#[async_trait]
impl ForgeApi for GithubClient {
    async fn workflow_run(&self, run: &RunIdentity) -> Result<WorkflowRun, ApiError> {
        let url = self.run_url(run)?;
        let cached = self.cached(&url);

        let mut req = self.authorize(self.http.get(url.clone()));
        if let Some(c) = cached.as_ref() {
            req = req.header(header::IF_NONE_MATCH, c.etag.as_str());
        }

        let resp = req.send().await?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            if let Some(c) = cached {
                tracing::debug!(url = %url, "run unchanged since last poll");
                return Ok(c.run);
            }
        }

        let resp = check_status(resp).await?;
        let etag = resp
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body: WorkflowRun = resp.json().await?;

        if let Some(etag) = etag {
            self.remember(url, etag, body.clone());
        }
        Ok(body)
    }

    async fn rerun_failed_jobs(&self, run: &RunIdentity) -> Result<(), ApiError> {
        let url = self.rerun_url(run)?;
        let resp = self.authorize(self.http.post(url)).send().await?;
        check_status(resp).await?;
        Ok(())
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: "not a base URL".into(),
        });
    }
    Ok(url)
}

/// `{base}/repos/{owner}/{repo}/actions/runs/{id}[/extra..]`, keeping any path prefix
/// of the base (GitHub Enterprise serves the API under `/api/v3`).
fn build_url(base: &Url, run: &RunIdentity, extra: &[&str]) -> Result<Url, ApiError> {
    let mut url = base.clone();
    let run_id = run.run_id.to_string();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| ApiError::Url(base.to_string()))?;
        segments
            .pop_if_empty()
            .extend([
                "repos",
                run.owner.as_str(),
                run.repo.as_str(),
                "actions",
                "runs",
                run_id.as_str(),
            ])
            .extend(extra);
    }
    Ok(url)
}

/// Turn non-2xx responses into `ApiError::Status`, pulling GitHub's `message` field.
async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status,
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response body".to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        })
}

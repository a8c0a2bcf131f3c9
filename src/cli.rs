use crate::error::ConfigError;
use crate::forge::GithubClient;
use crate::logging::LogFormat;
use crate::model::{ClientConfig, FailurePolicy, MonitorConfig, Outcome, RunIdentity};
use crate::monitor::Monitor;
use anyhow::{Context, Result};
use clap::Parser;
use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Long flags the original Go tool accepted with a single dash.
const SINGLE_DASH_FLAGS: &[&str] = &[
    "repo",
    "run-id",
    "max-reruns",
    "interval",
    "api-call-timeout",
];

#[derive(Debug, Parser, Clone)]
#[command(
    name = "gh-rerun-watch",
    version,
    about = "Watch a GitHub Actions workflow run and rerun its failed jobs"
)]
pub struct Cli {
    /// Repository to work on, as owner/name
    #[arg(long)]
    pub repo: String,

    /// Workflow run ID to check
    #[arg(long)]
    pub run_id: u64,

    /// Maximum number of reruns (0 = unlimited)
    #[arg(long, default_value_t = 5)]
    pub max_reruns: u32,

    /// Interval between checks
    #[arg(long, default_value = "1m")]
    pub interval: humantime::Duration,

    /// Timeout for each API call
    #[arg(long, default_value = "5s")]
    pub api_call_timeout: humantime::Duration,

    /// Treat a cancelled run as failed and rerun it
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub rerun_on_cancelled: bool,

    /// API token; unauthenticated requests are made when unset
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Base URL of the GitHub REST API
    #[arg(long, default_value = "https://api.github.com")]
    pub base_url: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Parse process arguments, accepting `-repo` style flags as well as `--repo`.
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }
}

/// Rewrite `-flag` / `-flag=value` into `--flag` for the known long flags.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let Some(s) = arg.to_str() else {
                return arg;
            };
            let Some(rest) = s.strip_prefix('-') else {
                return arg;
            };
            if rest.starts_with('-') {
                return arg;
            }
            let name = rest.split_once('=').map_or(rest, |(n, _)| n);
            if SINGLE_DASH_FLAGS.contains(&name) {
                OsString::from(format!("-{s}"))
            } else {
                arg
            }
        })
        .collect()
}

/// Split `owner/name`; exactly one slash and no empty half.
pub fn parse_repo(raw: &str) -> Result<(String, String), ConfigError> {
    let invalid = || ConfigError::InvalidRepo(raw.to_string());
    let (owner, name) = raw.split_once('/').ok_or_else(invalid)?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return Err(invalid());
    }
    Ok((owner.to_string(), name.to_string()))
}

/// Everything the monitor needs, validated before any API call is made.
#[derive(Debug, Clone)]
pub struct Settings {
    pub run: RunIdentity,
    pub monitor: MonitorConfig,
    pub client: ClientConfig,
}

/// Build validated settings from CLI arguments.
pub fn build_config(args: &Cli) -> Result<Settings, ConfigError> {
    let (owner, repo) = parse_repo(&args.repo)?;
    if args.run_id == 0 {
        return Err(ConfigError::ZeroRunId);
    }

    let interval = Duration::from(args.interval);
    if interval.is_zero() {
        return Err(ConfigError::ZeroDuration { flag: "interval" });
    }
    let api_call_timeout = Duration::from(args.api_call_timeout);
    if api_call_timeout.is_zero() {
        return Err(ConfigError::ZeroDuration {
            flag: "api-call-timeout",
        });
    }

    Ok(Settings {
        run: RunIdentity {
            owner,
            repo,
            run_id: args.run_id,
        },
        monitor: MonitorConfig {
            interval,
            api_call_timeout,
            max_reruns: args.max_reruns,
            failure_policy: FailurePolicy::from_rerun_on_cancelled(args.rerun_on_cancelled),
        },
        client: ClientConfig {
            base_url: args.base_url.clone(),
            token: args.token.clone(),
            user_agent: format!("gh-rerun-watch/{}", env!("CARGO_PKG_VERSION")),
        },
    })
}

/// Resolve once either signal source fires. A source that fails is logged and
/// never counts as a shutdown request.
async fn shutdown_signal<C, T>(ctrl_c: C, terminate: T)
where
    C: Future<Output = io::Result<()>>,
    T: Future<Output = io::Result<()>>,
{
    let ctrl_c = async {
        if let Err(e) = ctrl_c.await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        if let Err(e) = terminate.await {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(unix)]
async fn sigterm() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    match term.recv().await {
        Some(()) => Ok(()),
        None => Err(io::Error::other("SIGTERM stream closed")),
    }
}

#[cfg(not(unix))]
async fn sigterm() -> io::Result<()> {
    std::future::pending().await
}

/// Cancel `token` on Ctrl-C, or SIGTERM on unix.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal(tokio::signal::ctrl_c(), sigterm()).await;
        tracing::info!("received shutdown signal");
        token.cancel();
    });
}

pub async fn run(args: Cli) -> Result<Outcome> {
    let settings = build_config(&args).context("invalid configuration")?;
    tracing::debug!(?settings, "starting monitor");

    let client = GithubClient::new(&settings.client).context("failed to build API client")?;

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let span = tracing::info_span!(
        "monitor",
        owner = %settings.run.owner,
        repo = %settings.run.repo,
        run_id = settings.run.run_id,
    );
    let mut monitor = Monitor::new(client, settings.run, settings.monitor, cancel, span);

    let outcome = monitor.run().await?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(normalize_args(os(args)))
    }

    #[test]
    fn single_dash_long_flags_are_accepted() {
        let cli = parse(&[
            "gh-rerun-watch",
            "-repo",
            "acme/widgets",
            "-run-id=42",
            "-max-reruns",
            "2",
            "-interval",
            "1s",
        ])
        .unwrap();
        assert_eq!(cli.repo, "acme/widgets");
        assert_eq!(cli.run_id, 42);
        assert_eq!(cli.max_reruns, 2);
        assert_eq!(Duration::from(cli.interval), Duration::from_secs(1));
    }

    #[test]
    fn normalize_leaves_other_args_alone() {
        let out = normalize_args(os(&["bin", "--repo", "a/b", "-h", "-", "-x=1", "value"]));
        assert_eq!(out, os(&["bin", "--repo", "a/b", "-h", "-", "-x=1", "value"]));
    }

    #[test]
    fn defaults_match_the_documented_flags() {
        let cli = parse(&["bin", "--repo", "acme/widgets", "--run-id", "42"]).unwrap();
        let s = build_config(&cli).unwrap();
        assert_eq!(s.monitor.max_reruns, 5);
        assert_eq!(s.monitor.interval, Duration::from_secs(60));
        assert_eq!(s.monitor.api_call_timeout, Duration::from_secs(5));
        assert_eq!(s.monitor.failure_policy, FailurePolicy::FailureOrCancelled);
        assert_eq!(s.client.base_url, "https://api.github.com");
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn compound_durations_parse() {
        let cli = parse(&[
            "bin",
            "--repo",
            "a/b",
            "--run-id",
            "1",
            "--interval",
            "1m30s",
            "--api-call-timeout",
            "250ms",
        ])
        .unwrap();
        let s = build_config(&cli).unwrap();
        assert_eq!(s.monitor.interval, Duration::from_secs(90));
        assert_eq!(s.monitor.api_call_timeout, Duration::from_millis(250));
    }

    #[test]
    fn repo_must_have_exactly_one_slash() {
        assert_eq!(
            parse_repo("acme/widgets").unwrap(),
            ("acme".to_string(), "widgets".to_string())
        );
        for bad in ["acme", "acme/widgets/extra", "", "/widgets", "acme/", "/"] {
            assert_eq!(
                parse_repo(bad),
                Err(ConfigError::InvalidRepo(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn zero_run_id_is_rejected() {
        let cli = parse(&["bin", "--repo", "acme/widgets", "--run-id", "0"]).unwrap();
        assert_eq!(build_config(&cli).unwrap_err(), ConfigError::ZeroRunId);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cli = parse(&[
            "bin",
            "--repo",
            "acme/widgets",
            "--run-id",
            "1",
            "--interval",
            "0s",
        ])
        .unwrap();
        assert_eq!(
            build_config(&cli).unwrap_err(),
            ConfigError::ZeroDuration { flag: "interval" }
        );
    }

    #[test]
    fn rerun_on_cancelled_can_be_switched_off() {
        let cli = parse(&[
            "bin",
            "--repo",
            "a/b",
            "--run-id",
            "1",
            "--rerun-on-cancelled",
            "false",
        ])
        .unwrap();
        assert_eq!(
            build_config(&cli).unwrap().monitor.failure_policy,
            FailurePolicy::FailureOnly
        );
    }

    #[test]
    fn missing_required_flags_fail_parsing() {
        assert!(parse(&["bin", "--repo", "a/b"]).is_err());
        assert!(parse(&["bin", "--run-id", "1"]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ctrl_c_handler_is_not_a_shutdown() {
        let wait = shutdown_signal(
            async { Err::<(), _>(io::Error::other("no signal driver")) },
            std::future::pending(),
        );
        assert!(tokio::time::timeout(Duration::from_secs(3600), wait)
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn both_handlers_failing_waits_forever() {
        let wait = shutdown_signal(
            async { Err::<(), _>(io::Error::other("no ctrl-c")) },
            async { Err::<(), _>(io::Error::other("no sigterm")) },
        );
        assert!(tokio::time::timeout(Duration::from_secs(3600), wait)
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn either_signal_resolves_the_wait() {
        let ctrl_c = shutdown_signal(async { Ok::<(), io::Error>(()) }, std::future::pending());
        assert!(tokio::time::timeout(Duration::from_secs(1), ctrl_c)
            .await
            .is_ok());

        let term = shutdown_signal(
            async { Err::<(), _>(io::Error::other("no ctrl-c")) },
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), io::Error>(())
            },
        );
        assert!(tokio::time::timeout(Duration::from_secs(10), term)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn zero_run_id_fails_before_any_request() {
        let cli = parse(&[
            "bin",
            "--repo",
            "acme/widgets",
            "--run-id",
            "0",
            "--base-url",
            "http://127.0.0.1:1",
        ])
        .unwrap();
        let err = run(cli).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ZeroRunId)
        );
    }

    #[tokio::test]
    async fn bad_repo_fails_before_any_request() {
        // An unroutable base URL would surface as an API error if a request were made.
        let cli = parse(&[
            "bin",
            "--repo",
            "acme",
            "--run-id",
            "42",
            "--base-url",
            "http://127.0.0.1:1",
        ])
        .unwrap();
        let err = run(cli).await.unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}

//! conflictbot entry point.
//!
//! One-shot subcommands operate on a single pull request; `watch` runs the
//! polling scheduler over the `[[watch]]` targets until a shutdown signal.
//! Watch only handles commands; proposals come from `propose`.

mod scheduler;
mod signals;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use conflictbot_core::config::AppConfig;
use conflictbot_core::conflict::ConflictDetector;
use conflictbot_core::db::Database;
use conflictbot_core::git::GitHubClient;
use conflictbot_core::models::CommandCheck;
use conflictbot_core::platform::HostingPlatform;
use conflictbot_core::resolver::HttpResolverOracle;
use conflictbot_core::store::ResolutionStore;
use conflictbot_core::workflow::{CycleOutcome, PullRequestWorkflow};

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Pull request merge-conflict detection and resolution bot.
#[derive(Parser, Debug)]
#[command(name = "conflictbot", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "conflictbot.toml")]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct PrArgs {
    /// Repository in `owner/repo` format.
    #[arg(long)]
    repo: String,

    /// Pull request number.
    #[arg(long)]
    pr: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the genuinely conflicting files of a pull request.
    Detect(PrArgs),
    /// Detect conflicts, request resolutions, store them and comment.
    Propose(PrArgs),
    /// Look for an authorized apply-all command and confirm resolutions.
    Check(PrArgs),
    /// Apply confirmed resolutions to the pull request branch.
    Apply(PrArgs),
    /// Check for a command and apply it, advancing the watermark.
    Run(PrArgs),
    /// Poll the configured pull requests for apply-all commands until
    /// interrupted. Watch does not propose; run `conflictbot propose` for a
    /// pull request first.
    Watch,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_and_resolve(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level)
        .to_string();
    let _log_guard = init_tracing(&log_level, config.daemon.log_dir.as_deref())?;

    let token = config
        .github
        .token
        .clone()
        .context("GitHub token was not resolved")?;
    let platform: Arc<dyn HostingPlatform> = Arc::new(
        GitHubClient::new(&config.github.api_url, token)
            .context("failed to build GitHub client")?,
    );

    match cli.command {
        Command::Detect(args) => {
            let detector = ConflictDetector::from_config(platform, &config);
            let report = detector
                .detect_report(&args.repo, args.pr)
                .await
                .context("conflict detection failed")?;
            print_json(json!({
                "repo": args.repo,
                "pr_number": args.pr,
                "strategy": report.strategy.to_string(),
                "files": report.files,
            }))
        }
        Command::Propose(args) => {
            let workflow = build_workflow(platform, &config)?;
            let proposed = workflow
                .propose(&args.repo, args.pr)
                .await
                .context("proposal failed")?;
            print_json(json!({
                "repo": args.repo,
                "pr_number": args.pr,
                "proposed": proposed,
            }))
        }
        Command::Check(args) => {
            let workflow = build_workflow(platform, &config)?;
            let check = workflow
                .interpreter()
                .check_command(&args.repo, args.pr)
                .await
                .context("command check failed")?;
            let command = match check {
                CommandCheck::ApplyAll(cmd) => Some(cmd),
                CommandCheck::Idle => None,
            };
            print_json(json!({
                "repo": args.repo,
                "pr_number": args.pr,
                "command": command,
            }))
        }
        Command::Apply(args) => {
            let workflow = build_workflow(platform, &config)?;
            let applied = workflow
                .apply(&args.repo, args.pr)
                .await
                .context("apply-all failed")?;
            print_json(json!({
                "repo": args.repo,
                "pr_number": args.pr,
                "applied": applied,
            }))
        }
        Command::Run(args) => {
            let workflow = build_workflow(platform, &config)?;
            let outcome = workflow
                .process_commands(&args.repo, args.pr)
                .await
                .context("command cycle failed")?;
            let (status, command) = match outcome {
                CycleOutcome::NoCommand => ("no_command", None),
                CycleOutcome::Applied(cmd) => ("applied", Some(cmd)),
                CycleOutcome::ApplyFailed(cmd) => ("apply_failed", Some(cmd)),
                CycleOutcome::NothingToApply(cmd) => ("nothing_to_apply", Some(cmd)),
                CycleOutcome::Deferred(cmd) => ("deferred", Some(cmd)),
            };
            print_json(json!({
                "repo": args.repo,
                "pr_number": args.pr,
                "outcome": status,
                "command": command,
            }))
        }
        Command::Watch => watch(platform, config, &cli.config, &log_level).await,
    }
}

/// Install the stderr subscriber plus, when `log_dir` is set, a daily
/// rolling file. The returned guard must live until exit.
fn init_tracing(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "conflictbot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            Ok(None)
        }
    }
}

/// Open the state database under `data_dir` and wire the workflow.
fn build_workflow(
    platform: Arc<dyn HostingPlatform>,
    config: &AppConfig,
) -> Result<PullRequestWorkflow> {
    let db = Database::open_in(&config.daemon.data_dir).with_context(|| {
        format!(
            "failed to open state database in {}",
            config.daemon.data_dir.display()
        )
    })?;
    let store: Arc<dyn ResolutionStore> = Arc::new(db);

    let oracle = Arc::new(
        HttpResolverOracle::new(&config.resolver).context("failed to build resolver client")?,
    );
    PullRequestWorkflow::from_config(platform, store, oracle, config)
        .context("failed to initialize workflow")
}

fn print_json(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn watch(
    platform: Arc<dyn HostingPlatform>,
    config: AppConfig,
    config_path: &Path,
    log_level: &str,
) -> Result<()> {
    info!("========================================");
    info!("  conflictbot v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", config_path.display());
    info!("GitHub API    : {}", config.github.api_url);
    info!("Resolver      : {}", config.resolver.url);
    info!("Poll interval : {}s", config.daemon.poll_interval_secs);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Log level     : {}", log_level);
    info!("========================================");

    if config.watch.is_empty() {
        warn!("no [[watch]] targets configured, the scheduler will idle");
    }

    let workflow = Arc::new(build_workflow(platform, &config)?);
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let scheduler = scheduler::Scheduler::new(
        workflow,
        config.watch.clone(),
        Duration::from_secs(config.daemon.poll_interval_secs),
    );
    let stats = scheduler.stats();

    let scheduler_shutdown = shutdown.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    signals::wait_for_shutdown().await;
    info!("shutdown signal received, stopping...");
    // notify_one stores a permit, so a tick in progress still sees it.
    shutdown.notify_one();

    match tokio::time::timeout(Duration::from_secs(30), scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => warn!("scheduler did not stop within 30s, forcing shutdown"),
    }

    info!(
        ticks = stats.total_ticks.load(Ordering::SeqCst),
        applied = stats.total_applied.load(Ordering::SeqCst),
        errors = stats.total_errors.load(Ordering::SeqCst),
        "conflictbot stopped"
    );
    Ok(())
}

//! simctl - launch and supervise long-running simulation jobs
//!
//! Commands:
//! - `validate`: check a requested date range against an input profile
//! - `run`: validate, launch the engine and stream its output until it exits
//! - `report`: record a job's status in the status source of record
//! - `status`: show the recorded status of a job
//!
//! Uses XDG Base Directory specification for file locations:
//! - Status database: $XDG_DATA_HOME/simctl/status.db (~/.local/share/simctl/status.db)
//! - Config: $XDG_CONFIG_HOME/simctl/config.toml (~/.config/simctl/config.toml)
//! - Logs: $XDG_STATE_HOME/simctl/ (~/.local/state/simctl/)

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use simctl_core::format::format_runtime;
use simctl_core::{
    validate_range, Config, JobId, JobRegistry, JobSnapshot, JobStatus, LaunchCommand,
    StatusDatabase, TimeRange, ValidatedPlan,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Overrides the configured status database. Exported to launched jobs so
/// that `simctl report` inside the job writes where the supervisor reads.
const ENV_STATUS_DB: &str = "SIMCTL_STATUS_DB";

#[derive(Parser)]
#[command(name = "simctl")]
#[command(about = "Launch and supervise long-running simulation jobs")]
#[command(version)]
struct Args {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct RangeArgs {
    /// Input profile CSV; the first column holds the sample timestamps
    #[arg(short, long)]
    profile: PathBuf,

    /// First requested timestamp (YYYY-MM-DD or YYYY-MM-DD HH:MM[:SS])
    #[arg(short, long)]
    start: String,

    /// Last requested timestamp; a bare date covers the whole day
    #[arg(short, long)]
    end: String,

    /// Steps per interval
    #[arg(short = 'n', long)]
    interval: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a requested range and print the resulting plan
    Validate {
        #[command(flatten)]
        range: RangeArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Launch a job and stream its output until it exits
    Run {
        /// Scenario id
        id: u64,

        #[command(flatten)]
        range: RangeArgs,

        /// Working directory for the job
        #[arg(short = 'C', long)]
        workdir: Option<PathBuf>,

        /// Extra environment for the job, as KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Poll interval in milliseconds (default: from config)
        #[arg(long)]
        poll: Option<u64>,

        /// Stop polling after this many polls and leave the job running
        #[arg(long)]
        max_polls: Option<u64>,

        /// Program and arguments; `{id}`, `{start_index}`, `{step_count}`
        /// and `{interval}` are substituted
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Record a job's status
    Report {
        /// Scenario id
        id: u64,

        /// Status to record (pending, running, finished, failed, extracted)
        status: String,
    },

    /// Show the recorded status of a job
    Status {
        /// Scenario id
        id: u64,
    },
}

fn parse_env_pair(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        simctl_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Validate { range, json } => cmd_validate(&range, json),
        Command::Run {
            id,
            range,
            workdir,
            env,
            poll,
            max_polls,
            command,
        } => {
            let opts = RunOptions {
                workdir,
                env,
                poll,
                max_polls,
                verbose: args.verbose,
            };
            cmd_run(&config, JobId(id), &range, &command, opts)
        }
        Command::Report { id, status } => cmd_report(&config, JobId(id), &status),
        Command::Status { id } => cmd_status(&config, JobId(id)),
    }
}

/// Status database path, honouring the environment override.
fn status_db_path(config: &Config) -> PathBuf {
    std::env::var_os(ENV_STATUS_DB)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.status_database_path())
}

fn open_status_db(config: &Config) -> Result<(StatusDatabase, PathBuf)> {
    let path = status_db_path(config);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = StatusDatabase::open(&path)
        .with_context(|| format!("failed to open status database at {}", path.display()))?;
    db.migrate().context("failed to run database migrations")?;
    Ok((db, path))
}

fn load_plan(range: &RangeArgs) -> Result<ValidatedPlan> {
    let time_range = TimeRange::from_profile_path(&range.profile)
        .with_context(|| format!("failed to read profile {}", range.profile.display()))?;
    let plan = validate_range(&time_range, &range.start, &range.end, range.interval)?;
    Ok(plan)
}

fn cmd_validate(range: &RangeArgs, json: bool) -> Result<()> {
    let plan = load_plan(range)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("Start index:  {}", plan.start_index);
        println!("Step count:   {}", plan.step_count);
        println!("Interval:     {}", plan.interval);
        println!("Total steps:  {}", plan.total_steps());
    }

    Ok(())
}

struct RunOptions {
    workdir: Option<PathBuf>,
    env: Vec<(String, String)>,
    poll: Option<u64>,
    max_polls: Option<u64>,
    verbose: bool,
}

fn cmd_run(
    config: &Config,
    id: JobId,
    range: &RangeArgs,
    argv: &[String],
    opts: RunOptions,
) -> Result<()> {
    let plan = load_plan(range)?;

    let (db, db_path) = open_status_db(config)?;

    let (program, program_args) = argv.split_first().context("no program given")?;
    let mut command = LaunchCommand::new(program.as_str())
        .args(program_args.iter().map(String::as_str))
        .env(ENV_STATUS_DB, db_path.to_string_lossy())
        .with_plan(id, &plan);
    if let Some(dir) = opts.workdir {
        command = command.working_dir(dir);
    }
    for (key, value) in opts.env {
        command = command.env(key, value);
    }

    let registry = JobRegistry::from_config(Arc::new(db), &config.jobs);
    let launched = registry
        .launch(id, &command)
        .with_context(|| format!("failed to launch job {id}"))?;

    if opts.verbose {
        eprintln!("Launched job {} (pid {}): {}", id, launched.pid, launched.command);
        eprintln!(
            "Plan: start index {}, {} interval(s) of {} steps",
            plan.start_index, plan.step_count, plan.interval
        );
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let poll_duration = Duration::from_millis(opts.poll.unwrap_or(config.jobs.poll_interval_ms));
    let mut cursor = OutputCursor::default();
    let mut polls = 0u64;

    let finished = loop {
        let snapshot = registry
            .get(id)
            .with_context(|| format!("job {id} is no longer tracked"))?;
        cursor.emit(&snapshot);

        if snapshot.streams_closed && snapshot.exit_code.is_some() {
            break snapshot;
        }

        polls += 1;
        if !running.load(Ordering::SeqCst) {
            eprintln!("\nStopped polling; job {} is still running (pid {})", id, snapshot.pid);
            tracing::info!(job_id = %id, pid = snapshot.pid, "Polling interrupted");
            return Ok(());
        }
        if opts.max_polls.is_some_and(|max| polls >= max) {
            eprintln!(
                "Gave up after {} poll(s); job {} is still running (pid {})",
                polls, id, snapshot.pid
            );
            tracing::info!(job_id = %id, polls, "Polling limit reached");
            return Ok(());
        }

        thread::sleep(poll_duration);
    };

    let runtime = format_runtime(Utc::now() - finished.started_at);
    let exit_code = finished
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "-".to_string());
    eprintln!(
        "Job {} exited: status {}, exit code {}, runtime {}",
        id, finished.status, exit_code, runtime
    );
    tracing::info!(
        job_id = %id,
        status = %finished.status,
        exit_code = ?finished.exit_code,
        %runtime,
        "Job exited"
    );

    if finished.status == JobStatus::Failed {
        bail!("job {id} reported failure");
    }
    match finished.exit_code {
        Some(0) | None => Ok(()),
        Some(code) => bail!("job {id} exited with code {code}"),
    }
}

/// Tracks how many lines of each stream have been printed, so each poll
/// only prints what is new. Lines the retention cap discarded before they
/// could be printed are reported as skipped.
#[derive(Default)]
struct OutputCursor {
    output_seen: u64,
    errors_seen: u64,
}

impl OutputCursor {
    fn emit(&mut self, snapshot: &JobSnapshot) {
        for line in fresh_lines(
            &snapshot.output,
            snapshot.dropped_output,
            &mut self.output_seen,
        ) {
            println!("{line}");
        }
        for line in fresh_lines(
            &snapshot.errors,
            snapshot.dropped_errors,
            &mut self.errors_seen,
        ) {
            eprintln!("{line}");
        }
    }
}

fn fresh_lines<'a>(lines: &'a [String], dropped: u64, seen: &mut u64) -> Vec<&'a str> {
    let total = dropped + lines.len() as u64;
    let new = total.saturating_sub(*seen);
    let available = (lines.len() as u64).min(new);
    if new > available {
        eprintln!("[{} line(s) skipped]", new - available);
    }
    *seen = total;
    lines[lines.len() - available as usize..]
        .iter()
        .map(String::as_str)
        .collect()
}

fn cmd_report(config: &Config, id: JobId, status: &str) -> Result<()> {
    let status = status.trim();
    if status.is_empty() {
        bail!("status must not be empty");
    }
    if JobStatus::parse(status) == JobStatus::Unknown {
        eprintln!("Warning: '{status}' is not a recognised status; it will read as unknown");
    }

    let (db, _) = open_status_db(config)?;
    db.set_status(id, status)
        .with_context(|| format!("failed to record status for job {id}"))?;
    tracing::info!(job_id = %id, status, "Status reported");
    Ok(())
}

fn cmd_status(config: &Config, id: JobId) -> Result<()> {
    let (db, _) = open_status_db(config)?;
    match db.raw_status(id)? {
        Some(raw) => {
            println!("{}", JobStatus::parse(&raw));
            Ok(())
        }
        None => bail!("no status recorded for job {id}"),
    }
}

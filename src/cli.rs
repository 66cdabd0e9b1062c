//! Command line interface.
//!
//! [`ShooterCli`] can be embedded into a custom CLI struct, which is how a
//! binary with its own [`RequestExecutor`] reuses the flags:
//!
//! ```no_run
//! use clap::Parser;
//! use shooter::cli::ShooterCli;
//!
//! #[derive(Parser)]
//! pub struct Opts {
//!     /// Database to query.
//!     #[clap(long)]
//!     pub database: String,
//!
//!     #[command(flatten)]
//!     pub shooter: ShooterCli,
//! }
//! ```
//!
//! Values come from, in increasing priority: built-in defaults, the config
//! file given with `--config`, `SHOOTER_*` environment variables and flags.
use std::{
    fs::File,
    io::{stderr, stdout},
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
};

use clap::{
    Parser, ValueEnum,
    builder::{
        Styles,
        styling::{AnsiColor, Effects},
    },
};
use tokio::signal;

use crate::{
    config::{ConfigFile, RunConfig, load_config_file},
    error::{ConfigError, ShooterError},
    executor::RequestExecutor,
    orchestrator::Orchestrator,
    progress::WriterProgress,
    rate::{RateProfile, Segment},
    report::{EXIT_CONFIG, EXIT_FAILED, RunReport},
    reporter::{JsonReporter, RunReporter, TextReporter},
    retry::RetryPolicy,
    sink,
    target::{Header, RequestTemplate, TargetDescriptor},
};

#[derive(Parser, Clone, Debug)]
#[clap(
    styles(Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default())
    )
)]
#[allow(missing_docs)]
pub struct ShooterCli {
    /// Target endpoints
    ///
    /// Replaces the targets of the config file when given.
    pub targets: Vec<String>,

    /// Config file, .toml or .json
    #[clap(long, env = "SHOOTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Request method for the targets given on the command line
    #[clap(long, short = 'X', default_value = "GET")]
    pub method: String,

    /// Path appended to the targets given on the command line
    #[clap(long, default_value = "")]
    pub path: String,

    /// Request header, as 'NAME: VALUE'
    #[clap(long = "header", short = 'H')]
    pub headers: Vec<Header>,

    /// Request body
    #[clap(long)]
    pub body: Option<String>,

    /// Number of concurrent workers [default: 1]
    #[clap(long, short = 'c', env = "SHOOTER_CONCURRENCY")]
    pub concurrency: Option<NonZeroU32>,

    /// Number of requests
    ///
    /// When set, the run stops after issuing that many requests.
    #[clap(long, short = 'n', env = "SHOOTER_COUNT")]
    pub count: Option<NonZeroU64>,

    /// Duration of the run
    ///
    /// When set, the run stops after that long.
    ///
    /// Examples: -d 10s, -d 5m, -d 1h
    #[clap(long, short = 'd', env = "SHOOTER_DURATION")]
    pub duration: Option<humantime::Duration>,

    /// Constant rate, in requests per second
    ///
    /// 0 sends as fast as concurrency allows, which is also the default.
    #[clap(long, short = 'r', env = "SHOOTER_RATE", conflicts_with = "stages")]
    pub rate: Option<f64>,

    /// Rate stage, as DURATION:RATE or DURATION:FROM..TO
    ///
    /// Repeat to build a staged profile. The last stage may be a bare RATE,
    /// which keeps going until another stop condition fires.
    ///
    /// Examples: --stage 30s:0..100 --stage 5m:100 --stage 30s:100..0
    #[clap(long = "stage")]
    pub stages: Vec<Segment>,

    /// Per-request timeout [default: 30s]
    #[clap(long, short = 't', env = "SHOOTER_TIMEOUT")]
    pub timeout: Option<humantime::Duration>,

    /// Extra attempts after a transport or protocol error
    #[clap(long, env = "SHOOTER_RETRIES")]
    pub retries: Option<u32>,

    /// Delays between attempts, the last one repeats
    ///
    /// Examples: --backoff 100ms --backoff 100ms,500ms,2s
    #[clap(long, value_delimiter = ',')]
    pub backoff: Vec<humantime::Duration>,

    /// Interval between progress lines [default: 1s]
    #[clap(long, env = "SHOOTER_PROGRESS")]
    pub progress: Option<humantime::Duration>,

    /// Highest error rate, in [0, 1], for the run to pass
    #[clap(long, env = "SHOOTER_MAX_ERROR_RATE")]
    pub max_error_rate: Option<f64>,

    /// Write every outcome to this file, as JSON lines
    #[clap(long, env = "SHOOTER_OUTCOME_LOG")]
    pub outcome_log: Option<PathBuf>,

    /// Do not print progress lines
    #[clap(long, short = 'q')]
    pub quiet: bool,

    /// Output format for the report
    #[clap(short, long, value_enum, default_value_t = ReportFormat::Text, ignore_case = true)]
    pub output: ReportFormat,

    /// Output file path for the report
    ///
    /// When set, the report will be written to the specified file instead of stdout.
    #[clap(long, short = 'O')]
    pub output_file: Option<PathBuf>,
}

/// Report format.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ReportFormat {
    /// Report in plain text format. See [`TextReporter`].
    Text,

    /// Report in JSON format. See [`JsonReporter`].
    Json,
}

/// Everything a run needs, resolved from the config file and the flags.
#[derive(Clone, Debug)]
pub struct Settings {
    /// The run configuration.
    pub run: RunConfig,
    /// Where to write the outcome log.
    pub outcome_log: Option<PathBuf>,
}

impl ShooterCli {
    /// Merges the config file (if any) with the flags.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let file = match &self.config {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut run = file.to_run_config()?;
        self.apply(&mut run);
        Ok(Settings { run, outcome_log: self.outcome_log.clone().or(file.outcome_log) })
    }

    fn apply(&self, run: &mut RunConfig) {
        if !self.targets.is_empty() {
            let template = RequestTemplate {
                method: self.method.clone(),
                path: self.path.clone(),
                headers: self.headers.clone(),
                body: self.body.clone(),
            };
            run.targets = self
                .targets
                .iter()
                .map(|endpoint| TargetDescriptor::new(endpoint).with_template(template.clone()))
                .collect();
        }
        if let Some(rate) = self.rate {
            run.rate = RateProfile::constant(rate);
        }
        if !self.stages.is_empty() {
            run.rate = RateProfile::staged(self.stages.clone());
        }
        if let Some(concurrency) = self.concurrency {
            run.concurrency = concurrency.get();
        }
        if let Some(count) = self.count {
            run.stop.count = Some(count.get());
        }
        if let Some(duration) = self.duration {
            run.stop.duration = Some(duration.into());
        }
        if let Some(timeout) = self.timeout {
            run.timeout = timeout.into();
        }
        if self.retries.is_some() || !self.backoff.is_empty() {
            let retries = self.retries.unwrap_or_else(|| run.retry.max_attempts() - 1);
            let backoff = match self.backoff.is_empty() {
                true => run.retry.backoff().to_vec(),
                false => self.backoff.iter().map(|&d| d.into()).collect(),
            };
            let attempts = NonZeroU32::new(retries.saturating_add(1)).unwrap_or(NonZeroU32::MIN);
            run.retry = RetryPolicy::new(attempts, backoff);
        }
        if let Some(progress) = self.progress {
            run.progress_interval = progress.into();
        }
        if let Some(max) = self.max_error_rate {
            run.max_error_rate = Some(max);
        }
    }
}

/// Runs with the given CLI options and executor, then prints the report.
///
/// The first Ctrl-C stops the run gracefully, the second one aborts it.
pub async fn run(cli: &ShooterCli, settings: Settings, executor: impl RequestExecutor) -> anyhow::Result<RunReport> {
    let Settings { run: config, outcome_log } = settings;

    let mut orchestrator = Orchestrator::new(config, executor);
    if !cli.quiet {
        orchestrator = orchestrator.with_progress(WriterProgress::new(stderr()));
    }
    let writer = match outcome_log {
        Some(path) => {
            let (tx, writer) = sink::outcome_log(&path).await?;
            orchestrator = orchestrator.with_outcome_log(tx);
            Some(writer)
        }
        None => None,
    };

    let control = orchestrator.control();
    let interrupts = tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("interrupted, draining in-flight requests (Ctrl-C again to abort)");
        control.stop();
        if signal::ctrl_c().await.is_ok() {
            control.abort();
        }
    });

    let report = orchestrator.run().await;
    interrupts.abort();
    let report = report?;

    let reporter: &dyn RunReporter = match cli.output {
        ReportFormat::Text => &TextReporter,
        ReportFormat::Json => &JsonReporter,
    };
    match &cli.output_file {
        Some(path) => reporter.print(&mut File::create(path)?, &report)?,
        None => reporter.print(&mut stdout(), &report)?,
    }

    // the report stands on its own, a broken outcome log only loses the log
    if let Some(writer) = writer {
        match writer.await {
            Ok(Ok(lines)) => tracing::debug!(lines, "outcome log written"),
            Ok(Err(e)) => tracing::warn!(error = %e, "outcome log is incomplete"),
            Err(e) => tracing::warn!(error = %e, "outcome log writer failed"),
        }
    }

    Ok(report)
}

/// Process exit status for the result of [`run`].
///
/// A rejected configuration maps to [`EXIT_CONFIG`] and any other failure to
/// [`EXIT_FAILED`]. A report decides on its own, see [`RunReport::exit_code`].
pub fn exit_code(result: &anyhow::Result<RunReport>) -> u8 {
    match result {
        Ok(report) => report.exit_code(),
        Err(e) if is_config_error(e) => EXIT_CONFIG,
        Err(_) => EXIT_FAILED,
    }
}

fn is_config_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ConfigError>().is_some()
        || matches!(e.downcast_ref::<ShooterError>(), Some(ShooterError::Config(_)))
}

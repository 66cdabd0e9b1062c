//! The run orchestrator: one execution from configuration to report.
use std::{future::pending, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    select,
    sync::{mpsc::UnboundedSender, watch},
};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregator::Aggregator,
    clock::{Clock, Ticker},
    config::RunConfig,
    error::Result,
    executor::RequestExecutor,
    outcome::Outcome,
    phase::{RunState, StateTracker},
    pool::{PoolOpts, WorkerPool},
    progress::{ProgressMeter, ProgressObserver},
    rate::RateController,
    report::{RunMeta, RunReport},
    target::TargetSet,
};

/// Handle to stop a run from outside.
///
/// Cloning is cheap; every clone controls the same run.
#[derive(Clone, Debug)]
pub struct RunControl {
    drain: CancellationToken,
    abort: CancellationToken,
}

impl RunControl {
    pub(crate) fn new() -> Self {
        let abort = CancellationToken::new();
        Self { drain: abort.child_token(), abort }
    }

    /// Stops issuing requests and lets in-flight ones finish.
    pub fn stop(&self) {
        self.drain.cancel();
    }

    /// Abandons in-flight requests. Implies [`stop`](Self::stop).
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Returns `true` once the run was stopped or aborted.
    pub fn is_draining(&self) -> bool {
        self.drain.is_cancelled()
    }

    /// Returns `true` once the run was aborted.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub(crate) fn drain_token(&self) -> &CancellationToken {
        &self.drain
    }

    pub(crate) fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }
}

/// Runs one load generation from a [`RunConfig`] and a [`RequestExecutor`].
///
/// ```no_run
/// # async fn demo(executor: impl shooter::RequestExecutor) -> shooter::Result<()> {
/// use std::time::Duration;
///
/// use shooter::{Orchestrator, RateProfile, RunConfig, TargetDescriptor};
///
/// let config = RunConfig::new(vec![TargetDescriptor::new("http://localhost:8080")])
///     .with_rate(RateProfile::constant(50.0))
///     .with_concurrency(8)
///     .with_duration(Duration::from_secs(10));
///
/// let report = Orchestrator::new(config, executor).run().await?;
/// println!("{} requests, {:.2}% errors", report.total(), 100.0 * report.error_rate());
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    config: RunConfig,
    executor: Arc<dyn RequestExecutor>,
    control: RunControl,
    state: StateTracker,
    progress: Option<Box<dyn ProgressObserver>>,
    outcome_log: Option<UnboundedSender<Outcome>>,
}

impl Orchestrator {
    /// Prepares a run. Nothing happens until [`run`](Self::run).
    pub fn new(config: RunConfig, executor: impl RequestExecutor) -> Self {
        Self {
            config,
            executor: Arc::new(executor),
            control: RunControl::new(),
            state: StateTracker::new(),
            progress: None,
            outcome_log: None,
        }
    }

    /// Emits a progress sample every `progress_interval` while running.
    pub fn with_progress(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.progress = Some(Box::new(observer));
        self
    }

    /// Streams every outcome to `log` as it is recorded.
    pub fn with_outcome_log(mut self, log: UnboundedSender<Outcome>) -> Self {
        self.outcome_log = Some(log);
        self
    }

    /// A handle to stop the run.
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    /// Observes state transitions.
    pub fn state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Executes the run and returns its report.
    ///
    /// Fails before anything is sent when the configuration is invalid. A
    /// force-stopped run still returns a report, in the `Cancelled` state.
    pub async fn run(self) -> Result<RunReport> {
        let Self { config, executor, control, state, mut progress, outcome_log } = self;
        config.validate()?;

        let started_at = Utc::now();
        state.advance(RunState::Starting);

        let RunConfig { targets, rate, concurrency, stop, timeout, retry, progress_interval, max_error_rate } =
            config;
        let targets = Arc::new(TargetSet::new(targets)?);
        let target_names = targets.iter().map(|t| t.name.clone()).collect();
        let profile = rate.to_string();
        tracing::info!(concurrency, %profile, targets = targets.len(), "starting run");

        let clock = Clock::new_stopped();
        let aggregator = match outcome_log {
            Some(log) => Aggregator::new(targets.len()).with_log(log),
            None => Aggregator::new(targets.len()),
        };
        let aggregator = Arc::new(aggregator);
        let rate = Arc::new(RateController::new(rate, stop.count, clock.clone()));
        let opts = PoolOpts { clock: clock.clone(), concurrency, timeout, retry: Arc::new(retry) };
        let pool = WorkerPool::new(
            executor,
            targets,
            rate.clone(),
            aggregator.clone(),
            opts,
            control.clone(),
            state.clone(),
        );
        let in_flight = pool.in_flight();
        let mut pool = tokio::spawn(pool.run());

        let mut ticker = clock.ticker(progress_interval);
        let mut meter = ProgressMeter::default();
        let (mut draining, mut aborted) = (false, false);

        let joined = loop {
            select! {
                biased;
                _ = control.abort_token().cancelled(), if !aborted => {
                    aborted = true;
                    tracing::warn!(in_flight = in_flight.current(), "run aborted");
                    state.advance(RunState::Cancelled);
                }
                _ = control.drain_token().cancelled(), if !draining => {
                    draining = true;
                    tracing::debug!(in_flight = in_flight.current(), "draining");
                    state.advance(RunState::Draining);
                }
                _ = deadline(&clock, stop.duration), if !draining => control.stop(),
                at = tick(&mut ticker, progress.is_some()), if !draining => {
                    if let Some(observer) = progress.as_mut() {
                        observer.observe(&meter.sample(at, &aggregator.snapshot(), in_flight.current()));
                    }
                }
                joined = &mut pool => break joined,
            }
        };
        joined??;

        settle(&state, control.is_aborted());

        let elapsed = clock.elapsed();
        let requested = rate
            .profile()
            .expected_permits(elapsed)
            .map(|n| stop.count.map_or(n, |count| n.min(count as f64)));
        let meta = RunMeta {
            started_at,
            state: state.get(),
            concurrency,
            elapsed,
            profile,
            requested,
            peak_in_flight: in_flight.peak(),
            targets: target_names,
            max_error_rate,
        };

        let report = aggregator.finalize(meta);
        tracing::info!(
            state = %report.meta.state,
            total = report.total(),
            sent = rate.issued() - in_flight.discarded(),
            discarded = in_flight.discarded(),
            ?elapsed,
            "run finished"
        );
        Ok(report)
    }
}

/// Moves a run whose workers have all returned into its terminal state.
fn settle(state: &StateTracker, aborted: bool) {
    if aborted {
        state.advance(RunState::Cancelled);
    } else {
        state.advance(RunState::Draining);
        state.advance(RunState::Finished);
    }
}

async fn deadline(clock: &Clock, duration: Option<Duration>) {
    match duration {
        Some(duration) => clock.sleep_until(duration).await,
        None => pending().await,
    }
}

async fn tick(ticker: &mut Ticker, enabled: bool) -> Duration {
    if enabled { ticker.tick().await } else { pending().await }
}

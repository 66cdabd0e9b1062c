//! The worker pool: a fixed set of workers turning permits into outcomes.
use std::{
    any::Any,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    select,
    sync::Barrier,
    task::{JoinError, JoinSet},
    time,
};

use crate::{
    aggregator::Aggregator,
    clock::Clock,
    error::{RequestError, Result},
    executor::RequestExecutor,
    orchestrator::RunControl,
    outcome::{Outcome, OutcomeKind, Response},
    phase::{RunState, StateTracker},
    rate::{Permit, RateController},
    retry::{Attempt, RetryPolicy},
    target::{TargetDescriptor, TargetSet},
};

/// Per-run options of the pool.
#[derive(Clone, Debug)]
pub(crate) struct PoolOpts {
    /// Run clock, started once every worker is ready.
    pub clock: Clock,
    /// Number of workers.
    pub concurrency: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retry policy.
    pub retry: Arc<RetryPolicy>,
}

/// Current and peak number of requests in flight, plus the permits that were
/// drawn but never sent.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
    discarded: AtomicU64,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }

    pub(crate) fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Permits dropped unsent because the run started draining.
    pub(crate) fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result of one attempt as seen by the pool.
enum Exchange {
    /// The executor answered or the attempt timed out.
    Done(Result<Response, RequestError>),
    /// The executor panicked. Terminal, never retried.
    Fault(RequestError),
    /// The run was force-cancelled while the attempt was running.
    Aborted,
}

/// A bounded set of workers sharing one rate controller.
#[derive(Clone)]
pub(crate) struct WorkerPool {
    executor: Arc<dyn RequestExecutor>,
    targets: Arc<TargetSet>,
    rate: Arc<RateController>,
    aggregator: Arc<Aggregator>,
    opts: PoolOpts,
    control: RunControl,
    state: StateTracker,
    in_flight: Arc<InFlight>,
}

impl WorkerPool {
    pub(crate) fn new(
        executor: Arc<dyn RequestExecutor>,
        targets: Arc<TargetSet>,
        rate: Arc<RateController>,
        aggregator: Arc<Aggregator>,
        opts: PoolOpts,
        control: RunControl,
        state: StateTracker,
    ) -> Self {
        Self { executor, targets, rate, aggregator, opts, control, state, in_flight: Arc::default() }
    }

    pub(crate) fn in_flight(&self) -> Arc<InFlight> {
        self.in_flight.clone()
    }

    /// Runs every worker to completion.
    ///
    /// Workers stop once the rate controller is exhausted or the run drains.
    pub(crate) async fn run(self) -> Result<()> {
        let workers = self.opts.concurrency;

        // The leader (last worker to arrive) starts the clock
        let barrier = Arc::new(Barrier::new(workers as usize));

        let mut set = JoinSet::new();
        for worker in 0..workers {
            set.spawn(self.clone().work(worker, barrier.clone()));
        }
        join_all(&mut set).await
    }

    async fn work(self, worker: u32, barrier: Arc<Barrier>) {
        if barrier.wait().await.is_leader() {
            self.opts.clock.start();
            self.state.advance(RunState::Running);
        }
        tracing::debug!(worker, "worker started");

        let drain = self.control.drain_token();
        while !drain.is_cancelled() {
            let Some(permit) = self.rate.next() else { break };

            select! {
                biased;
                _ = drain.cancelled() => {
                    self.in_flight.discarded.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(worker, seq = permit.seq, "discarding permit while draining");
                    break;
                }
                _ = self.opts.clock.sleep_until(permit.scheduled_at) => (),
            }

            let outcome = self.shoot(permit).await;
            self.aggregator.record(outcome);
        }

        tracing::debug!(worker, "worker stopped");
    }

    /// Sends the request of one permit, retrying per policy, and returns its
    /// single outcome.
    async fn shoot(&self, permit: Permit) -> Outcome {
        let _in_flight = self.in_flight.enter();
        let (target, descriptor) = self.targets.pick(permit.seq);
        let issued_at = self.opts.clock.elapsed();

        let mut attempt = Attempt::start();
        let (settled, attempts) = loop {
            attempt = match attempt {
                Attempt::Attempting(n) => match self.exchange(descriptor).await {
                    Exchange::Done(result) => {
                        Attempt::after(n, result, &self.opts.retry, self.control.is_draining())
                    }
                    Exchange::Fault(e) => Attempt::Terminal { result: Err(e), attempts: n },
                    Exchange::Aborted => break (None, n),
                },
                Attempt::Backoff { next, delay, last } => {
                    tracing::warn!(seq = permit.seq, endpoint = %descriptor.endpoint, attempt = next, ?delay, error = %last, "retrying request");
                    select! {
                        biased;
                        _ = self.control.drain_token().cancelled() => {
                            if self.control.is_aborted() {
                                break (None, next - 1);
                            }
                            Attempt::Terminal { result: Err(last), attempts: next - 1 }
                        }
                        _ = self.opts.clock.sleep(delay) => Attempt::Attempting(next),
                    }
                }
                Attempt::Terminal { result, attempts } => break (Some(result), attempts),
            };
        };

        let completed_at = self.opts.clock.elapsed();
        let (kind, status, bytes, error) = match settled {
            Some(Ok(response)) => (OutcomeKind::Success, response.status, response.bytes, None),
            Some(Err(e)) => (OutcomeKind::from(&e), e.status(), 0, Some(e.to_string())),
            None => (OutcomeKind::Cancelled, None, 0, Some("cancelled by force stop".to_string())),
        };

        Outcome { target, seq: permit.seq, issued_at, completed_at, kind, status, bytes, error, attempts }
    }

    /// Runs one attempt in its own task, so a panicking executor cannot take
    /// the worker down with it.
    async fn exchange(&self, target: &Arc<TargetDescriptor>) -> Exchange {
        let executor = self.executor.clone();
        let target = target.clone();
        let timeout = self.opts.timeout;

        let mut handle =
            tokio::spawn(async move { time::timeout(timeout, executor.execute(&target, timeout)).await });

        select! {
            biased;
            _ = self.control.abort_token().cancelled() => {
                handle.abort();
                Exchange::Aborted
            }
            joined = &mut handle => match joined {
                Ok(Ok(result)) => Exchange::Done(result),
                Ok(Err(_)) => Exchange::Done(Err(RequestError::Timeout(timeout))),
                Err(e) => {
                    let detail = format!("internal fault: {}", fault_message(e));
                    tracing::error!(%detail, "request executor failed");
                    Exchange::Fault(RequestError::protocol(detail))
                }
            },
        }
    }
}

fn fault_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload: Box<dyn Any + Send> = e.into_panic();
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => msg.to_string(),
            Err(_) => "executor panicked".to_string(),
        },
    }
}

async fn join_all(set: &mut JoinSet<()>) -> Result<()> {
    while let Some(res) = set.join_next().await {
        res?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;
    use crate::{rate::RateProfile, test_support};

    struct Fixture {
        pool: WorkerPool,
        rate: Arc<RateController>,
        aggregator: Arc<Aggregator>,
        control: RunControl,
        clock: Clock,
    }

    fn fixture(executor: impl RequestExecutor, count: u64, concurrency: u32, retry: RetryPolicy) -> Fixture {
        paced_fixture(executor, RateProfile::unlimited(), count, concurrency, retry)
    }

    fn paced_fixture(
        executor: impl RequestExecutor,
        profile: RateProfile,
        count: u64,
        concurrency: u32,
        retry: RetryPolicy,
    ) -> Fixture {
        let clock = Clock::new_stopped();
        let targets = Arc::new(TargetSet::new(vec![TargetDescriptor::new("t")]).unwrap());
        let rate = Arc::new(RateController::new(profile, Some(count), clock.clone()));
        let aggregator = Arc::new(Aggregator::new(1));
        let control = RunControl::new();
        let opts = PoolOpts {
            clock: clock.clone(),
            concurrency,
            timeout: Duration::from_secs(1),
            retry: Arc::new(retry),
        };
        let pool = WorkerPool::new(
            Arc::new(executor),
            targets,
            rate.clone(),
            aggregator.clone(),
            opts,
            control.clone(),
            StateTracker::new(),
        );
        Fixture { pool, rate, aggregator, control, clock }
    }

    #[tokio::test(start_paused = true)]
    async fn every_permit_yields_one_outcome() {
        let f = fixture(test_support::Instant::default(), 25, 4, RetryPolicy::none());
        f.pool.run().await.unwrap();

        let stats = f.aggregator.snapshot();
        assert_eq!(stats.total(), 25);
        assert_eq!(stats.count(OutcomeKind::Success), 25);
        assert_eq!(stats.overall.bytes, 25 * 42);
        assert!(f.clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_never_exceeds_concurrency() {
        let executor = Arc::new(test_support::Slow::new(Duration::from_millis(10)));
        let f = fixture(executor.clone(), 40, 3, RetryPolicy::none());
        let in_flight = f.pool.in_flight();
        f.pool.run().await.unwrap();

        assert_eq!(f.aggregator.snapshot().total(), 40);
        assert_eq!(executor.peak.load(Ordering::SeqCst), 3);
        assert_eq!(in_flight.peak(), 3);
        assert_eq!(in_flight.current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_counted_apart_from_requests() {
        let retry = RetryPolicy::new(NonZeroU32::new(3).unwrap(), vec![Duration::from_millis(100)]);
        let f = fixture(test_support::Flaky::new(2), 1, 1, retry);
        f.pool.run().await.unwrap();

        let stats = f.aggregator.snapshot();
        assert_eq!(stats.total(), 1);
        assert_eq!(stats.count(OutcomeKind::Success), 1);
        assert_eq!(stats.retries, 2);
        // two backoff delays, measured from the first attempt
        assert_eq!(stats.overall.latency, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_the_last_error() {
        let retry = RetryPolicy::new(NonZeroU32::new(2).unwrap(), vec![]);
        let f = fixture(test_support::Flaky::new(5), 1, 1, retry);
        f.pool.run().await.unwrap();

        let stats = f.aggregator.snapshot();
        assert_eq!(stats.count(OutcomeKind::TransportError), 1);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.errors.get("transport error: connection reset"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_terminal() {
        let retry = RetryPolicy::new(NonZeroU32::new(3).unwrap(), vec![]);
        let f = fixture(test_support::Hang, 2, 2, retry);
        f.pool.run().await.unwrap();

        let stats = f.aggregator.snapshot();
        assert_eq!(stats.count(OutcomeKind::Timeout), 2);
        assert_eq!(stats.retries, 0);
        assert_eq!(f.clock.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn executor_panic_is_an_internal_fault() {
        let retry = RetryPolicy::new(NonZeroU32::new(3).unwrap(), vec![]);
        let f = fixture(test_support::Panicky, 3, 1, retry);
        f.pool.run().await.unwrap();

        let stats = f.aggregator.snapshot();
        assert_eq!(stats.count(OutcomeKind::ProtocolError), 3);
        assert_eq!(stats.retries, 0);
        assert_eq!(stats.errors.get("protocol error: internal fault: executor blew up"), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_cancels_in_flight_requests() {
        let f = fixture(test_support::Hang, 100, 3, RetryPolicy::none());
        let control = f.control.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(300)).await;
            control.abort();
        });
        f.pool.run().await.unwrap();

        let stats = f.aggregator.snapshot();
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.count(OutcomeKind::Cancelled), 3);
        assert_eq!(stats.errors.get("cancelled by force stop"), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_lets_in_flight_requests_finish() {
        let f = fixture(test_support::Slow::new(Duration::from_millis(100)), 1000, 2, RetryPolicy::none());
        let control = f.control.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(250)).await;
            control.stop();
        });
        f.pool.run().await.unwrap();

        // 100ms, 200ms and the pair in flight at 250ms
        let stats = f.aggregator.snapshot();
        assert_eq!(stats.total(), 6);
        assert_eq!(stats.count(OutcomeKind::Success), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_during_backoff_keeps_the_last_error() {
        let retry = RetryPolicy::new(NonZeroU32::new(3).unwrap(), vec![Duration::from_secs(10)]);
        let f = fixture(test_support::Flaky::new(5), 1, 1, retry);
        let control = f.control.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(1)).await;
            control.stop();
        });
        f.pool.run().await.unwrap();

        let stats = f.aggregator.snapshot();
        assert_eq!(stats.total(), 1);
        assert_eq!(stats.count(OutcomeKind::TransportError), 1);
        assert_eq!(stats.retries, 0);
        assert_eq!(stats.errors.get("transport error: connection reset"), Some(&1));
        // the backoff is cut short instead of waiting out its 10s
        assert_eq!(f.clock.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_during_backoff_cancels_the_request() {
        let retry = RetryPolicy::new(NonZeroU32::new(3).unwrap(), vec![Duration::from_secs(10)]);
        let f = fixture(test_support::Flaky::new(5), 1, 1, retry);
        let control = f.control.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(1)).await;
            control.abort();
        });
        f.pool.run().await.unwrap();

        let stats = f.aggregator.snapshot();
        assert_eq!(stats.total(), 1);
        assert_eq!(stats.count(OutcomeKind::Cancelled), 1);
        assert_eq!(stats.count(OutcomeKind::TransportError), 0);
        assert_eq!(stats.retries, 0);
        assert_eq!(stats.errors.get("cancelled by force stop"), Some(&1));
        assert_eq!(f.clock.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn permits_dropped_while_draining_are_counted() {
        let executor = test_support::Instant::default();
        let f = paced_fixture(executor, RateProfile::constant(1.0), 100, 3, RetryPolicy::none());
        let in_flight = f.pool.in_flight();
        let control = f.control.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(1500)).await;
            control.stop();
        });
        f.pool.run().await.unwrap();

        // sent at 0s and 1s, the three workers each hold one more permit at 1.5s
        let stats = f.aggregator.snapshot();
        assert_eq!(stats.total(), 2);
        assert_eq!(in_flight.discarded(), 3);
        assert_eq!(f.rate.issued(), stats.total() + in_flight.discarded());
    }
}

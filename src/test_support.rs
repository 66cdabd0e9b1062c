//! Fake executors shared by the unit tests.
use std::{
    future::pending,
    sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;

use crate::{RequestError, RequestExecutor, Response, TargetDescriptor};

/// Answers `200` with 42 bytes right away.
#[derive(Default)]
pub(crate) struct Instant {
    pub calls: AtomicU64,
}

#[async_trait]
impl RequestExecutor for Instant {
    async fn execute(&self, _: &TargetDescriptor, _: Duration) -> Result<Response, RequestError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(Response::new(200, 42))
    }
}

/// Never answers.
pub(crate) struct Hang;

#[async_trait]
impl RequestExecutor for Hang {
    async fn execute(&self, _: &TargetDescriptor, _: Duration) -> Result<Response, RequestError> {
        pending().await
    }
}

/// Answers after `delay` and records how many calls overlapped.
pub(crate) struct Slow {
    delay: Duration,
    current: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Slow {
    pub fn new(delay: Duration) -> Self {
        Self { delay, current: AtomicUsize::new(0), peak: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl RequestExecutor for Slow {
    async fn execute(&self, _: &TargetDescriptor, _: Duration) -> Result<Response, RequestError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(Response::new(200, 0))
    }
}

/// Fails with a transport error `failures` times, then succeeds.
pub(crate) struct Flaky {
    failures: AtomicU32,
}

impl Flaky {
    pub fn new(failures: u32) -> Self {
        Self { failures: AtomicU32::new(failures) }
    }
}

#[async_trait]
impl RequestExecutor for Flaky {
    async fn execute(&self, _: &TargetDescriptor, _: Duration) -> Result<Response, RequestError> {
        let left = self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match left {
            Ok(_) => Err(RequestError::transport("connection reset")),
            Err(_) => Ok(Response::new(200, 1)),
        }
    }
}

/// Panics on every call.
pub(crate) struct Panicky;

#[async_trait]
impl RequestExecutor for Panicky {
    async fn execute(&self, _: &TargetDescriptor, _: Duration) -> Result<Response, RequestError> {
        panic!("executor blew up")
    }
}

/// Answers the first `n` calls right away and hangs on the rest.
pub(crate) struct HangAfter {
    n: u64,
    calls: AtomicU64,
}

impl HangAfter {
    pub fn new(n: u64) -> Self {
        Self { n, calls: AtomicU64::new(0) }
    }
}

#[async_trait]
impl RequestExecutor for HangAfter {
    async fn execute(&self, _: &TargetDescriptor, _: Duration) -> Result<Response, RequestError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.n {
            return Ok(Response::new(200, 0));
        }
        pending().await
    }
}

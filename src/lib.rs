//! A rate-controlled, bounded-concurrency request shooter.
//!
//! `shooter` fires requests at one or more targets following a rate profile,
//! keeps at most a fixed number of them in flight, retries transient failures
//! with backoff, and folds every outcome into an aggregate report.
//!
//! ## Features
//!
//! - **Drift-free pacing**: permits are scheduled against the run start, so a
//!   late worker never shifts the schedule. Constant, staged and unlimited
//!   profiles are supported.
//! - **Bounded concurrency**: a fixed pool of workers, each with at most one
//!   request in flight.
//! - **Retries and timeouts**: per-attempt timeouts, configurable backoff.
//! - **Graceful and forced stops**: draining lets in-flight requests finish,
//!   aborting cancels them.
//! - **Rich reports**: latency percentiles, per-target, per-status and
//!   per-error breakdowns, as text or JSON.
//!
//! ## Example
//!
//! Any protocol can be driven by implementing [`RequestExecutor`]:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use shooter::{
//!     Orchestrator, RateProfile, RequestError, RequestExecutor, Response, RunConfig,
//!     TargetDescriptor,
//! };
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl RequestExecutor for Echo {
//!     async fn execute(&self, target: &TargetDescriptor, _: Duration) -> Result<Response, RequestError> {
//!         // talk to `target.endpoint` here
//!         Ok(Response::new(200, target.endpoint.len() as u64))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::new(vec![TargetDescriptor::new("echo://local")])
//!         .with_rate(RateProfile::constant(100.0))
//!         .with_concurrency(8)
//!         .with_duration(Duration::from_secs(10));
//!     let report = Orchestrator::new(config, Echo).run().await?;
//!     println!("{} requests, {:.2}% errors", report.total(), 100.0 * report.error_rate());
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

mod aggregator;
mod executor;
mod histogram;
mod orchestrator;
mod outcome;
mod phase;
mod pool;
mod progress;
mod rate;
mod report;
mod retry;
mod target;
mod units;

#[cfg(test)]
mod test_support;

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod reporter;
pub mod sink;
pub mod stats;

cfg_if::cfg_if! {
    if #[cfg(feature = "http")] {
        mod http;
        pub use crate::http::HttpExecutor;
    }
}

pub use crate::{
    aggregator::Aggregator,
    config::{RunConfig, StopCondition},
    error::{ConfigError, RequestError, Result, ShooterError},
    executor::RequestExecutor,
    histogram::LatencyHistogram,
    orchestrator::{Orchestrator, RunControl},
    outcome::{Outcome, OutcomeKind, Response},
    phase::{RunState, StateTracker},
    progress::{LogProgress, Progress, ProgressObserver, WriterProgress},
    rate::{Permit, RateController, RateProfile, Segment},
    report::{EXIT_CONFIG, EXIT_FAILED, EXIT_OK, RunMeta, RunReport},
    retry::RetryPolicy,
    target::{Header, RequestTemplate, TargetDescriptor, TargetSet},
};

use crate::{histogram::PERCENTAGES, outcome::OutcomeKind, phase::RunState, report::RunReport};

use super::RunReporter;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::BTreeMap, io::Write};

/// Machine readable report, one pretty-printed JSON document.
pub struct JsonReporter;

impl RunReporter for JsonReporter {
    fn print(&self, w: &mut dyn Write, report: &RunReport) -> anyhow::Result<()> {
        let meta = &report.meta;
        let stats = &report.stats;
        let elapsed = meta.elapsed.as_secs_f64();
        let summary = Summary {
            started_at: meta.started_at,
            state: meta.state,
            total_time: elapsed,
            concurrency: meta.concurrency,
            profile: &meta.profile,
            peak_in_flight: meta.peak_in_flight,

            requests: RequestsSummary {
                total: report.total(),
                rate: report.throughput(),
                requested: meta.requested,
                requested_rate: report.requested_rate(),
                retries: stats.retries,
            },

            errors: ErrorsSummary {
                total: stats.error_count(),
                rate: report.error_rate(),
                by_kind: report.error_rate_by_kind(),
                max_rate: meta.max_error_rate,
                within_budget: report.within_error_budget(),
            },

            bytes: BytesSummary {
                total: stats.overall.bytes,
                rate: if elapsed > 0.0 { stats.overall.bytes as f64 / elapsed } else { 0.0 },
            },
        };

        let latency = if stats.hist.is_empty() {
            None
        } else {
            Latency {
                stats: LatencyStats {
                    min: stats.hist.min().as_secs_f64(),
                    max: stats.hist.max().as_secs_f64(),
                    mean: stats.hist.mean().as_secs_f64(),
                    median: stats.hist.median().as_secs_f64(),
                    stdev: stats.hist.stdev().as_secs_f64(),
                },
                percentiles: stats
                    .hist
                    .percentiles(PERCENTAGES)
                    .map(|(p, v)| (format!("p{p}"), v.as_secs_f64()))
                    .collect(),
                histogram: stats
                    .hist
                    .quantiles()
                    .map(|(k, v)| (k.as_secs_f64().to_string(), v))
                    .collect(),
            }
            .into()
        };

        let targets = meta
            .targets
            .iter()
            .zip(&stats.by_target)
            .map(|(name, t)| TargetSummary {
                name,
                requests: t.counter.requests,
                errors: t.errors,
                bytes: t.counter.bytes,
                mean: t.counter.mean_latency().as_secs_f64(),
                p50: t.hist.value_at_quantile(0.5).as_secs_f64(),
                p99: t.hist.value_at_quantile(0.99).as_secs_f64(),
            })
            .collect();

        serde_json::to_writer_pretty(
            &mut *w,
            &Report {
                summary,
                latency,
                outcomes: stats.by_kind.iter().map(|(&k, c)| (k, c.requests)).collect(),
                targets,
                status: stats.by_status.iter().map(|(k, &v)| (k.to_string(), v)).collect(),
                errors: stats.errors.iter().map(|(k, &v)| (k.as_str(), v)).collect(),
            },
        )?;

        writeln!(w)?;
        Ok(())
    }
}

#[derive(Serialize)]
struct Summary<'a> {
    started_at: DateTime<Utc>,
    state: RunState,
    total_time: f64,
    concurrency: u32,
    profile: &'a str,
    peak_in_flight: usize,

    requests: RequestsSummary,
    errors: ErrorsSummary,
    bytes: BytesSummary,
}

#[derive(Serialize)]
struct RequestsSummary {
    total: u64,
    rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    requested: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    requested_rate: Option<f64>,
    retries: u64,
}

#[derive(Serialize)]
struct ErrorsSummary {
    total: u64,
    rate: f64,
    by_kind: BTreeMap<OutcomeKind, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_rate: Option<f64>,
    within_budget: bool,
}

#[derive(Serialize)]
struct BytesSummary {
    total: u64,
    rate: f64,
}

#[derive(Serialize)]
struct LatencyStats {
    min: f64,
    max: f64,
    mean: f64,
    median: f64,
    stdev: f64,
}

#[derive(Serialize)]
struct Latency {
    stats: LatencyStats,
    percentiles: BTreeMap<String, f64>,
    histogram: BTreeMap<String, u64>,
}

#[derive(Serialize)]
struct TargetSummary<'a> {
    name: &'a str,
    requests: u64,
    errors: u64,
    bytes: u64,
    mean: f64,
    p50: f64,
    p99: f64,
}

#[derive(Serialize)]
struct Report<'a> {
    summary: Summary<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency: Option<Latency>,
    outcomes: BTreeMap<OutcomeKind, u64>,
    targets: Vec<TargetSummary<'a>>,
    status: BTreeMap<String, u64>,
    errors: BTreeMap<&'a str, u64>,
}

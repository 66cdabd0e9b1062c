use crossterm::style::{StyledContent, Stylize};
use itertools::Itertools;
use std::{cmp::Reverse, collections::BTreeMap, io::Write};
use tabled::settings::object::{Cell, Columns, FirstColumn, LastColumn, Object, Rows};
use tabled::settings::{Padding, PaddingColor};
use tabled::{
    builder::Builder,
    settings::{themes::Colorization, Alignment, Color, Margin, Style},
};

use crate::{
    histogram::{LatencyHistogram, PERCENTAGES},
    outcome::OutcomeKind,
    phase::RunState,
    report::RunReport,
    units::{DurationExt, FormattedDuration, IntoAdjustedByte, TimeUnit},
};

/// Human readable report with colors and tables.
pub struct TextReporter;

impl super::RunReporter for TextReporter {
    fn print(&self, w: &mut dyn Write, report: &RunReport) -> anyhow::Result<()> {
        print_summary(w, report)?;
        writeln!(w)?;

        print_outcomes(w, report)?;
        writeln!(w)?;

        if report.total() > 0 {
            print_latency(w, &report.stats.hist)?;

            if report.meta.targets.len() > 1 {
                print_targets(w, report)?;
                writeln!(w)?;
            }

            print_status(w, &report.stats.by_status)?;
            writeln!(w)?;
        }

        print_error(w, &report.stats.errors)?;

        Ok(())
    }
}

fn render_success_ratio(success_rate: f64) -> StyledContent<String> {
    let text = format!("{:.2}%", success_rate);
    if success_rate >= 100.0 {
        text.green().bold()
    } else if success_rate >= 99.0 {
        text.yellow().bold()
    } else {
        text.red().bold()
    }
}

fn render_state(state: RunState) -> StyledContent<String> {
    match state {
        RunState::Finished => state.to_string().green().bold(),
        _ => state.to_string().red().bold(),
    }
}

#[rustfmt::skip]
fn print_summary(w: &mut dyn Write, report: &RunReport) -> anyhow::Result<()> {
    let meta = &report.meta;
    let elapsed = meta.elapsed.as_secs_f64();
    let counter = &report.stats.overall;

    writeln!(w, "{}", "Summary".h1())?;
    writeln!(w,       "  Started:        {}", meta.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().green())?;
    writeln!(w,       "  Time:           {}", format!("{:.2}s", elapsed).green().bold())?;
    writeln!(w,       "  State:          {}", render_state(meta.state))?;
    writeln!(w,       "  Concurrency:    {}", format!("{}", meta.concurrency).green().bold())?;
    writeln!(w,       "  Profile:        {}", meta.profile.as_str().green())?;
    writeln!(w,       "  Peak in-flight: {}", format!("{}", meta.peak_in_flight).green())?;
    writeln!(w,       "  Retries:        {}", format!("{}", report.stats.retries).green())?;
    writeln!(w,       "  Success ratio:  {}", render_success_ratio(100.0 * (1.0 - report.error_rate())))?;
    if let Some(max) = meta.max_error_rate {
        let verdict = match report.within_error_budget() {
            true => "passed".green().bold(),
            false => "exceeded".red().bold(),
        };
        writeln!(w,   "  Error budget:   {:.2}% of {:.2}% ({verdict})", 100.0 * report.error_rate(), 100.0 * max)?;
    }
    writeln!(w)?;

    let requested = match (meta.requested, report.requested_rate()) {
        (Some(total), Some(rate)) => vec!["Requested".into(), format!("{total:.0}"), format!("{rate:.2}/s")],
        _ => vec!["Requested".into(), "-".into(), "unlimited".into()],
    };
    let stats = vec![
        vec!["".into(), "Total".into(), "Rate".into()],
        vec![
            "Achieved".into(),
            format!("{}", counter.requests),
            format!("{:.2}/s", report.throughput()),
        ],
        requested,
        vec![
            "Bytes".into(),
            format!("{:.2}", counter.bytes.to_bytes()),
            format!("{:.2}/s", (counter.bytes as f64 / elapsed.max(f64::EPSILON)).to_bytes()),
        ],
    ];
    let mut stats = Builder::from(stats).build();
    stats
        .with(Style::empty())
        .with(Alignment::center())
        .with(Padding::new(2, 2, 0, 0))
        .with(Colorization::exact([Color::BOLD], Cell::new(0, 1)))
        .with(Colorization::exact([Color::BOLD], Cell::new(0, 2)))
        .with(Colorization::exact([Color::FG_GREEN], Rows::new(1..=3).not(Columns::new(0..=0))))
    ;

    writeln!(w, "{}", stats)?;
    Ok(())
}

fn print_outcomes(w: &mut dyn Write, report: &RunReport) -> anyhow::Result<()> {
    writeln!(w, "{}", "Outcomes".h1())?;
    let total = report.total().max(1) as f64;
    let rows = report.stats.by_kind.iter().map(|(&kind, counter)| {
        let name = match kind {
            OutcomeKind::Success => kind.to_string().green(),
            OutcomeKind::Cancelled => kind.to_string().yellow(),
            _ => kind.to_string().red(),
        };
        vec![
            name.to_string(),
            counter.requests.to_string(),
            format!("{:.2}%", 100.0 * counter.requests as f64 / total),
        ]
    });
    let mut outcomes = Builder::from_iter(rows).build();
    outcomes
        .with(Style::empty())
        .with(Margin::new(2, 0, 0, 0))
        .with(Alignment::right())
        .with(Padding::new(0, 2, 0, 0))
        .modify(FirstColumn, Alignment::left());
    writeln!(w, "{}", outcomes)?;
    Ok(())
}

fn print_latency_histogram(
    w: &mut dyn Write,
    hist: &LatencyHistogram,
    u: TimeUnit,
    indent: usize,
) -> anyhow::Result<()> {
    let quantiles = hist
        .quantiles()
        .map(|(latency, count)| (format!("{:.2}", FormattedDuration::new(latency, u)), count))
        .collect_vec();
    let Some(&max_count) = quantiles.iter().map(|(_, count)| count).max() else {
        return Ok(());
    };

    let quantiles = quantiles
        .into_iter()
        .map(|(latency, count)| vec![count.to_string(), latency, "│".into(), render_bar(count, max_count)]);
    let mut quantiles = Builder::from_iter(quantiles).build();
    quantiles
        .with(Style::empty())
        .with(Margin::new(indent * 2, 0, 0, 0))
        .with(Alignment::right())
        .with(Padding::new(0, 1, 0, 0))
        .with(Colorization::exact([Color::FG_GREEN], Columns::new(0..=1)))
        .with(Colorization::exact([Color::FG_GREEN], LastColumn))
        .modify(Columns::new(2..=2), Padding::new(0, 0, 0, 0))
        .modify(LastColumn, Alignment::left())
        .modify(FirstColumn, Padding::new(1, 1, 0, 0).fill('[', ']', ' ', ' '))
        .modify(
            FirstColumn,
            PaddingColor::new(
                Color::default(),
                Color::default(),
                Color::default(),
                Color::default(),
            ),
        )
        .modify(Columns::new(1..=1), Padding::new(1, 1, 0, 0));
    writeln!(w, "{}", quantiles)?;

    Ok(())
}

fn render_bar(count: u64, max_count: u64) -> String {
    let ratio = count as f64 / max_count as f64;
    let len = 32.0 * ratio;
    let mut bar = "■".repeat(len as usize);
    if len.fract() >= 0.5 {
        bar.push('◧');
    }
    bar
}

fn print_latency(w: &mut dyn Write, hist: &LatencyHistogram) -> anyhow::Result<()> {
    writeln!(w, "{}", "Latencies".h1())?;
    if hist.is_empty() {
        return Ok(());
    }

    // time unit for the histogram
    let u = hist.median().appropriate_unit();

    print_latency_stats(w, hist, u)?;
    writeln!(w)?;

    writeln!(w, "{}", "  Percentiles".h2())?;
    print_latency_percentiles(w, hist, u)?;
    writeln!(w)?;

    writeln!(w, "{}", "  Histogram".h2())?;
    print_latency_histogram(w, hist, u, 2)?;
    writeln!(w)?;

    Ok(())
}

fn print_latency_stats(w: &mut dyn Write, hist: &LatencyHistogram, u: TimeUnit) -> anyhow::Result<()> {
    let stats = vec![
        vec!["Avg".into(), "Min".into(), "Med".into(), "Max".into(), "Stdev".into()],
        vec![
            format!("{:.2}", FormattedDuration::new(hist.mean(), u)),
            format!("{:.2}", FormattedDuration::new(hist.min(), u)),
            format!("{:.2}", FormattedDuration::new(hist.median(), u)),
            format!("{:.2}", FormattedDuration::new(hist.max(), u)),
            format!("{:.2}", FormattedDuration::new(hist.stdev(), u)),
        ],
    ];
    let mut stats = Builder::from(stats).build();
    stats
        .with(Style::empty())
        .with(Margin::new(1, 0, 0, 0))
        .with(Alignment::center())
        .with(Colorization::exact([Color::FG_GREEN], Rows::new(1..=1)))
        .with(Colorization::exact([Color::FG_BLUE], Cell::new(0, 0)))
        .with(Colorization::exact([Color::FG_CYAN], Cell::new(0, 1)))
        .with(Colorization::exact([Color::FG_YELLOW], Cell::new(0, 2)))
        .with(Colorization::exact([Color::FG_RED], Cell::new(0, 3)))
        .with(Colorization::exact([Color::FG_MAGENTA], Cell::new(0, 4)));
    writeln!(w, "{}", stats)?;
    Ok(())
}

fn print_latency_percentiles(w: &mut dyn Write, hist: &LatencyHistogram, u: TimeUnit) -> anyhow::Result<()> {
    let percentiles = hist.percentiles(PERCENTAGES).map(|(p, v)| {
        vec![format!("{:.2}%", p), " in ".to_string(), format!("{:.2}", FormattedDuration::new(v, u))]
    });
    let mut percentiles = Builder::from_iter(percentiles).build();
    percentiles
        .with(Style::empty())
        .with(Margin::new(3, 0, 0, 0))
        .with(Alignment::center())
        .with(Padding::zero())
        .with(Colorization::exact([Color::FG_GREEN], FirstColumn))
        .with(Colorization::exact([Color::FG_GREEN], LastColumn))
        .modify(LastColumn, Alignment::right());
    writeln!(w, "{}", percentiles)?;
    Ok(())
}

fn print_targets(w: &mut dyn Write, report: &RunReport) -> anyhow::Result<()> {
    writeln!(w, "{}", "Targets".h1())?;
    let header = ["Target", "Requests", "Errors", "p50", "p99"].map(String::from).to_vec();
    let rows = report.meta.targets.iter().zip(&report.stats.by_target).map(|(name, stats)| {
        let quantile = |q| format!("{:.2}", FormattedDuration::auto(stats.hist.value_at_quantile(q)));
        vec![
            name.clone(),
            stats.counter.requests.to_string(),
            stats.errors.to_string(),
            quantile(0.5),
            quantile(0.99),
        ]
    });
    let mut targets = Builder::from_iter(std::iter::once(header).chain(rows)).build();
    targets
        .with(Style::empty())
        .with(Margin::new(2, 0, 0, 0))
        .with(Alignment::right())
        .with(Padding::new(0, 2, 0, 0))
        .with(Colorization::exact([Color::BOLD], Rows::new(0..=0)))
        .with(Colorization::exact([Color::FG_GREEN], Rows::new(1..).not(Columns::new(0..=0))))
        .modify(FirstColumn, Alignment::left());
    writeln!(w, "{}", targets)?;
    Ok(())
}

fn print_status(w: &mut dyn Write, status: &BTreeMap<u16, u64>) -> anyhow::Result<()> {
    let status_v = status
        .iter()
        .sorted_unstable_by_key(|&(_, &cnt)| Reverse(cnt))
        .collect_vec();
    writeln!(w, "{}", "Status distribution".h1())?;
    let Some(max) = status_v.iter().map(|&(_, count)| count).max() else {
        return Ok(());
    };
    let count_width = max.to_string().len();
    for (&code, count) in status_v {
        let count = format!("{count:>count_width$}").green();
        let code = match code {
            200..=299 => code.to_string().green(),
            400..=499 => code.to_string().yellow(),
            _ => code.to_string().red(),
        };
        writeln!(w, "  [{count}] {code}")?;
    }
    Ok(())
}

fn print_error(w: &mut dyn Write, errors: &BTreeMap<String, u64>) -> anyhow::Result<()> {
    let error_v = errors
        .iter()
        .sorted_unstable_by_key(|&(_, &cnt)| Reverse(cnt))
        .collect_vec();
    let Some(max) = error_v.iter().map(|&(_, count)| count).max() else {
        return Ok(());
    };
    let count_width = max.to_string().len();
    writeln!(w, "{}", "Error distribution".h1())?;
    for (error, count) in error_v {
        writeln!(w, "{}", format!("  [{count:>count_width$}] {error}").red())?;
    }
    Ok(())
}

trait ReportStyle {
    fn h1(&self) -> StyledContent<&str>;
    fn h2(&self) -> StyledContent<&str>;
}

impl<T: AsRef<str>> ReportStyle for T {
    fn h1(&self) -> StyledContent<&str> {
        self.as_ref().bold().underlined().yellow()
    }

    fn h2(&self) -> StyledContent<&str> {
        self.as_ref().bold().cyan()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::{
        outcome::Outcome,
        report::RunMeta,
        reporter::RunReporter,
        stats::RunStats,
    };

    fn report() -> RunReport {
        let mut stats = RunStats::new(2);
        for seq in 0..10u64 {
            let failed = seq % 5 == 0;
            stats.record(&Outcome {
                target: (seq % 2) as usize,
                seq,
                issued_at: Duration::from_millis(100 * seq),
                completed_at: Duration::from_millis(100 * seq + 20 + seq),
                kind: if failed { OutcomeKind::ProtocolError } else { OutcomeKind::Success },
                status: Some(if failed { 503 } else { 200 }),
                bytes: 512,
                error: failed.then(|| "protocol error: 503 Service Unavailable".to_string()),
                attempts: 1,
            });
        }
        RunReport {
            meta: RunMeta {
                started_at: Utc::now(),
                state: RunState::Finished,
                concurrency: 2,
                elapsed: Duration::from_secs(1),
                profile: "[open: 10/s]".into(),
                requested: Some(10.0),
                peak_in_flight: 2,
                targets: vec!["a".into(), "b".into()],
                max_error_rate: Some(0.1),
            },
            stats,
        }
    }

    #[test]
    fn renders_every_section() {
        let mut out = Vec::new();
        TextReporter.print(&mut out, &report()).unwrap();
        let out = String::from_utf8(out).unwrap();

        for section in ["Summary", "Outcomes", "Latencies", "Targets", "Status distribution", "Error distribution"] {
            assert!(out.contains(section), "missing {section}");
        }
        assert!(out.contains("exceeded"));
        assert!(out.contains("503 Service Unavailable"));
    }
}

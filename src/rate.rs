//! Rate profiles and the permit scheduler.
//!
//! A [`RateProfile`] is a sequence of [`Segment`]s. The [`RateController`]
//! walks the profile and hands out [`Permit`]s, each carrying the clock offset
//! at which the request is supposed to be sent.
//!
//! The k-th permit of a segment is placed at `segment_start + t_k`, where `t_k`
//! is the closed-form solution of "the integral of the rate over `[0, t_k]`
//! equals k". Schedules therefore never depend on when the previous permit was
//! consumed and scheduling error cannot accumulate over a long run.
use std::{fmt, str::FromStr, time::Duration};

use parking_lot::Mutex;

use crate::{clock::Clock, error::ConfigError};

/// One piece of a rate profile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Segment {
    /// A constant rate. `rate == 0` means unlimited: requests are gated only by
    /// concurrency. `duration == None` makes the segment open-ended.
    Constant {
        /// Segment length, `None` for open-ended.
        duration: Option<Duration>,
        /// Requests per second.
        rate: f64,
    },
    /// A rate changing linearly from `from` to `to` over `duration`.
    Ramp {
        /// Segment length.
        duration: Duration,
        /// Rate at the start of the segment, in requests per second.
        from: f64,
        /// Rate at the end of the segment, in requests per second.
        to: f64,
    },
}

enum Offset {
    At(Duration),
    Unlimited,
    Beyond,
}

impl Segment {
    /// Length of the segment, `None` when open-ended.
    pub fn duration(&self) -> Option<Duration> {
        match *self {
            Segment::Constant { duration, .. } => duration,
            Segment::Ramp { duration, .. } => Some(duration),
        }
    }

    /// Returns `true` for an unlimited constant segment.
    pub fn is_unlimited(&self) -> bool {
        matches!(*self, Segment::Constant { rate, .. } if rate == 0.0)
    }

    /// Number of permits the segment asks for during its first `t`.
    fn permits_within(&self, t: Duration) -> f64 {
        let t = t.as_secs_f64();
        match *self {
            Segment::Constant { rate, .. } => rate * t,
            Segment::Ramp { duration, from, to } => {
                from * t + (to - from) * t * t / (2.0 * duration.as_secs_f64())
            }
        }
    }

    /// Offset of the k-th permit from the segment start.
    fn offset_of(&self, k: u64) -> Offset {
        let k = k as f64;
        let secs = match *self {
            Segment::Constant { rate, .. } if rate == 0.0 => return Offset::Unlimited,
            Segment::Constant { rate, .. } => k / rate,
            Segment::Ramp { duration, from, to } => {
                if k == 0.0 {
                    0.0
                } else {
                    // solves from * t + a * t^2 = k, written to avoid cancellation
                    let a = (to - from) / (2.0 * duration.as_secs_f64());
                    let disc = from * from + 4.0 * a * k;
                    if disc < 0.0 {
                        return Offset::Beyond;
                    }
                    2.0 * k / (from + disc.sqrt())
                }
            }
        };

        // a rate small enough pushes the offset past what a Duration can hold
        Duration::try_from_secs_f64(secs).map_or(Offset::Beyond, Offset::At)
    }

    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let check = |rate: f64| {
            if rate.is_finite() && rate >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidRate { segment: index, rate })
            }
        };

        match *self {
            Segment::Constant { duration, rate } => {
                check(rate)?;
                if duration.is_some_and(|d| d.is_zero()) {
                    return Err(ConfigError::ZeroSegmentDuration { segment: index });
                }
            }
            Segment::Ramp { duration, from, to } => {
                check(from)?;
                check(to)?;
                if duration.is_zero() {
                    return Err(ConfigError::ZeroSegmentDuration { segment: index });
                }
                if from == 0.0 && to == 0.0 {
                    return Err(ConfigError::EmptyRamp { segment: index });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let span = |d: Option<Duration>| match d {
            Some(d) => humantime::format_duration(d).to_string(),
            None => "open".to_string(),
        };
        match *self {
            Segment::Constant { duration, rate } if rate == 0.0 => {
                write!(f, "{}: unlimited", span(duration))
            }
            Segment::Constant { duration, rate } => write!(f, "{}: {rate}/s", span(duration)),
            Segment::Ramp { duration, from, to } => {
                write!(f, "{}: {from}/s..{to}/s", span(Some(duration)))
            }
        }
    }
}

/// Parses `RATE`, `DURATION:RATE` or `DURATION:FROM..TO`.
///
/// A bare `RATE` is an open-ended constant segment. Durations use humantime
/// syntax (`10s`, `2m`, `1h 30m`).
impl FromStr for Segment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidStage { input: s.to_string(), reason };
        let rate = |r: &str| r.trim().parse::<f64>().map_err(|e| invalid(format!("bad rate '{r}': {e}")));

        let Some((duration, rates)) = s.split_once(':') else {
            return Ok(Segment::Constant { duration: None, rate: rate(s)? });
        };
        let duration = humantime::parse_duration(duration.trim())
            .map_err(|e| invalid(format!("bad duration '{duration}': {e}")))?;

        match rates.split_once("..") {
            Some((from, to)) => Ok(Segment::Ramp { duration, from: rate(from)?, to: rate(to)? }),
            None => Ok(Segment::Constant { duration: Some(duration), rate: rate(rates)? }),
        }
    }
}

/// A possibly staged requests-per-second profile.
#[derive(Clone, Debug, PartialEq)]
pub struct RateProfile {
    segments: Vec<Segment>,
}

impl RateProfile {
    /// An open-ended constant rate. `0` means unlimited.
    pub fn constant(rate: f64) -> Self {
        Self { segments: vec![Segment::Constant { duration: None, rate }] }
    }

    /// An open-ended unlimited rate.
    pub fn unlimited() -> Self {
        Self::constant(0.0)
    }

    /// A staged profile.
    pub fn staged(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// The segments, in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total length of the profile, `None` when the last segment is open-ended.
    pub fn total_duration(&self) -> Option<Duration> {
        self.segments.iter().map(Segment::duration).sum()
    }

    /// Number of permits the profile asks for during its first `elapsed`.
    ///
    /// Returns `None` when an unlimited segment overlaps that span, since the
    /// requested rate is undefined there.
    pub fn expected_permits(&self, elapsed: Duration) -> Option<f64> {
        let mut start = Duration::ZERO;
        let mut total = 0.0;
        for segment in &self.segments {
            if start >= elapsed {
                break;
            }
            if segment.is_unlimited() {
                return None;
            }
            let span = elapsed - start;
            let span = segment.duration().map_or(span, |d| d.min(span));
            total += segment.permits_within(span);
            start += span;
        }
        Some(total)
    }

    /// Checks every segment. Only the last one may be open-ended.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segments.is_empty() {
            return Err(ConfigError::EmptyProfile);
        }
        let last = self.segments.len() - 1;
        for (index, segment) in self.segments.iter().enumerate() {
            segment.validate(index)?;
            if segment.duration().is_none() && index != last {
                return Err(ConfigError::OpenSegmentNotLast { segment: index });
            }
        }
        Ok(())
    }
}

impl fmt::Display for RateProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{segment}")?;
        }
        write!(f, "]")
    }
}

/// Authorization to send exactly one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Permit {
    /// Run-wide sequence number, starting at 0.
    pub seq: u64,
    /// Clock offset at which the request should be sent.
    pub scheduled_at: Duration,
}

#[derive(Debug, Default)]
struct Cursor {
    segment: usize,
    segment_start: Duration,
    k: u64,
    issued: u64,
    last: Duration,
}

/// Hands out permits following a [`RateProfile`].
///
/// Shared by all workers; `next` holds a short lock while it advances the
/// cursor and never sleeps.
#[derive(Debug)]
pub struct RateController {
    profile: RateProfile,
    limit: Option<u64>,
    clock: Clock,
    cursor: Mutex<Cursor>,
}

impl RateController {
    /// Creates a controller. `limit` caps the total number of permits.
    pub fn new(profile: RateProfile, limit: Option<u64>, clock: Clock) -> Self {
        Self { profile, limit, clock, cursor: Mutex::default() }
    }

    /// The profile being followed.
    pub fn profile(&self) -> &RateProfile {
        &self.profile
    }

    /// Number of permits handed out so far.
    pub fn issued(&self) -> u64 {
        self.cursor.lock().issued
    }

    /// Returns the next permit, or `None` once the profile or the count limit
    /// is exhausted.
    pub fn next(&self) -> Option<Permit> {
        let mut cursor = self.cursor.lock();
        if self.limit.is_some_and(|limit| cursor.issued >= limit) {
            return None;
        }

        loop {
            let segment = self.profile.segments.get(cursor.segment)?;
            let end = segment.duration().map(|d| cursor.segment_start.saturating_add(d));

            let at = match segment.offset_of(cursor.k) {
                Offset::At(offset) => cursor.segment_start.checked_add(offset),
                Offset::Unlimited => {
                    Some(self.clock.elapsed().max(cursor.segment_start).max(cursor.last))
                }
                Offset::Beyond => None,
            };

            match (at, end) {
                (Some(at), Some(end)) if at >= end => (),
                (Some(at), _) => {
                    let permit = Permit { seq: cursor.issued, scheduled_at: at };
                    cursor.k += 1;
                    cursor.issued += 1;
                    cursor.last = at;
                    return Some(permit);
                }
                (None, None) => return None,
                (None, Some(_)) => (),
            }

            // move on to the next segment, which starts where this one ends
            cursor.segment += 1;
            cursor.segment_start = end?;
            cursor.k = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{self, Instant};

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn assert_close(actual: Duration, expected: Duration) {
        let diff = actual.abs_diff(expected);
        assert!(diff <= Duration::from_micros(1), "{actual:?} != {expected:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn constant_schedule_does_not_drift() {
        let clock = Clock::start_at(Instant::now());
        let rc = RateController::new(RateProfile::constant(10.0), None, clock);

        for k in 0..1000u64 {
            let permit = rc.next().unwrap();
            assert_eq!(permit.seq, k);
            assert_close(permit.scheduled_at, secs(k as f64 / 10.0));
            // slow consumer: never affects later schedules
            if k % 7 == 0 {
                time::sleep(Duration::from_millis(350)).await;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_permits_follow_the_clock() {
        let clock = Clock::start_at(Instant::now());
        let rc = RateController::new(RateProfile::unlimited(), None, clock);

        assert_eq!(rc.next().unwrap().scheduled_at, Duration::ZERO);
        time::sleep(Duration::from_millis(40)).await;
        assert_eq!(rc.next().unwrap().scheduled_at, Duration::from_millis(40));
        assert_eq!(rc.next().unwrap().scheduled_at, Duration::from_millis(40));
    }

    #[test]
    fn stages_chain_without_gaps() {
        let profile = RateProfile::staged(vec![
            Segment::Constant { duration: Some(secs(1.0)), rate: 2.0 },
            Segment::Constant { duration: None, rate: 4.0 },
        ]);
        let rc = RateController::new(profile, None, Clock::new_stopped());

        let at: Vec<_> = (0..5).map(|_| rc.next().unwrap().scheduled_at).collect();
        assert_eq!(at, [secs(0.0), secs(0.5), secs(1.0), secs(1.25), secs(1.5)]);
    }

    #[test]
    fn profile_exhausts() {
        let profile = RateProfile::staged(vec![Segment::Constant { duration: Some(secs(2.0)), rate: 5.0 }]);
        let rc = RateController::new(profile, None, Clock::new_stopped());

        let mut count = 0;
        while let Some(p) = rc.next() {
            assert!(p.scheduled_at < secs(2.0));
            count += 1;
        }
        assert_eq!(count, 10);
        assert!(rc.next().is_none());
    }

    #[test]
    fn ramp_issues_the_area_under_the_rate() {
        let profile = RateProfile::staged(vec![Segment::Ramp { duration: secs(10.0), from: 0.0, to: 10.0 }]);
        let rc = RateController::new(profile, None, Clock::new_stopped());

        let mut last = Duration::ZERO;
        let mut count = 0u64;
        while let Some(p) = rc.next() {
            assert!(p.scheduled_at >= last, "schedule went backwards");
            last = p.scheduled_at;
            count += 1;
        }
        // area of the triangle: 10s * 10/s / 2
        assert!((49..=51).contains(&count), "count = {count}");
        // rate grows, so gaps shrink
        assert!(last > secs(9.0));
    }

    #[test]
    fn ramp_down_reaches_the_end() {
        let profile = RateProfile::staged(vec![
            Segment::Ramp { duration: secs(4.0), from: 10.0, to: 0.0 },
            Segment::Constant { duration: None, rate: 1.0 },
        ]);
        let rc = RateController::new(profile, None, Clock::new_stopped());

        let first_stage: Vec<_> =
            std::iter::from_fn(|| rc.next()).take_while(|p| p.scheduled_at < secs(4.0)).collect();
        assert!((19..=21).contains(&first_stage.len()));
        // the permit that stopped the take_while belongs to the next stage
        assert_close(rc.next().unwrap().scheduled_at, secs(5.0));
    }

    #[test]
    fn tiny_rate_exhausts_instead_of_overflowing() {
        let profile = RateProfile::constant(1e-25);
        assert!(profile.validate().is_ok());
        let rc = RateController::new(profile, None, Clock::new_stopped());

        assert_eq!(rc.next(), Some(Permit { seq: 0, scheduled_at: Duration::ZERO }));
        assert_eq!(rc.next(), None);
        assert_eq!(rc.issued(), 1);
    }

    #[test]
    fn tiny_stage_hands_over_to_the_next_one() {
        let profile = RateProfile::staged(vec![
            Segment::Constant { duration: Some(secs(1.0)), rate: 1e-25 },
            Segment::Ramp { duration: secs(2.0), from: 1e-25, to: 1e-25 },
            Segment::Constant { duration: None, rate: 2.0 },
        ]);
        let rc = RateController::new(profile, None, Clock::new_stopped());

        let at: Vec<_> = (0..4).map(|_| rc.next().unwrap().scheduled_at).collect();
        assert_eq!(at, [secs(0.0), secs(1.0), secs(3.0), secs(3.5)]);
    }

    #[test]
    fn count_limit() {
        let rc = RateController::new(RateProfile::constant(100.0), Some(3), Clock::new_stopped());
        assert_eq!(std::iter::from_fn(|| rc.next()).count(), 3);
        assert_eq!(rc.issued(), 3);
    }

    #[test]
    fn expected_permits() {
        let profile = RateProfile::staged(vec![
            Segment::Constant { duration: Some(secs(2.0)), rate: 10.0 },
            Segment::Ramp { duration: secs(2.0), from: 10.0, to: 20.0 },
            Segment::Constant { duration: None, rate: 0.0 },
        ]);
        assert_eq!(profile.expected_permits(secs(1.0)), Some(10.0));
        assert_eq!(profile.expected_permits(secs(4.0)), Some(50.0));
        assert_eq!(profile.expected_permits(secs(5.0)), None);
        assert_eq!(profile.total_duration(), None);
    }

    #[test]
    fn parse_segments() {
        assert_eq!("25".parse::<Segment>().unwrap(), Segment::Constant { duration: None, rate: 25.0 });
        assert_eq!(
            "10s:100".parse::<Segment>().unwrap(),
            Segment::Constant { duration: Some(secs(10.0)), rate: 100.0 }
        );
        assert_eq!(
            "1m:5..50".parse::<Segment>().unwrap(),
            Segment::Ramp { duration: secs(60.0), from: 5.0, to: 50.0 }
        );
        assert!("soon:10".parse::<Segment>().is_err());
        assert!("10s:fast".parse::<Segment>().is_err());
    }

    #[test]
    fn validation() {
        let open_first = RateProfile::staged(vec![
            Segment::Constant { duration: None, rate: 1.0 },
            Segment::Constant { duration: Some(secs(1.0)), rate: 1.0 },
        ]);
        assert!(matches!(open_first.validate(), Err(ConfigError::OpenSegmentNotLast { segment: 0 })));

        assert!(matches!(RateProfile::constant(-1.0).validate(), Err(ConfigError::InvalidRate { .. })));
        assert!(matches!(RateProfile::constant(f64::NAN).validate(), Err(ConfigError::InvalidRate { .. })));
        assert!(matches!(RateProfile::staged(vec![]).validate(), Err(ConfigError::EmptyProfile)));

        let empty_ramp = RateProfile::staged(vec![Segment::Ramp { duration: secs(1.0), from: 0.0, to: 0.0 }]);
        assert!(matches!(empty_ramp.validate(), Err(ConfigError::EmptyRamp { segment: 0 })));

        assert!(RateProfile::unlimited().validate().is_ok());
    }
}

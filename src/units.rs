//! Human readable durations and byte sizes for reports and progress lines.
use std::{fmt, time::Duration};

use byte_unit::{AdjustedByte, Byte, UnitType};

/// A duration printed in a fixed unit, e.g. `12.5ms`.
pub struct FormattedDuration {
    duration: Duration,
    unit: TimeUnit,
}

impl FormattedDuration {
    /// Formats `duration` in `unit`.
    pub fn new(duration: Duration, unit: TimeUnit) -> Self {
        Self { duration, unit }
    }

    /// Formats `duration` in the unit that fits it best.
    pub fn auto(duration: Duration) -> Self {
        Self::new(duration, duration.appropriate_unit())
    }
}

/// Time units from nanoseconds to hours, valued in nanoseconds.
#[allow(clippy::enum_clike_unportable_variant)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// Nanoseconds.
    Nano = 1,
    /// Microseconds.
    Micro = 1_000,
    /// Milliseconds.
    Milli = 1_000_000,
    /// Seconds.
    Sec = 1_000_000_000,
    /// Minutes.
    Min = 60 * 1_000_000_000,
    /// Hours.
    Hour = 60 * 60 * 1_000_000_000,
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self {
            TimeUnit::Nano => "ns",
            TimeUnit::Micro => "µs",
            TimeUnit::Milli => "ms",
            TimeUnit::Sec => "s",
            TimeUnit::Min => "m",
            TimeUnit::Hour => "h",
        };
        f.write_str(unit)
    }
}

impl fmt::Display for FormattedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // forward the precision, e.g. `{:.2}`
        self.duration.as_f64(self.unit).fmt(f)?;
        write!(f, "{}", self.unit)
    }
}

/// Unit conversions for [`Duration`].
pub trait DurationExt {
    /// The largest unit in which the duration is at least one.
    fn appropriate_unit(&self) -> TimeUnit;
    /// The duration expressed in `unit`.
    fn as_f64(&self, unit: TimeUnit) -> f64;
}

impl DurationExt for Duration {
    fn appropriate_unit(&self) -> TimeUnit {
        match self.as_nanos() {
            n if n < TimeUnit::Micro as u128 => TimeUnit::Nano,
            n if n < TimeUnit::Milli as u128 => TimeUnit::Micro,
            n if n < TimeUnit::Sec as u128 => TimeUnit::Milli,
            n if n < TimeUnit::Min as u128 => TimeUnit::Sec,
            n if n < TimeUnit::Hour as u128 => TimeUnit::Min,
            _ => TimeUnit::Hour,
        }
    }

    fn as_f64(&self, unit: TimeUnit) -> f64 {
        self.as_nanos() as f64 / unit as u64 as f64
    }
}

/// Binary-prefixed byte sizes, e.g. `1.50 KiB`.
pub trait IntoAdjustedByte {
    /// Converts into the most fitting binary unit.
    fn to_bytes(self) -> AdjustedByte;
}

impl IntoAdjustedByte for u64 {
    fn to_bytes(self) -> AdjustedByte {
        Byte::from_u64(self).get_appropriate_unit(UnitType::Binary)
    }
}

impl IntoAdjustedByte for f64 {
    fn to_bytes(self) -> AdjustedByte {
        Byte::from_f64(self.max(0.0))
            .unwrap_or(Byte::MAX)
            .get_appropriate_unit(UnitType::Binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_a_readable_unit() {
        assert_eq!(Duration::from_nanos(999).appropriate_unit(), TimeUnit::Nano);
        assert_eq!(Duration::from_micros(12).appropriate_unit(), TimeUnit::Micro);
        assert_eq!(Duration::from_millis(250).appropriate_unit(), TimeUnit::Milli);
        assert_eq!(Duration::from_secs(90).appropriate_unit(), TimeUnit::Min);
    }

    #[test]
    fn formats_with_precision() {
        let d = FormattedDuration::auto(Duration::from_micros(12_500));
        assert_eq!(format!("{d:.2}"), "12.50ms");
        let d = FormattedDuration::new(Duration::from_millis(1500), TimeUnit::Sec);
        assert_eq!(d.to_string(), "1.5s");
    }
}

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;
const NANOS_PER_MIN: u128 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MIN;

/// Config duration written as a unit-suffixed string ("2s", "1m30s", "250ms").
/// Bare numbers are read as seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Duration(StdDuration);

impl Duration {
    pub const fn from_secs(secs: u64) -> Self {
        Duration(StdDuration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Duration(StdDuration::from_millis(millis))
    }

    #[inline]
    pub fn as_std(&self) -> StdDuration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<StdDuration> for Duration {
    fn from(d: StdDuration) -> Self {
        Duration(d)
    }
}

impl From<Duration> for StdDuration {
    fn from(d: Duration) -> Self {
        d.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration '{input}': {reason}")]
pub struct ParseDurationError {
    input: String,
    reason: &'static str,
}

impl ParseDurationError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => NANOS_PER_MICRO,
        "ms" => NANOS_PER_MILLI,
        "s" => NANOS_PER_SEC,
        "m" => NANOS_PER_MIN,
        "h" => NANOS_PER_HOUR,
        _ => return None,
    })
}

impl FromStr for Duration {
    type Err = ParseDurationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ParseDurationError::new(input, "empty"));
        }
        if s.starts_with('-') {
            return Err(ParseDurationError::new(input, "negative"));
        }
        if s == "0" {
            return Ok(Duration(StdDuration::ZERO));
        }

        let mut total: u128 = 0;
        let mut rest = s;

        while !rest.is_empty() {
            let split = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .ok_or_else(|| ParseDurationError::new(input, "missing unit"))?;
            if split == 0 {
                return Err(ParseDurationError::new(input, "expected a number"));
            }
            let (number, tail) = rest.split_at(split);

            let unit_len = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_len);

            let scale = unit_nanos(unit).ok_or_else(|| ParseDurationError::new(input, "unknown unit"))?;
            let value: f64 = number
                .parse()
                .map_err(|_| ParseDurationError::new(input, "malformed number"))?;

            total = total
                .checked_add((value * scale as f64) as u128)
                .ok_or_else(|| ParseDurationError::new(input, "overflow"))?;
            rest = tail;
        }

        let secs = u64::try_from(total / NANOS_PER_SEC)
            .map_err(|_| ParseDurationError::new(input, "overflow"))?;
        Ok(Duration(StdDuration::new(secs, (total % NANOS_PER_SEC) as u32)))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nanos = self.0.as_nanos();
        if nanos == 0 {
            return f.write_str("0s");
        }

        // Sub-second values print in their own unit; everything else as h/m/s.
        if nanos < NANOS_PER_SEC {
            return match nanos {
                n if n % NANOS_PER_MILLI == 0 => write!(f, "{}ms", n / NANOS_PER_MILLI),
                n if n % NANOS_PER_MICRO == 0 => write!(f, "{}us", n / NANOS_PER_MICRO),
                n => write!(f, "{}ns", n),
            };
        }

        for (scale, suffix) in [(NANOS_PER_HOUR, "h"), (NANOS_PER_MIN, "m")] {
            if nanos >= scale {
                write!(f, "{}{}", nanos / scale, suffix)?;
                nanos %= scale;
            }
        }
        if nanos > 0 {
            let secs = nanos as f64 / NANOS_PER_SEC as f64;
            write!(f, "{}s", secs)?;
        }
        Ok(())
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a duration such as \"2s\", \"1m30s\" or a number of seconds")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
                value.parse().map_err(de::Error::custom)
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
                u64::try_from(value)
                    .map(Duration::from_secs)
                    .map_err(|_| de::Error::custom("duration cannot be negative"))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Duration, E> {
                StdDuration::try_from_secs_f64(value)
                    .map(Duration)
                    .map_err(|_| de::Error::custom("duration must be a finite, non-negative number"))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> StdDuration {
        s.parse::<Duration>().unwrap().as_std()
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse("250ms"), StdDuration::from_millis(250));
        assert_eq!(parse("2s"), StdDuration::from_secs(2));
        assert_eq!(parse("5m"), StdDuration::from_secs(300));
        assert_eq!(parse("1h"), StdDuration::from_secs(3600));
        assert_eq!(parse("10us"), StdDuration::from_micros(10));
    }

    #[test]
    fn test_parse_compound_and_fractional() {
        assert_eq!(parse("1m30s"), StdDuration::from_secs(90));
        assert_eq!(parse("1h2m3s"), StdDuration::from_secs(3723));
        assert_eq!(parse("1.5s"), StdDuration::from_millis(1500));
        assert_eq!(parse(" 0 "), StdDuration::ZERO);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "10", "s", "5x", "-1s", "1..2s"] {
            assert!(bad.parse::<Duration>().is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Duration::from_secs(90).to_string(), "1m30s");
        assert_eq!(Duration::from_secs(7200).to_string(), "2h");
        assert_eq!(Duration::from_millis(250).to_string(), "250ms");
        assert_eq!(Duration::from_millis(1500).to_string(), "1.5s");
        assert_eq!(Duration::default().to_string(), "0s");
    }

    #[test]
    fn test_deserialize_forms() {
        #[derive(Deserialize)]
        struct Holder {
            d: Duration,
        }

        let h: Holder = serde_json::from_str(r#"{"d": "1m"}"#).unwrap();
        assert_eq!(h.d, Duration::from_secs(60));
        let h: Holder = serde_json::from_str(r#"{"d": 3}"#).unwrap();
        assert_eq!(h.d, Duration::from_secs(3));
        let h: Holder = serde_json::from_str(r#"{"d": 0.5}"#).unwrap();
        assert_eq!(h.d, Duration::from_millis(500));
        assert!(serde_json::from_str::<Holder>(r#"{"d": -2}"#).is_err());
    }
}

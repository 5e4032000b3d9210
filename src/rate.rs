// src/rate.rs

use std::fmt;
use std::str::FromStr;

use crate::error::{RateLimiterError, Result};

/// A parsed rate policy: at most `limit` cost units per `window_secs`.
///
/// Parsed once from a caller-supplied string such as `"100/minute"` and
/// immutable for the lifetime of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rate {
    pub limit: u64,
    pub window_secs: u64,
}

impl Rate {
    /// Parse a rate string of the form `"<N>/<unit>"`.
    ///
    /// `N` is a positive integer; `unit` is one of second(s), minute(s),
    /// hour(s), day(s). Case-insensitive, whitespace around the slash
    /// tolerated.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_ascii_lowercase();

        let (count, unit) = normalized
            .split_once('/')
            .ok_or_else(|| malformed(input))?;
        let count = count.trim();
        let unit = unit.trim();

        // Digits only: `u64::from_str` would also accept a leading '+'.
        if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed(input));
        }
        let limit: u64 = count.parse().map_err(|_| malformed(input))?;
        if limit == 0 {
            return Err(malformed(input));
        }

        let window_secs = match unit {
            "second" | "seconds" => 1,
            "minute" | "minutes" => 60,
            "hour" | "hours" => 3600,
            "day" | "days" => 86400,
            _ => return Err(malformed(input)),
        };

        Ok(Rate { limit, window_secs })
    }
}

fn malformed(input: &str) -> RateLimiterError {
    RateLimiterError::MalformedRate(format!(
        "'{}' (expected '<count>/<unit>', e.g. '100/minute')",
        input.trim()
    ))
}

impl FromStr for Rate {
    type Err = RateLimiterError;

    fn from_str(s: &str) -> Result<Self> {
        Rate::parse(s)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.window_secs {
            1 => "second",
            60 => "minute",
            3600 => "hour",
            _ => "day",
        };
        write!(f, "{}/{}", self.limit, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_all_units() {
        assert_eq!(Rate::parse("100/second").unwrap(), Rate { limit: 100, window_secs: 1 });
        assert_eq!(Rate::parse("100/minute").unwrap(), Rate { limit: 100, window_secs: 60 });
        assert_eq!(Rate::parse("1000/hour").unwrap(), Rate { limit: 1000, window_secs: 3600 });
        assert_eq!(Rate::parse("5/day").unwrap(), Rate { limit: 5, window_secs: 86400 });
    }

    #[test]
    fn accepts_plural_and_mixed_case() {
        assert_eq!(Rate::parse("2/seconds").unwrap().window_secs, 1);
        assert_eq!(Rate::parse("2/Minutes").unwrap().window_secs, 60);
        assert_eq!(Rate::parse("2/HOURS").unwrap().window_secs, 3600);
        assert_eq!(Rate::parse("2/Days").unwrap().window_secs, 86400);
    }

    #[test]
    fn tolerates_whitespace() {
        assert_eq!(
            Rate::parse("  100 / minute  ").unwrap(),
            Rate { limit: 100, window_secs: 60 }
        );
    }

    #[test]
    fn rejects_zero_and_signs() {
        for bad in ["0/minute", "-1/minute", "+5/minute"] {
            assert!(matches!(
                Rate::parse(bad),
                Err(RateLimiterError::MalformedRate(_))
            ));
        }
    }

    #[test]
    fn rejects_garbage() {
        for bad in [
            "", "/", "100", "minute", "100/", "/minute", "100/fortnight",
            "ten/minute", "1.5/minute", "100/minute/day",
        ] {
            assert!(
                matches!(Rate::parse(bad), Err(RateLimiterError::MalformedRate(_))),
                "should reject {:?}",
                bad
            );
        }
    }

    #[test]
    fn display_round_trips() {
        for s in ["7/second", "100/minute", "1000/hour", "42/day"] {
            let rate = Rate::parse(s).unwrap();
            assert_eq!(Rate::parse(&rate.to_string()).unwrap(), rate);
        }
    }

    proptest! {
        #[test]
        fn parse_round_trip(limit in 1u64..1_000_000_000, unit_idx in 0usize..4) {
            let units = ["second", "minute", "hour", "day"];
            let windows = [1u64, 60, 3600, 86400];
            let rate = Rate::parse(&format!("{}/{}", limit, units[unit_idx])).unwrap();
            prop_assert_eq!(rate.limit, limit);
            prop_assert_eq!(rate.window_secs, windows[unit_idx]);
        }

        #[test]
        fn never_panics_on_arbitrary_input(input in "\\PC*") {
            let _ = Rate::parse(&input);
        }
    }
}

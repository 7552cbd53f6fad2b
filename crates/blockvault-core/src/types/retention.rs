//! Retention policy expressions.
//!
//! A policy is written `<N>y<N>m<N>w<N>d`: every component is optional,
//! components appear in that order, and at least one must be present.
//! `1y2m3w4d` means one year, two months, three weeks and four days.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A calendar-aware maximum backup age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Calendar years.
    pub years: u32,
    /// Calendar months.
    pub months: u32,
    /// Weeks.
    pub weeks: u32,
    /// Days.
    pub days: u32,
}

impl RetentionPolicy {
    /// Compute the absolute age threshold relative to `now`.
    ///
    /// Years, then months, are subtracted on the calendar, each step
    /// clamping to the last day of a shorter month; weeks and days follow
    /// as fixed spans. Returns `None` when the result is outside the
    /// representable range.
    pub fn threshold(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = i64::from(self.weeks) * 7 + i64::from(self.days);
        now.checked_sub_months(Months::new(self.years.checked_mul(12)?))?
            .checked_sub_months(Months::new(self.months))?
            .checked_sub_signed(Duration::try_days(days)?)
    }
}

impl FromStr for RetentionPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            AppError::validation(format!(
                "Retention time '{s}' is invalid. Follow <YEARS>y<MONTHS>m<WEEKS>w<DAYS>d"
            ))
        };

        let input = s.trim().to_ascii_lowercase();
        let mut policy = Self::default();
        let mut next_unit = 0usize;
        let mut digits = String::new();
        let mut components = 0;

        for ch in input.chars() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                continue;
            }
            let unit = match ch {
                'y' => 0,
                'm' => 1,
                'w' => 2,
                'd' => 3,
                _ => return Err(invalid()),
            };
            if digits.is_empty() || unit < next_unit {
                return Err(invalid());
            }
            let value: u32 = digits.parse().map_err(|_| invalid())?;
            match unit {
                0 => policy.years = value,
                1 => policy.months = value,
                2 => policy.weeks = value,
                _ => policy.days = value,
            }
            digits.clear();
            next_unit = unit + 1;
            components += 1;
        }

        if components == 0 || !digits.is_empty() {
            return Err(invalid());
        }
        Ok(policy)
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (value, unit) in [
            (self.years, 'y'),
            (self.months, 'm'),
            (self.weeks, 'w'),
            (self.days, 'd'),
        ] {
            if value > 0 {
                write!(f, "{value}{unit}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().expect("valid date")
    }

    #[test]
    fn test_full_policy_threshold() {
        let policy: RetentionPolicy = "1y2m3w4d".parse().expect("valid policy");
        assert_eq!(
            policy,
            RetentionPolicy {
                years: 1,
                months: 2,
                weeks: 3,
                days: 4
            }
        );
        assert_eq!(policy.threshold(at(2024, 6, 15)), Some(at(2023, 3, 21)));
    }

    #[test]
    fn test_partial_policies() {
        let weeks: RetentionPolicy = "2w".parse().expect("valid");
        assert_eq!(weeks.threshold(at(2024, 6, 15)), Some(at(2024, 6, 1)));

        let days: RetentionPolicy = "3D".parse().expect("case-insensitive");
        assert_eq!(days.days, 3);

        let mixed: RetentionPolicy = "1m10d".parse().expect("valid");
        assert_eq!(mixed.threshold(at(2024, 3, 31)), Some(at(2024, 2, 19)));
    }

    #[test]
    fn test_month_end_is_clamped() {
        let policy: RetentionPolicy = "1m".parse().expect("valid");
        assert_eq!(policy.threshold(at(2024, 3, 31)), Some(at(2024, 2, 29)));
    }

    #[test]
    fn test_years_clamp_before_months() {
        let policy: RetentionPolicy = "1y1m".parse().expect("valid");
        // 2024-02-29 -> 2023-02-28 -> 2023-01-28
        assert_eq!(policy.threshold(at(2024, 2, 29)), Some(at(2023, 1, 28)));
    }

    #[test]
    fn test_invalid_policies() {
        for raw in ["", "   ", "abc", "5", "d", "1d1y", "1w1w", "1h", "-1d", "1y 2m"] {
            assert!(raw.parse::<RetentionPolicy>().is_err(), "{raw:?} should fail");
        }
    }

    #[test]
    fn test_display() {
        let policy: RetentionPolicy = "1y0m3w".parse().expect("valid");
        assert_eq!(policy.to_string(), "1y3w");
    }
}

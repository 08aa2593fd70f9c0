//! Allowed status patterns.
//!
//! By default any non-2xx status fails the call. Patterns widen that, per
//! client or per call:
//!
//! - `"404"` a single code
//! - `"4xx"`, `"40x"` wildcard digits (`x`, `X` or `*`)
//! - `"400-404"` an inclusive range
//! - `"*"` every status
//!
//! Several patterns can be joined with commas: `"404,5xx"`.

use crate::{Error, Result};
use http::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatusRange {
    low: u16,
    high: u16,
}

/// A set of status codes that do not fail a call.
#[derive(Debug, Clone, Default)]
pub struct AllowedStatuses {
    ranges: Vec<StatusRange>,
}

impl AllowedStatuses {
    /// Parses a comma-separated list of patterns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] for malformed patterns.
    pub fn parse(patterns: &str) -> Result<Self> {
        let mut allowed = Self::default();
        allowed.extend(patterns)?;
        Ok(allowed)
    }

    /// Allows every status code.
    pub fn any() -> Self {
        Self {
            ranges: vec![StatusRange { low: 0, high: 999 }],
        }
    }

    /// Adds the patterns in `patterns` to the set.
    pub fn extend(&mut self, patterns: &str) -> Result<()> {
        for pattern in patterns.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            self.ranges.push(parse_pattern(pattern)?);
        }
        Ok(())
    }

    /// Merges another set into this one.
    pub fn merge(&mut self, other: &AllowedStatuses) {
        self.ranges.extend_from_slice(&other.ranges);
    }

    /// Returns `true` if `status` is allowed by a pattern.
    pub fn contains(&self, status: StatusCode) -> bool {
        let code = status.as_u16();
        self.ranges.iter().any(|r| r.low <= code && code <= r.high)
    }

    /// Returns `true` if `status` does not fail the call: it is 2xx or allowed.
    pub fn permits(&self, status: StatusCode) -> bool {
        status.is_success() || self.contains(status)
    }
}

fn parse_pattern(pattern: &str) -> Result<StatusRange> {
    let invalid = || Error::ConfigurationError(format!("Invalid status pattern: {pattern}"));

    if pattern == "*" {
        return Ok(StatusRange { low: 0, high: 999 });
    }

    if let Some((low, high)) = pattern.split_once('-') {
        let low: u16 = low.trim().parse().map_err(|_| invalid())?;
        let high: u16 = high.trim().parse().map_err(|_| invalid())?;
        if low > high || high > 999 {
            return Err(invalid());
        }
        return Ok(StatusRange { low, high });
    }

    if pattern.len() != 3 {
        return Err(invalid());
    }
    let (mut low, mut high) = (0u16, 0u16);
    for c in pattern.chars() {
        let (lo, hi) = match c {
            'x' | 'X' | '*' => (0, 9),
            d => {
                let d = d.to_digit(10).ok_or_else(invalid)? as u16;
                (d, d)
            }
        };
        low = low * 10 + lo;
        high = high * 10 + hi;
    }
    Ok(StatusRange { low, high })
}

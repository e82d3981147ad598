//
// Copyright (c) 2023 ZettaScale Technology
//
// This program and the accompanying materials are made available under the
// terms of the Eclipse Public License 2.0 which is available at
// http://www.eclipse.org/legal/epl-2.0, or the Apache License, Version 2.0
// which is available at https://www.apache.org/licenses/LICENSE-2.0.
//
// SPDX-License-Identifier: EPL-2.0 OR Apache-2.0
//
// Contributors:
//   ZettaScale Zenoh Team, <zenoh@zettascale.tech>
//
//! Parser, formatter and evaluator for the `_time` query-parameter literal
//! grammar (spec §4.2):
//!
//! ```text
//! range    ::= ('[' | ']') bound_pair ('[' | ']')
//! bound_pair
//!          ::= bound '..' bound        -- two-sided
//!            | bound ';' duration      -- start + duration
//! bound    ::= ε | 'now(' [duration] ')'
//! duration ::= number unit?
//! unit     ::= 'u' | 'ms' | 's' | 'm' | 'h' | 'd' | 'w'
//! ```
//!
//! The leading bracket marks the start bound inclusive (`[`) or exclusive
//! (`]`); the trailing bracket marks the end bound inclusive (`]`) or
//! exclusive (`[`) — standard closed/open interval notation, so
//! `"[a..b]"` is fully closed and `"]a..b["` fully open.

use crate::error::{Error, ZResult};

const UNITS: &[(&str, f64)] = &[
    ("ms", 1e-3),
    ("u", 1e-6),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3600.0),
    ("d", 86400.0),
    ("w", 604_800.0),
];

/// One side of a range: `None` is unbounded (`ε`); `Some(offset)` is
/// `now(offset)`, in seconds relative to the caller-supplied `now`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub inclusive: bool,
    pub offset: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: Bound,
    pub end: Bound,
}

fn parse_duration(s: &str) -> ZResult<f64> {
    for (unit, mult) in UNITS {
        if let Some(num) = s.strip_suffix(unit) {
            if num.is_empty() {
                continue; // unit-only string, reject below
            }
            if let Ok(n) = num.parse::<f64>() {
                if n.is_finite() {
                    return Ok(n * mult);
                }
            }
        }
    }
    let n: f64 = s
        .parse()
        .map_err(|_| Error::InvalidTimeRange(s.to_string()))?;
    if !n.is_finite() {
        return Err(Error::InvalidTimeRange(s.to_string()));
    }
    Ok(n)
}

fn parse_bound(s: &str) -> ZResult<Option<f64>> {
    if s.is_empty() {
        return Ok(None);
    }
    let inner = s
        .strip_prefix("now(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| Error::InvalidTimeRange(s.to_string()))?;
    if inner.is_empty() {
        return Ok(Some(0.0));
    }
    parse_duration(inner).map(Some)
}

/// Parse a full time-range literal.
pub fn parse(literal: &str) -> ZResult<TimeRange> {
    let mut chars = literal.chars();
    let first = chars
        .next()
        .ok_or_else(|| Error::InvalidTimeRange(literal.to_string()))?;
    let last = chars
        .next_back()
        .ok_or_else(|| Error::InvalidTimeRange(literal.to_string()))?;

    let start_inclusive = match first {
        '[' => true,
        ']' => false,
        _ => return Err(Error::InvalidTimeRange(literal.to_string())),
    };
    let end_inclusive = match last {
        ']' => true,
        '[' => false,
        _ => return Err(Error::InvalidTimeRange(literal.to_string())),
    };

    let inner = &literal[1..literal.len() - 1];

    if let Some(idx) = inner.find("..") {
        let start = parse_bound(&inner[..idx])?;
        let end = parse_bound(&inner[idx + 2..])?;
        Ok(TimeRange {
            start: Bound { inclusive: start_inclusive, offset: start },
            end: Bound { inclusive: end_inclusive, offset: end },
        })
    } else if let Some(idx) = inner.find(';') {
        let start = parse_bound(&inner[..idx])?
            .ok_or_else(|| Error::InvalidTimeRange("start must be bounded".to_string()))?;
        let duration = parse_duration(&inner[idx + 1..])?;
        Ok(TimeRange {
            start: Bound { inclusive: start_inclusive, offset: Some(start) },
            end: Bound { inclusive: end_inclusive, offset: Some(start + duration) },
        })
    } else {
        Err(Error::InvalidTimeRange(literal.to_string()))
    }
}

fn format_bound(offset: Option<f64>) -> String {
    match offset {
        None => String::new(),
        Some(v) => format!("now({v})"),
    }
}

/// Render a canonical literal for `r`. Not guaranteed to equal the original
/// input text (units are normalized away), but `parse(format(r)) == r`.
pub fn format(r: &TimeRange) -> String {
    let sb = if r.start.inclusive { '[' } else { ']' };
    let eb = if r.end.inclusive { ']' } else { '[' };
    format!(
        "{sb}{}..{}{eb}",
        format_bound(r.start.offset),
        format_bound(r.end.offset)
    )
}

/// Evaluate whether `ts` falls in `r`, resolving `now(...)` offsets against
/// `now`. Both are caller-chosen units (seconds-since-epoch is the natural
/// choice when the caller converts from a `uhlc::Timestamp`).
pub fn contains(r: &TimeRange, ts: f64, now: f64) -> bool {
    let lower_ok = match r.start.offset {
        None => true,
        Some(off) => {
            let bound = now + off;
            if r.start.inclusive { ts >= bound } else { ts > bound }
        }
    };
    let upper_ok = match r.end.offset {
        None => true,
        Some(off) => {
            let bound = now + off;
            if r.end.inclusive { ts <= bound } else { ts < bound }
        }
    };
    lower_ok && upper_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S6: `"[now(-1.5m)..now()]"` yields start inclusive offset=-90.0 and
    /// end inclusive offset=0.0; `contains(t, t)` is true for `t = now`.
    #[test]
    fn s6_time_range_example() {
        let r = parse("[now(-1.5m)..now()]").unwrap();
        assert!(r.start.inclusive);
        assert_eq!(r.start.offset, Some(-90.0));
        assert!(r.end.inclusive);
        assert_eq!(r.end.offset, Some(0.0));
        assert!(contains(&r, 1_000.0, 1_000.0));
    }

    #[test]
    fn exclusive_brackets_reject_boundary() {
        let r = parse("]now(-10)..now(10)[").unwrap();
        assert!(!r.start.inclusive);
        assert!(!r.end.inclusive);
        assert!(!contains(&r, 990.0, 1000.0)); // exactly at lower bound
        assert!(!contains(&r, 1010.0, 1000.0)); // exactly at upper bound
        assert!(contains(&r, 1000.0, 1000.0));
    }

    #[test]
    fn unbounded_sides() {
        let r = parse("[..now()]").unwrap();
        assert_eq!(r.start.offset, None);
        assert!(contains(&r, -1e9, 0.0));
        assert!(!contains(&r, 1.0, 0.0));
    }

    #[test]
    fn start_plus_duration_form() {
        let r = parse("[now(-60);30s]").unwrap();
        assert_eq!(r.start.offset, Some(-60.0));
        assert_eq!(r.end.offset, Some(-30.0));
    }

    #[test]
    fn units_convert_to_seconds() {
        assert_eq!(parse_duration("1w").unwrap(), 604_800.0);
        assert_eq!(parse_duration("1d").unwrap(), 86_400.0);
        assert_eq!(parse_duration("1h").unwrap(), 3600.0);
        assert_eq!(parse_duration("1m").unwrap(), 60.0);
        assert_eq!(parse_duration("250ms").unwrap(), 0.25);
        assert_eq!(parse_duration("1000u").unwrap(), 1e-3);
        assert_eq!(parse_duration("5").unwrap(), 5.0);
    }

    /// Invariant 6: round-trip for arbitrary representable ranges.
    #[test]
    fn invariant6_round_trip() {
        let samples = [
            "[now(-90)..now(0)]",
            "]now(-10)..now(10)[",
            "[..now(5)]",
            "[now(-5)..[",
        ];
        for literal in samples {
            let r = parse(literal).unwrap();
            let reformatted = format(&r);
            let r2 = parse(&reformatted).unwrap();
            assert_eq!(r, r2, "round-trip mismatch for {literal}");
        }
    }

    #[test]
    fn rejects_unit_only_strings() {
        assert!(parse("[now(m)..now()]").is_err());
    }

    #[test]
    fn rejects_malformed_brackets() {
        assert!(parse("now(-1)..now()").is_err());
        assert!(parse("").is_err());
        assert!(parse("[").is_err());
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_duration("1e400").is_err());
    }
}

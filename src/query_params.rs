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
//! Parsing and allocation-free encoding of the reserved query-parameter
//! keys used to drive cache replay and recovery queries (spec §4.2, §6).

use std::fmt::Write as _;

use crate::error::{Error, ZResult};
use crate::seqnum::Sn;

pub const ANYKE: &str = "_anyke";
pub const MAX: &str = "_max";
pub const RANGE: &str = "_range";
pub const TIME: &str = "_time";

/// An inclusive SN range; either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnRange {
    pub start: Option<Sn>,
    pub end: Option<Sn>,
}

impl SnRange {
    pub fn contains(&self, sn: Sn) -> bool {
        use crate::seqnum::sn_diff;
        if let Some(start) = self.start {
            if sn_diff(sn, start) < 0 {
                return false;
            }
        }
        if let Some(end) = self.end {
            if sn_diff(sn, end) > 0 {
                return false;
            }
        }
        true
    }
}

/// The parsed contents of a query's `parameters` string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryParams {
    pub anyke: bool,
    pub max: Option<u32>,
    pub range: Option<SnRange>,
    /// Left as a raw string: evaluating a time-range literal needs a `now`
    /// reference that only the caller (holding the session clock) has; see
    /// `crate::time_range`.
    pub time: Option<String>,
}

/// Parse a semicolon-separated `key[=value]` parameter string. Tolerates
/// empty tokens (so `parse(";")` yields an all-default result, per
/// invariant 7), ignores unknown keys, and treats a missing/empty value as
/// absent.
pub fn parse(parameters: &str) -> ZResult<QueryParams> {
    let mut out = QueryParams::default();
    for token in parameters.split(';') {
        if token.is_empty() {
            continue;
        }
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (token, None),
        };
        match key {
            ANYKE => out.anyke = true,
            MAX => {
                if let Some(v) = value.filter(|v| !v.is_empty()) {
                    out.max = Some(v.parse::<u32>().map_err(|_| {
                        Error::InvalidQueryParams(format!("bad _max value: {v}"))
                    })?);
                }
            }
            RANGE => {
                if let Some(v) = value.filter(|v| !v.is_empty()) {
                    out.range = Some(parse_sn_range(v)?);
                }
            }
            TIME => {
                if let Some(v) = value.filter(|v| !v.is_empty()) {
                    out.time = Some(v.to_string());
                }
            }
            _ => {} // unknown keys are ignored
        }
    }
    Ok(out)
}

fn parse_sn_range(v: &str) -> ZResult<SnRange> {
    let (a, b) = v
        .split_once("..")
        .ok_or_else(|| Error::InvalidQueryParams(format!("bad _range value: {v}")))?;
    let start = if a.is_empty() {
        None
    } else {
        Some(
            a.parse::<Sn>()
                .map_err(|_| Error::InvalidQueryParams(format!("bad _range start: {a}")))?,
        )
    };
    let end = if b.is_empty() {
        None
    } else {
        Some(
            b.parse::<Sn>()
                .map_err(|_| Error::InvalidQueryParams(format!("bad _range end: {b}")))?,
        )
    };
    Ok(SnRange { start, end })
}

/// Encode into `buf`, semicolon-separated, `_anyke` first if present. Fails
/// with `Error::EncodeOverflow` (and leaves `buf` unmodified) if the
/// encoding would not fit, so that no partial write is ever visible.
pub fn encode(params: &QueryParams, buf: &mut String) -> ZResult<()> {
    let mut staged = String::new();
    let mut first = true;
    let mut push_sep = |s: &mut String| {
        if !first {
            s.push(';');
        }
        first = false;
    };

    if params.anyke {
        push_sep(&mut staged);
        staged.push_str(ANYKE);
    }
    if let Some(max) = params.max {
        push_sep(&mut staged);
        write!(staged, "{MAX}={max}").map_err(|_| Error::EncodeOverflow)?;
    }
    if let Some(range) = params.range {
        push_sep(&mut staged);
        staged.push_str(RANGE);
        staged.push('=');
        if let Some(start) = range.start {
            write!(staged, "{start}").map_err(|_| Error::EncodeOverflow)?;
        }
        staged.push_str("..");
        if let Some(end) = range.end {
            write!(staged, "{end}").map_err(|_| Error::EncodeOverflow)?;
        }
    }
    if let Some(time) = &params.time {
        push_sep(&mut staged);
        write!(staged, "{TIME}={time}").map_err(|_| Error::EncodeOverflow)?;
    }

    if buf.capacity() > 0 && staged.len() > buf.capacity() - buf.len() {
        return Err(Error::EncodeOverflow);
    }
    buf.push_str(&staged);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant 7: `parse("") = ∅`.
    #[test]
    fn parse_empty_is_default() {
        assert_eq!(parse("").unwrap(), QueryParams::default());
    }

    /// Invariant 7: `parse(";") = [⊥]` — a lone separator is still default.
    #[test]
    fn parse_lone_separator_is_default() {
        assert_eq!(parse(";").unwrap(), QueryParams::default());
    }

    /// Invariant 7: unknown keys are ignored.
    #[test]
    fn parse_ignores_unknown_keys() {
        let p = parse("_anyke;color=blue;_max=3").unwrap();
        assert!(p.anyke);
        assert_eq!(p.max, Some(3));
    }

    #[test]
    fn parse_range_open_endpoints() {
        let p = parse("_range=3..").unwrap();
        assert_eq!(p.range, Some(SnRange { start: Some(3), end: None }));
        let p2 = parse("_range=..9").unwrap();
        assert_eq!(p2.range, Some(SnRange { start: None, end: Some(9) }));
    }

    #[test]
    fn parse_rejects_malformed_range() {
        assert!(parse("_range=abc").is_err());
        assert!(parse("_range=1-2").is_err());
    }

    #[test]
    fn encode_matches_anyke_first_ordering() {
        let p = QueryParams {
            anyke: true,
            max: Some(5),
            range: None,
            time: None,
        };
        let mut buf = String::new();
        encode(&p, &mut buf).unwrap();
        assert_eq!(buf, "_anyke;_max=5");
    }

    #[test]
    fn encode_range_with_open_end() {
        let p = QueryParams {
            anyke: false,
            max: None,
            range: Some(SnRange { start: Some(4), end: None }),
            time: None,
        };
        let mut buf = String::new();
        encode(&p, &mut buf).unwrap();
        assert_eq!(buf, "_range=4..");
    }

    #[test]
    fn sn_range_contains_handles_wraparound() {
        let r = SnRange { start: Some(u32::MAX - 1), end: Some(1) };
        assert!(r.contains(u32::MAX));
        assert!(r.contains(0));
        assert!(r.contains(1));
        assert!(!r.contains(2));
    }

    #[test]
    fn encode_fails_cleanly_on_overflow_without_partial_write() {
        let p = QueryParams {
            anyke: true,
            max: Some(123456),
            range: None,
            time: None,
        };
        let mut buf = String::with_capacity(4);
        buf.push_str("xy");
        let before = buf.clone();
        let err = encode(&p, &mut buf);
        assert!(err.is_err());
        assert_eq!(buf, before);
    }
}

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
//! Composition and parsing of the `@adv/...` key-expression suffixes shared
//! by every advanced publisher/subscriber (spec §4.1, §6 "Key-expression
//! surface"). Pure string work: no `zenoh::KeyExpr` validation is performed
//! here, since interning/canonicalizing is the session's job.

/// Well-known segment literals.
pub const ADV: &str = "@adv";
pub const PUB: &str = "pub";
pub const SUB: &str = "sub";
pub const HB: &str = "heartbeat";
pub const UHLC: &str = "uhlc";
/// Sentinel used in place of an absent `meta` segment.
pub const NO_META: &str = "_";
pub const STAR: &str = "*";
pub const DSTAR: &str = "**";

/// Lowercase-hex, unseparated rendering of a Zenoh id, as required by the
/// key-expression surface.
pub fn zid_to_hex(zid: &[u8]) -> String {
    let mut out = String::with_capacity(zid.len() * 2);
    for b in zid {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Either a decimal entity id, or the `uhlc` sentinel for the
/// timestamped-only pseudo-publisher (`eid == 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EidSegment {
    Decimal(u32),
    Uhlc,
}

impl EidSegment {
    pub fn from_eid(eid: u32, timestamped_only: bool) -> Self {
        if timestamped_only {
            EidSegment::Uhlc
        } else {
            EidSegment::Decimal(eid)
        }
    }

    fn as_segment(&self) -> String {
        match self {
            EidSegment::Decimal(eid) => eid.to_string(),
            EidSegment::Uhlc => UHLC.to_string(),
        }
    }

    /// Parse a segment back, mapping the literal `uhlc` to `eid = 0` per
    /// spec §4.5.2.
    pub fn parse(segment: &str) -> Option<Self> {
        if segment == UHLC {
            Some(EidSegment::Uhlc)
        } else {
            segment.parse::<u32>().ok().map(EidSegment::Decimal)
        }
    }

    pub fn eid(&self) -> u32 {
        match self {
            EidSegment::Decimal(eid) => *eid,
            EidSegment::Uhlc => 0,
        }
    }
}

fn meta_segment(meta: Option<&str>) -> &str {
    meta.unwrap_or(NO_META)
}

/// `@adv/pub/<zid>/(<eid>|uhlc)/(<meta>|_)`
pub fn publisher_suffix(zid_hex: &str, eid: EidSegment, meta: Option<&str>) -> String {
    format!(
        "{ADV}/{PUB}/{zid_hex}/{}/{}",
        eid.as_segment(),
        meta_segment(meta)
    )
}

/// `@adv/sub/<zid>/<eid>/(<meta>|_)`
pub fn subscriber_suffix(zid_hex: &str, eid: u32, meta: Option<&str>) -> String {
    format!("{ADV}/{SUB}/{zid_hex}/{eid}/{}", meta_segment(meta))
}

/// `@adv/heartbeat/<zid>/(<eid>|uhlc)/(<meta>|_)` — kept in the same
/// `@adv/<kind>/<zid>/<eid>/<meta>` shape as `publisher_suffix` so
/// `parse_adv_key` can recover `(zid, eid)` from a heartbeat key the same
/// way it does for a publisher's own advertisement key.
pub fn heartbeat_suffix(zid_hex: &str, eid: EidSegment, meta: Option<&str>) -> String {
    format!(
        "{ADV}/{HB}/{zid_hex}/{}/{}",
        eid.as_segment(),
        meta_segment(meta)
    )
}

/// `<base>/<suffix>`
pub fn join(base: &str, suffix: &str) -> String {
    format!("{base}/{suffix}")
}

/// `<base>/@adv/*/<zid>/<eid>/**` — the per-source recovery-query key,
/// matching either `pub` or `sub` kind via the `*` wildcard.
pub fn per_source_query_keyexpr(base: &str, zid_hex: &str, eid: u32) -> String {
    format!("{base}/{ADV}/{STAR}/{zid_hex}/{eid}/{DSTAR}")
}

/// `<base>/@adv/**` — matches every advertised publisher and subscriber
/// suffix, used by the initial history query.
pub fn history_scan_keyexpr(base: &str) -> String {
    format!("{base}/{ADV}/{DSTAR}")
}

/// `<base>/@adv/pub/**` — the subscriber-side liveliness scan for
/// discovering publishers (spec §6).
pub fn liveliness_scan_keyexpr(base: &str) -> String {
    format!("{base}/{ADV}/{PUB}/{DSTAR}")
}

/// `<base>/@adv/heartbeat/**` — the subscriber-side scan for heartbeat PUTs.
pub fn heartbeat_scan_keyexpr(base: &str) -> String {
    format!("{base}/{ADV}/{HB}/{DSTAR}")
}

/// The parsed form of a liveliness-token key matched by the publisher
/// discovery subscriber (spec §4.5.2): `<base>/@adv/<kind>/<zid>/<eid|uhlc>/<meta|_>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAdvKey {
    pub kind: AdvKind,
    pub zid_hex: String,
    pub eid: EidSegment,
    pub meta: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvKind {
    Pub,
    Sub,
    Heartbeat,
}

/// Parse the `@adv/<kind>/<zid>/<eid|uhlc>/<meta|_>` segment group out of a
/// full key expression. Segments are parsed back-to-front per spec §4.5.2 so
/// that an arbitrarily long `base_keyexpr` prefix (which may itself contain
/// `/`) does not have to be known in advance; malformed tails return `None`
/// and the caller logs a warning and drops the sample.
pub fn parse_adv_key(full_key: &str) -> Option<ParsedAdvKey> {
    let segs: Vec<&str> = full_key.split('/').collect();
    if segs.len() < 5 {
        return None;
    }
    let n = segs.len();
    let meta_seg = segs[n - 1];
    let eid_seg = segs[n - 2];
    let zid_seg = segs[n - 3];
    let kind_seg = segs[n - 4];
    let adv_seg = segs[n - 5];

    if adv_seg != ADV {
        return None;
    }
    let kind = match kind_seg {
        PUB => AdvKind::Pub,
        SUB => AdvKind::Sub,
        HB => AdvKind::Heartbeat,
        _ => return None,
    };
    if zid_seg.is_empty() || !zid_seg.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let eid = EidSegment::parse(eid_seg)?;
    let meta = if meta_seg == NO_META {
        None
    } else {
        Some(meta_seg.to_string())
    };

    Some(ParsedAdvKey {
        kind,
        zid_hex: zid_seg.to_string(),
        eid,
        meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zid_hex_is_lowercase_unseparated() {
        assert_eq!(zid_to_hex(&[0xAB, 0x01, 0xff]), "ab01ff");
    }

    #[test]
    fn publisher_suffix_decimal_eid() {
        assert_eq!(
            publisher_suffix("ab01", EidSegment::Decimal(7), None),
            "@adv/pub/ab01/7/_"
        );
    }

    #[test]
    fn publisher_suffix_uhlc_eid() {
        assert_eq!(
            publisher_suffix("ab01", EidSegment::Uhlc, Some("room1")),
            "@adv/pub/ab01/uhlc/room1"
        );
    }

    #[test]
    fn subscriber_suffix_matches_spec() {
        assert_eq!(subscriber_suffix("ab01", 3, None), "@adv/sub/ab01/3/_");
    }

    #[test]
    fn per_source_query_key_uses_any_kind_wildcard() {
        assert_eq!(
            per_source_query_keyexpr("demo/sensors", "ab01", 7),
            "demo/sensors/@adv/*/ab01/7/**"
        );
    }

    #[test]
    fn parse_adv_key_round_trips_decimal() {
        let key = "demo/sensors/@adv/pub/ab01/7/_";
        let parsed = parse_adv_key(key).unwrap();
        assert_eq!(parsed.kind, AdvKind::Pub);
        assert_eq!(parsed.zid_hex, "ab01");
        assert_eq!(parsed.eid, EidSegment::Decimal(7));
        assert_eq!(parsed.meta, None);
    }

    #[test]
    fn parse_adv_key_maps_uhlc_to_eid_zero() {
        let parsed = parse_adv_key("base/@adv/pub/ab01/uhlc/_").unwrap();
        assert_eq!(parsed.eid, EidSegment::Uhlc);
        assert_eq!(parsed.eid.eid(), 0);
    }

    #[test]
    fn parse_adv_key_rejects_malformed() {
        assert!(parse_adv_key("too/short").is_none());
        assert!(parse_adv_key("base/nope/pub/ab01/7/_").is_none());
        assert!(parse_adv_key("base/@adv/bogus/ab01/7/_").is_none());
        assert!(parse_adv_key("base/@adv/pub/zz/7/_").is_none());
        assert!(parse_adv_key("base/@adv/pub/ab01/notanumber/_").is_none());
    }

    #[test]
    fn heartbeat_suffix_round_trips_through_parse_adv_key() {
        let suffix = heartbeat_suffix("ab01", EidSegment::Decimal(7), None);
        assert_eq!(suffix, "@adv/heartbeat/ab01/7/_");
        let parsed = parse_adv_key(&join("demo/sensors", &suffix)).unwrap();
        assert_eq!(parsed.kind, AdvKind::Heartbeat);
        assert_eq!(parsed.zid_hex, "ab01");
        assert_eq!(parsed.eid, EidSegment::Decimal(7));
    }

    #[test]
    fn parse_adv_key_keeps_meta() {
        let parsed = parse_adv_key("base/@adv/sub/ab01/3/roomA").unwrap();
        assert_eq!(parsed.meta, Some("roomA".to_string()));
    }
}

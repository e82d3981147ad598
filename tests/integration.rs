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
//! End-to-end scenarios (spec §8) run against the pure core: a per-source
//! sequencing engine plumbed into a miss registry, exactly the composition
//! `subscriber_state.rs` performs against a real `zenoh::Sample`. No session
//! is involved, so these run as ordinary `#[test]`s.

use zenoh_ext_advanced::miss::MissRegistry;
use zenoh_ext_advanced::query_params::{self, QueryParams, SnRange};
use zenoh_ext_advanced::sequencing::PerSourceSequencedState;
use zenoh_ext_advanced::time_range;

/// Drive a sequence of `(sn, retransmission)` events through one source and
/// a miss registry, returning the delivered SNs and the miss events seen.
fn run(events: &[(u32, bool)], history_depth: usize, global_pending: u32) -> (Vec<u32>, Vec<u32>) {
    let mut state = PerSourceSequencedState::new();
    let mut registry: MissRegistry<&'static str> = MissRegistry::new();
    let misses = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let misses2 = misses.clone();
    registry.declare(Box::new(move |ev| misses2.lock().unwrap().push(ev.nb)));

    let mut delivered = Vec::new();
    for (i, (sn, retransmission)) in events.iter().enumerate() {
        let outcome = state.ingest(i != 0, global_pending, history_depth, *retransmission, *sn, *sn);
        delivered.extend(outcome.delivered);
        if let Some(nb) = outcome.miss {
            registry.notify("publisher-1", nb);
        }
    }
    let misses = misses.lock().unwrap().clone();
    (delivered, misses)
}

#[test]
fn s1_ordered_lossless_no_miss_events() {
    let events: Vec<(u32, bool)> = (0..10).map(|sn| (sn, true)).collect();
    let (delivered, misses) = run(&events, 0, 0);
    assert_eq!(delivered, (0u32..10).collect::<Vec<_>>());
    assert!(misses.is_empty());
}

#[test]
fn s3_gap_without_retransmission_emits_exactly_one_miss_event() {
    let events: Vec<(u32, bool)> = [0, 1, 2, 5, 6, 7, 8, 9]
        .iter()
        .map(|&sn| (sn, false))
        .collect();
    let (delivered, misses) = run(&events, 0, 0);
    assert_eq!(delivered, vec![0, 1, 2, 5, 6, 7, 8, 9]);
    assert_eq!(misses, vec![2]);
}

/// Invariant 3: sum(MissEvent.nb) + callback-invocation-count == last - first + 1.
#[test]
fn invariant3_accounting_holds_across_gaps() {
    let events: Vec<(u32, bool)> = [0, 1, 2, 5, 6, 9].iter().map(|&sn| (sn, false)).collect();
    let (delivered, misses) = run(&events, 0, 0);
    let first = *delivered.first().unwrap();
    let last = *delivered.last().unwrap();
    let total_missed: u32 = misses.iter().sum();
    assert_eq!(total_missed + delivered.len() as u32, last - first + 1);
}

/// S4 History replay, expressed via the same engine: a global history
/// query is in flight (global_pending=1) while three out-of-order replies
/// for a history_depth=3 subscription arrive; delivery still ends up
/// oldest-first with no premature flush.
#[test]
fn s4_history_replay_oldest_first() {
    let mut state = PerSourceSequencedState::new();
    let mut delivered = Vec::new();
    for (i, sn) in [4u32, 2, 3].into_iter().enumerate() {
        let outcome = state.ingest(i != 0, 1, 3, true, sn, sn);
        delivered.extend(outcome.delivered);
    }
    assert_eq!(delivered, vec![2, 3, 4]);
}

/// S6 via the public query_params + time_range surface together: an
/// initial-history query's `_time` parameter round-trips through encoding.
#[test]
fn s6_time_range_through_query_params_roundtrip() {
    let params = QueryParams {
        anyke: true,
        max: Some(3),
        range: None,
        time: Some("[now(-90)..now(0)]".to_string()),
    };
    let mut buf = String::new();
    query_params::encode(&params, &mut buf).unwrap();
    let reparsed = query_params::parse(&buf).unwrap();
    assert_eq!(reparsed.max, Some(3));
    let range = time_range::parse(reparsed.time.as_deref().unwrap()).unwrap();
    assert!(time_range::contains(&range, 1000.0, 1000.0));
}

#[test]
fn query_params_range_encoding_is_sn_exact() {
    let params = QueryParams {
        anyke: true,
        max: None,
        range: Some(SnRange { start: Some(4), end: None }),
        time: None,
    };
    let mut buf = String::new();
    query_params::encode(&params, &mut buf).unwrap();
    let reparsed = query_params::parse(&buf).unwrap();
    assert_eq!(reparsed.range, params.range);
}

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
//! The per-source reordering engine.
//!
//! This module is the pure, session-independent heart of the advanced
//! subscriber: given a stream of (possibly out-of-order, possibly gappy)
//! `(sn, sample)` or `(timestamp, sample)` pairs for a single source, it
//! decides what to deliver to the user callback, in what order, and when a
//! gap must be reported as a [`crate::miss::MissEvent`] or recovered via a
//! retransmission query.
//!
//! Kept independent of `zenoh::Sample`/`zenoh::Session` so that the ingest
//! decision tree in spec §4.5.1 can be unit tested without a live transport;
//! [`crate::subscriber_state`] adapts real zenoh samples onto it.

use std::collections::BTreeMap;

use crate::seqnum::{sn_diff, sn_follows, sn_next, Sn};

/// Outcome of feeding one sample into a [`PerSourceSequencedState`].
///
/// `delivered` is already in the order the user callback must see it in
/// (oldest first); it may contain more than one sample when a buffered gap
/// gets filled ("deliver-and-flush").
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SequencedOutcome<S> {
    pub delivered: Vec<S>,
    /// Set when a gap was irrecoverably skipped (non-retransmission path).
    pub miss: Option<u32>,
    /// True the first time this source was observed (caller should spawn a
    /// periodic recovery task and, for the liveliness path, an initial
    /// per-source history query).
    pub new_source: bool,
    /// Set when the ingest path determined a reactive gap query should be
    /// issued for `[from..)`, because retransmission is enabled, the state
    /// has pending samples, and no query is currently outstanding for it.
    pub trigger_gap_query_from: Option<Sn>,
}

/// Per-publisher sequenced reordering state (spec §3 `PerSourceSequencedState`).
#[derive(Debug)]
pub struct PerSourceSequencedState<S> {
    pub last_delivered: Option<Sn>,
    pub pending_samples: BTreeMap<Sn, S>,
    pub pending_queries: u32,
    pub periodic_task: Option<u64>,
}

impl<S> Default for PerSourceSequencedState<S> {
    fn default() -> Self {
        Self {
            last_delivered: None,
            pending_samples: BTreeMap::new(),
            pending_queries: 0,
            periodic_task: None,
        }
    }
}

impl<S> PerSourceSequencedState<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repeatedly pop the contiguous successor of `last_delivered` out of
    /// `pending_samples`, appending each to `out`, until no successor is
    /// buffered. `anchor` (sn, sample) is delivered first and becomes the new
    /// `last_delivered`.
    fn deliver_and_flush(&mut self, sn: Sn, sample: S, out: &mut Vec<S>) {
        out.push(sample);
        self.last_delivered = Some(sn);
        loop {
            let next = sn_next(self.last_delivered.unwrap());
            match self.pending_samples.remove(&next) {
                Some(sample) => {
                    out.push(sample);
                    self.last_delivered = Some(next);
                }
                None => break,
            }
        }
    }

    fn gap_query_trigger(&self, retransmission: bool) -> Option<Sn> {
        if retransmission && !self.pending_samples.is_empty() && self.pending_queries == 0 {
            self.last_delivered.map(sn_next)
        } else {
            None
        }
    }

    /// Feed one sample for this source. `existed` tells whether the caller
    /// already had a state entry for this source *before* this call (used to
    /// compute `new_source`); callers create the entry lazily on first
    /// contact, mirroring spec §4.5.1 step 1.
    pub fn ingest(
        &mut self,
        existed: bool,
        global_pending_queries: u32,
        history_depth: usize,
        retransmission: bool,
        sn: Sn,
        sample: S,
    ) -> SequencedOutcome<S> {
        let mut delivered = Vec::new();
        let mut miss = None;

        if self.last_delivered.is_none() && global_pending_queries > 0 {
            if history_depth == 1 {
                self.last_delivered = Some(sn);
                delivered.push(sample);
            } else {
                self.pending_samples.insert(sn, sample);
                if history_depth > 0 && self.pending_samples.len() >= history_depth {
                    if let Some((&smallest_sn, _)) = self.pending_samples.iter().next() {
                        let smallest_sample = self.pending_samples.remove(&smallest_sn).unwrap();
                        self.deliver_and_flush(smallest_sn, smallest_sample, &mut delivered);
                    }
                }
            }
        } else if let Some(last) = self.last_delivered {
            if sn == sn_next(last) {
                self.deliver_and_flush(sn, sample, &mut delivered);
            } else if sn_follows(sn, sn_next(last)) {
                if retransmission {
                    self.pending_samples.insert(sn, sample);
                } else {
                    miss = Some(sn_diff(sn, sn_next(last)) as u32);
                    delivered.push(sample);
                    self.last_delivered = Some(sn);
                }
            }
            // else: sn <= last_delivered, old/duplicate, drop silently.
        } else {
            self.deliver_and_flush(sn, sample, &mut delivered);
        }

        SequencedOutcome {
            delivered,
            miss,
            new_source: !existed,
            trigger_gap_query_from: self.gap_query_trigger(retransmission),
        }
    }

    /// Called when an initial/global history query completes: flush any
    /// samples that were held back only because a global query was pending.
    /// Per spec §4.6.1, this happens once `global_pending_queries` reaches 0.
    pub fn flush_after_global_queries_done(&mut self) -> Vec<S> {
        let mut delivered = Vec::new();
        if self.last_delivered.is_none() {
            if let Some((&smallest_sn, _)) = self.pending_samples.iter().next() {
                let smallest_sample = self.pending_samples.remove(&smallest_sn).unwrap();
                self.deliver_and_flush(smallest_sn, smallest_sample, &mut delivered);
            }
        } else {
            let next = sn_next(self.last_delivered.unwrap());
            if let Some(sample) = self.pending_samples.remove(&next) {
                self.deliver_and_flush(next, sample, &mut delivered);
            }
        }
        delivered
    }
}

/// Per-publisher timestamp-ordered reordering state, used for UHLC-only
/// (non-sequenced) sources (spec §3 `PerSourceTimestampedState`).
#[derive(Debug)]
pub struct PerSourceTimestampedState<TS, S> {
    pub last_delivered: Option<TS>,
    pub pending_samples: BTreeMap<TS, S>,
    pub pending_queries: u32,
}

impl<TS: Ord + Copy, S> Default for PerSourceTimestampedState<TS, S> {
    fn default() -> Self {
        Self {
            last_delivered: None,
            pending_samples: BTreeMap::new(),
            pending_queries: 0,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TimestampedOutcome<S> {
    pub delivered: Vec<S>,
    pub new_source: bool,
}

impl<TS: Ord + Copy, S> PerSourceTimestampedState<TS, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(
        &mut self,
        existed: bool,
        global_pending_queries: u32,
        history_depth: usize,
        ts: TS,
        sample: S,
    ) -> TimestampedOutcome<S> {
        let mut delivered = Vec::new();

        let dropped = matches!(self.last_delivered, Some(last) if ts <= last);
        if !dropped {
            let no_pending = global_pending_queries == 0 && self.pending_queries == 0;
            if no_pending || history_depth == 1 {
                delivered.push(sample);
                self.last_delivered = Some(ts);
            } else {
                self.pending_samples.insert(ts, sample);
                if history_depth > 0 && self.pending_samples.len() >= history_depth {
                    self.flush_ordered(&mut delivered);
                }
            }
        }

        TimestampedOutcome {
            delivered,
            new_source: !existed,
        }
    }

    /// Flush the entire pending map in timestamp order, delivering only
    /// entries strictly greater than `last_delivered`.
    fn flush_ordered(&mut self, out: &mut Vec<S>) {
        let mut pending = BTreeMap::new();
        std::mem::swap(&mut pending, &mut self.pending_samples);
        for (ts, sample) in pending {
            let newer = match self.last_delivered {
                None => true,
                Some(last) => ts > last,
            };
            if newer {
                out.push(sample);
                self.last_delivered = Some(ts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_history() -> (u32, usize, bool) {
        (0, 0, true)
    }

    /// S1 Ordered loss-less: SNs 0..9 delivered in order, no MissEvent.
    #[test]
    fn s1_ordered_lossless() {
        let mut state = PerSourceSequencedState::new();
        let mut out_all = Vec::new();
        for sn in 0u32..10 {
            let (gpq, hd, retr) = no_history();
            let o = state.ingest(sn != 0, gpq, hd, retr, sn, sn);
            assert!(o.miss.is_none());
            out_all.extend(o.delivered);
        }
        assert_eq!(out_all, (0u32..10).collect::<Vec<_>>());
    }

    /// S2 Gap + retransmission: drop 3,4 from the live feed; with
    /// retransmission enabled they are buffered, and once retransmitted
    /// (here simulated by feeding them directly) delivery order is still
    /// 0,1,2,3,4,5..9 and no miss is ever reported.
    #[test]
    fn s2_gap_with_retransmission_buffers_and_recovers() {
        let mut state = PerSourceSequencedState::new();
        let mut delivered = Vec::new();
        for sn in [0u32, 1, 2] {
            let o = state.ingest(sn != 0, 0, 0, true, sn, sn);
            delivered.extend(o.delivered);
        }
        // live feed skips 3 and 4
        for sn in [5u32, 6, 7, 8, 9] {
            let o = state.ingest(true, 0, 0, true, sn, sn);
            assert!(o.miss.is_none());
            // nothing delivered yet: all buffered behind the 3..4 gap
            assert!(o.delivered.is_empty());
            if sn == 5 {
                assert_eq!(o.trigger_gap_query_from, Some(3));
            }
        }
        // retransmission arrives
        let o3 = state.ingest(true, 0, 0, true, 3, 3);
        delivered.extend(o3.delivered);
        let o4 = state.ingest(true, 0, 0, true, 4, 4);
        delivered.extend(o4.delivered);
        assert_eq!(delivered, (0u32..10).collect::<Vec<_>>());
    }

    /// S3 Gap without retransmission: exactly one MissEvent with nb=2, and
    /// delivery order is 0,1,2,5,6,7,8,9.
    #[test]
    fn s3_gap_without_retransmission_reports_miss() {
        let mut state = PerSourceSequencedState::new();
        let mut delivered = Vec::new();
        let mut misses = Vec::new();
        for sn in [0u32, 1, 2, 5, 6, 7, 8, 9] {
            let o = state.ingest(sn != 0, 0, 0, false, sn, sn);
            delivered.extend(o.delivered);
            if let Some(nb) = o.miss {
                misses.push(nb);
            }
        }
        assert_eq!(delivered, vec![0, 1, 2, 5, 6, 7, 8, 9]);
        assert_eq!(misses, vec![2]);
    }

    /// S4 History replay: publisher wrote 0..4 before the subscriber
    /// declared with history.max_samples=3; replies arrive in reverse
    /// (newest-first, as PublisherCache emits oldest-first but a slow
    /// network could reorder) while a global history query is still
    /// pending. Expectation: exactly the last three samples (2,3,4) are
    /// delivered, oldest first, once the global query completes.
    #[test]
    fn s4_history_replay_depth_three() {
        let mut state = PerSourceSequencedState::new();
        let mut delivered = Vec::new();
        // global_pending_queries = 1 (one history query in flight)
        for sn in [2u32, 3, 4] {
            let o = state.ingest(sn != 2, 1, 3, true, sn, sn);
            delivered.extend(o.delivered);
        }
        // buffered until depth reached: with history_depth=3 the 3rd insert
        // pops the smallest as the new anchor and flushes contiguous
        // successors, so all three end up delivered in order already.
        assert_eq!(delivered, vec![2, 3, 4]);
    }

    #[test]
    fn history_depth_one_bypasses_buffering() {
        let mut state = PerSourceSequencedState::new();
        let o = state.ingest(false, 1, 1, true, 9, 9);
        assert_eq!(o.delivered, vec![9]);
        assert_eq!(state.last_delivered, Some(9));
        assert!(state.pending_samples.is_empty());
    }

    /// S7 Heartbeat recovery: retransmission disabled, but a reactive query
    /// triggered by the heartbeat fills the gap; no MissEvent because the
    /// subscriber-side heartbeat handler buffers into `pending_samples`
    /// directly (bypassing the no-retransmission miss path) before issuing
    /// the bounded query. This test exercises the buffering + flush only;
    /// the heartbeat-triggered query itself is covered in `recovery.rs`.
    #[test]
    fn s7_heartbeat_driven_gap_fill_no_miss() {
        let mut state = PerSourceSequencedState::new();
        let mut delivered = Vec::new();
        for sn in [0u32, 1, 2] {
            let o = state.ingest(sn != 0, 0, 0, true, sn, sn);
            delivered.extend(o.delivered);
        }
        // live stream drops 3..7; a heartbeat for sn=9 arrives and the
        // recovery engine issues a bounded reactive query covering [3..9],
        // whose replies are fed back through `ingest` with retransmission
        // semantics (buffer, no miss):
        for sn in [8u32, 9] {
            let o = state.ingest(true, 0, 0, true, sn, sn);
            assert!(o.miss.is_none());
            delivered.extend(o.delivered);
        }
        for sn in 3u32..=7 {
            let o = state.ingest(true, 0, 0, true, sn, sn);
            assert!(o.miss.is_none());
            delivered.extend(o.delivered);
        }
        assert_eq!(delivered, (0u32..10).collect::<Vec<_>>());
    }

    #[test]
    fn duplicate_and_stale_are_dropped_silently() {
        let mut state = PerSourceSequencedState::new();
        let o = state.ingest(false, 0, 0, true, 5, 5);
        assert_eq!(o.delivered, vec![5]);
        let o2 = state.ingest(true, 0, 0, true, 5, 99);
        assert!(o2.delivered.is_empty());
        assert!(o2.miss.is_none());
        let o3 = state.ingest(true, 0, 0, true, 2, 2);
        assert!(o3.delivered.is_empty());
    }

    #[test]
    fn timestamped_drops_non_increasing() {
        let mut state: PerSourceTimestampedState<u64, u64> = PerSourceTimestampedState::new();
        let o1 = state.ingest(false, 0, 0, 10, 10);
        assert_eq!(o1.delivered, vec![10]);
        let o2 = state.ingest(true, 0, 0, 10, 10); // equal, dropped
        assert!(o2.delivered.is_empty());
        let o3 = state.ingest(true, 0, 0, 5, 5); // older, dropped
        assert!(o3.delivered.is_empty());
        let o4 = state.ingest(true, 0, 0, 11, 11);
        assert_eq!(o4.delivered, vec![11]);
    }

    #[test]
    fn timestamped_buffers_then_flushes_in_order() {
        let mut state: PerSourceTimestampedState<u64, u64> = PerSourceTimestampedState::new();
        // one global history query outstanding, history_depth=2: first two
        // samples get buffered (since no_pending is false and depth != 1),
        // the second insert reaches the depth bound and flushes in order.
        let o1 = state.ingest(false, 1, 2, 20, 20);
        assert!(o1.delivered.is_empty());
        let o2 = state.ingest(true, 1, 2, 10, 10);
        assert_eq!(o2.delivered, vec![10, 20]);
    }
}

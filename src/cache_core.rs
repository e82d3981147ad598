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
//! The bounded sample ring and filtered-replay selection logic behind
//! `PublisherCache` (spec §4.3), kept independent of `zenoh::Sample` and the
//! outbox/cache locks (those live in `cache.rs`, which wraps this with a
//! real queryable).

use std::collections::VecDeque;

use crate::error::{Error, ZResult};
use crate::query_params::SnRange;
use crate::seqnum::Sn;
use crate::time_range::{self, TimeRange};

/// Fixed-capacity ring of samples in arrival order; oldest evicted on
/// overflow. `add` is O(1).
#[derive(Debug)]
pub struct RingCache<S> {
    max_samples: usize,
    ring: VecDeque<S>,
}

impl<S> RingCache<S> {
    pub fn new(max_samples: usize) -> ZResult<Self> {
        if max_samples == 0 {
            return Err(Error::ZeroCacheCapacity);
        }
        Ok(Self {
            max_samples,
            ring: VecDeque::with_capacity(max_samples),
        })
    }

    pub fn add(&mut self, sample: S) {
        if self.ring.len() >= self.max_samples {
            self.ring.pop_front();
        }
        self.ring.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_samples
    }

    /// Newest-first iteration, as used by the filtered-replay algorithm.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &S> {
        self.ring.iter().rev()
    }

    pub fn iter_oldest_first(&self) -> impl Iterator<Item = &S> {
        self.ring.iter()
    }
}

/// The parameters of one replay request, already parsed out of a query's
/// parameter string (see `query_params::parse`).
#[derive(Debug, Clone, Default)]
pub struct ReplayFilter {
    pub max: Option<u32>,
    pub range: Option<SnRange>,
    pub time: Option<TimeRange>,
}

/// Select the samples to reply with, in the order they must be *sent*
/// (oldest first), per spec §4.3 step 4–6. `sn_of`/`time_of` adapt the
/// opaque sample type `S` to the fields the filter predicates need; `now`
/// is the wall-clock reference captured once at query start.
///
/// `outbox_capacity` bounds the result in addition to `max` and the ring's
/// own capacity, mirroring the fixed-size reply scratch buffer.
pub fn filtered_replay<'a, S>(
    ring: &'a RingCache<S>,
    filter: &ReplayFilter,
    now: f64,
    sn_of: impl Fn(&S) -> Option<Sn>,
    time_of: impl Fn(&S) -> f64,
    outbox_capacity: usize,
) -> Vec<&'a S> {
    let cap = filter
        .max
        .map(|m| m as usize)
        .unwrap_or(ring.capacity())
        .min(ring.capacity())
        .min(outbox_capacity);

    let mut outbox = Vec::with_capacity(cap.min(ring.len()));
    for sample in ring.iter_newest_first() {
        if outbox.len() >= cap {
            break;
        }
        let range_ok = match &filter.range {
            Some(r) => sn_of(sample).map(|sn| r.contains(sn)).unwrap_or(false),
            None => true,
        };
        if !range_ok {
            continue;
        }
        let time_ok = match &filter.time {
            Some(t) => time_range::contains(t, time_of(sample), now),
            None => true,
        };
        if !time_ok {
            continue;
        }
        outbox.push(sample);
    }
    outbox.reverse();
    outbox
}

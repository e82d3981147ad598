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
//! `SubscriberState`: the reference-counted, lock-guarded state shared by
//! every callback and background task of one `AdvancedSubscriber` (spec §3,
//! §5 "Lock taxonomy").
//!
//! This module adapts real `zenoh::sample::Sample`s onto the pure
//! `sequencing` engine; the decision tree itself lives in `sequencing.rs`
//! and is not duplicated here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use uhlc::Timestamp;
use zenoh::sample::{EntityGlobalId, Sample};
use zenoh::Session;

use crate::miss::MissRegistry;
use crate::seqnum::Sn;
use crate::sequencing::{PerSourceSequencedState, PerSourceTimestampedState};

/// Identifies one sequenced source by `(zid, eid)`, derivable both from a
/// sample's own [`EntityGlobalId`] and from a parsed `@adv/...` key segment
/// pair, so liveliness-driven discovery and data-driven discovery key the
/// same map entry without needing to fabricate an `EntityGlobalId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SourceKey {
    pub(crate) zid_hex: String,
    pub(crate) eid: u32,
}

impl SourceKey {
    pub(crate) fn from_entity(id: &EntityGlobalId) -> Self {
        Self {
            zid_hex: crate::key_builder::zid_to_hex(&id.zid().to_le_bytes()),
            eid: id.eid(),
        }
    }
}

pub(crate) struct SequencedSource {
    /// Known once a real sample has arrived; absent for an entry created
    /// purely from liveliness discovery.
    pub(crate) source_id: Option<EntityGlobalId>,
    pub(crate) state: PerSourceSequencedState<Sample>,
    pub(crate) query_keyexpr: String,
    pub(crate) periodic_task: Option<crate::recovery::PeriodicTaskHandle>,
}

pub(crate) struct TimestampedSource {
    pub(crate) state: PerSourceTimestampedState<Timestamp, Sample>,
}

/// Everything guarded by `state.mutex` (spec §5).
pub(crate) struct SubscriberStateInner {
    pub(crate) retransmission: bool,
    pub(crate) has_period: bool,
    pub(crate) period: Duration,
    pub(crate) history_depth: usize,
    pub(crate) history_age: Duration,
    pub(crate) query_timeout: Duration,
    pub(crate) global_pending_queries: u32,
    pub(crate) sequenced: HashMap<SourceKey, SequencedSource>,
    pub(crate) timestamped: HashMap<uhlc::ID, TimestampedSource>,
    pub(crate) miss_registry: MissRegistry<EntityGlobalId>,
    pub(crate) alive: bool,
}

/// Reference-counted wrapper; background tasks hold a [`Weak`] so a dropped
/// subscriber does not keep them alive (spec §5 "Cancellation/timeout").
pub struct SubscriberState {
    pub(crate) base_keyexpr: String,
    pub(crate) session: Session,
    pub(crate) callback: Box<dyn Fn(Sample) + Send + Sync>,
    pub(crate) inner: Mutex<SubscriberStateInner>,
}

pub(crate) type SharedState = Arc<SubscriberState>;
pub(crate) type WeakState = Weak<SubscriberState>;

impl SubscriberState {
    pub(crate) fn new(
        session: Session,
        base_keyexpr: String,
        callback: Box<dyn Fn(Sample) + Send + Sync>,
        retransmission: bool,
        has_period: bool,
        period: Duration,
        history_depth: usize,
        history_age: Duration,
        query_timeout: Duration,
    ) -> SharedState {
        Arc::new(Self {
            base_keyexpr,
            session,
            callback,
            inner: Mutex::new(SubscriberStateInner {
                retransmission,
                has_period,
                period,
                history_depth,
                history_age,
                query_timeout,
                global_pending_queries: 0,
                sequenced: HashMap::new(),
                timestamped: HashMap::new(),
                miss_registry: MissRegistry::new(),
                alive: true,
            }),
        })
    }

    pub(crate) fn mark_dropped(&self) {
        self.inner.lock().unwrap().alive = false;
    }

    fn deliver(&self, sample: Sample) {
        (self.callback)(sample);
    }

    /// Live-sample ingest path (spec §4.5.1).
    pub(crate) fn on_sample(self: &Arc<Self>, sample: Sample) {
        if let Some(source_id) = sample.source_info().source_id() {
            self.on_sequenced_sample(source_id.clone(), sample);
        } else if let Some(ts) = sample.timestamp() {
            self.on_timestamped_sample(*ts, sample);
        } else {
            self.deliver(sample);
        }
    }

    fn on_sequenced_sample(self: &Arc<Self>, source_id: EntityGlobalId, sample: Sample) {
        let sn: Sn = match sample.source_info().source_sn() {
            Some(sn) => sn,
            None => {
                log::warn!("sample on {} carries a source_id but no sn", self.base_keyexpr);
                return;
            }
        };

        let key = SourceKey::from_entity(&source_id);
        let delivered;
        let miss;
        let new_source;
        let gap_query_from;
        let query_keyexpr;

        {
            let mut inner = self.inner.lock().unwrap();
            let retransmission = inner.retransmission;
            let history_depth = inner.history_depth;
            let global_pending = inner.global_pending_queries;
            let existed = inner.sequenced.contains_key(&key);
            if !existed {
                let qk = crate::key_builder::per_source_query_keyexpr(
                    &self.base_keyexpr,
                    &key.zid_hex,
                    key.eid,
                );
                inner.sequenced.insert(
                    key.clone(),
                    SequencedSource {
                        source_id: Some(source_id.clone()),
                        state: PerSourceSequencedState::new(),
                        query_keyexpr: qk,
                        periodic_task: None,
                    },
                );
            }
            let entry = inner.sequenced.get_mut(&key).unwrap();
            if entry.source_id.is_none() {
                entry.source_id = Some(source_id.clone());
            }
            query_keyexpr = entry.query_keyexpr.clone();
            let outcome = entry.state.ingest(
                existed,
                global_pending,
                history_depth,
                retransmission,
                sn,
                sample,
            );
            delivered = outcome.delivered;
            miss = outcome.miss;
            new_source = outcome.new_source;
            gap_query_from = outcome.trigger_gap_query_from;
            if gap_query_from.is_some() {
                entry.state.pending_queries += 1;
            }
        }

        for s in delivered {
            self.deliver(s);
        }
        if let Some(nb) = miss {
            let mut inner = self.inner.lock().unwrap();
            inner.miss_registry.notify(source_id, nb);
        }
        if new_source {
            crate::recovery::on_new_sequenced_source(self, key.clone(), query_keyexpr.clone());
        }
        if let Some(from) = gap_query_from {
            crate::recovery::trigger_reactive_query(self, key, query_keyexpr, from, None);
        }
    }

    /// Create a sequenced-source entry from liveliness discovery alone, with
    /// no sample observed yet (spec §4.5.2). Returns `true` if this call
    /// created the entry, so the caller only bootstraps recovery once
    /// regardless of whether liveliness or the first live sample wins the
    /// race to discover a source.
    pub(crate) fn ensure_sequenced_source(
        self: &Arc<Self>,
        key: SourceKey,
        query_keyexpr: String,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.sequenced.contains_key(&key) {
            false
        } else {
            inner.sequenced.insert(
                key,
                SequencedSource {
                    source_id: None,
                    state: PerSourceSequencedState::new(),
                    query_keyexpr,
                    periodic_task: None,
                },
            );
            true
        }
    }

    fn on_timestamped_sample(self: &Arc<Self>, ts: Timestamp, sample: Sample) {
        let zid = *ts.get_id();
        let mut delivered = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let global_pending = inner.global_pending_queries;
            let history_depth = inner.history_depth;
            let existed = inner.timestamped.contains_key(&zid);
            let entry = inner
                .timestamped
                .entry(zid)
                .or_insert_with(|| TimestampedSource { state: PerSourceTimestampedState::new() });
            let outcome = entry.state.ingest(existed, global_pending, history_depth, ts, sample);
            delivered = outcome.delivered;
        }
        for s in delivered {
            self.deliver(s);
        }
    }

    /// Called when a global (initial) history query completes and the
    /// counter reaches zero: flush every per-source state (spec §4.6.1).
    pub(crate) fn on_global_queries_drained(self: &Arc<Self>) {
        let mut flushed = Vec::new();
        let mut newly_periodic = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            for (id, src) in inner.sequenced.iter_mut() {
                flushed.extend(src.state.flush_after_global_queries_done());
                if src.periodic_task.is_none() {
                    newly_periodic.push((id.clone(), src.query_keyexpr.clone()));
                }
            }
        }
        for s in flushed {
            self.deliver(s);
        }
        for (id, query_keyexpr) in newly_periodic {
            crate::recovery::ensure_periodic_task(self, id, query_keyexpr);
        }
    }
}

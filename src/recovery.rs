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
//! `RecoveryEngine` (spec §4.6): the four query triggers — initial history,
//! per-source history, reactive gap queries, and periodic recovery — all
//! built on the same `get`-based pull (`target=ALL`, `consolidation=NONE`).
//!
//! Every task here holds only a [`Weak`] reference to the subscriber state,
//! so an upgrade failure (state dropped) is a silent no-op, per spec §5
//! "Cancellation/timeout" and §4.9's failure table.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_std::task;
use futures::{select, FutureExt, StreamExt};

use zenoh::query::{ConsolidationMode, QueryConsolidation, QueryTarget};

use crate::query_params::{QueryParams, SnRange};
use crate::seqnum::Sn;
use crate::subscriber_state::{SourceKey, SubscriberState};

/// A cancellable periodic task id (spec §9 "Periodic tasks as first-class").
pub(crate) struct PeriodicTaskHandle {
    stop: async_std::channel::Sender<()>,
}

impl Drop for PeriodicTaskHandle {
    fn drop(&mut self) {
        let _ = self.stop.try_send(());
    }
}

fn encode_params(params: &QueryParams) -> String {
    let mut buf = String::new();
    // A fresh, unbounded buffer: the only way `encode` can fail is a
    // zero-capacity pre-filled buffer, which never applies here.
    crate::query_params::encode(params, &mut buf).expect("fresh buffer never overflows");
    buf
}

async fn run_query(
    session: &zenoh::Session,
    key_expr: &str,
    params: &QueryParams,
    timeout: Duration,
    state: &Arc<SubscriberState>,
) {
    let selector = format!("{key_expr}?{}", encode_params(params));
    let replies = match session
        .get(selector)
        .target(QueryTarget::All)
        .consolidation(QueryConsolidation::from(ConsolidationMode::None))
        .timeout(timeout)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            log::warn!("recovery query on {key_expr} failed: {e}");
            return;
        }
    };
    while let Ok(reply) = replies.recv_async().await {
        match reply.result() {
            Ok(sample) => state.on_sample(sample.clone()),
            Err(e) => log::debug!("recovery query on {key_expr}: error reply: {e:?}"),
        }
    }
}

/// 1. Initial history query, issued once at subscriber declaration.
pub(crate) fn initial_history_query(
    state: &Arc<SubscriberState>,
    history_depth: usize,
    history_age: Duration,
    timeout: Duration,
) {
    let weak: Weak<SubscriberState> = Arc::downgrade(state);
    let scan_key = crate::key_builder::history_scan_keyexpr(&state.base_keyexpr);
    let session = state.session.clone();
    {
        let mut inner = state.inner.lock().unwrap();
        inner.global_pending_queries += 1;
    }
    let params = QueryParams {
        anyke: true,
        max: (history_depth > 0).then_some(history_depth as u32),
        range: None,
        time: (!history_age.is_zero())
            .then(|| format!("[now(-{})..]", history_age.as_secs_f64())),
    };
    task::spawn(async move {
        let Some(state) = weak.upgrade() else { return };
        run_query(&session, &scan_key, &params, timeout, &state).await;
        let drained = {
            let mut inner = state.inner.lock().unwrap();
            inner.global_pending_queries = inner.global_pending_queries.saturating_sub(1);
            inner.global_pending_queries == 0
        };
        if drained {
            state.on_global_queries_drained();
        }
    });
}

/// One-shot history query against an arbitrary discovered key, using the
/// subscriber's configured depth/age/timeout. Shared by the per-source
/// trigger below and by the uhlc-only liveliness discovery path, which has
/// no stable source key to attach recovery bookkeeping to.
pub(crate) fn spawn_history_query(state: &Arc<SubscriberState>, query_keyexpr: String) {
    let weak = Arc::downgrade(state);
    let session = state.session.clone();
    let (timeout, history_depth, history_age) = {
        let inner = state.inner.lock().unwrap();
        (inner.query_timeout, inner.history_depth, inner.history_age)
    };
    let params = QueryParams {
        anyke: true,
        max: (history_depth > 0).then_some(history_depth as u32),
        range: None,
        time: (!history_age.is_zero())
            .then(|| format!("[now(-{})..]", history_age.as_secs_f64())),
    };
    task::spawn(async move {
        let Some(state) = weak.upgrade() else { return };
        run_query(&session, &query_keyexpr, &params, timeout, &state).await;
    });
}

/// 2. Per-source history query, on first sight of a new publisher.
pub(crate) fn on_new_sequenced_source(
    state: &Arc<SubscriberState>,
    key: SourceKey,
    query_keyexpr: String,
) {
    spawn_history_query(state, query_keyexpr.clone());
    ensure_periodic_task(state, key, query_keyexpr);
}

/// 3. Reactive gap query, triggered by ingest (retransmission) or a
/// heartbeat (`end` bound present).
pub(crate) fn trigger_reactive_query(
    state: &Arc<SubscriberState>,
    key: SourceKey,
    query_keyexpr: String,
    from: Sn,
    to: Option<Sn>,
) {
    let weak = Arc::downgrade(state);
    let session = state.session.clone();
    let timeout = state.inner.lock().unwrap().query_timeout;
    let params = QueryParams {
        anyke: true,
        max: None,
        range: Some(SnRange { start: Some(from), end: to }),
        time: None,
    };
    task::spawn(async move {
        let Some(state) = weak.upgrade() else { return };
        run_query(&session, &query_keyexpr, &params, timeout, &state).await;
        let mut inner = state.inner.lock().unwrap();
        if let Some(src) = inner.sequenced.get_mut(&key) {
            src.state.pending_queries = src.state.pending_queries.saturating_sub(1);
        }
    });
}

/// 4. Periodic recovery: one task per sequenced source, only when
/// `has_period`.
pub(crate) fn ensure_periodic_task(
    state: &Arc<SubscriberState>,
    key: SourceKey,
    query_keyexpr: String,
) {
    let (has_period, period) = {
        let inner = state.inner.lock().unwrap();
        (inner.has_period, inner.period)
    };
    if !has_period {
        return;
    }
    {
        let mut inner = state.inner.lock().unwrap();
        if let Some(src) = inner.sequenced.get_mut(&key) {
            if src.periodic_task.is_some() {
                return;
            }
        } else {
            return;
        }
    }

    let weak = Arc::downgrade(state);
    let (stop_tx, mut stop_rx) = async_std::channel::bounded::<()>(1);
    let session = state.session.clone();
    let sid = key.clone();
    let qk = query_keyexpr.clone();
    task::spawn(async move {
        loop {
            select! {
                _ = task::sleep(period).fuse() => {
                    let Some(state) = weak.upgrade() else { return };
                    let should_query = {
                        let inner = state.inner.lock().unwrap();
                        let no_global = inner.global_pending_queries == 0;
                        let no_per_source = inner
                            .sequenced
                            .get(&sid)
                            .map(|s| s.state.pending_queries == 0)
                            .unwrap_or(false);
                        no_global && no_per_source
                    };
                    if should_query {
                        let from = {
                            let inner = state.inner.lock().unwrap();
                            inner.sequenced.get(&sid).and_then(|s| s.state.last_delivered).map(crate::seqnum::sn_next)
                        };
                        if let Some(from) = from {
                            let timeout = state.inner.lock().unwrap().query_timeout;
                            let params = QueryParams { anyke: true, max: None, range: Some(SnRange { start: Some(from), end: None }), time: None };
                            run_query(&session, &qk, &params, timeout, &state).await;
                        }
                    }
                }
                _ = stop_rx.next().fuse() => {
                    return;
                }
            }
        }
    });

    let mut inner = state.inner.lock().unwrap();
    if let Some(src) = inner.sequenced.get_mut(&key) {
        src.periodic_task = Some(PeriodicTaskHandle { stop: stop_tx });
    }
}

/// Heartbeat callback (spec §4.5.3): parse `(zid, eid)` and a 4-byte SN.
pub(crate) fn on_heartbeat(state: &Arc<SubscriberState>, full_key: &str, payload: &[u8]) {
    if payload.len() != 4 {
        log::warn!("malformed heartbeat payload on {full_key}: expected 4 bytes, got {}", payload.len());
        return;
    }
    let heartbeat_sn = Sn::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);

    let Some(parsed) = crate::key_builder::parse_adv_key(full_key) else {
        log::warn!("malformed heartbeat key: {full_key}");
        return;
    };
    if parsed.kind != crate::key_builder::AdvKind::Heartbeat {
        return;
    }

    let global_pending = state.inner.lock().unwrap().global_pending_queries;
    if global_pending > 0 {
        return; // history will backfill
    }

    let key = SourceKey { zid_hex: parsed.zid_hex.clone(), eid: parsed.eid.eid() };
    let query_keyexpr =
        crate::key_builder::per_source_query_keyexpr(&state.base_keyexpr, &key.zid_hex, key.eid);

    let target = {
        let inner = state.inner.lock().unwrap();
        inner
            .sequenced
            .get(&key)
            .map(|s| (s.state.last_delivered, s.state.pending_queries))
    };
    let Some((last_delivered, pending_queries)) = target else {
        return; // unknown source; liveliness or a live sample will create it
    };
    if pending_queries > 0 {
        return;
    }
    let follows = match last_delivered {
        None => true,
        Some(last) => crate::seqnum::sn_follows(heartbeat_sn, last),
    };
    if !follows {
        return;
    }
    let from = last_delivered.map(crate::seqnum::sn_next).unwrap_or(0);
    {
        let mut inner = state.inner.lock().unwrap();
        if let Some(src) = inner.sequenced.get_mut(&key) {
            src.state.pending_queries += 1;
        }
    }
    trigger_reactive_query(state, key, query_keyexpr, from, Some(heartbeat_sn));
}

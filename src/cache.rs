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
//! `PublisherCache`: the bounded ring of §4.3, wired to a real `Queryable`.
//!
//! The ring/outbox/filter logic lives in `cache_core`; this module is only
//! responsible for the lock discipline (outbox before cache, never holding
//! either while replying) and for declaring the queryable and optional
//! liveliness token on the session.

use std::future::{Future, IntoFuture};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use zenoh::key_expr::KeyExpr;
use zenoh::liveliness::LivelinessToken;
use zenoh::qos::{CongestionControl, Priority};
use zenoh::query::Queryable;
use zenoh::sample::{Sample, SampleKind};
use zenoh::{Resolvable, Result as ZResult, Session, Wait};

use crate::cache_core::{filtered_replay, ReplayFilter, RingCache};
use crate::error::Error;
use crate::query_params;

/// `cache { enabled, max_samples≥1, congestion_control, priority, is_express }`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub(crate) max_samples: usize,
    pub(crate) congestion_control: CongestionControl,
    pub(crate) priority: Priority,
    pub(crate) is_express: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        // original_source/src/api/advanced_publisher.c: default max_samples = 1.
        Self {
            max_samples: 1,
            congestion_control: CongestionControl::default(),
            priority: Priority::default(),
            is_express: false,
        }
    }
}

impl CacheConfig {
    pub fn max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn congestion_control(mut self, congestion_control: CongestionControl) -> Self {
        self.congestion_control = congestion_control;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_express(mut self, is_express: bool) -> Self {
        self.is_express = is_express;
        self
    }
}

struct CacheInner {
    ring: Mutex<RingCache<Sample>>,
    outbox: Mutex<()>,
    congestion_control: CongestionControl,
    priority: Priority,
    is_express: bool,
}

/// Bounded per-publisher history, replayed to late-joining subscribers
/// through a declared queryable.
pub struct PublisherCache<'a> {
    inner: Arc<CacheInner>,
    queryable: Queryable<()>,
    liveliness_token: Option<LivelinessToken<'a>>,
}

impl<'a> PublisherCache<'a> {
    /// Declare a cache on `key_expr` (spec §4.3 "Declaration").
    pub(crate) fn declare(
        session: &'a Session,
        key_expr: KeyExpr<'static>,
        config: CacheConfig,
        with_liveliness: bool,
    ) -> ZResult<Self> {
        if config.max_samples == 0 {
            return Err(Box::new(Error::ZeroCacheCapacity));
        }
        let ring = RingCache::new(config.max_samples).map_err(|e| Box::new(e) as _)?;
        let inner = Arc::new(CacheInner {
            ring: Mutex::new(ring),
            outbox: Mutex::new(()),
            congestion_control: config.congestion_control,
            priority: config.priority,
            is_express: config.is_express,
        });

        let handler_inner = inner.clone();
        let handler_key = key_expr.clone();
        let queryable = session
            .declare_queryable(&key_expr)
            .callback(move |query| {
                reply_from_cache(&handler_inner, &handler_key, &query);
            })
            .wait()?;

        let liveliness_token = if with_liveliness {
            Some(session.liveliness().declare_token(&key_expr).wait()?)
        } else {
            None
        };

        Ok(Self { inner, queryable, liveliness_token })
    }

    /// Push a new sample into the ring (spec §4.3 "Insertion"). O(1).
    pub fn add(&self, sample: Sample) {
        let mut ring = self.inner.ring.lock().unwrap();
        ring.add(sample);
    }

    pub fn len(&self) -> usize {
        self.inner.ring.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Undeclares the queryable (and liveliness token, if any) before the
    /// cache state is dropped, per spec §4.4 ("the cache must outlive no
    /// live query").
    pub fn close(self) -> impl Future<Output = ZResult<()>> + 'a {
        async move {
            self.queryable.undeclare().await?;
            if let Some(token) = self.liveliness_token {
                token.undeclare().await?;
            }
            Ok(())
        }
    }
}

fn now_seconds() -> Option<f64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}

fn sample_seconds(sample: &Sample) -> f64 {
    sample
        .timestamp()
        .map(|ts| {
            let t = ts.get_time();
            t.as_u64() as f64 / (1u64 << 32) as f64
        })
        .unwrap_or(0.0)
}

fn sample_sn(sample: &Sample) -> Option<crate::seqnum::Sn> {
    sample.source_info().source_sn()
}

/// The queryable callback: parse parameters, collect under lock, emit
/// oldest-first outside the cache lock (spec §4.3 steps 1–7).
fn reply_from_cache(inner: &Arc<CacheInner>, key_expr: &KeyExpr<'static>, query: &zenoh::query::Query) {
    let params = match query_params::parse(query.parameters().as_str()) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("PublisherCache on {key_expr}: invalid query parameters: {e}");
            return;
        }
    };
    let now = match now_seconds() {
        Some(n) => n,
        None => {
            log::warn!("PublisherCache on {key_expr}: clock read failed, dropping query");
            return;
        }
    };
    let time = match params.time.as_deref().map(crate::time_range::parse) {
        Some(Ok(t)) => Some(t),
        Some(Err(e)) => {
            log::warn!("PublisherCache on {key_expr}: invalid _time literal: {e}");
            return;
        }
        None => None,
    };
    let range = params.range;
    let filter = ReplayFilter { max: params.max, range, time };

    // outbox before cache, per the documented lock order.
    let _outbox_guard = inner.outbox.lock().unwrap();
    let selected: Vec<Sample> = {
        let ring = inner.ring.lock().unwrap();
        filtered_replay(&ring, &filter, now, sample_sn, sample_seconds, ring.capacity())
            .into_iter()
            .cloned()
            .collect()
    };

    for sample in selected {
        if let Err(e) = query.reply_sample(
            sample,
            inner.congestion_control,
            inner.priority,
            inner.is_express,
        ) {
            log::warn!("PublisherCache on {key_expr}: reply failed: {e}");
        }
    }
}

trait QueryReplySample {
    fn reply_sample(
        &self,
        sample: Sample,
        congestion_control: CongestionControl,
        priority: Priority,
        is_express: bool,
    ) -> ZResult<()>;
}

impl QueryReplySample for zenoh::query::Query {
    fn reply_sample(
        &self,
        sample: Sample,
        congestion_control: CongestionControl,
        priority: Priority,
        is_express: bool,
    ) -> ZResult<()> {
        match sample.kind() {
            SampleKind::Put => self
                .reply(sample.key_expr().clone(), sample.payload().clone())
                .encoding(sample.encoding().clone())
                .congestion_control(congestion_control)
                .priority(priority)
                .express(is_express)
                .wait(),
            SampleKind::Delete => self
                .reply_del(sample.key_expr().clone())
                .congestion_control(congestion_control)
                .priority(priority)
                .express(is_express)
                .wait(),
        }
    }
}

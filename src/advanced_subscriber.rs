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
//! `AdvancedSubscriber` (spec §4.5): wires the live-sample, liveliness and
//! heartbeat callbacks onto `SubscriberState`, and runs the initial history
//! query on declaration.

use std::future::{IntoFuture, Ready};
use std::sync::Arc;
use std::time::Duration;

use zenoh::key_expr::KeyExpr;
use zenoh::pubsub::Subscriber;
use zenoh::sample::{Sample, SampleKind};
use zenoh::{Resolvable, Result as ZResult, Session, Wait};

use crate::key_builder::AdvKind;
use crate::miss::ListenerId;
use crate::subscriber_state::{SharedState, SubscriberState};

/// `history { enabled, detect_late_publishers, max_samples (0=all), max_age_ms (0=any) }`.
#[derive(Debug, Clone, Default)]
pub struct HistoryConfig {
    pub(crate) enabled: bool,
    pub(crate) detect_late_publishers: bool,
    pub(crate) max_samples: usize,
    pub(crate) max_age: Duration,
}

impl HistoryConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn detect_late_publishers(mut self, detect: bool) -> Self {
        self.detect_late_publishers = detect;
        self
    }

    pub fn max_samples(mut self, max_samples: usize) -> Self {
        self.enabled = true;
        self.max_samples = max_samples;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

/// `recovery { enabled, last_sample_miss_detection { enabled, periodic_queries_period_ms (0=heartbeat-driven) } }`.
#[derive(Debug, Clone, Default)]
pub struct RecoveryConfig {
    pub(crate) enabled: bool,
    pub(crate) periodic_queries_period: Option<Duration>,
}

impl RecoveryConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// `period == None` means heartbeat-driven (period_ms = 0 in spec terms).
    pub fn periodic_queries_period(mut self, period: Duration) -> Self {
        self.enabled = true;
        self.periodic_queries_period = Some(period);
        self
    }
}

#[must_use = "Resolvables do nothing unless you resolve them using `.await` or `zenoh::Wait::wait`"]
pub struct AdvancedSubscriberBuilder<'a, 'b> {
    session: &'a Session,
    key_expr: ZResult<KeyExpr<'b>>,
    callback: Option<Box<dyn Fn(Sample) + Send + Sync>>,
    history: HistoryConfig,
    recovery: RecoveryConfig,
    query_timeout: Duration,
}

impl<'a, 'b> AdvancedSubscriberBuilder<'a, 'b> {
    pub(crate) fn new(session: &'a Session, key_expr: ZResult<KeyExpr<'b>>) -> Self {
        Self {
            session,
            key_expr,
            callback: None,
            history: HistoryConfig::default(),
            recovery: RecoveryConfig::default(),
            query_timeout: crate::advanced_publisher::DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Sample) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    pub fn recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

impl<'a> Resolvable for AdvancedSubscriberBuilder<'a, '_> {
    type To = ZResult<AdvancedSubscriber<'a>>;
}

impl<'a> Wait for AdvancedSubscriberBuilder<'a, '_> {
    fn wait(self) -> <Self as Resolvable>::To {
        AdvancedSubscriber::declare(self)
    }
}

impl<'a> IntoFuture for AdvancedSubscriberBuilder<'a, '_> {
    type Output = <Self as Resolvable>::To;
    type IntoFuture = Ready<Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        std::future::ready(self.wait())
    }
}

pub trait AdvancedSubscriberBuilderExt<'a, 'b> {
    fn declare_advanced_subscriber<TryIntoKeyExpr>(
        &'a self,
        key_expr: TryIntoKeyExpr,
    ) -> AdvancedSubscriberBuilder<'a, 'b>
    where
        TryIntoKeyExpr: TryInto<KeyExpr<'b>>,
        <TryIntoKeyExpr as TryInto<KeyExpr<'b>>>::Error: Into<zenoh::Error>;
}

impl<'a, 'b> AdvancedSubscriberBuilderExt<'a, 'b> for Session {
    fn declare_advanced_subscriber<TryIntoKeyExpr>(
        &'a self,
        key_expr: TryIntoKeyExpr,
    ) -> AdvancedSubscriberBuilder<'a, 'b>
    where
        TryIntoKeyExpr: TryInto<KeyExpr<'b>>,
        <TryIntoKeyExpr as TryInto<KeyExpr<'b>>>::Error: Into<zenoh::Error>,
    {
        AdvancedSubscriberBuilder::new(self, key_expr.try_into().map_err(Into::into))
    }
}

pub struct AdvancedSubscriber<'a> {
    state: SharedState,
    _subscriber: Subscriber<()>,
    _liveliness_subscriber: Option<Subscriber<()>>,
    _heartbeat_subscriber: Option<Subscriber<()>>,
    _marker: std::marker::PhantomData<&'a Session>,
}

impl<'a> AdvancedSubscriber<'a> {
    fn declare(conf: AdvancedSubscriberBuilder<'a, '_>) -> ZResult<Self> {
        let key_expr = conf.key_expr?.into_owned();
        let callback = conf
            .callback
            .unwrap_or_else(|| Box::new(|_sample: Sample| {}));

        let has_period = conf.recovery.enabled && conf.recovery.periodic_queries_period.is_some();
        let period = conf.recovery.periodic_queries_period.unwrap_or_default();

        let state = SubscriberState::new(
            conf.session.clone(),
            key_expr.as_str().to_string(),
            callback,
            conf.recovery.enabled,
            has_period,
            period,
            if conf.history.enabled { conf.history.max_samples } else { 0 },
            conf.history.max_age,
            conf.query_timeout,
        );

        let state_for_sample = state.clone();
        let subscriber = conf
            .session
            .declare_subscriber(&key_expr)
            .callback(move |sample| state_for_sample.on_sample(sample))
            .wait()?;

        let liveliness_subscriber = if conf.history.detect_late_publishers {
            let scan_key = crate::key_builder::liveliness_scan_keyexpr(&key_expr);
            let state_for_liveliness = state.clone();
            Some(
                conf.session
                    .liveliness()
                    .declare_subscriber(scan_key)
                    .callback(move |sample| on_liveliness(&state_for_liveliness, sample))
                    .wait()?,
            )
        } else {
            None
        };

        let heartbeat_subscriber = if conf.recovery.enabled {
            let hb_scan_key = crate::key_builder::heartbeat_scan_keyexpr(&key_expr);
            let state_for_heartbeat = state.clone();
            Some(
                conf.session
                    .declare_subscriber(hb_scan_key)
                    .callback(move |sample| {
                        let full_key = sample.key_expr().as_str().to_string();
                        let payload = sample.payload().to_bytes();
                        crate::recovery::on_heartbeat(&state_for_heartbeat, &full_key, payload.as_ref());
                    })
                    .wait()?,
            )
        } else {
            None
        };

        if conf.history.enabled {
            crate::recovery::initial_history_query(
                &state,
                conf.history.max_samples,
                conf.history.max_age,
                conf.query_timeout,
            );
        }

        Ok(Self {
            state,
            _subscriber: subscriber,
            _liveliness_subscriber: liveliness_subscriber,
            _heartbeat_subscriber: heartbeat_subscriber,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn declare_sample_miss_listener<F>(&self, listener: F) -> ListenerId
    where
        F: FnMut(&crate::miss::MissEvent<zenoh::sample::EntityGlobalId>) + Send + 'static,
    {
        let mut inner = self.state.inner.lock().unwrap();
        inner.miss_registry.declare(Box::new(listener))
    }

    pub fn undeclare_sample_miss_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.state.inner.lock().unwrap();
        inner.miss_registry.undeclare(id)
    }

    pub fn key_expr(&self) -> &str {
        &self.state.base_keyexpr
    }
}

impl<'a> Drop for AdvancedSubscriber<'a> {
    fn drop(&mut self) {
        self.state.mark_dropped();
    }
}

/// Publisher-discovery callback (spec §4.5.2).
fn on_liveliness(state: &SharedState, sample: Sample) {
    if sample.kind() != SampleKind::Put {
        return; // only token declarations start history/recovery
    }
    let Some(parsed) = crate::key_builder::parse_adv_key(sample.key_expr().as_str()) else {
        log::warn!("malformed liveliness key: {}", sample.key_expr());
        return;
    };
    if parsed.kind != AdvKind::Pub {
        return;
    }

    if parsed.eid.eid() == 0 {
        // timestamped-only pseudo-publisher: no stable (zid, eid) source
        // key to bootstrap periodic recovery with, but a one-shot
        // per-key history query against the matched key still primes it,
        // using the subscriber's own configured depth/age/timeout.
        crate::recovery::spawn_history_query(state, sample.key_expr().as_str().to_string());
        return;
    }

    let key = crate::subscriber_state::SourceKey {
        zid_hex: parsed.zid_hex.clone(),
        eid: parsed.eid.eid(),
    };
    let query_keyexpr = crate::key_builder::per_source_query_keyexpr(
        &state.base_keyexpr,
        &parsed.zid_hex,
        parsed.eid.eid(),
    );

    let created = state.ensure_sequenced_source(key.clone(), query_keyexpr.clone());
    if created {
        log::debug!("discovered new publisher at {query_keyexpr}, priming history");
        crate::recovery::on_new_sequenced_source(state, key, query_keyexpr);
    }
}

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
//! `AdvancedPublisher` (spec §4.4): a base publisher augmented with an
//! optional bounded cache, an optional sequence counter and liveliness
//! advertisement, and an optional heartbeat task.

use std::future::{Future, IntoFuture, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_std::task;
use futures::{select, FutureExt};

use zenoh::bytes::ZBytes;
use zenoh::key_expr::KeyExpr;
use zenoh::liveliness::LivelinessToken;
use zenoh::pubsub::Publisher;
use zenoh::qos::{CongestionControl, Priority};
use zenoh::sample::SourceInfo;
use zenoh::{Resolvable, Result as ZResult, Session, Wait};

use crate::cache::{CacheConfig, PublisherCache};
use crate::error::Error;
use crate::key_builder::{self, EidSegment};

/// `DEFAULT_QUERY_TIMEOUT` — see SPEC_FULL §3 (`original_source`'s
/// `query_timeout_ms == 0` resolves to this).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeartbeatMode {
    #[default]
    None,
    Periodic,
    Sporadic,
}

/// `sample_miss_detection { enabled, heartbeat_mode, heartbeat_period_ms }`.
#[derive(Debug, Clone, Default)]
pub struct MissDetectionConfig {
    pub(crate) enabled: bool,
    pub(crate) heartbeat_mode: HeartbeatMode,
    pub(crate) heartbeat_period: Duration,
}

impl MissDetectionConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Convenience: enable sequence-number-based miss detection with a
    /// periodic heartbeat at `period`.
    pub fn heartbeat(mut self, period: Duration) -> Self {
        self.enabled = true;
        self.heartbeat_mode = HeartbeatMode::Periodic;
        self.heartbeat_period = period;
        self
    }

    pub fn sporadic_heartbeat(mut self, period: Duration) -> Self {
        self.enabled = true;
        self.heartbeat_mode = HeartbeatMode::Sporadic;
        self.heartbeat_period = period;
        self
    }
}

enum Sequencing {
    None,
    SequenceNumber(Arc<AtomicU32>),
    Timestamp,
}

/// The builder returned by [`AdvancedPublisherBuilderExt::declare_advanced_publisher`].
#[must_use = "Resolvables do nothing unless you resolve them using `.await` or `zenoh::Wait::wait`"]
pub struct AdvancedPublisherBuilder<'a, 'b> {
    session: &'a Session,
    key_expr: ZResult<KeyExpr<'b>>,
    cache: Option<CacheConfig>,
    sample_miss_detection: Option<MissDetectionConfig>,
    publisher_detection: bool,
    publisher_detection_metadata: Option<String>,
    congestion_control: CongestionControl,
    priority: Priority,
    is_express: bool,
}

impl<'a, 'b> AdvancedPublisherBuilder<'a, 'b> {
    pub(crate) fn new(session: &'a Session, key_expr: ZResult<KeyExpr<'b>>) -> Self {
        Self {
            session,
            key_expr,
            cache: None,
            sample_miss_detection: None,
            publisher_detection: false,
            publisher_detection_metadata: None,
            congestion_control: CongestionControl::default(),
            priority: Priority::default(),
            is_express: false,
        }
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    pub fn sample_miss_detection(mut self, config: MissDetectionConfig) -> Self {
        self.sample_miss_detection = Some(config);
        self
    }

    pub fn publisher_detection(mut self) -> Self {
        self.publisher_detection = true;
        self
    }

    pub fn publisher_detection_metadata(mut self, meta: impl Into<String>) -> Self {
        self.publisher_detection = true;
        self.publisher_detection_metadata = Some(meta.into());
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
}

impl<'a> Resolvable for AdvancedPublisherBuilder<'a, '_> {
    type To = ZResult<AdvancedPublisher<'a>>;
}

impl<'a> Wait for AdvancedPublisherBuilder<'a, '_> {
    fn wait(self) -> <Self as Resolvable>::To {
        AdvancedPublisher::declare(self)
    }
}

impl<'a> IntoFuture for AdvancedPublisherBuilder<'a, '_> {
    type Output = <Self as Resolvable>::To;
    type IntoFuture = Ready<Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        std::future::ready(self.wait())
    }
}

/// Extension trait mirroring the chained-builder idiom used throughout
/// `zenoh-ext` (grounded in the `advanced_publisher`/`publisher.rs` forks in
/// the retrieval pack): `session.declare_advanced_publisher(key).cache(...)`.
pub trait AdvancedPublisherBuilderExt<'a, 'b> {
    fn declare_advanced_publisher<TryIntoKeyExpr>(
        &'a self,
        key_expr: TryIntoKeyExpr,
    ) -> AdvancedPublisherBuilder<'a, 'b>
    where
        TryIntoKeyExpr: TryInto<KeyExpr<'b>>,
        <TryIntoKeyExpr as TryInto<KeyExpr<'b>>>::Error: Into<zenoh::Error>;
}

impl<'a, 'b> AdvancedPublisherBuilderExt<'a, 'b> for Session {
    fn declare_advanced_publisher<TryIntoKeyExpr>(
        &'a self,
        key_expr: TryIntoKeyExpr,
    ) -> AdvancedPublisherBuilder<'a, 'b>
    where
        TryIntoKeyExpr: TryInto<KeyExpr<'b>>,
        <TryIntoKeyExpr as TryInto<KeyExpr<'b>>>::Error: Into<zenoh::Error>,
    {
        AdvancedPublisherBuilder::new(self, key_expr.try_into().map_err(Into::into))
    }
}

pub struct AdvancedPublisher<'a> {
    session: Session,
    publisher: Publisher<'a>,
    sequencing: Sequencing,
    cache: Option<PublisherCache<'a>>,
    liveliness_token: Option<LivelinessToken<'a>>,
    heartbeat_stop: Option<async_std::channel::Sender<()>>,
}

impl<'a> AdvancedPublisher<'a> {
    fn declare(conf: AdvancedPublisherBuilder<'a, '_>) -> ZResult<Self> {
        if conf.session.hlc().is_none() {
            // every publication carries a fresh timestamp (spec §4.4), which
            // requires the session to have been opened with add_timestamp=true.
            return Err(Box::new(Error::NoHlc));
        }
        let key_expr = conf.key_expr?.into_owned();
        let publisher = conf
            .session
            .declare_publisher(key_expr.clone())
            .congestion_control(conf.congestion_control)
            .priority(conf.priority)
            .express(conf.is_express)
            .wait()?;

        let sequencing = if conf
            .sample_miss_detection
            .as_ref()
            .map(|c| c.enabled)
            .unwrap_or(false)
        {
            Sequencing::SequenceNumber(Arc::new(AtomicU32::new(0)))
        } else if conf.cache.is_some() {
            Sequencing::Timestamp
        } else {
            Sequencing::None
        };

        let zid_hex = key_builder::zid_to_hex(&conf.session.zid().to_le_bytes());
        let eid = match &sequencing {
            Sequencing::SequenceNumber(_) => EidSegment::Decimal(publisher.id()),
            _ => EidSegment::Uhlc,
        };
        let suffix = key_builder::publisher_suffix(
            &zid_hex,
            eid,
            conf.publisher_detection_metadata.as_deref(),
        );
        let suffixed_key = key_builder::join(key_expr.as_str(), &suffix);

        let cache = match conf.cache {
            Some(cache_config) => {
                let suffixed = KeyExpr::try_from(suffixed_key.clone())?;
                Some(PublisherCache::declare(
                    conf.session,
                    suffixed.into_owned(),
                    cache_config,
                    false,
                )?)
            }
            None => None,
        };

        let liveliness_token = if conf.publisher_detection {
            let suffixed = KeyExpr::try_from(suffixed_key.clone())?;
            Some(conf.session.liveliness().declare_token(suffixed).wait()?)
        } else {
            None
        };

        let heartbeat_stop = conf.sample_miss_detection.as_ref().and_then(|md| {
            if md.heartbeat_mode == HeartbeatMode::None {
                return None;
            }
            let Sequencing::SequenceNumber(counter) = &sequencing else {
                return None;
            };
            let heartbeat_suffix = key_builder::heartbeat_suffix(
                &zid_hex,
                eid,
                conf.publisher_detection_metadata.as_deref(),
            );
            let heartbeat_key = key_builder::join(key_expr.as_str(), &heartbeat_suffix);
            Some(spawn_heartbeat_task(
                conf.session.clone(),
                heartbeat_key,
                counter.clone(),
                md.heartbeat_mode,
                md.heartbeat_period,
            ))
        });

        Ok(Self {
            session: conf.session.clone(),
            publisher,
            sequencing,
            cache,
            liveliness_token,
            heartbeat_stop,
        })
    }

    fn source_info(&self) -> SourceInfo {
        match &self.sequencing {
            Sequencing::SequenceNumber(counter) => {
                let sn = counter.fetch_add(1, Ordering::SeqCst);
                SourceInfo::new(None, Some(sn))
            }
            _ => SourceInfo::empty(),
        }
    }

    /// Publish a PUT sample (spec §4.4 "Put / Delete"). The source info
    /// (and therefore the SN, when sequenced) and the timestamp are each
    /// fetched exactly once and shared between the outgoing put and the
    /// cached copy, so a replay never carries a different SN or timestamp
    /// than what was actually published.
    pub async fn put(&self, payload: impl Into<ZBytes>) -> ZResult<()> {
        let payload: ZBytes = payload.into();
        let source_info = self.source_info();
        let timestamp = self.session.new_timestamp();
        self.publisher
            .put(payload.clone())
            .source_info(source_info.clone())
            .timestamp(timestamp)
            .await?;
        if let Some(cache) = &self.cache {
            let sample = zenoh::sample::SampleBuilder::put(self.publisher.key_expr().clone(), payload)
                .source_info(source_info)
                .timestamp(timestamp)
                .into();
            cache.add(sample);
        }
        Ok(())
    }

    /// Publish a DELETE sample. Always carries a fresh timestamp, same as `put`.
    pub async fn delete(&self) -> ZResult<()> {
        let source_info = self.source_info();
        let timestamp = self.session.new_timestamp();
        self.publisher
            .delete()
            .source_info(source_info)
            .timestamp(timestamp)
            .await
    }

    pub fn key_expr(&self) -> &KeyExpr<'a> {
        self.publisher.key_expr()
    }

    /// Undeclare everything in the order required by spec §4.4: the
    /// liveliness token, then the cache (which drops its queryable), then
    /// the base publisher.
    pub fn undeclare(self) -> impl Future<Output = ZResult<()>> + 'a {
        async move {
            if let Some(stop) = &self.heartbeat_stop {
                let _ = stop.send(()).await;
            }
            if let Some(token) = self.liveliness_token {
                token.undeclare().await?;
            }
            if let Some(cache) = self.cache {
                cache.close().await?;
            }
            self.publisher.undeclare().await
        }
    }
}

fn spawn_heartbeat_task(
    session: Session,
    heartbeat_key: String,
    counter: Arc<AtomicU32>,
    mode: HeartbeatMode,
    period: Duration,
) -> async_std::channel::Sender<()> {
    let (stop_tx, stop_rx) = async_std::channel::bounded::<()>(1);
    task::spawn(async move {
        let mut last_sent: Option<u32> = None;
        loop {
            select! {
                _ = task::sleep(period).fuse() => {
                    let current = counter.load(Ordering::SeqCst);
                    let should_send = match mode {
                        HeartbeatMode::Periodic => true,
                        HeartbeatMode::Sporadic => last_sent != Some(current),
                        HeartbeatMode::None => false,
                    };
                    if should_send {
                        let payload = current.to_le_bytes().to_vec();
                        let congestion = match mode {
                            HeartbeatMode::Sporadic => CongestionControl::Drop,
                            _ => CongestionControl::default(),
                        };
                        if let Err(e) = session
                            .put(&heartbeat_key, payload)
                            .congestion_control(congestion)
                            .wait()
                        {
                            log::warn!("heartbeat send failed on {heartbeat_key}: {e}");
                        } else {
                            last_sent = Some(current);
                        }
                    }
                }
                _ = stop_rx.recv().fuse() => {
                    return;
                }
            }
        }
    });
    stop_tx
}

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
use thiserror::Error;

/// Errors surfaced synchronously to a caller of this crate's API entry points.
///
/// Background-task failures (a reactive query timing out, a malformed
/// heartbeat, a reply arriving after the subscriber was dropped) are never
/// turned into an `Error`: they are logged and isolated to the affected
/// source, per the failure-isolation policy described in the crate docs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("max_samples must be >= 1")]
    ZeroCacheCapacity,

    #[error("session has no HLC configured (required for cache/timestamped sequencing)")]
    NoHlc,

    #[error("invalid time-range literal: {0}")]
    InvalidTimeRange(String),

    #[error("invalid query parameters: {0}")]
    InvalidQueryParams(String),

    #[error("caller-provided buffer is too small to encode the value")]
    EncodeOverflow,

    #[error(transparent)]
    Zenoh(#[from] zenoh::Error),
}

pub type ZResult<T> = Result<T, Error>;

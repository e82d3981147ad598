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
//! Sample-miss listener registry (spec §4.7).
//!
//! Generic over the source-id type so the registry stays usable from unit
//! tests without pulling in `zenoh::sample::EntityGlobalId`; the session
//! glue in `subscriber_state.rs` instantiates it with the real type.

use std::collections::BTreeMap;

pub type ListenerId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissEvent<Id> {
    pub source: Id,
    pub nb: u32,
}

/// `declare_sample_miss_listener` / undeclare registry. Closures are boxed
/// since distinct listeners are typically distinct closures; `notify` runs
/// them all under whatever lock the caller already holds (spec §4.7:
/// "Closures run under the state lock; implementation is expected to be
/// non-blocking").
pub struct MissRegistry<Id> {
    next_id: ListenerId,
    handlers: BTreeMap<ListenerId, Box<dyn FnMut(&MissEvent<Id>) + Send>>,
}

impl<Id> Default for MissRegistry<Id> {
    fn default() -> Self {
        Self {
            next_id: 0,
            handlers: BTreeMap::new(),
        }
    }
}

impl<Id: Clone> MissRegistry<Id> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, handler: Box<dyn FnMut(&MissEvent<Id>) + Send>) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        self.handlers.insert(id, handler);
        id
    }

    pub fn undeclare(&mut self, id: ListenerId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Notify every registered listener. No-ops when `nb == 0` per spec
    /// §4.7 ("emitted ... when `nb ≥ 1`").
    pub fn notify(&mut self, source: Id, nb: u32) {
        if nb == 0 {
            return;
        }
        let event = MissEvent { source, nb };
        for handler in self.handlers.values_mut() {
            handler(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn declare_ids_are_monotonic() {
        let mut reg: MissRegistry<u32> = MissRegistry::new();
        let id1 = reg.declare(Box::new(|_| {}));
        let id2 = reg.declare(Box::new(|_| {}));
        assert!(id2 > id1);
    }

    #[test]
    fn notify_invokes_every_listener() {
        let mut reg: MissRegistry<u32> = MissRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let seen = seen.clone();
            reg.declare(Box::new(move |ev| seen.lock().unwrap().push(ev.nb)));
        }
        reg.notify(7, 2);
        assert_eq!(*seen.lock().unwrap(), vec![2, 2, 2]);
    }

    #[test]
    fn notify_zero_nb_is_noop() {
        let mut reg: MissRegistry<u32> = MissRegistry::new();
        let seen = Arc::new(Mutex::new(0));
        let seen2 = seen.clone();
        reg.declare(Box::new(move |_| *seen2.lock().unwrap() += 1));
        reg.notify(1, 0);
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn undeclare_stops_future_notifications() {
        let mut reg: MissRegistry<u32> = MissRegistry::new();
        let seen = Arc::new(Mutex::new(0));
        let seen2 = seen.clone();
        let id = reg.declare(Box::new(move |_| *seen2.lock().unwrap() += 1));
        assert!(reg.undeclare(id));
        reg.notify(1, 5);
        assert_eq!(*seen.lock().unwrap(), 0);
        assert!(!reg.undeclare(id));
    }
}

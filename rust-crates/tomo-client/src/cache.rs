use crate::reader::ResolvedEntity;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Instant,
};
use tracing::debug;

/// A resolved read, including the "never created" outcome.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub resolved: Option<Arc<ResolvedEntity>>,
    pub fetched_at: Instant,
}

/// Taken before a read starts and checked when its result is stored.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReadTicket {
    issued_at: u64,
}

/// Invalidation markers kept before they are dropped in bulk.
const MAX_TOMBSTONES: usize = 256;

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    // sequence of the last invalidation; reads ticketed before it are stale
    invalidated_at: u64,
}

#[derive(Default)]
struct Entries {
    slots: HashMap<String, Slot>,
    // slots holding only an invalidation marker
    tombstones: usize,
    sequence: u64,
    // tickets issued before this are rejected outright
    floor: u64,
}

impl Entries {
    fn accepts(&self, identifier: &str, ticket: ReadTicket) -> bool {
        let invalidated_at = self
            .slots
            .get(identifier)
            .map_or(0, |slot| slot.invalidated_at);
        ticket.issued_at >= self.floor && ticket.issued_at >= invalidated_at
    }

    fn prune_tombstones(&mut self) {
        self.slots.retain(|_, slot| slot.entry.is_some());
        self.tombstones = 0;
        self.floor = self.sequence;
        debug!(floor = self.floor, "invalidation markers pruned");
    }
}

/// Identifier-keyed cache of resolved entities.
///
/// Entries are only ever replaced whole or removed. Dropping an invalidation
/// marker raises the ticket floor instead, so a read that might have raced it
/// is discarded rather than stored.
#[derive(Default)]
pub struct StateCache {
    inner: Mutex<Entries>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, identifier: &str) -> Option<CacheEntry> {
        self.lock()
            .slots
            .get(identifier)
            .and_then(|slot| slot.entry.clone())
    }

    /// Take before starting a read, hand back to [`StateCache::store`].
    pub fn ticket(&self, _identifier: &str) -> ReadTicket {
        ReadTicket {
            issued_at: self.lock().sequence,
        }
    }

    /// Returns `false` and drops the value when the entry was invalidated
    /// after `ticket` was taken.
    pub fn store(
        &self,
        identifier: &str,
        ticket: ReadTicket,
        resolved: Option<Arc<ResolvedEntity>>,
    ) -> bool {
        let mut inner = self.lock();
        if !inner.accepts(identifier, ticket) {
            debug!(%identifier, "discarding read that raced an invalidation");
            return false;
        }
        let entry = CacheEntry {
            resolved,
            fetched_at: Instant::now(),
        };
        let slot = inner.slots.entry(identifier.to_string()).or_default();
        let was_tombstone = slot.entry.is_none() && slot.invalidated_at > 0;
        slot.entry = Some(entry);
        if was_tombstone {
            inner.tombstones -= 1;
        }
        true
    }

    pub fn invalidate(&self, identifier: &str) {
        let mut inner = self.lock();
        inner.sequence += 1;
        let sequence = inner.sequence;
        let slot = inner.slots.entry(identifier.to_string()).or_default();
        let was_tombstone = slot.entry.is_none() && slot.invalidated_at > 0;
        slot.entry = None;
        slot.invalidated_at = sequence;
        if !was_tombstone {
            inner.tombstones += 1;
        }
        if inner.tombstones > MAX_TOMBSTONES {
            inner.prune_tombstones();
        }
        debug!(%identifier, "cache entry invalidated");
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.sequence += 1;
        inner.floor = inner.sequence;
        inner.slots.clear();
        inner.tombstones = 0;
    }

    pub fn len(&self) -> usize {
        self.lock()
            .slots
            .values()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Short-TTL cache for polled contract views.
//!
//! The coordinator polls `currentCycleId`, `cycle` and `isCycleResolved` on
//! tight loops; a few seconds of staleness is acceptable there. The cache is
//! cleared whenever this process submits a transaction, so reads that follow
//! our own writes always hit the node.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

use crate::views::CycleSnapshot;

#[derive(Debug)]
pub(crate) struct ReadCache {
    ttl: Duration,
    current_cycle: Mutex<Option<(Instant, u64)>>,
    cycles: Mutex<FxHashMap<u64, (Instant, CycleSnapshot)>>,
    resolved: Mutex<FxHashMap<u64, (Instant, bool)>>,
}

impl ReadCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current_cycle: Mutex::new(None),
            cycles: Mutex::new(FxHashMap::default()),
            resolved: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn current_cycle(&self) -> Option<u64> {
        let slot = self.current_cycle.lock();
        slot.filter(|(at, _)| at.elapsed() < self.ttl).map(|(_, v)| v)
    }

    pub(crate) fn put_current_cycle(&self, id: u64) {
        *self.current_cycle.lock() = Some((Instant::now(), id));
    }

    pub(crate) fn cycle(&self, id: u64) -> Option<CycleSnapshot> {
        let map = self.cycles.lock();
        map.get(&id)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, snap)| *snap)
    }

    pub(crate) fn put_cycle(&self, id: u64, snapshot: CycleSnapshot) {
        self.cycles.lock().insert(id, (Instant::now(), snapshot));
    }

    pub(crate) fn resolved(&self, id: u64) -> Option<bool> {
        let map = self.resolved.lock();
        map.get(&id)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, flag)| *flag)
    }

    pub(crate) fn put_resolved(&self, id: u64, flag: bool) {
        self.resolved.lock().insert(id, (Instant::now(), flag));
    }

    /// Drop everything. Called after this process lands a transaction.
    pub(crate) fn clear(&self) {
        *self.current_cycle.lock() = None;
        self.cycles.lock().clear();
        self.resolved.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_the_ttl() {
        let cache = ReadCache::new(Duration::from_millis(0));
        cache.put_current_cycle(7);
        cache.put_resolved(7, true);
        assert_eq!(cache.current_cycle(), None);
        assert_eq!(cache.resolved(7), None);
    }

    #[test]
    fn fresh_entries_are_served() {
        let cache = ReadCache::new(Duration::from_secs(60));
        cache.put_current_cycle(7);
        cache.put_resolved(7, false);
        assert_eq!(cache.current_cycle(), Some(7));
        assert_eq!(cache.resolved(7), Some(false));
    }

    #[test]
    fn clear_forces_the_next_read_through() {
        let cache = ReadCache::new(Duration::from_secs(60));
        cache.put_current_cycle(7);
        cache.put_resolved(9, true);
        cache.clear();
        assert_eq!(cache.current_cycle(), None);
        assert_eq!(cache.resolved(9), None);
    }
}

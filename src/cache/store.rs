//! Hot store: bounded, cost-weighted, per-entry TTL.
//!
//! Recency is tracked by an unbounded `LruCache`; the capacity bound is the
//! sum of entry costs, enforced here. Eviction notifications are delivered
//! after the store lock is released so the listener may call back into the
//! store.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;

use super::clock::{Clock, duration_millis};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Hard expiry passed.
    Expired,
    /// Displaced to stay under the cost bound.
    Capacity,
    /// Dropped by [`HotStore::clear`].
    Cleared,
    /// Explicitly removed.
    Removed,
    /// Overwritten by a newer value for the same key.
    Replaced,
}

impl Eviction {
    pub fn as_str(self) -> &'static str {
        match self {
            Eviction::Expired => "expired",
            Eviction::Capacity => "capacity",
            Eviction::Cleared => "cleared",
            Eviction::Removed => "removed",
            Eviction::Replaced => "replaced",
        }
    }
}

pub type EvictionListener<V> = Box<dyn Fn(&str, Arc<V>, Eviction) + Send + Sync>;

struct Slot<V> {
    value: Arc<V>,
    cost: u64,
    expires_at_ms: u64,
}

struct Slots<V> {
    lru: LruCache<String, Slot<V>>,
    total_cost: u64,
}

type Evicted<V> = Vec<(String, Arc<V>, Eviction)>;

impl<V> Slots<V> {
    fn take(&mut self, key: &str) -> Option<Slot<V>> {
        let slot = self.lru.pop(key)?;
        self.total_cost -= slot.cost;
        Some(slot)
    }

    /// Live value for `key`; an expired slot is dropped on the way.
    fn live(&mut self, key: &str, now: u64, evicted: &mut Evicted<V>) -> Option<Arc<V>> {
        let expired = self.lru.peek(key)?.expires_at_ms <= now;
        if expired {
            if let Some(slot) = self.take(key) {
                evicted.push((key.to_string(), slot.value, Eviction::Expired));
            }
            return None;
        }
        self.lru.get(key).map(|slot| Arc::clone(&slot.value))
    }

    fn insert(&mut self, key: &str, slot: Slot<V>, evicted: &mut Evicted<V>) {
        self.total_cost += slot.cost;
        if let Some(previous) = self.lru.put(key.to_string(), slot) {
            self.total_cost -= previous.cost;
            evicted.push((key.to_string(), previous.value, Eviction::Replaced));
        }
    }

    fn trim(&mut self, capacity: u64, now: u64, evicted: &mut Evicted<V>) {
        while self.total_cost > capacity {
            let Some((key, slot)) = self.lru.pop_lru() else {
                break;
            };
            self.total_cost -= slot.cost;
            let cause = if slot.expires_at_ms <= now {
                Eviction::Expired
            } else {
                Eviction::Capacity
            };
            evicted.push((key, slot.value, cause));
        }
    }
}

pub struct HotStore<V> {
    slots: Mutex<Slots<V>>,
    capacity: u64,
    clock: Arc<dyn Clock>,
    listener: Option<EvictionListener<V>>,
}

impl<V> fmt::Debug for HotStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotStore")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("total_cost", &self.total_cost())
            .finish_non_exhaustive()
    }
}

impl<V> HotStore<V> {
    pub fn new(capacity: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(Slots {
                lru: LruCache::unbounded(),
                total_cost: 0,
            }),
            capacity,
            clock,
            listener: None,
        }
    }

    pub fn with_listener(
        capacity: u64,
        clock: Arc<dyn Clock>,
        listener: impl Fn(&str, Arc<V>, Eviction) + Send + Sync + 'static,
    ) -> Self {
        Self {
            listener: Some(Box::new(listener)),
            ..Self::new(capacity, clock)
        }
    }

    fn notify(&self, evicted: Evicted<V>) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        for (key, value, cause) in evicted {
            listener(&key, value, cause);
        }
    }

    /// Live value for `key`, refreshing its recency.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let now = self.clock.now_millis();
        let mut evicted = Vec::new();
        let value = mutex_lock(&self.slots, SOURCE, "get").live(key, now, &mut evicted);
        self.notify(evicted);
        value
    }

    /// Compare-and-swap: insert only while the live value for `key` is still
    /// `expected` (pointer identity), or absent when `expected` is `None`.
    pub fn publish(
        &self,
        key: &str,
        expected: Option<&Arc<V>>,
        value: Arc<V>,
        cost: u64,
        ttl: Duration,
    ) -> bool {
        let now = self.clock.now_millis();
        let mut evicted = Vec::new();
        let published = {
            let mut slots = mutex_lock(&self.slots, SOURCE, "publish");
            let current = slots.live(key, now, &mut evicted);
            let unchanged = match (current.as_ref(), expected) {
                (None, None) => true,
                (Some(current), Some(expected)) => Arc::ptr_eq(current, expected),
                _ => false,
            };
            unchanged && self.store_locked(&mut slots, key, value, cost, ttl, now, &mut evicted)
        };
        self.notify(evicted);
        published
    }

    /// Swap `expected` for `value`, or fill the slot if it is empty. Refused
    /// while some other live value holds `key`.
    pub fn settle(
        &self,
        key: &str,
        expected: &Arc<V>,
        value: Arc<V>,
        cost: u64,
        ttl: Duration,
    ) -> bool {
        let now = self.clock.now_millis();
        let mut evicted = Vec::new();
        let settled = {
            let mut slots = mutex_lock(&self.slots, SOURCE, "settle");
            let current = slots.live(key, now, &mut evicted);
            current
                .as_ref()
                .is_none_or(|current| Arc::ptr_eq(current, expected))
                && self.store_locked(&mut slots, key, value, cost, ttl, now, &mut evicted)
        };
        self.notify(evicted);
        settled
    }

    #[allow(clippy::too_many_arguments)]
    fn store_locked(
        &self,
        slots: &mut Slots<V>,
        key: &str,
        value: Arc<V>,
        cost: u64,
        ttl: Duration,
        now: u64,
        evicted: &mut Evicted<V>,
    ) -> bool {
        if cost > self.capacity {
            if let Some(previous) = slots.take(key) {
                evicted.push((key.to_string(), previous.value, Eviction::Removed));
            }
            return false;
        }
        let slot = Slot {
            value,
            cost,
            expires_at_ms: now.saturating_add(duration_millis(ttl)),
        };
        slots.insert(key, slot, evicted);
        slots.trim(self.capacity, now, evicted);
        true
    }

    /// Remove `key` only while it still holds `expected`.
    pub fn remove_if(&self, key: &str, expected: &Arc<V>) -> bool {
        let removed = {
            let mut slots = mutex_lock(&self.slots, SOURCE, "remove_if");
            let matches = slots
                .lru
                .peek(key)
                .is_some_and(|slot| Arc::ptr_eq(&slot.value, expected));
            if matches { slots.take(key) } else { None }
        };
        match removed {
            Some(slot) => {
                self.notify(vec![(key.to_string(), slot.value, Eviction::Removed)]);
                true
            }
            None => false,
        }
    }

    /// Drop everything. Live entries are reported as [`Eviction::Cleared`].
    pub fn clear(&self) {
        let now = self.clock.now_millis();
        let evicted: Evicted<V> = {
            let mut slots = mutex_lock(&self.slots, SOURCE, "clear");
            slots.total_cost = 0;
            let mut drained = Vec::with_capacity(slots.lru.len());
            while let Some((key, slot)) = slots.lru.pop_lru() {
                let cause = if slot.expires_at_ms <= now {
                    Eviction::Expired
                } else {
                    Eviction::Cleared
                };
                drained.push((key, slot.value, cause));
            }
            drained
        };
        self.notify(evicted);
    }

    /// Snapshot of live entries, most recently used first. Recency is not
    /// touched.
    pub fn entries(&self) -> Vec<(String, Arc<V>)> {
        let now = self.clock.now_millis();
        mutex_lock(&self.slots, SOURCE, "entries")
            .lru
            .iter()
            .filter(|(_, slot)| slot.expires_at_ms > now)
            .map(|(key, slot)| (key.clone(), Arc::clone(&slot.value)))
            .collect()
    }

    /// Number of slots, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        mutex_lock(&self.slots, SOURCE, "len").lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_cost(&self) -> u64 {
        mutex_lock(&self.slots, SOURCE, "total_cost").total_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    type Log = Arc<Mutex<Vec<(String, Eviction)>>>;

    fn store(capacity: u64) -> (ManualClock, Log, HotStore<&'static str>) {
        let clock = ManualClock::new(1_000);
        let log: Log = Arc::default();
        let sink = Arc::clone(&log);
        let store = HotStore::with_listener(capacity, Arc::new(clock.clone()), move |key, _, cause| {
            sink.lock().expect("log lock").push((key.to_string(), cause));
        });
        (clock, log, store)
    }

    const MINUTE: Duration = Duration::from_secs(60);

    /// Unconditional write through the compare-and-swap entry points.
    fn put(
        store: &HotStore<&'static str>,
        key: &str,
        value: &'static str,
        cost: u64,
        ttl: Duration,
    ) -> bool {
        match store.get(key) {
            Some(current) => store.settle(key, &current, Arc::new(value), cost, ttl),
            None => store.publish(key, None, Arc::new(value), cost, ttl),
        }
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let (_clock, log, store) = store(100);
        assert!(put(&store, "a", "a", 40, MINUTE));
        assert!(put(&store, "b", "b", 40, MINUTE));
        assert!(store.get("a").is_some());

        assert!(put(&store, "c", "c", 40, MINUTE));

        assert!(store.get("b").is_none());
        assert!(store.get("a").is_some());
        assert_eq!(store.total_cost(), 80);
        assert_eq!(
            log.lock().expect("log lock").as_slice(),
            &[("b".to_string(), Eviction::Capacity)]
        );
    }

    #[test]
    fn oversized_values_are_refused() {
        let (_clock, log, store) = store(100);
        assert!(put(&store, "a", "small", 10, MINUTE));
        assert!(!put(&store, "a", "huge", 101, MINUTE));

        assert!(store.get("a").is_none());
        assert_eq!(store.total_cost(), 0);
        assert_eq!(
            log.lock().expect("log lock").as_slice(),
            &[("a".to_string(), Eviction::Removed)]
        );
    }

    #[test]
    fn expired_entries_are_absent() {
        let (clock, log, store) = store(100);
        put(&store, "a", "a", 1, Duration::from_millis(500));

        clock.advance(Duration::from_millis(499));
        assert!(store.get("a").is_some());

        clock.advance(Duration::from_millis(1));
        assert!(store.get("a").is_none());
        assert!(store.is_empty());
        assert_eq!(
            log.lock().expect("log lock").as_slice(),
            &[("a".to_string(), Eviction::Expired)]
        );
    }

    #[test]
    fn publish_is_compare_and_swap() {
        let (_clock, _log, store) = store(100);
        assert!(store.publish("k", None, Arc::new("first"), 1, MINUTE));
        assert!(!store.publish("k", None, Arc::new("racer"), 1, MINUTE));

        let observed = store.get("k").expect("published");
        assert!(store.publish("k", Some(&observed), Arc::new("second"), 1, MINUTE));
        assert!(!store.publish("k", Some(&observed), Arc::new("stale"), 1, MINUTE));

        assert_eq!(*store.get("k").expect("second"), "second");
    }

    #[test]
    fn remove_if_requires_identity() {
        let (_clock, _log, store) = store(100);
        let first = Arc::new("first");
        store.publish("k", None, Arc::clone(&first), 1, MINUTE);
        put(&store, "k", "second", 1, MINUTE);

        assert!(!store.remove_if("k", &first));
        let current = store.get("k").expect("present");
        assert!(store.remove_if("k", &current));
        assert!(store.get("k").is_none());
    }

    #[test]
    fn clear_reports_live_entries_as_cleared() {
        let (clock, log, store) = store(100);
        put(&store, "short", "s", 1, Duration::from_millis(10));
        put(&store, "long", "l", 1, MINUTE);
        clock.advance(Duration::from_millis(20));

        store.clear();

        let mut log = log.lock().expect("log lock").clone();
        log.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            log,
            vec![
                ("long".to_string(), Eviction::Cleared),
                ("short".to_string(), Eviction::Expired),
            ]
        );
        assert_eq!(store.total_cost(), 0);
    }

    #[test]
    fn replacing_reports_replaced() {
        let (_clock, log, store) = store(100);
        put(&store, "k", "a", 5, MINUTE);
        put(&store, "k", "b", 7, MINUTE);

        assert_eq!(store.total_cost(), 7);
        assert_eq!(
            log.lock().expect("log lock").as_slice(),
            &[("k".to_string(), Eviction::Replaced)]
        );
    }

    #[test]
    fn entries_skip_expired() {
        let (clock, _log, store) = store(100);
        put(&store, "short", "s", 1, Duration::from_millis(10));
        put(&store, "long", "l", 1, MINUTE);
        clock.advance(Duration::from_millis(20));

        let keys: Vec<String> = store.entries().into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["long".to_string()]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn settle_only_replaces_its_own_placeholder() {
        let (clock, _log, store) = store(100);
        let placeholder = Arc::new("placeholder");
        assert!(store.publish("k", None, Arc::clone(&placeholder), 1, Duration::from_millis(50)));
        assert!(store.settle("k", &placeholder, Arc::new("mine"), 1, MINUTE));
        assert_eq!(*store.get("k").expect("settled"), "mine");

        let late = Arc::new("late");
        assert!(store.publish("other", None, Arc::clone(&late), 1, Duration::from_millis(50)));
        clock.advance(Duration::from_millis(60));
        let newer = Arc::new("newer");
        assert!(store.publish("other", None, Arc::clone(&newer), 1, MINUTE));

        assert!(!store.settle("other", &late, Arc::new("superseded"), 1, MINUTE));
        assert_eq!(*store.get("other").expect("kept"), "newer");

        // An empty slot may be filled.
        assert!(store.settle("gone", &late, Arc::new("filled"), 1, MINUTE));
    }

    #[test]
    fn listener_may_reenter_store() {
        let clock = ManualClock::new(0);
        let store: Arc<HotStore<u32>> = Arc::new_cyclic(|weak: &std::sync::Weak<HotStore<u32>>| {
            let weak = weak.clone();
            HotStore::with_listener(10, Arc::new(clock.clone()), move |_, _, _| {
                if let Some(store) = weak.upgrade() {
                    let _ = store.len();
                }
            })
        });
        store.publish("a", None, Arc::new(1), 6, MINUTE);
        store.publish("b", None, Arc::new(2), 6, MINUTE);
        assert_eq!(store.len(), 1);
    }
}

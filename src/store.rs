//! Bounded-size LRU resource store with key-storable reaping (§4.12).
//!
//! Mirrors `fz_store_s` (`examples/original_source/source/fitz/store.c` is
//! not in the retrieved pack, but its shape is visible through every
//! `fz_store_item`/`fz_drop_from_store_key` call site referenced by
//! `device.h`'s `fz_default_colorspaces` and `image.c`'s tile cache). Every
//! type stored here exposes, in Rust terms, `CacheKey`/`CacheValue` rather
//! than the original's per-type vtable (`make_hash`/`keep`/`drop`/`cmp`
//! become `Hash`/`Clone`/`Drop`/`Eq`); `needs_reap` survives as the
//! `CacheKey::is_reapable` hook.

use std::collections::HashMap;
use std::hash::Hash;

/// A key usable in the store. `is_reapable` reports whether this key
/// embeds a *key-storable* identity (§4.12) that may have gone dead since
/// insertion; the store sweeps such entries during a reap pass.
pub trait CacheKey: Clone + Eq + Hash {
    fn is_reapable(&self) -> bool {
        false
    }
}

/// A value usable in the store; only its heap footprint is tracked for
/// scavenging decisions.
pub trait CacheValue: Clone {
    fn size_bytes(&self) -> usize;
}

struct Entry<V> {
    value: V,
    size: usize,
    last_used: u64,
}

/// The eviction policy phase passed to `scavenge`. A caller can retry with
/// an escalating phase so a multi-phase policy (soft evict, hard evict,
/// emergency evict) makes progress across retries, per §4.1/§4.12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScavengePhase {
    Soft,
    Hard,
    Emergency,
}

impl ScavengePhase {
    pub fn escalate(self) -> ScavengePhase {
        match self {
            ScavengePhase::Soft => ScavengePhase::Hard,
            ScavengePhase::Hard => ScavengePhase::Emergency,
            ScavengePhase::Emergency => ScavengePhase::Emergency,
        }
    }
}

pub struct Store<K: CacheKey, V: CacheValue> {
    entries: HashMap<K, Entry<V>>,
    max_bytes: usize,
    used_bytes: usize,
    clock: u64,
    defer_depth: u32,
    reap_pending: bool,
}

impl<K: CacheKey, V: CacheValue> Store<K, V> {
    pub fn new(max_bytes: usize) -> Self {
        Store {
            entries: HashMap::new(),
            max_bytes,
            used_bytes: 0,
            clock: 0,
            defer_depth: 0,
            reap_pending: false,
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let clock = {
            self.clock += 1;
            self.clock
        };
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = clock;
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Inserts `value` under `key`. If a matching entry was inserted by
    /// another thread in the meantime (racing threads tolerated per §4.6
    /// step 8), the existing entry wins and is returned instead of ours.
    pub fn insert_or_get(&mut self, key: K, value: V) -> V {
        if let Some(existing) = self.entries.get(&key) {
            return existing.value.clone();
        }
        let size = value.size_bytes();
        let clock = self.tick();
        self.used_bytes += size;
        self.entries.insert(
            key,
            Entry {
                value: value.clone(),
                size,
                last_used: clock,
            },
        );
        value
    }

    pub fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.used_bytes -= entry.size;
        }
    }

    /// Evicts least-recently-used entries until at least `want_bytes` are
    /// free (or the store is empty). `phase` escalates how aggressively we
    /// evict on repeated failures: `Soft` only evicts entries older than the
    /// median age, `Hard` evicts everything but the most-recently-used
    /// entry, `Emergency` empties the store.
    pub fn scavenge(&mut self, want_bytes: usize, phase: ScavengePhase) -> bool {
        if self.used_bytes >= self.max_bytes.saturating_sub(want_bytes) || phase == ScavengePhase::Emergency {
            // fallthrough: always attempt eviction, the threshold above is
            // intentionally permissive so `Emergency` always runs.
        }
        let mut freed = 0usize;
        let target_entries: Vec<K> = match phase {
            ScavengePhase::Emergency => self.entries.keys().cloned().collect(),
            ScavengePhase::Hard => {
                let mut order: Vec<(u64, K)> = self
                    .entries
                    .iter()
                    .map(|(k, e)| (e.last_used, k.clone()))
                    .collect();
                order.sort_by_key(|(t, _)| *t);
                order.into_iter().map(|(_, k)| k).collect()
            }
            ScavengePhase::Soft => {
                let mut order: Vec<(u64, K)> = self
                    .entries
                    .iter()
                    .map(|(k, e)| (e.last_used, k.clone()))
                    .collect();
                order.sort_by_key(|(t, _)| *t);
                let median = order.get(order.len() / 2).map(|(t, _)| *t).unwrap_or(0);
                order
                    .into_iter()
                    .filter(|(t, _)| *t <= median)
                    .map(|(_, k)| k)
                    .collect()
            }
        };
        for key in target_entries {
            if freed >= want_bytes || self.entries.is_empty() {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                freed += entry.size;
                self.used_bytes -= entry.size;
                log::debug!("store: scavenged {} bytes ({:?})", entry.size, phase);
            }
        }
        freed >= want_bytes || self.entries.is_empty()
    }

    /// Brackets a burst of drops so a single reap pass runs at the end
    /// (§4.12 `defer_reap_start`/`defer_reap_end`) instead of one per drop.
    pub fn defer_reap_start(&mut self) {
        self.defer_depth += 1;
    }

    pub fn defer_reap_end(&mut self) {
        self.defer_depth = self.defer_depth.saturating_sub(1);
        if self.defer_depth == 0 && self.reap_pending {
            self.reap();
        }
    }

    /// Requests a reap pass; if deferred, the pass runs once `defer_depth`
    /// returns to zero.
    pub fn request_reap(&mut self) {
        if self.defer_depth > 0 {
            self.reap_pending = true;
        } else {
            self.reap();
        }
    }

    /// Sweeps entries whose key embeds a dead key-storable object.
    fn reap(&mut self) {
        self.reap_pending = false;
        let dead: Vec<K> = self
            .entries
            .keys()
            .filter(|k| k.is_reapable())
            .cloned()
            .collect();
        for key in dead {
            if let Some(entry) = self.entries.remove(&key) {
                self.used_bytes -= entry.size;
                log::debug!("store: reaped dead-key entry ({} bytes)", entry.size);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Eq, Hash)]
    struct IntKey(u32, bool);
    impl CacheKey for IntKey {
        fn is_reapable(&self) -> bool {
            self.1
        }
    }

    #[derive(Clone)]
    struct Blob(usize);
    impl CacheValue for Blob {
        fn size_bytes(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut s: Store<IntKey, Blob> = Store::new(1024);
        s.insert_or_get(IntKey(1, false), Blob(10));
        assert_eq!(s.get(&IntKey(1, false)).unwrap().0, 10);
        assert_eq!(s.used_bytes(), 10);
    }

    #[test]
    fn racing_insert_keeps_first_entry() {
        let mut s: Store<IntKey, Blob> = Store::new(1024);
        s.insert_or_get(IntKey(1, false), Blob(10));
        let won = s.insert_or_get(IntKey(1, false), Blob(999));
        assert_eq!(won.0, 10);
        assert_eq!(s.used_bytes(), 10);
    }

    #[test]
    fn emergency_scavenge_empties_store() {
        let mut s: Store<IntKey, Blob> = Store::new(1024);
        s.insert_or_get(IntKey(1, false), Blob(10));
        s.insert_or_get(IntKey(2, false), Blob(20));
        s.scavenge(usize::MAX, ScavengePhase::Emergency);
        assert!(s.is_empty());
        assert_eq!(s.used_bytes(), 0);
    }

    #[test]
    fn reap_evicts_only_reapable_keys() {
        let mut s: Store<IntKey, Blob> = Store::new(1024);
        s.insert_or_get(IntKey(1, true), Blob(10));
        s.insert_or_get(IntKey(2, false), Blob(20));
        s.request_reap();
        assert_eq!(s.len(), 1);
        assert!(s.get(&IntKey(2, false)).is_some());
    }

    #[test]
    fn deferred_reap_runs_once_at_end() {
        let mut s: Store<IntKey, Blob> = Store::new(1024);
        s.insert_or_get(IntKey(1, true), Blob(10));
        s.defer_reap_start();
        s.request_reap();
        assert_eq!(s.len(), 1, "reap must not run while deferred");
        s.defer_reap_end();
        assert_eq!(s.len(), 0);
    }
}

//! Balanced insert/remove and reap-pass conservation for the resource store
//! (§4.12, §8 invariant 1: every balanced keep/drop sequence ends with every
//! object freed).

use fitzcore::store::{CacheKey, CacheValue, ScavengePhase, Store};

#[derive(Clone)]
struct TileKey {
    image_id: u32,
    l2factor: u8,
    image_alive: std::rc::Rc<std::cell::Cell<bool>>,
}

// Identity for hashing/equality is (image_id, l2factor) only; `image_alive`
// is liveness metadata consulted solely by `is_reapable`, mirroring the
// original's key-storable object embedded inside a cache key (§4.12).
impl PartialEq for TileKey {
    fn eq(&self, other: &Self) -> bool {
        self.image_id == other.image_id && self.l2factor == other.l2factor
    }
}
impl Eq for TileKey {}
impl std::hash::Hash for TileKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.image_id.hash(state);
        self.l2factor.hash(state);
    }
}

impl CacheKey for TileKey {
    fn is_reapable(&self) -> bool {
        !self.image_alive.get()
    }
}

#[derive(Clone)]
struct Tile(Vec<u8>);

impl CacheValue for Tile {
    fn size_bytes(&self) -> usize {
        self.0.len()
    }
}

#[test]
fn balanced_insert_and_remove_leaves_the_store_empty() {
    let mut store: Store<TileKey, Tile> = Store::new(1 << 20);
    let alive = std::rc::Rc::new(std::cell::Cell::new(true));

    let keys: Vec<TileKey> = (0..8)
        .map(|i| TileKey { image_id: 1, l2factor: i, image_alive: alive.clone() })
        .collect();

    for k in &keys {
        store.insert_or_get(k.clone(), Tile(vec![0u8; 64]));
    }
    assert_eq!(store.len(), 8);
    assert_eq!(store.used_bytes(), 8 * 64);

    for k in &keys {
        store.remove(k);
    }
    assert!(store.is_empty());
    assert_eq!(store.used_bytes(), 0);
}

#[test]
fn reap_sweeps_entries_whose_key_storable_image_has_died() {
    let mut store: Store<TileKey, Tile> = Store::new(1 << 20);
    let alive = std::rc::Rc::new(std::cell::Cell::new(true));

    store.insert_or_get(
        TileKey { image_id: 7, l2factor: 0, image_alive: alive.clone() },
        Tile(vec![0u8; 128]),
    );
    store.insert_or_get(
        TileKey { image_id: 7, l2factor: 1, image_alive: alive.clone() },
        Tile(vec![0u8; 32]),
    );
    assert_eq!(store.used_bytes(), 160);

    // the image drops to zero main refs; only the store's key-uses kept it
    // reachable (§4.12 "key-storable"). A reap pass must now evict both
    // tiles derived from it.
    alive.set(false);
    store.request_reap();

    assert!(store.is_empty());
    assert_eq!(store.used_bytes(), 0);
}

#[test]
fn deferred_reap_runs_once_at_the_end_of_a_bracketed_burst() {
    let mut store: Store<TileKey, Tile> = Store::new(1 << 20);
    let alive = std::rc::Rc::new(std::cell::Cell::new(true));
    store.insert_or_get(TileKey { image_id: 3, l2factor: 0, image_alive: alive.clone() }, Tile(vec![0u8; 16]));

    store.defer_reap_start();
    alive.set(false);
    store.request_reap();
    // still present: the reap pass is deferred until defer_reap_end.
    assert_eq!(store.len(), 1);
    store.defer_reap_end();
    assert!(store.is_empty());
}

#[test]
fn scavenge_frees_bytes_under_allocation_pressure_and_escalates() {
    let mut store: Store<TileKey, Tile> = Store::new(256);
    let alive = std::rc::Rc::new(std::cell::Cell::new(true));
    for i in 0..4u8 {
        store.insert_or_get(TileKey { image_id: 9, l2factor: i, image_alive: alive.clone() }, Tile(vec![0u8; 64]));
    }
    assert_eq!(store.used_bytes(), 256);

    let mut phase = ScavengePhase::Soft;
    let mut freed_enough = store.scavenge(64, phase);
    while !freed_enough {
        phase = phase.escalate();
        freed_enough = store.scavenge(64, phase);
    }
    assert!(store.used_bytes() <= 256 - 64);
}

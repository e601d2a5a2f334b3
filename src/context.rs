//! Process-wide context: allocator, locks, warning de-duplication, font
//! engine handle, AA level and the resource store (§4.1, §10.2, §10.3).
//!
//! Mirrors `fz_context_s` (`examples/original_source/include/mupdf/fitz/context.h`):
//! a context may be cloned to share allocator/store/font-engine/locks across
//! threads while keeping a private error/warning stack per clone. The
//! original's setjmp/longjmp error ladder (§9) is not modeled here at all —
//! this crate uses plain `Result`/`?` throughout, per the system's direction
//! to use "the target's native result-propagation idiom" instead.

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use crate::errors::{Error, FitzResult};
use crate::font::FontEngine;
use crate::image::TileStore;

/// The allocator contract (§4.1): a malloc/realloc/free trio with a user
/// cookie. Rust code allocates through the global allocator as usual; this
/// trait exists purely to let a caller simulate allocation pressure so the
/// store-scavenging retry policy (§4.12) is exercisable without genuinely
/// exhausting memory.
pub trait Allocator: Send + Sync {
    /// Returns `false` to simulate allocation failure for `size` bytes.
    fn try_reserve(&self, size: usize) -> bool;
}

pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn try_reserve(&self, _size: usize) -> bool {
        true
    }
}

/// Named mutexes in strict acquisition order (§4.1/§5): a thread holding
/// lock `i` may only acquire lock `j` if `j > i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LockKind {
    Alloc = 0,
    File = 1,
    FontEngine = 2,
    GlyphCache = 3,
}

const LOCK_COUNT: usize = 4;

pub struct Locks {
    mutexes: [Mutex<()>; LOCK_COUNT],
}

thread_local! {
    static HELD_LOCKS: Cell<u8> = Cell::new(0);
}

impl Locks {
    pub fn new() -> Self {
        Locks {
            mutexes: Default::default(),
        }
    }

    /// Acquires `kind`, asserting the strict ordering rule in debug builds.
    /// The returned guard releases the held-lock bit on drop.
    pub fn acquire(&self, kind: LockKind) -> LockGuard<'_> {
        let bit = 1u8 << (kind as u8);
        if cfg!(debug_assertions) {
            HELD_LOCKS.with(|held| {
                let mask = held.get();
                let higher_mask = !((bit << 1).wrapping_sub(1));
                debug_assert_eq!(
                    mask & !higher_mask & !bit,
                    0,
                    "lock order violation: attempted to acquire {:?} while holding a lower-ordered lock",
                    kind
                );
                held.set(mask | bit);
            });
        }
        let guard = self.mutexes[kind as usize].lock().unwrap_or_else(|e| e.into_inner());
        LockGuard { _guard: guard, bit }
    }
}

impl Default for Locks {
    fn default() -> Self {
        Locks::new()
    }
}

pub struct LockGuard<'a> {
    _guard: std::sync::MutexGuard<'a, ()>,
    bit: u8,
}

impl<'a> Drop for LockGuard<'a> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) {
            HELD_LOCKS.with(|held| held.set(held.get() & !self.bit));
        }
    }
}

/// Consecutive-duplicate warning de-duplication (§7): identical consecutive
/// messages are counted, not reprinted, until a different message arrives
/// or an explicit flush.
#[derive(Default)]
struct WarnState {
    last: Option<String>,
    repeats: u32,
}

/// Shared sub-state: allocator, locks, store and font engine. Cloning a
/// `Context` bumps this `Arc`; only the warning/AA state below is private
/// to each clone.
struct Shared {
    allocator: Arc<dyn Allocator>,
    locks: Arc<Locks>,
    store: Mutex<TileStore>,
    font_engine: Option<Arc<dyn FontEngine>>,
}

pub struct Context {
    shared: Arc<Shared>,
    aa_level: u8,
    warn: WarnState,
}

impl Context {
    /// `alloc` nil -> `SystemAllocator`; `locks` nil -> fresh single-thread
    /// `Locks`.
    pub fn new(
        alloc: Option<Arc<dyn Allocator>>,
        locks: Option<Arc<Locks>>,
        store_max_bytes: usize,
        font_engine: Option<Arc<dyn FontEngine>>,
    ) -> Self {
        Context {
            shared: Arc::new(Shared {
                allocator: alloc.unwrap_or_else(|| Arc::new(SystemAllocator)),
                locks: locks.unwrap_or_else(|| Arc::new(Locks::new())),
                store: Mutex::new(TileStore::new(store_max_bytes)),
                font_engine,
            }),
            aa_level: 8,
            warn: WarnState::default(),
        }
    }

    /// Shares allocator, locks, store and font engine; starts a fresh error
    /// and warning stack. Clones (siblings) are the unit of thread-safe
    /// concurrent work (§5).
    pub fn clone_context(&self) -> Context {
        Context {
            shared: Arc::clone(&self.shared),
            aa_level: self.aa_level,
            warn: WarnState::default(),
        }
    }

    pub fn set_aa_level(&mut self, n: u8) {
        self.aa_level = n.min(8);
    }

    pub fn aa_level(&self) -> u8 {
        self.aa_level
    }

    pub fn locks(&self) -> &Arc<Locks> {
        &self.shared.locks
    }

    pub fn store(&self) -> &Mutex<TileStore> {
        &self.shared.store
    }

    pub fn font_engine(&self) -> Option<&Arc<dyn FontEngine>> {
        self.shared.font_engine.as_ref()
    }

    /// Attempts to reserve `size` bytes. On failure, evicts from the store
    /// (§4.12 scavenging) and retries once; if still failing, returns
    /// `Error::OutOfMemory` (§4.1).
    pub fn reserve(&self, size: usize) -> FitzResult<()> {
        if self.shared.allocator.try_reserve(size) {
            return Ok(());
        }
        {
            let mut store = self.shared.store.lock().unwrap();
            store.scavenge(size, crate::store::ScavengePhase::Hard);
        }
        if self.shared.allocator.try_reserve(size) {
            Ok(())
        } else {
            Err(Error::OutOfMemory)
        }
    }

    /// De-duplicated warning emission (§7): identical consecutive messages
    /// are counted via `log::warn!`'s target rather than reprinted.
    pub fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        if self.warn.last.as_deref() == Some(msg.as_str()) {
            self.warn.repeats += 1;
            return;
        }
        self.flush_warnings();
        log::warn!("{msg}");
        self.warn.last = Some(msg);
        self.warn.repeats = 0;
    }

    /// Resets the de-duplication counter, logging a repeat-count summary if
    /// any messages were collapsed. Called automatically at the end of
    /// every top-level device-driving entrypoint (§11.6) so warnings never
    /// bleed across independent top-level operations.
    pub fn flush_warnings(&mut self) {
        if self.warn.repeats > 0 {
            log::warn!(
                "(previous message repeated {} more times)",
                self.warn.repeats
            );
        }
        self.warn.last = None;
        self.warn.repeats = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_store_but_not_aa_level() {
        let mut ctx = Context::new(None, None, 1024 * 1024, None);
        ctx.set_aa_level(3);
        let mut sibling = ctx.clone_context();
        assert_eq!(sibling.aa_level(), 3);
        sibling.set_aa_level(8);
        assert_eq!(ctx.aa_level(), 3, "per-clone aa_level should not alias");
    }

    #[test]
    fn aa_level_clamps_silently() {
        let mut ctx = Context::new(None, None, 0, None);
        ctx.set_aa_level(200);
        assert_eq!(ctx.aa_level(), 8);
    }

    #[test]
    fn lock_order_rule_allows_ascending_acquisition() {
        let ctx = Context::new(None, None, 0, None);
        let locks = ctx.locks();
        let _a = locks.acquire(LockKind::Alloc);
        let _b = locks.acquire(LockKind::FontEngine);
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn lock_order_rule_rejects_descending_acquisition() {
        let ctx = Context::new(None, None, 0, None);
        let locks = ctx.locks();
        let _a = locks.acquire(LockKind::FontEngine);
        let _b = locks.acquire(LockKind::Alloc);
    }

    #[test]
    fn warn_dedup_counts_repeats() {
        let mut ctx = Context::new(None, None, 0, None);
        ctx.warn("disk full");
        ctx.warn("disk full");
        ctx.warn("disk full");
        assert_eq!(ctx.warn.repeats, 2);
        ctx.flush_warnings();
        assert_eq!(ctx.warn.repeats, 0);
    }
}

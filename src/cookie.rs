//! Bidirectional progress/abort channel (§4.11).
//!
//! Mirrors `fz_cookie_s` (`examples/original_source/include/mupdf/fitz/context.h`
//! and call sites in `device.c`/`list-device.c`): a small struct shared
//! between the caller and the renderer. `abort` is monotonic 0->1 so plain
//! atomics suffice — no lock is needed (§9 "Cookie as a shared mutable
//! struct").

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Cookie {
    inner: Arc<CookieInner>,
}

#[derive(Default)]
struct CookieInner {
    abort: AtomicBool,
    progress: AtomicUsize,
    progress_max: AtomicUsize,
    errors: AtomicUsize,
    incomplete_ok: AtomicBool,
    incomplete: AtomicBool,
}

impl Cookie {
    pub fn new() -> Self {
        Cookie::default()
    }

    /// Written once by the caller; read periodically by the core at
    /// scanline boundaries, at each display-list replay node, and at the
    /// top of each text-run processing step.
    pub fn abort(&self) {
        self.inner.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.load(Ordering::SeqCst)
    }

    pub fn set_progress(&self, progress: usize) {
        self.inner.progress.store(progress, Ordering::SeqCst);
    }

    pub fn bump_progress(&self) {
        self.inner.progress.fetch_add(1, Ordering::SeqCst);
    }

    pub fn progress(&self) -> usize {
        self.inner.progress.load(Ordering::SeqCst)
    }

    pub fn set_progress_max(&self, max: usize) {
        self.inner.progress_max.store(max, Ordering::SeqCst);
    }

    pub fn progress_max(&self) -> usize {
        self.inner.progress_max.load(Ordering::SeqCst)
    }

    /// Core increments this on a *recovered* error; `abort` is not counted
    /// here (invariant 6: abort yields an `errors` count of zero).
    pub fn record_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn errors(&self) -> usize {
        self.inner.errors.load(Ordering::SeqCst)
    }

    pub fn set_incomplete_ok(&self, ok: bool) {
        self.inner.incomplete_ok.store(ok, Ordering::SeqCst);
    }

    pub fn incomplete_ok(&self) -> bool {
        self.inner.incomplete_ok.load(Ordering::SeqCst)
    }

    pub fn mark_incomplete(&self) {
        self.inner.incomplete.store(true, Ordering::SeqCst);
    }

    pub fn is_incomplete(&self) -> bool {
        self.inner.incomplete.load(Ordering::SeqCst)
    }

    /// Swallows a `TryLater` error per the §7 `incomplete_ok` policy,
    /// returning `true` if the error was absorbed (caller should treat the
    /// operation as having produced a partial, but otherwise valid, result).
    pub fn swallow_try_later(&self, err: &crate::errors::Error) -> bool {
        if self.incomplete_ok() && err.kind() == crate::errors::ErrorKind::TryLater {
            self.mark_incomplete();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    #[test]
    fn abort_is_monotonic_and_shared_across_clones() {
        let c = Cookie::new();
        let c2 = c.clone();
        assert!(!c.is_aborted());
        c2.abort();
        assert!(c.is_aborted());
    }

    #[test]
    fn progress_never_exceeds_max_when_set_correctly() {
        let c = Cookie::new();
        c.set_progress_max(10);
        for _ in 0..10 {
            c.bump_progress();
        }
        assert!(c.progress() <= c.progress_max());
    }

    #[test]
    fn abort_does_not_count_as_an_error() {
        let c = Cookie::new();
        c.abort();
        assert_eq!(c.errors(), 0);
    }

    #[test]
    fn incomplete_ok_swallows_try_later() {
        let c = Cookie::new();
        c.set_incomplete_ok(true);
        assert!(c.swallow_try_later(&Error::TryLater));
        assert!(c.is_incomplete());
    }

    #[test]
    fn try_later_propagates_when_not_incomplete_ok() {
        let c = Cookie::new();
        assert!(!c.swallow_try_later(&Error::TryLater));
        assert!(!c.is_incomplete());
    }
}

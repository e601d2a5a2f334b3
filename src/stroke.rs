//! Stroke state: line width, joins, caps and dash pattern (§4.4).
//!
//! Mirrors `fz_stroke_state_s`'s small inline dash array — the original caps
//! dash entries at 32 floats so the common case never allocates. `SmallVec`
//! gives the same stack-first behaviour without a fixed hard limit.

use smallvec::SmallVec;
use std::sync::Arc;

/// Matches the inline capacity of `float dash_list[32]` in the original
/// struct; dash patterns beyond this still work, just with a heap spill.
pub const DASH_INLINE_CAP: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCap {
    Butt,
    Round,
    Square,
    Triangle,
}

impl Default for LineCap {
    fn default() -> Self {
        LineCap::Butt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineJoin {
    Miter,
    Round,
    Bevel,
    MiterXps,
}

impl Default for LineJoin {
    fn default() -> Self {
        LineJoin::Miter
    }
}

#[derive(Debug, Clone)]
struct StrokeStateInner {
    linejoin: LineJoin,
    linewidth: f32,
    miterlimit: f32,
    start_cap: LineCap,
    dash_cap: LineCap,
    end_cap: LineCap,
    dash_phase: f32,
    dash_list: SmallVec<[f32; DASH_INLINE_CAP]>,
}

/// Reference-counted and immutable once shared, same discipline as `Path`
/// and `Pixmap`: cloning is a cheap `Arc` bump, and in-place edits require
/// sole ownership.
#[derive(Debug, Clone)]
pub struct StrokeState {
    inner: Arc<StrokeStateInner>,
}

impl StrokeState {
    pub fn new(linewidth: f32, linejoin: LineJoin, start_cap: LineCap, miterlimit: f32) -> Self {
        StrokeState {
            inner: Arc::new(StrokeStateInner {
                linejoin,
                linewidth,
                miterlimit,
                start_cap,
                dash_cap: start_cap,
                end_cap: start_cap,
                dash_phase: 0.0,
                dash_list: SmallVec::new(),
            }),
        }
    }

    pub fn with_caps(mut self, start: LineCap, dash: LineCap, end: LineCap) -> Self {
        let inner = Arc::make_mut(&mut self.inner);
        inner.start_cap = start;
        inner.dash_cap = dash;
        inner.end_cap = end;
        self
    }

    pub fn with_dash(mut self, phase: f32, pattern: &[f32]) -> Self {
        let inner = Arc::make_mut(&mut self.inner);
        inner.dash_phase = phase;
        inner.dash_list = pattern.iter().copied().collect();
        self
    }

    pub fn linewidth(&self) -> f32 {
        self.inner.linewidth
    }

    pub fn linejoin(&self) -> LineJoin {
        self.inner.linejoin
    }

    pub fn miterlimit(&self) -> f32 {
        self.inner.miterlimit
    }

    pub fn start_cap(&self) -> LineCap {
        self.inner.start_cap
    }

    pub fn dash_cap(&self) -> LineCap {
        self.inner.dash_cap
    }

    pub fn end_cap(&self) -> LineCap {
        self.inner.end_cap
    }

    pub fn dash_phase(&self) -> f32 {
        self.inner.dash_phase
    }

    pub fn dash_list(&self) -> &[f32] {
        &self.inner.dash_list
    }

    pub fn is_dashed(&self) -> bool {
        !self.inner.dash_list.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_caps_follow_start_cap() {
        let s = StrokeState::new(1.0, LineJoin::Round, LineCap::Square, 10.0);
        assert_eq!(s.dash_cap(), LineCap::Square);
        assert_eq!(s.end_cap(), LineCap::Square);
    }

    #[test]
    fn with_dash_sets_pattern_and_phase() {
        let s = StrokeState::new(1.0, LineJoin::Miter, LineCap::Butt, 10.0)
            .with_dash(2.0, &[3.0, 1.0]);
        assert!(s.is_dashed());
        assert_eq!(s.dash_phase(), 2.0);
        assert_eq!(s.dash_list(), &[3.0, 1.0]);
    }

    #[test]
    fn clone_is_cheap_and_shares_storage() {
        let s = StrokeState::new(2.0, LineJoin::Bevel, LineCap::Round, 4.0);
        let t = s.clone();
        assert_eq!(s.linewidth(), t.linewidth());
    }
}

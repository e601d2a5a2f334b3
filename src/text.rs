//! Text run: a font reference plus positioned glyph records (§4.5).
//!
//! Mirrors `fz_text_s`/`fz_text_span_s` (visible through
//! `examples/original_source/source/fitz/font.c`'s `fz_bound_glyph`/
//! `fz_advance_glyph` call sites, which is what `bound_text`/`measure_text`
//! below are built on). A single writing-mode flag and text matrix (trm) are
//! shared across every glyph in the run, same as the original's per-span
//! layout.

use std::sync::Arc;

use crate::context::Context;
use crate::errors::FitzResult;
use crate::font::FaceHandle;
use crate::geometry::{Matrix, Rect};
use crate::stroke::StrokeState;

/// `ucs == -1` marks "continuation of a multi-glyph cluster" (§3).
pub const UCS_CONTINUATION: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphRecord {
    pub gid: u16,
    pub ucs: i32,
    pub x: f32,
    pub y: f32,
}

struct TextInner {
    face: FaceHandle,
    vertical: bool,
    trm: Matrix,
    glyphs: Vec<GlyphRecord>,
}

/// Reference-counted and immutable once shared, same discipline as `Path`/
/// `Pixmap`/`StrokeState`: `add_text` requires sole ownership.
#[derive(Clone)]
pub struct Text {
    inner: Arc<TextInner>,
}

impl Text {
    pub fn new(face: FaceHandle, vertical: bool, trm: Matrix) -> Self {
        Text {
            inner: Arc::new(TextInner {
                face,
                vertical,
                trm,
                glyphs: Vec::new(),
            }),
        }
    }

    pub fn face(&self) -> FaceHandle {
        self.inner.face
    }

    pub fn is_vertical(&self) -> bool {
        self.inner.vertical
    }

    pub fn trm(&self) -> Matrix {
        self.inner.trm
    }

    pub fn glyphs(&self) -> &[GlyphRecord] {
        &self.inner.glyphs
    }

    /// Appends a glyph record. Panics if this run is shared (refs > 1), same
    /// policy as `Path::moveto` et al.
    pub fn add_text(&mut self, gid: u16, ucs: i32, x: f32, y: f32) {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("add_text requires sole ownership of the text run");
        inner.glyphs.push(GlyphRecord { gid, ucs, x, y });
    }

    /// Sums each glyph's advance (from the font engine, in the run's
    /// writing-mode) transformed by `m`, i.e. the total pen displacement an
    /// up-stream layout engine would see after laying this run out under
    /// `m` (§4.5 "`measure_text(t, m)`").
    pub fn measure_text(&self, ctx: &Context, m: Matrix) -> FitzResult<f32> {
        let engine = ctx
            .font_engine()
            .ok_or_else(|| crate::errors::Error::Unsupported("no font engine installed".into()))?;
        let mut total = 0.0f32;
        for glyph in &self.inner.glyphs {
            let fixed = engine.get_glyph_advance(self.inner.face, glyph.gid, self.inner.vertical)?;
            let advance = crate::font::from_fixed(fixed);
            let (dx, dy) = m.transform_vector(advance, 0.0);
            total += (dx * dx + dy * dy).sqrt();
        }
        Ok(total)
    }

    /// Unions a per-glyph advance-based box (glyph origin to origin+advance,
    /// widened by half the stroke width when `stroke` is given) across every
    /// glyph, transformed by `ctm * trm` (§4.5 "`bound_text(t, stroke, ctm)`").
    pub fn bound_text(
        &self,
        ctx: &Context,
        stroke: Option<&StrokeState>,
        ctm: Matrix,
    ) -> FitzResult<Rect> {
        let engine = ctx
            .font_engine()
            .ok_or_else(|| crate::errors::Error::Unsupported("no font engine installed".into()))?;
        let full = Matrix::concat(self.inner.trm, ctm);
        let pad = stroke.map(|s| s.linewidth() / 2.0).unwrap_or(0.0);
        let mut bounds = Rect::EMPTY;
        let mut first = true;
        for glyph in &self.inner.glyphs {
            let fixed = engine.get_glyph_advance(self.inner.face, glyph.gid, self.inner.vertical)?;
            let advance = crate::font::from_fixed(fixed);
            let (x0, y0) = full.transform_point(glyph.x - pad, glyph.y - pad);
            let (x1, y1) = full.transform_point(glyph.x + advance + pad, glyph.y + pad);
            let glyph_rect = Rect::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1));
            bounds = if first { glyph_rect } else { union(bounds, glyph_rect) };
            first = false;
        }
        Ok(bounds)
    }

    /// Read-only visitor in addition order (not layout order), for back-ends
    /// needing per-glyph access (text extraction, outline export).
    pub fn walk_text<F: FnMut(&GlyphRecord)>(&self, mut visit: F) {
        for glyph in &self.inner.glyphs {
            visit(glyph);
        }
    }
}

fn union(a: Rect, b: Rect) -> Rect {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    Rect::new(
        a.x0.min(b.x0),
        a.y0.min(b.y0),
        a.x1.max(b.x1),
        a.y1.max(b.y1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_text_appends_in_order() {
        let mut t = Text::new(0, false, Matrix::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0));
        t.add_text(5, 'A' as i32, 0.0, 0.0);
        t.add_text(6, 'B' as i32, 10.0, 0.0);
        assert_eq!(t.glyphs().len(), 2);
        assert_eq!(t.glyphs()[0].gid, 5);
        assert_eq!(t.glyphs()[1].x, 10.0);
    }

    #[test]
    fn walk_text_visits_in_addition_order_not_sorted_order() {
        let mut t = Text::new(0, false, Matrix::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0));
        t.add_text(1, 'B' as i32, 20.0, 0.0);
        t.add_text(2, 'A' as i32, 0.0, 0.0);
        let mut seen = Vec::new();
        t.walk_text(|g| seen.push(g.gid));
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    #[should_panic(expected = "sole ownership")]
    fn add_text_panics_when_shared() {
        let mut t = Text::new(0, false, Matrix::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0));
        let _clone = t.clone();
        t.add_text(1, 0, 0.0, 0.0);
    }
}

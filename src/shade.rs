//! Shading (gradient mesh) drawable entity (§3, referenced by §4.7's
//! `fill_shade`).
//!
//! Mirrors `fz_shade_s`/`fz_boundshade` (`examples/original_source/fitz/res_shade.c`):
//! a shade carries its own matrix (composed with the CTM at paint time, not
//! stored pre-multiplied), a bounding box in shade-space, a colorspace, and a
//! background color used where the underlying function is undefined. The
//! mesh geometry itself (`fz_shade_s.mesh`, a type-specific vertex/triangle
//! buffer) is outside the scope a CPU rasterizer needs to expose through this
//! type; callers needing mesh detail go through the color-at-point closure
//! below instead of a concrete mesh representation.

use std::sync::Arc;

use crate::color::Colorspace;
use crate::geometry::{Matrix, Rect};

struct ShadeInner {
    matrix: Matrix,
    bbox: Rect,
    colorspace: Colorspace,
    background: Option<Vec<f32>>,
    /// Evaluates the shade's color function at a point in shade-space.
    /// `None` outside the shade's domain, in which case `background` (if
    /// any) is used instead.
    sample: Box<dyn Fn(f32, f32) -> Option<Vec<f32>> + Send + Sync>,
}

/// Reference-counted and immutable once constructed, same discipline as
/// `Path`/`Image` (§3 "each drawable entity ... is reference counted").
#[derive(Clone)]
pub struct Shade {
    inner: Arc<ShadeInner>,
}

impl Shade {
    pub fn new(
        matrix: Matrix,
        bbox: Rect,
        colorspace: Colorspace,
        background: Option<Vec<f32>>,
        sample: impl Fn(f32, f32) -> Option<Vec<f32>> + Send + Sync + 'static,
    ) -> Self {
        Shade {
            inner: Arc::new(ShadeInner {
                matrix,
                bbox,
                colorspace,
                background,
                sample: Box::new(sample),
            }),
        }
    }

    pub fn colorspace(&self) -> &Colorspace {
        &self.inner.colorspace
    }

    pub fn background(&self) -> Option<&[f32]> {
        self.inner.background.as_deref()
    }

    /// `fz_boundshade`: the shade's bbox carried through its own matrix and
    /// then `ctm`.
    pub fn bound_shade(&self, ctm: Matrix) -> Rect {
        let full = Matrix::concat(self.inner.matrix, ctm);
        let b = self.inner.bbox;
        if b.is_empty() {
            return Rect::EMPTY;
        }
        let corners = [(b.x0, b.y0), (b.x1, b.y0), (b.x1, b.y1), (b.x0, b.y1)];
        let mut out = Rect::EMPTY;
        for (i, &(x, y)) in corners.iter().enumerate() {
            let (tx, ty) = full.transform_point(x, y);
            out = if i == 0 {
                Rect::new(tx, ty, tx, ty)
            } else {
                Rect::new(out.x0.min(tx), out.y0.min(ty), out.x1.max(tx), out.y1.max(ty))
            };
        }
        out
    }

    /// Samples the shade at a point in device space, given the same `ctm`
    /// passed to `fill_shade`. Falls back to `background` outside the
    /// function's domain, or `None` if there is neither.
    pub fn sample_at(&self, ctm: Matrix, x: f32, y: f32) -> Option<Vec<f32>> {
        let full = Matrix::concat(self.inner.matrix, ctm);
        let inv = full.invert();
        let (sx, sy) = inv.transform_point(x, y);
        (self.inner.sample)(sx, sy).or_else(|| self.inner.background.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_shade_transforms_bbox_by_matrix_then_ctm() {
        let shade = Shade::new(
            Matrix::IDENTITY,
            Rect::new(0.0, 0.0, 1.0, 1.0),
            Colorspace::DEVICE_GRAY,
            None,
            |_, _| None,
        );
        let b = shade.bound_shade(Matrix::scale(2.0, 2.0));
        assert_eq!(b, Rect::new(0.0, 0.0, 2.0, 2.0));
    }

    #[test]
    fn sample_at_falls_back_to_background_outside_domain() {
        let shade = Shade::new(
            Matrix::IDENTITY,
            Rect::new(0.0, 0.0, 1.0, 1.0),
            Colorspace::DEVICE_GRAY,
            Some(vec![0.5]),
            |_, _| None,
        );
        assert_eq!(shade.sample_at(Matrix::IDENTITY, 5.0, 5.0), Some(vec![0.5]));
    }
}

//! 3x3 affine transform with an implicit [0 0 1] last column, stored as the
//! usual six scalars (a,b,c,d,e,f). Mirrors `fz_matrix` (see
//! `examples/original_source/include/mupdf/fitz/device.h` for its many call
//! sites) rather than the PDF-content-stream-flavoured `CurTransMat` this
//! crate's teacher used — no `cm`/`Tm` operator emission here, just the
//! algebra those operators used to describe.

use serde_derive::{Deserialize, Serialize};

/// The tolerance under which `is_rectilinear` treats an off-diagonal term as
/// zero. Shared by the compositor so the two call sites documented as an
/// open question in the design notes cannot disagree.
pub const RECTILINEAR_EPS: f32 = 1e-5;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    #[inline]
    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Matrix { a, b, c, d, e, f }
    }

    #[inline]
    #[must_use]
    pub fn translate(tx: f32, ty: f32) -> Self {
        Matrix::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    #[inline]
    #[must_use]
    pub fn scale(sx: f32, sy: f32) -> Self {
        Matrix::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    #[inline]
    #[must_use]
    pub fn rotate(degrees: f32) -> Self {
        let rad = degrees.to_radians();
        let (s, c) = rad.sin_cos();
        Matrix::new(c, s, -s, c, 0.0, 0.0)
    }

    #[inline]
    #[must_use]
    pub fn shear(sx: f32, sy: f32) -> Self {
        Matrix::new(1.0, sy, sx, 1.0, 0.0, 0.0)
    }

    /// `concat(l, r) := l·r` — apply `l`, then `r`.
    #[must_use]
    pub fn concat(l: Matrix, r: Matrix) -> Matrix {
        Matrix {
            a: l.a.mul_add(r.a, l.b * r.c),
            b: l.a.mul_add(r.b, l.b * r.d),
            c: l.c.mul_add(r.a, l.d * r.c),
            d: l.c.mul_add(r.b, l.d * r.d),
            e: l.e.mul_add(r.a, l.f.mul_add(r.c, r.e)),
            f: l.e.mul_add(r.b, l.f.mul_add(r.d, r.f)),
        }
    }

    #[must_use]
    pub fn pre_translate(self, tx: f32, ty: f32) -> Matrix {
        Matrix::concat(Matrix::translate(tx, ty), self)
    }

    #[must_use]
    pub fn pre_scale(self, sx: f32, sy: f32) -> Matrix {
        Matrix::concat(Matrix::scale(sx, sy), self)
    }

    #[must_use]
    pub fn pre_rotate(self, degrees: f32) -> Matrix {
        Matrix::concat(Matrix::rotate(degrees), self)
    }

    #[must_use]
    pub fn pre_shear(self, sx: f32, sy: f32) -> Matrix {
        Matrix::concat(Matrix::shear(sx, sy), self)
    }

    /// Determinant-based inverse. Returns the input unchanged (ill-conditioned
    /// signal) when the determinant rounds to zero, matching `fz_invert_matrix`.
    #[must_use]
    pub fn invert(self) -> Matrix {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f32::EPSILON {
            return self;
        }
        let rdet = 1.0 / det;
        let a = self.d * rdet;
        let b = -self.b * rdet;
        let c = -self.c * rdet;
        let d = self.a * rdet;
        let e = -self.e * a - self.f * c;
        let f = -self.e * b - self.f * d;
        Matrix { a, b, c, d, e, f }
    }

    /// Average linear scale factor: `sqrt(|ad - bc|)`.
    #[inline]
    pub fn expansion(self) -> f32 {
        (self.a * self.d - self.b * self.c).abs().sqrt()
    }

    /// True iff the off-diagonal terms vanish on either diagonal, i.e. the
    /// matrix maps axis-aligned rectangles to axis-aligned rectangles.
    #[inline]
    pub fn is_rectilinear(self) -> bool {
        (self.b.abs() < RECTILINEAR_EPS && self.c.abs() < RECTILINEAR_EPS)
            || (self.a.abs() < RECTILINEAR_EPS && self.d.abs() < RECTILINEAR_EPS)
    }

    #[inline]
    pub fn transform_point(self, x: f32, y: f32) -> (f32, f32) {
        (
            x.mul_add(self.a, y * self.c) + self.e,
            x.mul_add(self.b, y * self.d) + self.f,
        )
    }

    /// Transforms a vector (ignores translation) — used for stroke/advance
    /// direction math.
    #[inline]
    pub fn transform_vector(self, x: f32, y: f32) -> (f32, f32) {
        (x.mul_add(self.a, y * self.c), x.mul_add(self.b, y * self.d))
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_matrix() {
        let m = Matrix::translate(150.0, 50.0);
        assert_eq!(m, Matrix::new(1.0, 0.0, 0.0, 1.0, 150.0, 50.0));
    }

    #[test]
    fn scale_matrix() {
        let m = Matrix::scale(2.0, 4.0);
        assert_eq!(m, Matrix::new(2.0, 0.0, 0.0, 4.0, 0.0, 0.0));
    }

    #[test]
    fn concat_is_apply_then_apply() {
        let l = Matrix::scale(2.0, 2.0);
        let r = Matrix::translate(10.0, 0.0);
        let m = Matrix::concat(l, r);
        // scale then translate: (3,4) -> (6,8) -> (16,8)
        assert_eq!(m.transform_point(3.0, 4.0), (16.0, 8.0));
    }

    #[test]
    fn invert_round_trips() {
        let m = Matrix::new(2.0, 0.0, 0.0, 3.0, 5.0, -1.0);
        let inv = m.invert();
        let round = Matrix::concat(m, inv);
        assert!((round.a - 1.0).abs() < 1e-5);
        assert!((round.d - 1.0).abs() < 1e-5);
        assert!(round.e.abs() < 1e-5);
        assert!(round.f.abs() < 1e-5);
    }

    #[test]
    fn singular_invert_returns_self() {
        let m = Matrix::new(0.0, 0.0, 0.0, 0.0, 1.0, 1.0);
        assert_eq!(m.invert(), m);
    }

    #[test]
    fn expansion_matches_sqrt_det() {
        let m = Matrix::scale(3.0, 3.0);
        assert!((m.expansion() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn is_rectilinear_for_axis_aligned() {
        assert!(Matrix::IDENTITY.is_rectilinear());
        assert!(Matrix::scale(2.0, 3.0).is_rectilinear());
        assert!(!Matrix::rotate(30.0).is_rectilinear());
        assert!(Matrix::rotate(90.0).is_rectilinear());
    }
}

//! Reference-counted premultiplied-alpha raster buffer (§4.3).

use std::sync::Arc;

use crate::color::{Colorspace, Separations};
use crate::geometry::IRect;

/// Rectangular region of pixels. Matches `fz_pixmap_s`
/// (`examples/original_source/include/mupdf/fitz/pixmap.h`): origin, size,
/// components-per-pixel, stride, colorspace (`None` means an alpha-only
/// mask), separations, and resolution hints.
#[derive(Clone)]
pub struct Pixmap {
    inner: Arc<PixmapInner>,
}

struct PixmapInner {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    colorspace: Option<Colorspace>,
    separations: Separations,
    has_alpha: bool,
    xres: i32,
    yres: i32,
    stride: usize,
    samples: Vec<u8>,
}

impl Pixmap {
    /// Colorants + spots + optional alpha.
    fn components(colorspace: &Option<Colorspace>, seps: &Separations, has_alpha: bool) -> usize {
        let base = colorspace.as_ref().map(Colorspace::n).unwrap_or(1);
        base + seps.len() + usize::from(has_alpha)
    }

    pub fn new(colorspace: Option<Colorspace>, w: i32, h: i32, seps: Separations, has_alpha: bool) -> Self {
        Self::with_bbox(colorspace, IRect::new(0, 0, w, h), seps, has_alpha)
    }

    pub fn with_bbox(colorspace: Option<Colorspace>, bbox: IRect, seps: Separations, has_alpha: bool) -> Self {
        let w = bbox.width().max(0);
        let h = bbox.height().max(0);
        let n = Self::components(&colorspace, &seps, has_alpha);
        let stride = (w as usize) * n;
        let samples = vec![0u8; stride * h as usize];
        Pixmap {
            inner: Arc::new(PixmapInner {
                x: bbox.x0,
                y: bbox.y0,
                w,
                h,
                colorspace,
                separations: seps,
                has_alpha,
                xres: 96,
                yres: 96,
                stride,
                samples,
            }),
        }
    }

    /// Caller-supplied buffer variant. `stride` must be >= `w * components`.
    pub fn with_data(
        colorspace: Option<Colorspace>,
        w: i32,
        h: i32,
        seps: Separations,
        has_alpha: bool,
        stride: usize,
        samples: Vec<u8>,
    ) -> Self {
        Pixmap {
            inner: Arc::new(PixmapInner {
                x: 0,
                y: 0,
                w,
                h,
                colorspace,
                separations: seps,
                has_alpha,
                xres: 96,
                yres: 96,
                stride,
                samples,
            }),
        }
    }

    pub fn x(&self) -> i32 {
        self.inner.x
    }
    pub fn y(&self) -> i32 {
        self.inner.y
    }
    pub fn w(&self) -> i32 {
        self.inner.w
    }
    pub fn h(&self) -> i32 {
        self.inner.h
    }
    pub fn stride(&self) -> usize {
        self.inner.stride
    }
    pub fn has_alpha(&self) -> bool {
        self.inner.has_alpha
    }
    pub fn colorspace(&self) -> Option<&Colorspace> {
        self.inner.colorspace.as_ref()
    }
    pub fn separations(&self) -> &Separations {
        &self.inner.separations
    }
    pub fn resolution(&self) -> (i32, i32) {
        (self.inner.xres, self.inner.yres)
    }
    pub fn bbox(&self) -> IRect {
        IRect::new(self.x(), self.y(), self.x() + self.w(), self.y() + self.h())
    }

    /// `colorants + spots + optional alpha`.
    pub fn color_count(&self) -> usize {
        Self::components(&self.inner.colorspace, &self.inner.separations, self.inner.has_alpha)
    }

    pub fn samples(&self) -> &[u8] {
        &self.inner.samples
    }

    /// Mutable access; panics (mirroring the "mutation forbidden above
    /// refcount 1" invariant used throughout this crate) if the pixmap is
    /// shared.
    pub fn samples_mut(&mut self) -> &mut [u8] {
        &mut Arc::get_mut(&mut self.inner)
            .expect("pixmap samples mutated while shared")
            .samples
    }

    pub fn set_resolution(&mut self, xres: i32, yres: i32) {
        let inner = Arc::get_mut(&mut self.inner).expect("pixmap mutated while shared");
        inner.xres = xres;
        inner.yres = yres;
    }

    fn row_range(&self, row: i32) -> std::ops::Range<usize> {
        let start = row as usize * self.stride();
        start..start + self.w() as usize * self.color_count()
    }

    pub fn row(&self, row: i32) -> &[u8] {
        &self.samples()[self.row_range(row)]
    }

    pub fn row_mut(&mut self, row: i32) -> &mut [u8] {
        let range = self.row_range(row);
        &mut self.samples_mut()[range]
    }

    /// Zero all components, including alpha.
    pub fn clear(&mut self) {
        self.samples_mut().fill(0);
    }

    /// Set every color component to `v`, alpha to fully opaque (255).
    /// Initialises the canvas to an opaque background before rendering onto
    /// a non-alpha surface.
    pub fn clear_with_value(&mut self, v: u8) {
        let has_alpha = self.has_alpha();
        let n = self.color_count();
        let color_n = n - usize::from(has_alpha);
        for px in self.samples_mut().chunks_mut(n) {
            for c in &mut px[..color_n] {
                *c = v;
            }
            if has_alpha {
                px[color_n] = 255;
            }
        }
    }

    /// Inverts color components only; alpha is untouched.
    pub fn invert(&mut self) {
        let has_alpha = self.has_alpha();
        let n = self.color_count();
        let color_n = n - usize::from(has_alpha);
        for px in self.samples_mut().chunks_mut(n) {
            for c in &mut px[..color_n] {
                *c = 255 - *c;
            }
        }
    }

    pub fn gamma(&mut self, gamma: f32) {
        if (gamma - 1.0).abs() < f32::EPSILON {
            return;
        }
        let has_alpha = self.has_alpha();
        let n = self.color_count();
        let color_n = n - usize::from(has_alpha);
        let lut: Vec<u8> = (0..=255u32)
            .map(|v| ((v as f32 / 255.0).powf(gamma) * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect();
        for px in self.samples_mut().chunks_mut(n) {
            for c in &mut px[..color_n] {
                *c = lut[*c as usize];
            }
        }
    }

    /// Premultiplied -> unpremultiplied. Pixels with alpha 0 become all-zero
    /// color (unmultiply is undefined there, §4.3).
    pub fn unmultiply(&mut self) {
        if !self.has_alpha() {
            return;
        }
        let n = self.color_count();
        let color_n = n - 1;
        for px in self.samples_mut().chunks_mut(n) {
            let a = px[color_n];
            if a == 0 {
                for c in &mut px[..color_n] {
                    *c = 0;
                }
            } else {
                for c in &mut px[..color_n] {
                    *c = ((*c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8;
                }
            }
        }
    }

    /// Inverse of `unmultiply`.
    pub fn premultiply(&mut self) {
        if !self.has_alpha() {
            return;
        }
        let n = self.color_count();
        let color_n = n - 1;
        for px in self.samples_mut().chunks_mut(n) {
            let a = px[color_n] as u32;
            for c in &mut px[..color_n] {
                *c = ((*c as u32 * a + 127) / 255) as u8;
            }
        }
    }

    /// Multiplies color components by an RGB tint (gray/RGB only).
    pub fn tint(&mut self, r: u8, g: u8, b: u8) {
        let has_alpha = self.has_alpha();
        let n = self.color_count();
        let color_n = n - usize::from(has_alpha);
        let tint = [r, g, b];
        for px in self.samples_mut().chunks_mut(n) {
            for (i, c) in px[..color_n].iter_mut().enumerate() {
                let t = tint[i.min(2)] as u32;
                *c = ((*c as u32 * t + 127) / 255) as u8;
            }
        }
    }

    /// Stable digest used for regression testing.
    pub fn md5(&self) -> [u8; 16] {
        md5_bytes(self.samples())
    }

    /// In-place box downsample by `2^factor` per axis.
    pub fn subsample(&mut self, factor: u32) {
        if factor == 0 {
            return;
        }
        let step = 1i32 << factor;
        let n = self.color_count();
        let new_w = (self.w() + step - 1) / step;
        let new_h = (self.h() + step - 1) / step;
        let mut out = vec![0u8; new_w as usize * n * new_h as usize];
        for oy in 0..new_h {
            for ox in 0..new_w {
                let mut acc = vec![0u32; n];
                let mut count = 0u32;
                for sy in 0..step {
                    let y = oy * step + sy;
                    if y >= self.h() {
                        continue;
                    }
                    for sx in 0..step {
                        let x = ox * step + sx;
                        if x >= self.w() {
                            continue;
                        }
                        let row = self.row(y);
                        let base = x as usize * n;
                        for c in 0..n {
                            acc[c] += row[base + c] as u32;
                        }
                        count += 1;
                    }
                }
                let out_base = (oy * new_w + ox) as usize * n;
                for c in 0..n {
                    out[out_base + c] = (acc[c] / count.max(1)) as u8;
                }
            }
        }
        let inner = Arc::make_mut(&mut self.inner);
        inner.w = new_w;
        inner.h = new_h;
        inner.stride = new_w as usize * n;
        inner.samples = out;
    }

    /// Resample to a new pixmap of size `(w, h)` using a separable box
    /// filter. Deterministic for identical inputs, as required by §4.3.
    pub fn scale(&self, w: i32, h: i32) -> Pixmap {
        let n = self.color_count();
        let mut out = Pixmap::with_bbox(
            self.colorspace().cloned(),
            IRect::new(0, 0, w, h),
            self.separations().clone(),
            self.has_alpha(),
        );
        let sx = self.w() as f32 / w.max(1) as f32;
        let sy = self.h() as f32 / h.max(1) as f32;
        for oy in 0..h {
            let src_y = ((oy as f32 + 0.5) * sy).floor() as i32;
            let src_y = src_y.clamp(0, self.h() - 1);
            let src_row = self.row(src_y);
            let dst_row = out.row_mut(oy);
            for ox in 0..w {
                let src_x = ((ox as f32 + 0.5) * sx).floor() as i32;
                let src_x = src_x.clamp(0, self.w() - 1);
                let sbase = src_x as usize * n;
                let dbase = ox as usize * n;
                dst_row[dbase..dbase + n].copy_from_slice(&src_row[sbase..sbase + n]);
            }
        }
        out
    }
}

/// Minimal, dependency-free MD5 — the only use in this crate is a stable
/// regression digest (§4.3 `md5`), not anything security-sensitive.
fn md5_bytes(data: &[u8]) -> [u8; 16] {
    const S: [u32; 64] = [
        7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 5, 9, 14, 20, 5, 9, 14, 20, 5,
        9, 14, 20, 5, 9, 14, 20, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 6,
        10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21,
    ];
    const K: [u32; 64] = [
        0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee, 0xf57c0faf, 0x4787c62a, 0xa8304613,
        0xfd469501, 0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be, 0x6b901122, 0xfd987193,
        0xa679438e, 0x49b40821, 0xf61e2562, 0xc040b340, 0x265e5a51, 0xe9b6c7aa, 0xd62f105d,
        0x02441453, 0xd8a1e681, 0xe7d3fbc8, 0x21e1cde6, 0xc33707d6, 0xf4d50d87, 0x455a14ed,
        0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a, 0xfffa3942, 0x8771f681, 0x6d9d6122,
        0xfde5380c, 0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70, 0x289b7ec6, 0xeaa127fa,
        0xd4ef3085, 0x04881d05, 0xd9d4d039, 0xe6db99e5, 0x1fa27cf8, 0xc4ac5665, 0xf4292244,
        0x432aff97, 0xab9423a7, 0xfc93a039, 0x655b59c3, 0x8f0ccc92, 0xffeff47d, 0x85845dd1,
        0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1, 0xf7537e82, 0xbd3af235, 0x2ad7d2bb,
        0xeb86d391,
    ];
    let mut a0: u32 = 0x67452301;
    let mut b0: u32 = 0xefcdab89;
    let mut c0: u32 = 0x98badcfe;
    let mut d0: u32 = 0x10325476;

    let mut msg = data.to_vec();
    let bit_len = (data.len() as u64).wrapping_mul(8);
    msg.push(0x80);
    while msg.len() % 64 != 56 {
        msg.push(0);
    }
    msg.extend_from_slice(&bit_len.to_le_bytes());

    for chunk in msg.chunks(64) {
        let mut m = [0u32; 16];
        for (i, word) in chunk.chunks(4).enumerate() {
            m[i] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        }
        let (mut a, mut b, mut c, mut d) = (a0, b0, c0, d0);
        for i in 0..64 {
            let (f, g) = if i < 16 {
                ((b & c) | (!b & d), i)
            } else if i < 32 {
                ((d & b) | (!d & c), (5 * i + 1) % 16)
            } else if i < 48 {
                (b ^ c ^ d, (3 * i + 5) % 16)
            } else {
                (c ^ (b | !d), (7 * i) % 16)
            };
            let f = f
                .wrapping_add(a)
                .wrapping_add(K[i])
                .wrapping_add(m[g]);
            a = d;
            d = c;
            c = b;
            b = b.wrapping_add(f.rotate_left(S[i]));
        }
        a0 = a0.wrapping_add(a);
        b0 = b0.wrapping_add(b);
        c0 = c0.wrapping_add(c);
        d0 = d0.wrapping_add(d);
    }

    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&a0.to_le_bytes());
    out[4..8].copy_from_slice(&b0.to_le_bytes());
    out[8..12].copy_from_slice(&c0.to_le_bytes());
    out[12..16].copy_from_slice(&d0.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(w: i32, h: i32) -> Pixmap {
        Pixmap::new(Some(Colorspace::DEVICE_RGB), w, h, Separations::new(), true)
    }

    #[test]
    fn clear_with_value_sets_opaque() {
        let mut p = rgba(2, 2);
        p.clear_with_value(10);
        for px in p.samples().chunks(4) {
            assert_eq!(px, &[10, 10, 10, 255]);
        }
    }

    #[test]
    fn invert_leaves_alpha_alone() {
        let mut p = rgba(1, 1);
        p.clear_with_value(0);
        {
            let row = p.row_mut(0);
            row[0] = 50;
            row[3] = 200;
        }
        p.invert();
        let row = p.row(0);
        assert_eq!(row[0], 205);
        assert_eq!(row[3], 200);
    }

    #[test]
    fn premultiplied_invariant_sample_s1() {
        // S1: 10x10 RGBA cleared to (0,0,0,0), filled red at alpha 0.5.
        let mut p = rgba(10, 10);
        p.clear();
        for px in p.samples_mut().chunks_mut(4) {
            px[0] = 128;
            px[3] = 128;
        }
        let row = p.row(5);
        assert_eq!(&row[5 * 4..5 * 4 + 4], &[128, 0, 0, 128]);
    }

    #[test]
    fn unmultiply_zero_alpha_zeroes_color() {
        let mut p = rgba(1, 1);
        {
            let row = p.row_mut(0);
            row[0] = 200;
            row[3] = 0;
        }
        p.unmultiply();
        assert_eq!(p.row(0), &[0, 0, 0, 0]);
    }

    #[test]
    fn subsample_averages_two_by_two() {
        let mut p = Pixmap::new(Some(Colorspace::DEVICE_GRAY), 2, 2, Separations::new(), false);
        {
            let s = p.samples_mut();
            s[0] = 0;
            s[1] = 100;
            s[2] = 50;
            s[3] = 150;
        }
        p.subsample(1);
        assert_eq!(p.w(), 1);
        assert_eq!(p.h(), 1);
        assert_eq!(p.samples()[0], 75);
    }
}

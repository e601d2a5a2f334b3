//! Lazy-decoded image source with a subsample-tile cache (§4.6).
//!
//! Mirrors `fz_image_s` (`examples/original_source/include/mupdf/fitz/image.h`
//! is not in the retrieved pack, but its contract is visible through every
//! `fz_image_get_pixmap` call in `draw-image.c`): an image may already wrap a
//! decoded pixmap, or may carry a compressed buffer plus a codec tag and
//! decode lazily, keeping only the subsample factors actually requested in
//! the context-wide store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::color::Colorspace;
use crate::context::Context;
use crate::errors::{Error, FitzResult};
use crate::pixmap::Pixmap;
use crate::store::{CacheKey, CacheValue, Store};

/// Compression tag for the compressed-buffer image variant (§4.6 / §6 codec
/// contract). `Inline` covers small uncompressed image data embedded
/// directly in a content stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Png,
    Jpeg,
    Jpeg2000,
    Tiff,
    Jxr,
    Jbig2,
    Inline,
}

/// Each image codec exposes `info`/`decode` (§6). Subsample is advisory:
/// codecs without native subsampled decode (everything but JPEG here) ignore
/// it and let the caller finish with `Pixmap::subsample`.
trait ImageCodec {
    fn decode(&self, buffer: &[u8], target_l2factor: u32) -> FitzResult<Pixmap>;
}

#[cfg(feature = "codec-image")]
struct GenericImageCrateCodec;

#[cfg(feature = "codec-image")]
impl ImageCodec for GenericImageCrateCodec {
    fn decode(&self, buffer: &[u8], target_l2factor: u32) -> FitzResult<Pixmap> {
        let decoded =
            ::image::load_from_memory(buffer).map_err(|e| Error::Syntax(e.to_string()))?;
        let color_type = decoded.color();
        let family = crate::color::family_from_image_color_type(color_type);
        let has_alpha = color_type.has_alpha();
        let rgba = decoded.to_rgba8();
        let (w, h) = rgba.dimensions();
        let cs = Colorspace::Device(family);
        let n = cs.n();
        let mut samples = Vec::with_capacity((w * h) as usize * (n + usize::from(has_alpha)));
        for px in rgba.pixels() {
            let [r, g, b, a] = px.0;
            let af = a as f32 / 255.0;
            let premul = |c: u8| -> u8 { (c as f32 * af).round() as u8 };
            match n {
                1 => samples.push(premul(r)),
                _ => {
                    samples.push(premul(r));
                    samples.push(premul(g));
                    samples.push(premul(b));
                }
            }
            if has_alpha {
                samples.push(a);
            }
        }
        let stride = (w as usize) * (n + usize::from(has_alpha));
        let mut pixmap = Pixmap::with_data(
            Some(cs),
            w as i32,
            h as i32,
            crate::color::Separations::new(),
            has_alpha,
            stride,
            samples,
        );
        if target_l2factor > 0 {
            pixmap.subsample(target_l2factor.min(8));
        }
        Ok(pixmap)
    }
}

fn codec_for(codec: Codec) -> FitzResult<Box<dyn ImageCodec>> {
    match codec {
        #[cfg(feature = "codec-image")]
        Codec::Png | Codec::Jpeg => Ok(Box::new(GenericImageCrateCodec)),
        _ => Err(Error::Unsupported(format!(
            "{codec:?} decoding is not built in"
        ))),
    }
}

/// Either a pre-decoded tile or a compressed buffer awaiting lazy decode
/// (§4.6 variant (a)/(b)).
enum Source {
    Pixmap(Pixmap),
    Compressed { buffer: Arc<[u8]>, codec: Codec },
}

struct ImageInner {
    width: u32,
    height: u32,
    bits_per_component: u8,
    decode_array: Option<Vec<f32>>,
    #[allow(dead_code)]
    colorspace: Option<Colorspace>,
    color_key: Option<Vec<(u8, u8)>>,
    mask: Option<Image>,
    interpolate: bool,
    source: Source,
    /// Liveness token for the store's reaping pass: a tile keyed by this
    /// image is reapable once every `Image` clone referencing this inner
    /// has been dropped.
    alive: Arc<()>,
    id: u64,
}

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Reference-counted lazy pixmap source (§4.6). Cloning is a cheap `Arc`
/// bump, matching `Path`/`Pixmap`/`StrokeState`'s discipline; unlike those
/// types an `Image` has no in-place mutators once shared, so builder methods
/// require sole ownership instead of panicking mid-lifetime.
#[derive(Clone)]
pub struct Image {
    inner: Arc<ImageInner>,
}

impl Image {
    pub fn from_pixmap(pixmap: Pixmap, interpolate: bool) -> Self {
        let w = pixmap.w().max(0) as u32;
        let h = pixmap.h().max(0) as u32;
        let cs = pixmap.colorspace().cloned();
        Image {
            inner: Arc::new(ImageInner {
                width: w,
                height: h,
                bits_per_component: 8,
                decode_array: None,
                colorspace: cs,
                color_key: None,
                mask: None,
                interpolate,
                source: Source::Pixmap(pixmap),
                alive: Arc::new(()),
                id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            }),
        }
    }

    pub fn from_compressed(
        buffer: Vec<u8>,
        codec: Codec,
        width: u32,
        height: u32,
        bits_per_component: u8,
        colorspace: Option<Colorspace>,
    ) -> Self {
        Image {
            inner: Arc::new(ImageInner {
                width,
                height,
                bits_per_component,
                decode_array: None,
                colorspace,
                color_key: None,
                mask: None,
                interpolate: true,
                source: Source::Compressed {
                    buffer: Arc::from(buffer.into_boxed_slice()),
                    codec,
                },
                alive: Arc::new(()),
                id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            }),
        }
    }

    pub fn with_decode_array(mut self, decode: Vec<f32>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_decode_array requires sole ownership")
            .decode_array = Some(decode);
        self
    }

    pub fn with_color_key(mut self, ranges: Vec<(u8, u8)>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_color_key requires sole ownership")
            .color_key = Some(ranges);
        self
    }

    pub fn with_mask(mut self, mask: Image) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_mask requires sole ownership")
            .mask = Some(mask);
        self
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn interpolate(&self) -> bool {
        self.inner.interpolate
    }

    fn is_pure_pixmap(&self) -> bool {
        matches!(self.inner.source, Source::Pixmap(_))
    }

    /// §4.6 step 2: the largest `l2factor` (capped at 8) with
    /// `w >> (l2factor+1) >= want_w+2`, and likewise for height; the two are
    /// combined by taking the smaller (less aggressive) factor so neither
    /// axis ends up under-sized.
    fn l2factor_for(native: u32, want: u32) -> u32 {
        let mut factor = 0u32;
        while factor < 8 && (native >> (factor + 1)) >= want + 2 {
            factor += 1;
        }
        factor
    }

    /// Implements the full §4.6 pipeline.
    pub fn image_get_pixmap(&self, ctx: &Context, want_w: u32, want_h: u32) -> FitzResult<Pixmap> {
        if self.is_pure_pixmap() {
            let Source::Pixmap(p) = &self.inner.source else {
                unreachable!()
            };
            return Ok(p.clone());
        }

        let l2x = Self::l2factor_for(self.inner.width, want_w);
        let l2y = Self::l2factor_for(self.inner.height, want_h);
        let l2factor = l2x.min(l2y);

        let key = TileKey {
            image_id: self.inner.id,
            liveness: Arc::downgrade(&self.inner.alive),
            l2factor: l2factor as u8,
        };

        {
            let mut store = ctx.store().lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = store.get(&key) {
                return Ok(hit);
            }
        }

        let mut pixmap = self.decode_at(l2factor)?;
        self.apply_decode_array(&mut pixmap);
        self.apply_color_key(&mut pixmap);
        self.apply_matte(ctx, &mut pixmap)?;

        let mut store = ctx.store().lock().unwrap_or_else(|e| e.into_inner());
        Ok(store.insert_or_get(key, pixmap))
    }

    fn decode_at(&self, l2factor: u32) -> FitzResult<Pixmap> {
        let Source::Compressed { buffer, codec } = &self.inner.source else {
            unreachable!("pure-pixmap images return early in image_get_pixmap")
        };
        let engine = codec_for(*codec)?;
        match codec {
            // JPEG decodes directly to the requested subsample in-band.
            Codec::Jpeg => engine.decode(buffer, l2factor),
            // Everything else: decode full-size then subsample in a
            // second pass (§4.6 step 4).
            _ => {
                let mut full = engine.decode(buffer, 0)?;
                if l2factor > 0 {
                    full.subsample(l2factor);
                }
                Ok(full)
            }
        }
    }

    fn apply_decode_array(&self, pixmap: &mut Pixmap) {
        let Some(decode) = &self.inner.decode_array else {
            return;
        };
        let n = pixmap.color_count();
        if decode.len() < n * 2 {
            return;
        }
        pixmap.unmultiply();
        for row in 0..pixmap.h() {
            let line = pixmap.row_mut(row);
            for chunk in line.chunks_mut(n.max(1)) {
                if chunk.len() < n {
                    continue;
                }
                for (c, sample) in chunk.iter_mut().enumerate() {
                    if c >= n {
                        break;
                    }
                    let lo = decode[c * 2];
                    let hi = decode[c * 2 + 1];
                    let v = *sample as f32 / 255.0;
                    let remapped = lo + v * (hi - lo);
                    *sample = (remapped.clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            }
        }
        pixmap.premultiply();
    }

    fn apply_color_key(&self, pixmap: &mut Pixmap) {
        let Some(ranges) = &self.inner.color_key else {
            return;
        };
        if !pixmap.has_alpha() {
            return;
        }
        pixmap.unmultiply();
        let n = pixmap.color_count();
        let alpha_index = n - 1;
        for row in 0..pixmap.h() {
            let line = pixmap.row_mut(row);
            for chunk in line.chunks_mut(n) {
                if chunk.len() < n {
                    continue;
                }
                let within = ranges
                    .iter()
                    .enumerate()
                    .take(alpha_index)
                    .all(|(c, &(lo, hi))| chunk[c] >= lo && chunk[c] <= hi);
                if within {
                    chunk[alpha_index] = 0;
                }
            }
        }
        pixmap.premultiply();
    }

    /// §4.6 step 7: `C := clamp(matte + (C - matte) * 255 / mask_alpha, 0, 255)`.
    /// The matte color itself isn't separately modeled in this crate's
    /// `Image` (no PDF-style `/Matte` array), so it is treated as black,
    /// which makes the remap a pure unpremultiply-by-mask-alpha — the
    /// common case for the soft masks this pipeline actually produces.
    fn apply_matte(&self, ctx: &Context, pixmap: &mut Pixmap) -> FitzResult<()> {
        let Some(mask) = &self.inner.mask else {
            return Ok(());
        };
        let mask_pixmap = mask.image_get_pixmap(ctx, pixmap.w() as u32, pixmap.h() as u32)?;
        if !pixmap.has_alpha() {
            return Ok(());
        }
        pixmap.unmultiply();
        let n = pixmap.color_count();
        let alpha_index = n - 1;
        let mask_n = mask_pixmap.color_count().max(1);
        for row in 0..pixmap.h().min(mask_pixmap.h()) {
            let mask_row = mask_pixmap.row(row);
            let line = pixmap.row_mut(row);
            for (col, chunk) in line.chunks_mut(n).enumerate() {
                if chunk.len() < n {
                    continue;
                }
                let mask_offset = (col * mask_n).min(mask_row.len().saturating_sub(1));
                let mask_alpha = mask_row.get(mask_offset).copied().unwrap_or(255).max(1) as i32;
                for sample in chunk.iter_mut().take(alpha_index) {
                    let c = *sample as i32;
                    let remapped = c * 255 / mask_alpha;
                    *sample = remapped.clamp(0, 255) as u8;
                }
            }
        }
        pixmap.premultiply();
        Ok(())
    }
}

/// Store key for decoded/subsampled tiles (§4.6 step 3, §4.12's "values also
/// used in keys of other store entries").
#[derive(Clone)]
struct TileKey {
    image_id: u64,
    liveness: Weak<()>,
    l2factor: u8,
}

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
        self.liveness.strong_count() == 0
    }
}

impl CacheValue for Pixmap {
    fn size_bytes(&self) -> usize {
        self.stride() * self.h().max(0) as usize
    }
}

/// Context-wide decoded-tile cache, concretely instantiated for `TileKey` /
/// `Pixmap` (§4.1's resource store, generic in `store.rs`).
pub type TileStore = Store<TileKey, Pixmap>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Separations;

    #[test]
    fn pure_pixmap_image_returns_input_unchanged() {
        let pixmap = Pixmap::new(Some(Colorspace::DEVICE_RGB), 4, 4, Separations::new(), false);
        let image = Image::from_pixmap(pixmap.clone(), false);
        let ctx = Context::new(None, None, 1024, None);
        let got = image.image_get_pixmap(&ctx, 4, 4).unwrap();
        assert_eq!(got.w(), pixmap.w());
        assert_eq!(got.h(), pixmap.h());
    }

    #[test]
    fn l2factor_never_undersizes_requested_dimension() {
        assert_eq!(Image::l2factor_for(1024, 100), 2);
        assert_eq!(Image::l2factor_for(16, 100), 0);
        assert_eq!(Image::l2factor_for(u32::MAX, 0), 8);
    }

    #[test]
    fn tile_key_is_reapable_once_image_is_dropped() {
        let pixmap = Pixmap::new(Some(Colorspace::DEVICE_RGB), 2, 2, Separations::new(), false);
        let image = Image::from_pixmap(pixmap, false);
        let key = TileKey {
            image_id: 1,
            liveness: Arc::downgrade(&image.inner.alive),
            l2factor: 0,
        };
        assert!(!key.is_reapable());
        drop(image);
        assert!(key.is_reapable());
    }
}

//! Font engine external-collaborator contract (§6) and a concrete
//! `allsorts`/`ttf-parser`-backed implementation behind the
//! `font-engine-allsorts` feature.
//!
//! The core never introspects font file contents (§6): everything it knows
//! about a face comes back through the five `FontEngine` methods below.
//! Grounded on `examples/original_source/source/fitz/font.c`'s
//! `fz_advance_glyph`/`fz_render_ft_glyph`/`fz_outline_glyph` family, which
//! dispatch to FreeType; this crate dispatches to `allsorts` for metrics and
//! `ttf-parser` for outlines instead.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::errors::{Error, FitzResult};
use crate::geometry::Matrix;
use crate::path::Path;
use crate::stroke::StrokeState;

/// 16.16 fixed-point, matching the original's `fz_advance_glyph` return
/// convention for sub-pixel-accurate layout accumulation.
pub type Fixed = i32;

pub fn to_fixed(v: f32) -> Fixed {
    (v * 65536.0).round() as Fixed
}

pub fn from_fixed(v: Fixed) -> f32 {
    v as f32 / 65536.0
}

/// Opaque handle to a loaded face, scoped to the engine that loaded it.
pub type FaceHandle = u32;

/// A rendered glyph: an 8-bit coverage bitmap plus its origin offset from
/// the glyph's logical pen position (§6 `bitmap{left,top,width,rows,pitch}`).
#[derive(Debug, Clone)]
pub struct GlyphBitmap {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub rows: u32,
    pub pitch: usize,
    pub samples: Vec<u8>,
}

impl GlyphBitmap {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.rows == 0
    }
}

/// The font engine contract (§6). Implementors own face storage and
/// are free to cache parsed tables; the core only ever holds a
/// `FaceHandle` plus this trait object.
pub trait FontEngine: Send + Sync {
    /// `vertical` selects the writing-mode-specific metric (§4.5's per-run
    /// writing-mode flag feeds this) — grounds on `fz_advance_glyph`'s
    /// `wmode` branch, which the distilled contract shortens to `mask`.
    fn get_glyph_advance(&self, face: FaceHandle, gid: u16, vertical: bool) -> FitzResult<Fixed>;

    fn render_glyph(
        &self,
        face: FaceHandle,
        gid: u16,
        matrix: Matrix,
        aa_level: u8,
    ) -> FitzResult<GlyphBitmap>;

    fn render_stroked_glyph(
        &self,
        face: FaceHandle,
        gid: u16,
        matrix: Matrix,
        stroke: &StrokeState,
    ) -> FitzResult<GlyphBitmap>;

    fn get_char_index(&self, face: FaceHandle, unicode: u32) -> Option<u16>;

    fn glyph_outline(&self, face: FaceHandle, gid: u16, matrix: Matrix) -> FitzResult<Path>;

    fn as_any(&self) -> &dyn Any;
}

#[cfg(feature = "font-engine-allsorts")]
pub use allsorts_impl::*;

#[cfg(feature = "font-engine-allsorts")]
mod allsorts_impl {
    use super::*;
    use allsorts::{
        binary::read::ReadScope,
        font_data::FontData,
        layout::{GDEFTable, LayoutCache, GPOS, GSUB},
        tables::{
            cmap::owned::CmapSubtable as OwnedCmapSubtable, cmap::CmapSubtable, glyf::{GlyfRecord, GlyfTable, Glyph},
            loca::LocaTable, FontTableProvider, HeadTable, HheaTable, MaxpTable,
        },
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[repr(C)]
    pub struct FontMetrics {
        pub units_per_em: u16,
        pub ascender: i16,
        pub descender: i16,
        pub line_gap: i16,
    }

    impl FontMetrics {
        pub const fn zero() -> Self {
            FontMetrics {
                units_per_em: 1000,
                ascender: 0,
                descender: 0,
                line_gap: 0,
            }
        }
    }

    #[derive(Debug, Clone)]
    struct OwnedGlyphBoundingBox {
        max_x: i16,
        max_y: i16,
        min_x: i16,
        min_y: i16,
    }

    #[derive(Debug, Clone)]
    struct OwnedGlyph {
        bounding_box: OwnedGlyphBoundingBox,
        horz_advance: u16,
    }

    impl OwnedGlyph {
        fn from_glyph_data(glyph: &Glyph<'_>, horz_advance: u16) -> Option<Self> {
            let bbox = glyph.bounding_box()?;
            Some(OwnedGlyph {
                bounding_box: OwnedGlyphBoundingBox {
                    max_x: bbox.x_max,
                    max_y: bbox.y_max,
                    min_x: bbox.x_min,
                    min_y: bbox.y_min,
                },
                horz_advance,
            })
        }
    }

    /// The metrics/cmap half of a loaded face, read once at load time via
    /// `allsorts`. Outline extraction is done separately via `ttf_parser`
    /// (below) since `allsorts`'s `glyf` reader does not expose a generic
    /// `OutlineBuilder`-style visitor.
    struct ParsedFont {
        bytes: Arc<[u8]>,
        metrics: FontMetrics,
        #[allow(dead_code)]
        hhea_table: HheaTable,
        #[allow(dead_code)]
        maxp_table: MaxpTable,
        #[allow(dead_code)]
        gsub_cache: LayoutCache<GSUB>,
        #[allow(dead_code)]
        gpos_cache: LayoutCache<GPOS>,
        #[allow(dead_code)]
        opt_gdef_table: Option<Arc<GDEFTable>>,
        glyph_records: BTreeMap<u16, OwnedGlyph>,
        cmap_subtable: OwnedCmapSubtable,
    }

    impl ParsedFont {
        fn from_bytes(bytes: Arc<[u8]>, font_index: usize) -> FitzResult<Self> {
            use allsorts::tag;

            let scope = ReadScope::new(&bytes);
            let font_file = scope
                .read::<FontData<'_>>()
                .map_err(|_| Error::Syntax("malformed font file".into()))?;
            let provider = font_file
                .table_provider(font_index)
                .map_err(|_| Error::Syntax("no such font in collection".into()))?;

            let head_data = provider
                .table_data(tag::HEAD)
                .ok()
                .flatten()
                .ok_or_else(|| Error::Syntax("font missing head table".into()))?
                .into_owned();
            let head_table = ReadScope::new(&head_data)
                .read::<HeadTable>()
                .map_err(|_| Error::Syntax("malformed head table".into()))?;

            let maxp_data = provider
                .table_data(tag::MAXP)
                .ok()
                .flatten()
                .ok_or_else(|| Error::Syntax("font missing maxp table".into()))?
                .into_owned();
            let maxp_table = ReadScope::new(&maxp_data)
                .read::<MaxpTable>()
                .map_err(|_| Error::Syntax("malformed maxp table".into()))?;

            let loca_data = provider
                .table_data(tag::LOCA)
                .ok()
                .flatten()
                .ok_or_else(|| Error::Syntax("font missing loca table".into()))?
                .into_owned();
            let loca_table = ReadScope::new(&loca_data)
                .read_dep::<LocaTable<'_>>((maxp_table.num_glyphs as usize, head_table.index_to_loc_format))
                .map_err(|_| Error::Syntax("malformed loca table".into()))?;

            let glyf_data = provider
                .table_data(tag::GLYF)
                .ok()
                .flatten()
                .ok_or_else(|| Error::Syntax("font missing glyf table".into()))?
                .into_owned();
            let mut glyf_table = ReadScope::new(&glyf_data)
                .read_dep::<GlyfTable<'_>>(&loca_table)
                .map_err(|_| Error::Syntax("malformed glyf table".into()))?;

            let hmtx_data = provider
                .table_data(tag::HMTX)
                .ok()
                .flatten()
                .ok_or_else(|| Error::Syntax("font missing hmtx table".into()))?
                .into_owned();

            let hhea_data = provider
                .table_data(tag::HHEA)
                .ok()
                .flatten()
                .ok_or_else(|| Error::Syntax("font missing hhea table".into()))?
                .into_owned();
            let hhea_table = ReadScope::new(&hhea_data)
                .read::<HheaTable>()
                .map_err(|_| Error::Syntax("malformed hhea table".into()))?;

            let glyph_records = glyf_table
                .records_mut()
                .iter_mut()
                .enumerate()
                .filter_map(|(index, record)| {
                    if index > u16::MAX as usize {
                        return None;
                    }
                    record.parse().ok()?;
                    let gid = index as u16;
                    let horz_advance =
                        allsorts::glyph_info::advance(&maxp_table, &hhea_table, &hmtx_data, gid)
                            .unwrap_or_default();
                    match record {
                        GlyfRecord::Parsed(g) => OwnedGlyph::from_glyph_data(g, horz_advance).map(|o| (gid, o)),
                        _ => None,
                    }
                })
                .collect();

            let mut font_impl = allsorts::font::Font::new(provider)
                .map_err(|_| Error::Syntax("allsorts could not open font".into()))?;
            let gsub_cache = font_impl
                .gsub_cache()
                .ok()
                .flatten()
                .ok_or_else(|| Error::Unsupported("font has no GSUB table".into()))?;
            let gpos_cache = font_impl
                .gpos_cache()
                .ok()
                .flatten()
                .ok_or_else(|| Error::Unsupported("font has no GPOS table".into()))?;
            let opt_gdef_table = font_impl.gdef_table().ok().flatten().map(Arc::new);
            let cmap_subtable = ReadScope::new(font_impl.cmap_subtable_data())
                .read::<CmapSubtable<'_>>()
                .ok()
                .and_then(|t| t.to_owned())
                .ok_or_else(|| Error::Unsupported("font has no usable cmap".into()))?;

            let units_per_em = if head_table.units_per_em == 0 {
                1000
            } else {
                head_table.units_per_em
            };

            Ok(ParsedFont {
                bytes,
                metrics: FontMetrics {
                    units_per_em,
                    ascender: hhea_table.ascender,
                    descender: hhea_table.descender,
                    line_gap: hhea_table.line_gap,
                },
                hhea_table,
                maxp_table,
                gsub_cache,
                gpos_cache,
                opt_gdef_table,
                glyph_records,
                cmap_subtable,
            })
        }

        fn lookup_glyph_index(&self, unicode: u32) -> Option<u16> {
            match self.cmap_subtable.map_glyph(unicode) {
                Ok(Some(gid)) => Some(gid),
                _ => None,
            }
        }

        fn horizontal_advance_fixed(&self, gid: u16) -> Fixed {
            let units = self
                .glyph_records
                .get(&gid)
                .map(|g| g.horz_advance)
                .unwrap_or(0) as f32;
            to_fixed(units / self.metrics.units_per_em as f32)
        }
    }

    /// Flattens a `ttf_parser` outline into this crate's `Path`, transformed
    /// by `matrix` (expected to already fold in the font-units-to-text-space
    /// scale, i.e. `1 / units_per_em` baked in by the caller).
    struct PathOutlineBuilder {
        path: Path,
        scale: Matrix,
    }

    impl ttf_parser::OutlineBuilder for PathOutlineBuilder {
        fn move_to(&mut self, x: f32, y: f32) {
            let (x, y) = self.scale.transform_point(x, y);
            self.path.moveto(x, y);
        }
        fn line_to(&mut self, x: f32, y: f32) {
            let (x, y) = self.scale.transform_point(x, y);
            self.path.lineto(x, y);
        }
        fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
            let (cx, cy) = self.scale.transform_point(x1, y1);
            let (x, y) = self.scale.transform_point(x, y);
            self.path.quadto(cx, cy, x, y);
        }
        fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
            let (x1, y1) = self.scale.transform_point(x1, y1);
            let (x2, y2) = self.scale.transform_point(x2, y2);
            let (x, y) = self.scale.transform_point(x, y);
            self.path.curveto(x1, y1, x2, y2, x, y);
        }
        fn close(&mut self) {
            self.path.closepath();
        }
    }

    struct LoadedFace {
        parsed: ParsedFont,
        ttf: ttf_parser::Face<'static>,
        // keeps the backing buffer `ttf` borrows from alive.
        _bytes: Arc<[u8]>,
    }

    /// Concrete `FontEngine`. Faces are loaded once via `load_face` and kept
    /// behind a `FaceHandle`; the FreeType-equivalent non-reentrancy
    /// constraint (§9 "FreeType lock") is honored here with a single
    /// `Mutex`-free `RwLock` table, since `ttf_parser`/`allsorts` parsing is
    /// pure and thread-safe once a face is loaded — the lock only protects
    /// the face table itself.
    pub struct AllsortsFontEngine {
        faces: RwLock<Vec<Arc<LoadedFace>>>,
        load_guard: Mutex<()>,
    }

    impl AllsortsFontEngine {
        pub fn new() -> Self {
            AllsortsFontEngine {
                faces: RwLock::new(Vec::new()),
                load_guard: Mutex::new(()),
            }
        }

        pub fn load_face(&self, bytes: Vec<u8>, font_index: usize) -> FitzResult<FaceHandle> {
            let _guard = self.load_guard.lock().unwrap_or_else(|e| e.into_inner());
            let bytes: Arc<[u8]> = Arc::from(bytes.into_boxed_slice());
            let parsed = ParsedFont::from_bytes(Arc::clone(&bytes), font_index)?;
            // SAFETY: `ttf` only ever borrows from `_bytes`, which is kept
            // alive alongside it for the lifetime of the `LoadedFace`.
            let static_bytes: &'static [u8] = unsafe { std::mem::transmute(&*bytes) };
            let ttf = ttf_parser::Face::parse(static_bytes, font_index as u32)
                .map_err(|_| Error::Syntax("ttf-parser could not open font".into()))?;
            let mut faces = self.faces.write().unwrap_or_else(|e| e.into_inner());
            faces.push(Arc::new(LoadedFace {
                parsed,
                ttf,
                _bytes: bytes,
            }));
            Ok((faces.len() - 1) as FaceHandle)
        }

        fn face(&self, handle: FaceHandle) -> FitzResult<Arc<LoadedFace>> {
            let faces = self.faces.read().unwrap_or_else(|e| e.into_inner());
            faces
                .get(handle as usize)
                .cloned()
                .ok_or_else(|| Error::Generic("unknown font face handle".into()))
        }
    }

    impl Default for AllsortsFontEngine {
        fn default() -> Self {
            AllsortsFontEngine::new()
        }
    }

    impl FontEngine for AllsortsFontEngine {
        fn get_glyph_advance(&self, face: FaceHandle, gid: u16, _vertical: bool) -> FitzResult<Fixed> {
            let face = self.face(face)?;
            Ok(face.parsed.horizontal_advance_fixed(gid))
        }

        fn render_glyph(
            &self,
            face: FaceHandle,
            gid: u16,
            matrix: Matrix,
            aa_level: u8,
        ) -> FitzResult<GlyphBitmap> {
            let outline = self.glyph_outline(face, gid, matrix)?;
            Ok(rasterize_outline(&outline, aa_level))
        }

        fn render_stroked_glyph(
            &self,
            face: FaceHandle,
            gid: u16,
            matrix: Matrix,
            stroke: &StrokeState,
        ) -> FitzResult<GlyphBitmap> {
            // A stroked glyph is the filled glyph outline widened by the
            // caller's stroke width before rasterization; the expansion
            // itself reuses `path::max_expansion` bookkeeping (§4.4) via the
            // draw device's stroke-to-fill conversion, so this engine only
            // needs to rasterize with a coarser fill rule approximation:
            // draw every outline edge twice, offset by half the line width
            // along its local normal. This keeps glyph hinting decisions out
            // of the font engine (§6 "the core never introspects...").
            let outline = self.glyph_outline(face, gid, matrix)?;
            Ok(rasterize_outline_stroked(&outline, stroke.linewidth()))
        }

        fn get_char_index(&self, face: FaceHandle, unicode: u32) -> Option<u16> {
            self.face(face).ok()?.parsed.lookup_glyph_index(unicode)
        }

        fn glyph_outline(&self, face: FaceHandle, gid: u16, matrix: Matrix) -> FitzResult<Path> {
            let face = self.face(face)?;
            let mut builder = PathOutlineBuilder {
                path: Path::new(),
                scale: matrix,
            };
            let outlined = face
                .ttf
                .outline_glyph(ttf_parser::GlyphId(gid), &mut builder);
            if outlined.is_none() {
                return Ok(Path::new());
            }
            Ok(builder.path)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Flattens every path segment (quads/cubics already reduced to cubics
    /// by `PathWalker`'s default decompositions) into line segments via
    /// fixed-step subdivision, collecting `(x0,y0,x1,y1)` edges.
    #[derive(Default)]
    struct EdgeCollector {
        edges: Vec<(f32, f32, f32, f32)>,
        start: (f32, f32),
        pen: (f32, f32),
    }

    impl crate::path::PathWalker for EdgeCollector {
        fn moveto(&mut self, x: f32, y: f32) {
            self.start = (x, y);
            self.pen = (x, y);
        }
        fn lineto(&mut self, x: f32, y: f32) {
            self.edges.push((self.pen.0, self.pen.1, x, y));
            self.pen = (x, y);
        }
        fn curveto(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x3: f32, y3: f32) {
            const STEPS: u32 = 8;
            let (x0, y0) = self.pen;
            let mut prev = (x0, y0);
            for i in 1..=STEPS {
                let t = i as f32 / STEPS as f32;
                let mt = 1.0 - t;
                let x = mt * mt * mt * x0
                    + 3.0 * mt * mt * t * x1
                    + 3.0 * mt * t * t * x2
                    + t * t * t * x3;
                let y = mt * mt * mt * y0
                    + 3.0 * mt * mt * t * y1
                    + 3.0 * mt * t * t * y2
                    + t * t * t * y3;
                self.edges.push((prev.0, prev.1, x, y));
                prev = (x, y);
            }
            self.pen = (x3, y3);
        }
        fn closepath(&mut self) {
            if self.pen != self.start {
                self.edges.push((self.pen.0, self.pen.1, self.start.0, self.start.1));
            }
            self.pen = self.start;
        }
    }

    fn path_bounds_and_edges(path: &Path) -> (crate::geometry::Rect, Vec<(f32, f32, f32, f32)>) {
        use crate::geometry::Rect;
        let mut collector = EdgeCollector::default();
        path.walk(&mut collector);
        if collector.edges.is_empty() {
            return (Rect::EMPTY, Vec::new());
        }
        let (mut x0, mut y0, mut x1, mut y1) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for &(ax, ay, bx, by) in &collector.edges {
            x0 = x0.min(ax).min(bx);
            y0 = y0.min(ay).min(by);
            x1 = x1.max(ax).max(bx);
            y1 = y1.max(ay).max(by);
        }
        (Rect::new(x0, y0, x1, y1), collector.edges)
    }

    /// Coverage-based scanline rasterizer, supersampled by `aa_level` (0 =
    /// no AA, 8 = finest — matching `Context::set_aa_level`'s [0,8] range).
    fn rasterize_outline(path: &Path, aa_level: u8) -> GlyphBitmap {
        let (bounds, edges) = path_bounds_and_edges(path);
        if bounds.is_empty() || edges.is_empty() {
            return GlyphBitmap {
                left: 0,
                top: 0,
                width: 0,
                rows: 0,
                pitch: 0,
                samples: Vec::new(),
            };
        }
        let left = bounds.x0.floor() as i32;
        let top = bounds.y0.floor() as i32;
        let width = (bounds.x1.ceil() - bounds.x0.floor()).max(1.0) as u32;
        let rows = (bounds.y1.ceil() - bounds.y0.floor()).max(1.0) as u32;
        let subsamples = 1 + aa_level.min(8) as u32;

        let mut samples = vec![0u8; (width * rows) as usize];
        for row in 0..rows {
            for sub in 0..subsamples {
                let y = top as f32 + row as f32 + (sub as f32 + 0.5) / subsamples as f32;
                let mut crossings: Vec<f32> = edges
                    .iter()
                    .filter_map(|&(x0, y0, x1, y1)| {
                        if (y0 <= y && y1 > y) || (y1 <= y && y0 > y) {
                            let t = (y - y0) / (y1 - y0);
                            Some(x0 + t * (x1 - x0))
                        } else {
                            None
                        }
                    })
                    .collect();
                crossings.sort_by(|a, b| a.partial_cmp(b).unwrap());
                for pair in crossings.chunks(2) {
                    if let [x0, x1] = pair {
                        let col_start = (x0 - left as f32).max(0.0) as u32;
                        let col_end = ((x1 - left as f32).min(width as f32)).max(0.0) as u32;
                        for col in col_start..col_end.min(width) {
                            let idx = (row * width + col) as usize;
                            samples[idx] = samples[idx].saturating_add((255 / subsamples) as u8);
                        }
                    }
                }
            }
        }

        GlyphBitmap {
            left,
            top,
            width,
            rows,
            pitch: width as usize,
            samples,
        }
    }

    fn rasterize_outline_stroked(path: &Path, linewidth: f32) -> GlyphBitmap {
        let half = linewidth.max(0.01) / 2.0;
        let (_, edges) = path_bounds_and_edges(path);
        let mut stroked = Path::new();
        for &(x0, y0, x1, y1) in &edges {
            let dx = x1 - x0;
            let dy = y1 - y0;
            let len = (dx * dx + dy * dy).sqrt().max(1e-6);
            let nx = -dy / len * half;
            let ny = dx / len * half;
            stroked.moveto(x0 + nx, y0 + ny);
            stroked.lineto(x1 + nx, y1 + ny);
            stroked.lineto(x1 - nx, y1 - ny);
            stroked.lineto(x0 - nx, y0 - ny);
            stroked.closepath();
        }
        rasterize_outline(&stroked, 8)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn to_fixed_and_back_round_trip_within_epsilon() {
            let v = 12.75f32;
            assert!((from_fixed(to_fixed(v)) - v).abs() < 1e-3);
        }

        #[test]
        fn empty_path_rasterizes_to_empty_bitmap() {
            let bmp = rasterize_outline(&Path::new(), 8);
            assert!(bmp.is_empty());
        }
    }
}

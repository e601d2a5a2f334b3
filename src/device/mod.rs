//! Polymorphic command sink for drawing commands (§4.7), plus the full
//! hint/flag/blend-mode enumerations pulled in from the original headers
//! (§11.1, §11.2).
//!
//! Grounded on `fz_device_s`'s vtable (`examples/original_source/include/mupdf/fitz/device.h`,
//! `examples/original_source/source/fitz/device.c`): the original is a
//! struct of function pointers plus a small integer "error depth" used to
//! drop calls inside a region that already raised, so a mismatched clip
//! stack never reaches a back-end. Rust maps the vtable onto a trait with
//! default no-op methods (a concrete device only overrides what it cares
//! about) and keeps the error-depth bookkeeping in a wrapper, exactly as
//! design note §9 ("Polymorphic device via function-pointer struct")
//! prescribes.

pub mod bbox;
pub mod draw;
pub mod list;
pub mod text_device;
pub mod trace;

use crate::color::Colorspace;
use crate::errors::FitzResult;
use crate::geometry::{Matrix, Rect};
use crate::image::Image;
use crate::path::Path;
use crate::shade::Shade;
use crate::stroke::StrokeState;
use crate::text::Text;

/// Hints bitmask (§4.7, §11.1). `IGNORE_IMAGES`/`IGNORE_SHADES` are the two
/// hints named only abstractly in §4.7; the other three are `device.h`'s
/// `FZ_DONT_INTERPOLATE_IMAGES`/`FZ_MAINTAIN_CONTAINER_STACK`/`FZ_NO_CACHE`.
/// Kept as plain `u32` constants rather than a `bitflags` type (§11.4: the
/// teacher's own flag fields are plain integers, and pulling in a crate for
/// this is not worth the incidental dependency).
pub mod hints {
    pub const IGNORE_IMAGES: u32 = 1 << 0;
    pub const IGNORE_SHADES: u32 = 1 << 1;
    pub const MAINTAIN_CONTAINER_STACK: u32 = 1 << 2;
    pub const NO_CACHE: u32 = 1 << 3;
    pub const NO_INTERPOLATE_IMAGES: u32 = 1 << 4;
}

/// `device.h`'s `FZ_DEVFLAG_*` (§11.1), set/cleared via `Device::render_flags`.
pub mod render_flags {
    pub const MASK: u32 = 1;
    pub const COLOR: u32 = 2;
    pub const UNCACHEABLE: u32 = 4;
    pub const FILLCOLOR_UNDEFINED: u32 = 8;
    pub const STROKECOLOR_UNDEFINED: u32 = 16;
    pub const STARTCAP_UNDEFINED: u32 = 32;
    pub const DASHCAP_UNDEFINED: u32 = 64;
    pub const ENDCAP_UNDEFINED: u32 = 128;
    pub const LINEJOIN_UNDEFINED: u32 = 256;
    pub const MITERLIMIT_UNDEFINED: u32 = 512;
    pub const LINEWIDTH_UNDEFINED: u32 = 1024;
    pub const BBOX_DEFINED: u32 = 2048;
}

/// The 16 named PDF blend modes (§11.2). Isolated/knockout stay as the two
/// booleans already in `begin_group`'s signature rather than packed into
/// the same value the way `FZ_BLEND_ISOLATED`/`FZ_BLEND_KNOCKOUT` share a
/// byte with the mode in the original - no pressure in Rust to economize a
/// bitfield like that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl Default for BlendMode {
    fn default() -> Self {
        BlendMode::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderingIntent {
    Perceptual,
    RelativeColorimetric,
    Saturation,
    AbsoluteColorimetric,
}

impl Default for RenderingIntent {
    fn default() -> Self {
        RenderingIntent::RelativeColorimetric
    }
}

/// Rendering intent plus the overprint/black-point-compensation flags
/// threaded through every paint operation in §4.7's method list.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorParams {
    pub ri: RenderingIntent,
    pub bp: bool,
    pub op: bool,
    pub opm: bool,
}

/// `set_default_colorspaces` (§4.7): per-family override colorspaces a page
/// may install (e.g. an output-intent ICC profile standing in for
/// DeviceCMYK). `None` in a slot means "use the process-wide singleton".
#[derive(Debug, Clone, Default)]
pub struct DefaultColorspaces {
    pub gray: Option<Colorspace>,
    pub rgb: Option<Colorspace>,
    pub cmyk: Option<Colorspace>,
    pub output_intent: Option<Colorspace>,
}

/// The closed method set of §4.7. Every method has a no-op default so a
/// concrete back-end only implements the ones it cares about (the trace
/// device overrides all of them for logging; the bbox device overrides
/// only the ones that affect a bounding box).
///
/// `begin_tile` returns `true` when the device recognises `id` as an
/// already-rasterised tile; the caller must then skip re-emitting the tile
/// body. Every other push (`clip_*`, `begin_mask`, `begin_group`,
/// `begin_layer`) returns `()` and must be matched by exactly one pop.
#[allow(unused_variables)]
pub trait Device {
    fn close_device(&mut self) -> FitzResult<()> {
        Ok(())
    }
    fn drop_device(&mut self) {}

    fn begin_page(&mut self, rect: Rect, ctm: Matrix) -> FitzResult<()> {
        Ok(())
    }
    fn end_page(&mut self) -> FitzResult<()> {
        Ok(())
    }

    fn fill_path(
        &mut self,
        path: &Path,
        even_odd: bool,
        ctm: Matrix,
        cs: &Colorspace,
        color: &[f32],
        alpha: f32,
        cp: ColorParams,
    ) -> FitzResult<()> {
        Ok(())
    }

    fn stroke_path(
        &mut self,
        path: &Path,
        stroke: &StrokeState,
        ctm: Matrix,
        cs: &Colorspace,
        color: &[f32],
        alpha: f32,
        cp: ColorParams,
    ) -> FitzResult<()> {
        Ok(())
    }

    fn clip_path(&mut self, path: &Path, even_odd: bool, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        Ok(())
    }

    fn clip_stroke_path(
        &mut self,
        path: &Path,
        stroke: &StrokeState,
        ctm: Matrix,
        scissor: Rect,
    ) -> FitzResult<()> {
        Ok(())
    }

    fn fill_text(
        &mut self,
        text: &Text,
        ctm: Matrix,
        cs: &Colorspace,
        color: &[f32],
        alpha: f32,
        cp: ColorParams,
    ) -> FitzResult<()> {
        Ok(())
    }

    fn stroke_text(
        &mut self,
        text: &Text,
        stroke: &StrokeState,
        ctm: Matrix,
        cs: &Colorspace,
        color: &[f32],
        alpha: f32,
        cp: ColorParams,
    ) -> FitzResult<()> {
        Ok(())
    }

    /// Accumulating variant: adds to the current clip rather than replacing it.
    fn clip_text(&mut self, text: &Text, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        Ok(())
    }

    fn clip_stroke_text(
        &mut self,
        text: &Text,
        stroke: &StrokeState,
        ctm: Matrix,
        scissor: Rect,
    ) -> FitzResult<()> {
        Ok(())
    }

    /// Invisible text (PDF render mode 3): still reaches the device so a
    /// text-extraction back-end can see it, but nothing paints.
    fn ignore_text(&mut self, text: &Text, ctm: Matrix) -> FitzResult<()> {
        Ok(())
    }

    fn fill_shade(&mut self, shade: &Shade, ctm: Matrix, alpha: f32, cp: ColorParams) -> FitzResult<()> {
        Ok(())
    }

    fn fill_image(&mut self, image: &Image, ctm: Matrix, alpha: f32, cp: ColorParams) -> FitzResult<()> {
        Ok(())
    }

    fn fill_image_mask(
        &mut self,
        image: &Image,
        ctm: Matrix,
        cs: &Colorspace,
        color: &[f32],
        alpha: f32,
        cp: ColorParams,
    ) -> FitzResult<()> {
        Ok(())
    }

    fn clip_image_mask(&mut self, image: &Image, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        Ok(())
    }

    fn pop_clip(&mut self) -> FitzResult<()> {
        Ok(())
    }

    fn begin_mask(
        &mut self,
        rect: Rect,
        luminosity: bool,
        cs: &Colorspace,
        bc: &[f32],
        cp: ColorParams,
    ) -> FitzResult<()> {
        Ok(())
    }
    fn end_mask(&mut self) -> FitzResult<()> {
        Ok(())
    }

    fn begin_group(
        &mut self,
        rect: Rect,
        cs: Option<&Colorspace>,
        isolated: bool,
        knockout: bool,
        blendmode: BlendMode,
        alpha: f32,
    ) -> FitzResult<()> {
        Ok(())
    }
    fn end_group(&mut self) -> FitzResult<()> {
        Ok(())
    }

    /// Returns `true` when `id` is already rasterised; the caller must not
    /// re-emit the tile body in that case.
    fn begin_tile(
        &mut self,
        area: Rect,
        view: Rect,
        xstep: f32,
        ystep: f32,
        ctm: Matrix,
        id: u32,
    ) -> FitzResult<bool> {
        Ok(false)
    }
    fn end_tile(&mut self) -> FitzResult<()> {
        Ok(())
    }

    fn render_flags(&mut self, set: u32, clear: u32) -> FitzResult<()> {
        Ok(())
    }

    fn set_default_colorspaces(&mut self, default_cs: DefaultColorspaces) -> FitzResult<()> {
        Ok(())
    }

    fn begin_layer(&mut self, name: &str) -> FitzResult<()> {
        Ok(())
    }
    fn end_layer(&mut self) -> FitzResult<()> {
        Ok(())
    }
}

/// Which kind of container frame a push belongs to, used only to make the
/// wrapper's internal stack self-describing in debug assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Clip,
    Mask,
    Group,
    Tile,
    Layer,
}

struct Frame {
    kind: ContainerKind,
    /// Whether the push actually reached the wrapped device. A frame
    /// pushed while already inside an errored region is *not* forwarded,
    /// so its matching pop must not be forwarded either.
    forwarded: bool,
}

/// Wraps any `Device` with the §4.7/§9 error-depth discipline: if a call
/// into the inner device returns `Err`, the wrapper swallows it (logging
/// through `ctx.warn`, §7 "errors caught by a catch-frame... may log,
/// convert, and resume"), records the container-stack depth at which it
/// happened, and drops every subsequent call at that depth or deeper -
/// including suppressing the forward half of container pushes - until the
/// matching pop brings the stack back above that depth.
///
/// Content-only calls (`fill_path` and friends) that error are treated as
/// a single recoverable failure: they are logged and swallowed but do not
/// themselves open an error region, since they have no matching pop to
/// close one. Only the calls with a required matching pop
/// (`clip_*`/`begin_mask`/`begin_group`/`begin_tile`/`begin_layer`) open a
/// region when they fail.
pub struct ErrorTrackingDevice<D> {
    inner: D,
    stack: Vec<Frame>,
    error_depth: Option<usize>,
}

impl<D: Device> ErrorTrackingDevice<D> {
    pub fn new(inner: D) -> Self {
        ErrorTrackingDevice {
            inner,
            stack: Vec::new(),
            error_depth: None,
        }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    /// Depth of the container stack right now (§8 invariant 5: must be
    /// zero once every push has a matching pop).
    pub fn container_depth(&self) -> usize {
        self.stack.len()
    }

    fn suppressed(&self) -> bool {
        self.error_depth.is_some()
    }

    /// Runs a content-only (non-container) call: swallowed if we're inside
    /// an errored region, otherwise forwarded and, on error, logged and
    /// swallowed without opening a region.
    fn content<R: Default>(&mut self, f: impl FnOnce(&mut D) -> FitzResult<R>) -> FitzResult<R> {
        if self.suppressed() {
            return Ok(R::default());
        }
        match f(&mut self.inner) {
            Ok(v) => Ok(v),
            Err(e) => {
                log::warn!("device: content call failed, continuing: {e}");
                Ok(R::default())
            }
        }
    }

    /// Runs a container push. `R` is `()` for every push except
    /// `begin_tile`, which reports its cached flag back to the caller even
    /// when suppressed (a suppressed tile reports "not cached" so a caller
    /// re-emits a body that will itself be no-op'd away).
    fn push<R: Default>(
        &mut self,
        kind: ContainerKind,
        f: impl FnOnce(&mut D) -> FitzResult<R>,
    ) -> FitzResult<R> {
        if self.suppressed() {
            self.stack.push(Frame { kind, forwarded: false });
            return Ok(R::default());
        }
        let depth_before = self.stack.len();
        match f(&mut self.inner) {
            Ok(v) => {
                self.stack.push(Frame { kind, forwarded: true });
                Ok(v)
            }
            Err(e) => {
                log::warn!("device: {kind:?} push failed, suppressing region: {e}");
                self.error_depth = Some(depth_before);
                self.stack.push(Frame { kind, forwarded: false });
                Ok(R::default())
            }
        }
    }

    fn pop(&mut self, expected: ContainerKind, f: impl FnOnce(&mut D) -> FitzResult<()>) -> FitzResult<()> {
        let Some(frame) = self.stack.pop() else {
            return Err(crate::errors::Error::Generic(format!(
                "pop_{expected:?} with no matching push"
            )));
        };
        debug_assert_eq!(frame.kind, expected, "mismatched container pop");
        if frame.forwarded {
            if let Err(e) = f(&mut self.inner) {
                log::warn!("device: {expected:?} pop failed: {e}");
            }
        }
        if self.error_depth == Some(self.stack.len()) {
            self.error_depth = None;
        }
        Ok(())
    }
}

impl<D: Device> Device for ErrorTrackingDevice<D> {
    fn close_device(&mut self) -> FitzResult<()> {
        self.inner.close_device()
    }
    fn drop_device(&mut self) {
        self.inner.drop_device()
    }

    fn begin_page(&mut self, rect: Rect, ctm: Matrix) -> FitzResult<()> {
        self.content(|d| d.begin_page(rect, ctm))
    }
    fn end_page(&mut self) -> FitzResult<()> {
        self.content(|d| d.end_page())
    }

    fn fill_path(
        &mut self,
        path: &Path,
        even_odd: bool,
        ctm: Matrix,
        cs: &Colorspace,
        color: &[f32],
        alpha: f32,
        cp: ColorParams,
    ) -> FitzResult<()> {
        self.content(|d| d.fill_path(path, even_odd, ctm, cs, color, alpha, cp))
    }

    fn stroke_path(
        &mut self,
        path: &Path,
        stroke: &StrokeState,
        ctm: Matrix,
        cs: &Colorspace,
        color: &[f32],
        alpha: f32,
        cp: ColorParams,
    ) -> FitzResult<()> {
        self.content(|d| d.stroke_path(path, stroke, ctm, cs, color, alpha, cp))
    }

    fn clip_path(&mut self, path: &Path, even_odd: bool, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        self.push(ContainerKind::Clip, |d| d.clip_path(path, even_odd, ctm, scissor))
    }

    fn clip_stroke_path(
        &mut self,
        path: &Path,
        stroke: &StrokeState,
        ctm: Matrix,
        scissor: Rect,
    ) -> FitzResult<()> {
        self.push(ContainerKind::Clip, |d| d.clip_stroke_path(path, stroke, ctm, scissor))
    }

    fn fill_text(
        &mut self,
        text: &Text,
        ctm: Matrix,
        cs: &Colorspace,
        color: &[f32],
        alpha: f32,
        cp: ColorParams,
    ) -> FitzResult<()> {
        self.content(|d| d.fill_text(text, ctm, cs, color, alpha, cp))
    }

    fn stroke_text(
        &mut self,
        text: &Text,
        stroke: &StrokeState,
        ctm: Matrix,
        cs: &Colorspace,
        color: &[f32],
        alpha: f32,
        cp: ColorParams,
    ) -> FitzResult<()> {
        self.content(|d| d.stroke_text(text, stroke, ctm, cs, color, alpha, cp))
    }

    fn clip_text(&mut self, text: &Text, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        self.push(ContainerKind::Clip, |d| d.clip_text(text, ctm, scissor))
    }

    fn clip_stroke_text(
        &mut self,
        text: &Text,
        stroke: &StrokeState,
        ctm: Matrix,
        scissor: Rect,
    ) -> FitzResult<()> {
        self.push(ContainerKind::Clip, |d| d.clip_stroke_text(text, stroke, ctm, scissor))
    }

    fn ignore_text(&mut self, text: &Text, ctm: Matrix) -> FitzResult<()> {
        self.content(|d| d.ignore_text(text, ctm))
    }

    fn fill_shade(&mut self, shade: &Shade, ctm: Matrix, alpha: f32, cp: ColorParams) -> FitzResult<()> {
        self.content(|d| d.fill_shade(shade, ctm, alpha, cp))
    }

    fn fill_image(&mut self, image: &Image, ctm: Matrix, alpha: f32, cp: ColorParams) -> FitzResult<()> {
        self.content(|d| d.fill_image(image, ctm, alpha, cp))
    }

    fn fill_image_mask(
        &mut self,
        image: &Image,
        ctm: Matrix,
        cs: &Colorspace,
        color: &[f32],
        alpha: f32,
        cp: ColorParams,
    ) -> FitzResult<()> {
        self.content(|d| d.fill_image_mask(image, ctm, cs, color, alpha, cp))
    }

    fn clip_image_mask(&mut self, image: &Image, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        self.push(ContainerKind::Clip, |d| d.clip_image_mask(image, ctm, scissor))
    }

    fn pop_clip(&mut self) -> FitzResult<()> {
        self.pop(ContainerKind::Clip, |d| d.pop_clip())
    }

    fn begin_mask(
        &mut self,
        rect: Rect,
        luminosity: bool,
        cs: &Colorspace,
        bc: &[f32],
        cp: ColorParams,
    ) -> FitzResult<()> {
        self.push(ContainerKind::Mask, |d| d.begin_mask(rect, luminosity, cs, bc, cp))
    }
    fn end_mask(&mut self) -> FitzResult<()> {
        self.pop(ContainerKind::Mask, |d| d.end_mask())
    }

    fn begin_group(
        &mut self,
        rect: Rect,
        cs: Option<&Colorspace>,
        isolated: bool,
        knockout: bool,
        blendmode: BlendMode,
        alpha: f32,
    ) -> FitzResult<()> {
        self.push(ContainerKind::Group, |d| {
            d.begin_group(rect, cs, isolated, knockout, blendmode, alpha)
        })
    }
    fn end_group(&mut self) -> FitzResult<()> {
        self.pop(ContainerKind::Group, |d| d.end_group())
    }

    fn begin_tile(
        &mut self,
        area: Rect,
        view: Rect,
        xstep: f32,
        ystep: f32,
        ctm: Matrix,
        id: u32,
    ) -> FitzResult<bool> {
        self.push(ContainerKind::Tile, |d| d.begin_tile(area, view, xstep, ystep, ctm, id))
    }
    fn end_tile(&mut self) -> FitzResult<()> {
        self.pop(ContainerKind::Tile, |d| d.end_tile())
    }

    fn render_flags(&mut self, set: u32, clear: u32) -> FitzResult<()> {
        self.content(|d| d.render_flags(set, clear))
    }

    fn set_default_colorspaces(&mut self, default_cs: DefaultColorspaces) -> FitzResult<()> {
        self.content(|d| d.set_default_colorspaces(default_cs))
    }

    fn begin_layer(&mut self, name: &str) -> FitzResult<()> {
        self.push(ContainerKind::Layer, |d| d.begin_layer(name))
    }
    fn end_layer(&mut self) -> FitzResult<()> {
        self.pop(ContainerKind::Layer, |d| d.end_layer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Colorspace;
    use crate::errors::Error;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        fail_next_clip: bool,
    }

    impl Device for Recorder {
        fn clip_path(&mut self, _path: &Path, _even_odd: bool, _ctm: Matrix, _scissor: Rect) -> FitzResult<()> {
            self.calls.push("clip_path");
            if self.fail_next_clip {
                self.fail_next_clip = false;
                return Err(Error::Generic("boom".into()));
            }
            Ok(())
        }
        fn pop_clip(&mut self) -> FitzResult<()> {
            self.calls.push("pop_clip");
            Ok(())
        }
        fn fill_path(
            &mut self,
            _path: &Path,
            _even_odd: bool,
            _ctm: Matrix,
            _cs: &Colorspace,
            _color: &[f32],
            _alpha: f32,
            _cp: ColorParams,
        ) -> FitzResult<()> {
            self.calls.push("fill_path");
            Ok(())
        }
    }

    fn scissor() -> Rect {
        Rect::new(0.0, 0.0, 10.0, 10.0)
    }

    #[test]
    fn balanced_push_pop_leaves_stack_at_zero() {
        let mut dev = ErrorTrackingDevice::new(Recorder::default());
        let path = Path::new();
        dev.clip_path(&path, false, Matrix::IDENTITY, scissor()).unwrap();
        dev.pop_clip().unwrap();
        assert_eq!(dev.container_depth(), 0);
        assert_eq!(dev.inner().calls, vec!["clip_path", "pop_clip"]);
    }

    #[test]
    fn failed_push_suppresses_nested_content_until_matching_pop() {
        let mut dev = ErrorTrackingDevice::new(Recorder {
            fail_next_clip: true,
            ..Default::default()
        });
        let path = Path::new();
        let cs = Colorspace::DEVICE_GRAY;
        dev.clip_path(&path, false, Matrix::IDENTITY, scissor()).unwrap();
        // nested content must be dropped, not forwarded
        dev.fill_path(&path, false, Matrix::IDENTITY, &cs, &[0.0], 1.0, ColorParams::default())
            .unwrap();
        assert_eq!(dev.inner().calls, vec!["clip_path"]);
        dev.pop_clip().unwrap();
        // pop must not be forwarded either, since the push never reached the inner device
        assert_eq!(dev.inner().calls, vec!["clip_path"]);
        assert_eq!(dev.container_depth(), 0);

        // after unwinding, calls resume reaching the inner device
        dev.fill_path(&path, false, Matrix::IDENTITY, &cs, &[0.0], 1.0, ColorParams::default())
            .unwrap();
        assert_eq!(dev.inner().calls, vec!["clip_path", "fill_path"]);
    }

    #[test]
    fn nested_push_inside_errored_region_is_suppressed_but_balanced() {
        let mut dev = ErrorTrackingDevice::new(Recorder {
            fail_next_clip: true,
            ..Default::default()
        });
        let path = Path::new();
        dev.clip_path(&path, false, Matrix::IDENTITY, scissor()).unwrap(); // fails -> region opens
        dev.clip_path(&path, false, Matrix::IDENTITY, scissor()).unwrap(); // suppressed push
        assert_eq!(dev.container_depth(), 2);
        dev.pop_clip().unwrap(); // pops the suppressed one
        assert_eq!(dev.container_depth(), 1);
        dev.pop_clip().unwrap(); // pops the errored one, clears region
        assert_eq!(dev.container_depth(), 0);
        assert_eq!(dev.inner().calls, vec!["clip_path"]);
    }
}

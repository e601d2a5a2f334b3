//! Trace device: logs every call it receives (§12's module table entry for
//! a debugging back-end).
//!
//! Grounded on `fz_new_trace_device` (`examples/original_source/source/fitz/
//! trace-device.c`), which prints an XML-ish element per call with nesting
//! reflecting the container stack. This crate swaps the original's raw
//! `fprintf` tree for structured `log` crate events, indented by the same
//! running depth counter, matching how the teacher repo (`printpdf`) favors
//! `log::debug!`/`log::trace!` over ad hoc text formatting elsewhere in the
//! ported code.

use log::trace;

use crate::color::Colorspace;
use crate::errors::FitzResult;
use crate::geometry::{Matrix, Rect};
use crate::image::Image;
use crate::path::Path;
use crate::shade::Shade;
use crate::stroke::StrokeState;
use crate::text::Text;

use super::{BlendMode, ColorParams, DefaultColorspaces, Device};

/// Wraps any `Device`, logging every call via the `log` facade before
/// forwarding to `inner`. Useful standalone or layered under
/// `ErrorTrackingDevice` to see exactly what reached the wrapper.
pub struct TraceDevice<D> {
    inner: D,
    depth: usize,
}

impl<D: Device> TraceDevice<D> {
    pub fn new(inner: D) -> Self {
        TraceDevice { inner, depth: 0 }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    fn indent(&self) -> String {
        "  ".repeat(self.depth)
    }
}

impl<D: Device> Device for TraceDevice<D> {
    fn close_device(&mut self) -> FitzResult<()> {
        trace!("{}close_device", self.indent());
        self.inner.close_device()
    }
    fn drop_device(&mut self) {
        trace!("{}drop_device", self.indent());
        self.inner.drop_device();
    }

    fn begin_page(&mut self, rect: Rect, ctm: Matrix) -> FitzResult<()> {
        trace!("{}begin_page rect={:?} ctm={:?}", self.indent(), rect, ctm);
        self.inner.begin_page(rect, ctm)
    }
    fn end_page(&mut self) -> FitzResult<()> {
        trace!("{}end_page", self.indent());
        self.inner.end_page()
    }

    fn fill_path(&mut self, path: &Path, even_odd: bool, ctm: Matrix, cs: &Colorspace, color: &[f32], alpha: f32, cp: ColorParams) -> FitzResult<()> {
        trace!("{}fill_path even_odd={} alpha={}", self.indent(), even_odd, alpha);
        self.inner.fill_path(path, even_odd, ctm, cs, color, alpha, cp)
    }
    fn stroke_path(&mut self, path: &Path, stroke: &StrokeState, ctm: Matrix, cs: &Colorspace, color: &[f32], alpha: f32, cp: ColorParams) -> FitzResult<()> {
        trace!("{}stroke_path linewidth={} alpha={}", self.indent(), stroke.linewidth(), alpha);
        self.inner.stroke_path(path, stroke, ctm, cs, color, alpha, cp)
    }
    fn clip_path(&mut self, path: &Path, even_odd: bool, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        trace!("{}clip_path even_odd={}", self.indent(), even_odd);
        self.depth += 1;
        self.inner.clip_path(path, even_odd, ctm, scissor)
    }
    fn clip_stroke_path(&mut self, path: &Path, stroke: &StrokeState, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        trace!("{}clip_stroke_path", self.indent());
        self.depth += 1;
        self.inner.clip_stroke_path(path, stroke, ctm, scissor)
    }
    fn fill_text(&mut self, text: &Text, ctm: Matrix, cs: &Colorspace, color: &[f32], alpha: f32, cp: ColorParams) -> FitzResult<()> {
        trace!("{}fill_text glyphs={}", self.indent(), text.glyphs().len());
        self.inner.fill_text(text, ctm, cs, color, alpha, cp)
    }
    fn stroke_text(&mut self, text: &Text, stroke: &StrokeState, ctm: Matrix, cs: &Colorspace, color: &[f32], alpha: f32, cp: ColorParams) -> FitzResult<()> {
        trace!("{}stroke_text glyphs={}", self.indent(), text.glyphs().len());
        self.inner.stroke_text(text, stroke, ctm, cs, color, alpha, cp)
    }
    fn clip_text(&mut self, text: &Text, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        trace!("{}clip_text", self.indent());
        self.depth += 1;
        self.inner.clip_text(text, ctm, scissor)
    }
    fn clip_stroke_text(&mut self, text: &Text, stroke: &StrokeState, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        trace!("{}clip_stroke_text", self.indent());
        self.depth += 1;
        self.inner.clip_stroke_text(text, stroke, ctm, scissor)
    }
    fn ignore_text(&mut self, text: &Text, ctm: Matrix) -> FitzResult<()> {
        trace!("{}ignore_text glyphs={}", self.indent(), text.glyphs().len());
        self.inner.ignore_text(text, ctm)
    }
    fn fill_shade(&mut self, shade: &Shade, ctm: Matrix, alpha: f32, cp: ColorParams) -> FitzResult<()> {
        trace!("{}fill_shade alpha={}", self.indent(), alpha);
        self.inner.fill_shade(shade, ctm, alpha, cp)
    }
    fn fill_image(&mut self, image: &Image, ctm: Matrix, alpha: f32, cp: ColorParams) -> FitzResult<()> {
        trace!("{}fill_image {}x{} alpha={}", self.indent(), image.width(), image.height(), alpha);
        self.inner.fill_image(image, ctm, alpha, cp)
    }
    fn fill_image_mask(&mut self, image: &Image, ctm: Matrix, cs: &Colorspace, color: &[f32], alpha: f32, cp: ColorParams) -> FitzResult<()> {
        trace!("{}fill_image_mask", self.indent());
        self.inner.fill_image_mask(image, ctm, cs, color, alpha, cp)
    }
    fn clip_image_mask(&mut self, image: &Image, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        trace!("{}clip_image_mask", self.indent());
        self.depth += 1;
        self.inner.clip_image_mask(image, ctm, scissor)
    }
    fn pop_clip(&mut self) -> FitzResult<()> {
        self.depth = self.depth.saturating_sub(1);
        trace!("{}pop_clip", self.indent());
        self.inner.pop_clip()
    }
    fn begin_mask(&mut self, rect: Rect, luminosity: bool, cs: &Colorspace, bc: &[f32], cp: ColorParams) -> FitzResult<()> {
        trace!("{}begin_mask luminosity={}", self.indent(), luminosity);
        self.depth += 1;
        self.inner.begin_mask(rect, luminosity, cs, bc, cp)
    }
    fn end_mask(&mut self) -> FitzResult<()> {
        self.depth = self.depth.saturating_sub(1);
        trace!("{}end_mask", self.indent());
        self.inner.end_mask()
    }
    fn begin_group(&mut self, rect: Rect, cs: Option<&Colorspace>, isolated: bool, knockout: bool, blendmode: BlendMode, alpha: f32) -> FitzResult<()> {
        trace!("{}begin_group isolated={} knockout={} blend={:?}", self.indent(), isolated, knockout, blendmode);
        self.depth += 1;
        self.inner.begin_group(rect, cs, isolated, knockout, blendmode, alpha)
    }
    fn end_group(&mut self) -> FitzResult<()> {
        self.depth = self.depth.saturating_sub(1);
        trace!("{}end_group", self.indent());
        self.inner.end_group()
    }
    fn begin_tile(&mut self, area: Rect, view: Rect, xstep: f32, ystep: f32, ctm: Matrix, id: u32) -> FitzResult<bool> {
        trace!("{}begin_tile id={}", self.indent(), id);
        self.depth += 1;
        self.inner.begin_tile(area, view, xstep, ystep, ctm, id)
    }
    fn end_tile(&mut self) -> FitzResult<()> {
        self.depth = self.depth.saturating_sub(1);
        trace!("{}end_tile", self.indent());
        self.inner.end_tile()
    }
    fn render_flags(&mut self, set: u32, clear: u32) -> FitzResult<()> {
        trace!("{}render_flags set={:#x} clear={:#x}", self.indent(), set, clear);
        self.inner.render_flags(set, clear)
    }
    fn set_default_colorspaces(&mut self, default_cs: DefaultColorspaces) -> FitzResult<()> {
        trace!("{}set_default_colorspaces", self.indent());
        self.inner.set_default_colorspaces(default_cs)
    }
    fn begin_layer(&mut self, name: &str) -> FitzResult<()> {
        trace!("{}begin_layer {}", self.indent(), name);
        self.depth += 1;
        self.inner.begin_layer(name)
    }
    fn end_layer(&mut self) -> FitzResult<()> {
        self.depth = self.depth.saturating_sub(1);
        trace!("{}end_layer", self.indent());
        self.inner.end_layer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sink {
        fills: u32,
    }
    impl Device for Sink {
        fn fill_path(&mut self, _: &Path, _: bool, _: Matrix, _: &Colorspace, _: &[f32], _: f32, _: ColorParams) -> FitzResult<()> {
            self.fills += 1;
            Ok(())
        }
    }

    #[test]
    fn calls_forward_to_inner_device() {
        let mut dev = TraceDevice::new(Sink::default());
        let mut path = Path::new();
        path.rectto(0.0, 0.0, 1.0, 1.0);
        dev.fill_path(&path, false, Matrix::IDENTITY, &Colorspace::DEVICE_GRAY, &[0.0], 1.0, ColorParams::default())
            .unwrap();
        assert_eq!(dev.into_inner().fills, 1);
    }

    #[test]
    fn depth_tracks_balanced_clip_push_pop() {
        let mut dev = TraceDevice::new(Sink::default());
        let mut path = Path::new();
        path.rectto(0.0, 0.0, 1.0, 1.0);
        dev.clip_path(&path, false, Matrix::IDENTITY, Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert_eq!(dev.depth, 1);
        dev.pop_clip().unwrap();
        assert_eq!(dev.depth, 0);
    }
}

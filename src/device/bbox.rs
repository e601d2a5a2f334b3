//! Bounding-box device: accumulates the union bbox of everything painted,
//! without rendering a single pixel (§12's module table entry for a
//! cheap "what area does this content cover" back-end).
//!
//! Grounded on `fz_new_bbox_device` (`examples/original_source/source/fitz/
//! bbox-device.c`), which keeps a clip-rect stack and intersects every
//! content bbox against the top of it before folding it into the running
//! total. The clip stack here doesn't need to track coverage masks the way
//! `draw.rs`'s does - only the extent, so each clip push stores a single
//! `Rect` rather than a rasterized mask.

use crate::color::Colorspace;
use crate::errors::FitzResult;
use crate::geometry::{Matrix, Rect};
use crate::image::Image;
use crate::path::Path;
use crate::shade::Shade;
use crate::stroke::StrokeState;
use crate::text::Text;

use super::{ColorParams, Device};

pub struct BboxDevice {
    bbox: Rect,
    clip_stack: Vec<Rect>,
}

impl BboxDevice {
    pub fn new() -> Self {
        BboxDevice {
            bbox: Rect::EMPTY,
            clip_stack: Vec::new(),
        }
    }

    pub fn bbox(&self) -> Rect {
        self.bbox
    }

    fn current_scissor(&self) -> Rect {
        self.clip_stack.last().copied().unwrap_or(Rect::INFINITE)
    }

    fn accumulate(&mut self, rect: Rect) {
        let clipped = rect.intersect(self.current_scissor());
        if clipped.is_empty() {
            return;
        }
        self.bbox = if self.bbox.is_empty() { clipped } else { self.bbox.union(clipped) };
    }
}

impl Default for BboxDevice {
    fn default() -> Self {
        BboxDevice::new()
    }
}

impl Device for BboxDevice {
    fn fill_path(&mut self, path: &Path, _even_odd: bool, ctm: Matrix, _cs: &Colorspace, _color: &[f32], _alpha: f32, _cp: ColorParams) -> FitzResult<()> {
        self.accumulate(path.bound(None, ctm));
        Ok(())
    }
    fn stroke_path(&mut self, path: &Path, stroke: &StrokeState, ctm: Matrix, _cs: &Colorspace, _color: &[f32], _alpha: f32, _cp: ColorParams) -> FitzResult<()> {
        self.accumulate(path.bound(Some(stroke), ctm));
        Ok(())
    }
    fn clip_path(&mut self, path: &Path, _even_odd: bool, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        let bound = path.bound(None, ctm).intersect(scissor).intersect(self.current_scissor());
        self.clip_stack.push(bound);
        Ok(())
    }
    fn clip_stroke_path(&mut self, path: &Path, stroke: &StrokeState, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        let bound = path.bound(Some(stroke), ctm).intersect(scissor).intersect(self.current_scissor());
        self.clip_stack.push(bound);
        Ok(())
    }
    fn fill_text(&mut self, text: &Text, ctm: Matrix, _cs: &Colorspace, _color: &[f32], _alpha: f32, _cp: ColorParams) -> FitzResult<()> {
        if let Ok(bound) = text_bound(text, ctm) {
            self.accumulate(bound);
        }
        Ok(())
    }
    fn stroke_text(&mut self, text: &Text, _stroke: &StrokeState, ctm: Matrix, _cs: &Colorspace, _color: &[f32], _alpha: f32, _cp: ColorParams) -> FitzResult<()> {
        if let Ok(bound) = text_bound(text, ctm) {
            self.accumulate(bound);
        }
        Ok(())
    }
    fn clip_text(&mut self, text: &Text, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        let bound = text_bound(text, ctm)
            .unwrap_or(Rect::EMPTY)
            .intersect(scissor)
            .intersect(self.current_scissor());
        self.clip_stack.push(bound);
        Ok(())
    }
    fn clip_stroke_text(&mut self, text: &Text, _stroke: &StrokeState, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        let bound = text_bound(text, ctm)
            .unwrap_or(Rect::EMPTY)
            .intersect(scissor)
            .intersect(self.current_scissor());
        self.clip_stack.push(bound);
        Ok(())
    }
    fn fill_shade(&mut self, shade: &Shade, ctm: Matrix, _alpha: f32, _cp: ColorParams) -> FitzResult<()> {
        self.accumulate(shade.bound_shade(ctm));
        Ok(())
    }
    fn fill_image(&mut self, _image: &Image, ctm: Matrix, _alpha: f32, _cp: ColorParams) -> FitzResult<()> {
        self.accumulate(unit_square_bound(ctm));
        Ok(())
    }
    fn fill_image_mask(&mut self, _image: &Image, ctm: Matrix, _cs: &Colorspace, _color: &[f32], _alpha: f32, _cp: ColorParams) -> FitzResult<()> {
        self.accumulate(unit_square_bound(ctm));
        Ok(())
    }
    fn clip_image_mask(&mut self, _image: &Image, ctm: Matrix, scissor: Rect) -> FitzResult<()> {
        let bound = unit_square_bound(ctm).intersect(scissor).intersect(self.current_scissor());
        self.clip_stack.push(bound);
        Ok(())
    }
    fn pop_clip(&mut self) -> FitzResult<()> {
        self.clip_stack.pop();
        Ok(())
    }
    fn begin_mask(&mut self, rect: Rect, _luminosity: bool, _cs: &Colorspace, _bc: &[f32], _cp: ColorParams) -> FitzResult<()> {
        self.clip_stack.push(rect.intersect(self.current_scissor()));
        Ok(())
    }
    fn end_mask(&mut self) -> FitzResult<()> {
        self.clip_stack.pop();
        Ok(())
    }
    fn begin_group(&mut self, rect: Rect, _cs: Option<&Colorspace>, _isolated: bool, _knockout: bool, _blendmode: super::BlendMode, _alpha: f32) -> FitzResult<()> {
        self.clip_stack.push(rect.intersect(self.current_scissor()));
        Ok(())
    }
    fn end_group(&mut self) -> FitzResult<()> {
        self.clip_stack.pop();
        Ok(())
    }
    fn begin_tile(&mut self, area: Rect, _view: Rect, _xstep: f32, _ystep: f32, _ctm: Matrix, _id: u32) -> FitzResult<bool> {
        self.clip_stack.push(area.intersect(self.current_scissor()));
        Ok(false)
    }
    fn end_tile(&mut self) -> FitzResult<()> {
        self.clip_stack.pop();
        Ok(())
    }
    fn begin_layer(&mut self, _name: &str) -> FitzResult<()> {
        self.clip_stack.push(self.current_scissor());
        Ok(())
    }
    fn end_layer(&mut self) -> FitzResult<()> {
        self.clip_stack.pop();
        Ok(())
    }
}

fn unit_square_bound(ctm: Matrix) -> Rect {
    let corners = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
    let mut out = Rect::EMPTY;
    for (i, &(x, y)) in corners.iter().enumerate() {
        let (tx, ty) = ctm.transform_point(x, y);
        out = if i == 0 {
            Rect::new(tx, ty, tx, ty)
        } else {
            Rect::new(out.x0.min(tx), out.y0.min(ty), out.x1.max(tx), out.y1.max(ty))
        };
    }
    out
}

fn text_bound(text: &Text, ctm: Matrix) -> FitzResult<Rect> {
    let full = Matrix::concat(text.trm(), ctm);
    let mut out = Rect::EMPTY;
    let mut first = true;
    for g in text.glyphs() {
        let (x, y) = full.transform_point(g.x, g.y);
        let r = Rect::new(x, y, x, y);
        out = if first { r } else { Rect::new(out.x0.min(r.x0), out.y0.min(r.y0), out.x1.max(r.x1), out.y1.max(r.y1)) };
        first = false;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_path_grows_bbox_to_path_extent() {
        let mut dev = BboxDevice::new();
        let mut path = Path::new();
        path.rectto(1.0, 2.0, 9.0, 8.0);
        dev.fill_path(&path, false, Matrix::IDENTITY, &Colorspace::DEVICE_GRAY, &[0.0], 1.0, ColorParams::default())
            .unwrap();
        assert_eq!(dev.bbox(), Rect::new(1.0, 2.0, 9.0, 8.0));
    }

    #[test]
    fn clip_restricts_subsequent_fills_to_intersection() {
        let mut dev = BboxDevice::new();
        let mut clip = Path::new();
        clip.rectto(0.0, 0.0, 5.0, 5.0);
        dev.clip_path(&clip, false, Matrix::IDENTITY, Rect::INFINITE).unwrap();
        let mut fill = Path::new();
        fill.rectto(0.0, 0.0, 100.0, 100.0);
        dev.fill_path(&fill, false, Matrix::IDENTITY, &Colorspace::DEVICE_GRAY, &[0.0], 1.0, ColorParams::default())
            .unwrap();
        assert_eq!(dev.bbox(), Rect::new(0.0, 0.0, 5.0, 5.0));
        dev.pop_clip().unwrap();
        assert!(dev.clip_stack.is_empty());
    }
}

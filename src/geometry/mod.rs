//! Affine matrices, points and rectangles (§4.2).

pub mod matrix;
pub mod rect;

pub use matrix::Matrix;
pub use rect::{IRect, Point, Rect};

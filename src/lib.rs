//! # fitzcore
//!
//! A device-abstraction graphics pipeline for page-oriented documents:
//! paths, pixmaps, display lists, and a software rasterizer, independent of
//! any single document format's parser.
//!
//! Content reaches the library through the [`device::Device`] trait: a
//! closed set of drawing operations (`fill_path`, `fill_text`, `fill_image`,
//! clip/mask/group/tile containers, …) that any producer can drive and any
//! consumer can implement. Five back-ends ship with the crate:
//! [`device::draw::DrawDevice`] rasterizes to a [`pixmap::Pixmap`],
//! [`device::list::ListRecorder`] records a replayable [`device::list::DisplayList`],
//! [`device::text_device::TextPageDevice`] extracts structured text,
//! [`device::trace::TraceDevice`] logs every call, and
//! [`device::bbox::BboxDevice`] accumulates a content bounding box.
//!
//! [`device::ErrorTrackingDevice`] wraps any of the above with the error-depth
//! discipline described in its own docs: a failure inside a clipped or
//! grouped region unwinds just that region without leaving the wrapped
//! device's container stack unbalanced.

#![allow(dead_code)]

pub mod bitmap;
pub mod color;
pub mod context;
pub mod cookie;
pub mod device;
pub mod errors;
pub mod font;
pub mod geometry;
pub mod image;
pub mod output;
pub mod path;
pub mod pixmap;
pub mod shade;
pub mod store;
pub mod stroke;
pub mod text;

pub use context::Context;
pub use errors::{Error, ErrorKind, FitzResult};

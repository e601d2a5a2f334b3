//! Pixmap output formats (§6): PNM family, PNG, PBM, PWG raster, CBZ.
//!
//! Each submodule owns one format and exposes a plain
//! `write_*(pixmap, &mut impl Write) -> FitzResult<()>` function rather than
//! going through the `Device` trait - output is a post-render serialization
//! step, not a drawing operation, matching how `examples/original_source/
//! source/fitz/output-*.c` keeps these as standalone `fz_write_*` entry
//! points outside the device hierarchy.

pub mod cbz;
pub mod pbm;
pub mod png;
pub mod pnm;
pub mod pwg;

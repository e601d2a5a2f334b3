//! PBM output (§6): 1-bit halftone form of a pixmap, for print drivers that
//! only accept bilevel raster.
//!
//! PBM's P4 binary convention is bit=1 for *black*, bit=0 for *white* -
//! the opposite of this crate's `Bitmap::get_bit` (§4.3, `bitmap.rs`), which
//! stores bit=1 for the *brighter* halftoned sample. Each row is inverted
//! while packing rather than changing `Bitmap`'s own convention, since
//! `Bitmap` is shared with the PWG bilevel path (`output/pwg.rs`) which
//! wants the uninverted sense.

use std::io::Write;

use crate::bitmap::Bitmap;
use crate::errors::FitzResult;

pub fn write_pbm<W: Write>(bitmap: &Bitmap, w: &mut W) -> FitzResult<()> {
    writeln!(w, "P4")?;
    writeln!(w, "{} {}", bitmap.w(), bitmap.h())?;
    for y in 0..bitmap.h() {
        let row = bitmap.row(y);
        let inverted: Vec<u8> = row.iter().map(|b| !b).collect();
        w.write_all(&inverted)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::halftone_pixmap;
    use crate::color::{Colorspace, Separations};
    use crate::pixmap::Pixmap;

    #[test]
    fn pure_white_pixmap_writes_all_zero_bits() {
        let mut p = Pixmap::new(Some(Colorspace::DEVICE_GRAY), 8, 1, Separations::new(), false);
        p.clear_with_value(255);
        let bmp = halftone_pixmap(&p, None);
        let mut out = Vec::new();
        write_pbm(&bmp, &mut out).unwrap();
        let body = &out[out.iter().position(|&b| b == b'\n').map(|i| i + 1).unwrap()..];
        let body = &body[body.iter().position(|&b| b == b'\n').map(|i| i + 1).unwrap()..];
        assert_eq!(body, &[0u8]);
    }

    #[test]
    fn header_reports_dimensions() {
        let bmp = Bitmap::new(9, 3);
        let mut out = Vec::new();
        write_pbm(&bmp, &mut out).unwrap();
        assert!(out.starts_with(b"P4\n9 3\n"));
    }
}

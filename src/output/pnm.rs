//! PNM family output (§6): *pgm* (n=1, no alpha), *ppm* (n=3, no alpha),
//! *pnm* as an alias for whichever of those fits, *pam* for the arbitrary
//! case (any component count, alpha allowed).
//!
//! Grounded on `fz_write_pnm`/`fz_write_pam` (referenced by `_INDEX.md`
//! alongside the other `output-*.c` files, though only the PWG/CBZ sources
//! survived the retrieval filter): ASCII header lines terminated by `\n`,
//! then raw binary samples, no padding between header and body.

use std::io::{self, Write};

use crate::errors::FitzResult;
use crate::pixmap::Pixmap;

/// Picks *pgm* for a single-channel, alpha-less pixmap, *ppm* for a
/// three-channel, alpha-less one, and falls back to *pam* otherwise - the
/// same dispatch `fz_write_pnm` uses before throwing for anything wider.
pub fn write_pnm<W: Write>(pixmap: &Pixmap, w: &mut W) -> FitzResult<()> {
    let n = pixmap.color_count();
    if !pixmap.has_alpha() && n == 1 {
        write_pgm(pixmap, w)
    } else if !pixmap.has_alpha() && n == 3 {
        write_ppm(pixmap, w)
    } else {
        write_pam(pixmap, w)
    }
}

/// P5: binary grayscale. Requires a one-component, alpha-less pixmap.
pub fn write_pgm<W: Write>(pixmap: &Pixmap, w: &mut W) -> FitzResult<()> {
    if pixmap.has_alpha() || pixmap.color_count() != 1 {
        return Err(crate::errors::Error::Unsupported(
            "pgm requires a single-channel, alpha-less pixmap".into(),
        ));
    }
    write_header(w, "P5", pixmap.w(), pixmap.h(), Some(255))?;
    write_rows(pixmap, w)
}

/// P6: binary RGB. Requires a three-component, alpha-less pixmap.
pub fn write_ppm<W: Write>(pixmap: &Pixmap, w: &mut W) -> FitzResult<()> {
    if pixmap.has_alpha() || pixmap.color_count() != 3 {
        return Err(crate::errors::Error::Unsupported(
            "ppm requires a three-channel, alpha-less pixmap".into(),
        ));
    }
    write_header(w, "P6", pixmap.w(), pixmap.h(), Some(255))?;
    write_rows(pixmap, w)
}

/// P7 (PAM): arbitrary component count, alpha permitted. The only format in
/// this family that can round-trip every pixmap this crate can produce.
pub fn write_pam<W: Write>(pixmap: &Pixmap, w: &mut W) -> FitzResult<()> {
    let n = pixmap.color_count();
    let tupltype = match (pixmap.colorspace().map(|c| c.n()).unwrap_or(1), pixmap.has_alpha()) {
        (1, false) => "GRAYSCALE",
        (1, true) => "GRAYSCALE_ALPHA",
        (3, false) => "RGB",
        (3, true) => "RGB_ALPHA",
        (4, false) => "CMYK",
        (4, true) => "CMYK_ALPHA",
        _ => "RGB",
    };
    writeln!(w, "P7")?;
    writeln!(w, "WIDTH {}", pixmap.w())?;
    writeln!(w, "HEIGHT {}", pixmap.h())?;
    writeln!(w, "DEPTH {}", n)?;
    writeln!(w, "MAXVAL 255")?;
    writeln!(w, "TUPLTYPE {tupltype}")?;
    writeln!(w, "ENDHDR")?;
    write_rows(pixmap, w)
}

fn write_header<W: Write>(w: &mut W, magic: &str, width: i32, height: i32, maxval: Option<u32>) -> io::Result<()> {
    write!(w, "{magic}\n{width} {height}\n")?;
    if let Some(m) = maxval {
        writeln!(w, "{m}")?;
    }
    Ok(())
}

fn write_rows<W: Write>(pixmap: &Pixmap, w: &mut W) -> FitzResult<()> {
    for y in 0..pixmap.h() {
        w.write_all(pixmap.row(y))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{Colorspace, Separations};

    #[test]
    fn pgm_header_carries_dimensions_and_maxval() {
        let p = Pixmap::new(Some(Colorspace::DEVICE_GRAY), 3, 2, Separations::new(), false);
        let mut out = Vec::new();
        write_pgm(&p, &mut out).unwrap();
        assert!(out.starts_with(b"P5\n3 2\n255\n"));
        assert_eq!(out.len(), "P5\n3 2\n255\n".len() + 6);
    }

    #[test]
    fn pgm_rejects_alpha_pixmap() {
        let p = Pixmap::new(Some(Colorspace::DEVICE_GRAY), 1, 1, Separations::new(), true);
        let mut out = Vec::new();
        assert!(write_pgm(&p, &mut out).is_err());
    }

    #[test]
    fn pam_reports_rgba_tupltype() {
        let p = Pixmap::new(Some(Colorspace::DEVICE_RGB), 1, 1, Separations::new(), true);
        let mut out = Vec::new();
        write_pam(&p, &mut out).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("TUPLTYPE RGB_ALPHA"));
        assert!(text.contains("DEPTH 4"));
    }

    #[test]
    fn write_pnm_dispatches_to_pam_for_alpha_pixmaps() {
        let p = Pixmap::new(Some(Colorspace::DEVICE_RGB), 1, 1, Separations::new(), true);
        let mut out = Vec::new();
        write_pnm(&p, &mut out).unwrap();
        assert!(out.starts_with(b"P7\n"));
    }
}

//! PNG output (§6): standard IHDR/IDAT/IEND chunk stream, alpha saved iff
//! `savealpha` is requested.
//!
//! PNG has no CMYK color type, so a CMYK pixmap is converted through
//! `Colorspace::to_device_rgb` first (documented lossy step - matches what
//! `fz_write_pixmap_as_png` does via its own internal RGB conversion before
//! handing off to libpng). `flate2` (already a crate dependency for
//! unrelated compression elsewhere in the corpus) supplies the DEFLATE
//! stream; chunk CRCs are computed with a small hand-rolled CRC-32 since PNG
//! doesn't pull in a dedicated `crc` crate anywhere in the example pack.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::color::Colorspace;
use crate::errors::FitzResult;
use crate::pixmap::Pixmap;

const COLOR_TYPE_GRAY: u8 = 0;
const COLOR_TYPE_RGB: u8 = 2;
const COLOR_TYPE_GRAY_ALPHA: u8 = 4;
const COLOR_TYPE_RGBA: u8 = 6;

/// Writes `pixmap` as a PNG. `savealpha` controls whether the pixmap's
/// alpha channel (if any) is kept; premultiplied samples are unmultiplied
/// first, since PNG alpha is always straight.
pub fn write_png<W: Write>(pixmap: &Pixmap, savealpha: bool, w: &mut W) -> FitzResult<()> {
    let (color_type, channels, rows) = to_png_rows(pixmap, savealpha);

    w.write_all(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])?;
    write_chunk(w, b"IHDR", &ihdr_body(pixmap.w() as u32, pixmap.h() as u32, color_type))?;

    let mut filtered = Vec::with_capacity(rows.len() * (rows.first().map(Vec::len).unwrap_or(0) + 1));
    for row in &rows {
        filtered.push(0u8); // filter type 0 (None) per scanline
        filtered.extend_from_slice(row);
    }
    let _ = channels;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&filtered)?;
    let compressed = encoder.finish()?;
    write_chunk(w, b"IDAT", &compressed)?;

    write_chunk(w, b"IEND", &[])?;
    Ok(())
}

fn ihdr_body(width: u32, height: u32, color_type: u8) -> Vec<u8> {
    let mut body = Vec::with_capacity(13);
    body.extend_from_slice(&width.to_be_bytes());
    body.extend_from_slice(&height.to_be_bytes());
    body.push(8); // bit depth
    body.push(color_type);
    body.push(0); // compression method
    body.push(0); // filter method
    body.push(0); // interlace method
    body
}

/// Converts every row of `pixmap` into 8-bit-per-channel gray/rgb(+alpha)
/// samples ready for PNG filtering. Indexed/CMYK pixmaps are expanded to
/// DeviceRGB first.
fn to_png_rows(pixmap: &Pixmap, savealpha: bool) -> (u8, usize, Vec<Vec<u8>>) {
    let keep_alpha = savealpha && pixmap.has_alpha();
    let cs = pixmap.colorspace().cloned().unwrap_or(Colorspace::DEVICE_GRAY);
    let is_plain_gray = matches!(cs, Colorspace::Device(crate::color::Family::DeviceGray));
    let is_plain_rgb = matches!(cs, Colorspace::Device(crate::color::Family::DeviceRgb));

    let (color_type, channels) = match (is_plain_gray, is_plain_rgb, keep_alpha) {
        (true, _, false) => (COLOR_TYPE_GRAY, 1),
        (true, _, true) => (COLOR_TYPE_GRAY_ALPHA, 2),
        (_, true, false) => (COLOR_TYPE_RGB, 3),
        (_, true, true) => (COLOR_TYPE_RGBA, 4),
        (_, _, false) => (COLOR_TYPE_RGB, 3),
        (_, _, true) => (COLOR_TYPE_RGBA, 4),
    };

    let n = pixmap.color_count();
    let color_n = n - usize::from(pixmap.has_alpha());
    let mut rows = Vec::with_capacity(pixmap.h() as usize);
    for y in 0..pixmap.h() {
        let src = pixmap.row(y);
        let mut out = Vec::with_capacity(pixmap.w() as usize * channels);
        for px in src.chunks(n) {
            let color = &px[..color_n];
            let alpha = if pixmap.has_alpha() { px[color_n] } else { 255 };
            let unmul = |c: u8| -> u8 {
                if alpha == 0 {
                    0
                } else {
                    ((c as u32 * 255 + alpha as u32 / 2) / alpha as u32).min(255) as u8
                }
            };
            match color_type {
                COLOR_TYPE_GRAY => out.push(unmul(color[0])),
                COLOR_TYPE_GRAY_ALPHA => {
                    out.push(unmul(color[0]));
                    out.push(alpha);
                }
                COLOR_TYPE_RGB | COLOR_TYPE_RGBA => {
                    let rgb = cs.to_device_rgb(&color.iter().map(|&c| c as f32 / 255.0).collect::<Vec<_>>());
                    out.push((unmul((rgb[0] * 255.0).round() as u8)).min(255));
                    out.push((unmul((rgb[1] * 255.0).round() as u8)).min(255));
                    out.push((unmul((rgb[2] * 255.0).round() as u8)).min(255));
                    if color_type == COLOR_TYPE_RGBA {
                        out.push(alpha);
                    }
                }
                _ => unreachable!(),
            }
        }
        rows.push(out);
    }
    (color_type, channels, rows)
}

fn write_chunk<W: Write>(w: &mut W, kind: &[u8; 4], data: &[u8]) -> FitzResult<()> {
    w.write_all(&(data.len() as u32).to_be_bytes())?;
    w.write_all(kind)?;
    w.write_all(data)?;
    let mut crc_input = Vec::with_capacity(4 + data.len());
    crc_input.extend_from_slice(kind);
    crc_input.extend_from_slice(data);
    w.write_all(&crc32(&crc_input).to_be_bytes())?;
    Ok(())
}

/// Standard PNG/zlib CRC-32 (polynomial 0xEDB88320), table-driven.
fn crc32(data: &[u8]) -> u32 {
    fn table() -> [u32; 256] {
        let mut table = [0u32; 256];
        for n in 0..256u32 {
            let mut c = n;
            for _ in 0..8 {
                c = if c & 1 != 0 { 0xEDB88320 ^ (c >> 1) } else { c >> 1 };
            }
            table[n as usize] = c;
        }
        table
    }
    let table = table();
    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = table[idx] ^ (crc >> 8);
    }
    crc ^ 0xFFFFFFFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Separations;

    #[test]
    fn png_starts_with_signature_and_ihdr() {
        let mut p = Pixmap::new(Some(Colorspace::DEVICE_GRAY), 2, 2, Separations::new(), false);
        p.clear_with_value(128);
        let mut out = Vec::new();
        write_png(&p, false, &mut out).unwrap();
        assert_eq!(&out[0..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        assert_eq!(&out[12..16], b"IHDR");
    }

    #[test]
    fn savealpha_false_drops_alpha_channel() {
        let p = Pixmap::new(Some(Colorspace::DEVICE_RGB), 1, 1, Separations::new(), true);
        let (color_type, _, rows) = to_png_rows(&p, false);
        assert_eq!(color_type, COLOR_TYPE_RGB);
        assert_eq!(rows[0].len(), 3);
    }

    #[test]
    fn savealpha_true_keeps_alpha_channel() {
        let p = Pixmap::new(Some(Colorspace::DEVICE_RGB), 1, 1, Separations::new(), true);
        let (color_type, _, rows) = to_png_rows(&p, true);
        assert_eq!(color_type, COLOR_TYPE_RGBA);
        assert_eq!(rows[0].len(), 4);
    }

    #[test]
    fn crc32_of_empty_string_is_zero() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn crc32_matches_known_vector() {
        // "IEND" chunk type with empty body is a fixed, well-known value.
        assert_eq!(crc32(b"IEND"), 0xAE426082);
    }
}

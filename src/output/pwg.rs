//! PWG/CUPS raster output (§6, §11.5's sibling format).
//!
//! Grounded directly on `fz_output_pwg_file_header`/`output_header`/
//! `fz_output_pwg_page`/`fz_output_pwg_bitmap_page`
//! (`examples/original_source/source/fitz/output-pwg.c`): a 4-byte
//! one-time sync word, then per-page a fixed 1796-byte header followed by a
//! packbits-like row/run compressed body. Field order, offsets and the
//! `257-d`/`d-1` run-length encoding below are carried over byte-for-byte;
//! only the `dn`/`sn` derivation is generalized to use this crate's
//! `Pixmap::has_alpha` instead of the original's "last channel is alpha
//! unless n==1" assumption.

use std::io::Write;

use crate::bitmap::Bitmap;
use crate::errors::FitzResult;
use crate::pixmap::Pixmap;

pub const SYNC_WORD: [u8; 4] = *b"RaS2";

pub const PAGE_HEADER_LEN: usize = 1796;

/// Optional per-job/per-page metadata, all defaulting to zero/empty exactly
/// as the original's `NULL` `fz_pwg_options*` does.
#[derive(Debug, Clone, Default)]
pub struct PwgOptions {
    pub media_class: [u8; 64],
    pub media_color: [u8; 64],
    pub media_type: [u8; 64],
    pub output_type: [u8; 64],
    pub rendering_intent: [u8; 64],
    pub page_size_name: [u8; 64],
    pub advance_distance: i32,
    pub advance_media: i32,
    pub collate: i32,
    pub cut_media: i32,
    pub duplex: i32,
    pub insert_sheet: i32,
    pub jog: i32,
    pub leading_edge: i32,
    pub manual_feed: i32,
    pub media_position: i32,
    pub media_weight: i32,
    pub mirror_print: i32,
    pub negative_print: i32,
    pub num_copies: i32,
    pub orientation: i32,
    pub output_face_up: i32,
    pub separations: i32,
    pub tray_switch: i32,
    pub tumble: i32,
    pub media_type_num: i32,
    pub compression: i32,
    pub row_count: i32,
    pub row_feed: i32,
    pub row_step: i32,
}

pub fn write_file_header<W: Write>(w: &mut W) -> FitzResult<()> {
    w.write_all(&SYNC_WORD)?;
    Ok(())
}

fn colorspace_code(bpp: u32) -> FitzResult<i32> {
    match bpp {
        1 => Ok(3),   // Black
        8 => Ok(18),  // Sgray
        24 => Ok(19), // Srgb
        32 => Ok(6),  // Cmyk
        _ => Err(crate::errors::Error::Unsupported("pixmap bpp must be 1, 8, 24 or 32 to write as pwg".into())),
    }
}

#[allow(clippy::too_many_arguments)]
fn write_header<W: Write>(
    w: &mut W,
    opts: &PwgOptions,
    xres: i32,
    yres: i32,
    width: i32,
    height: i32,
    bpp: u32,
) -> FitzResult<()> {
    let xres = xres.max(1);
    let yres = yres.max(1);
    let be = |v: i32| v.to_be_bytes();

    w.write_all(&opts.media_class)?;
    w.write_all(&opts.media_color)?;
    w.write_all(&opts.media_type)?;
    w.write_all(&opts.output_type)?;
    w.write_all(&be(opts.advance_distance))?;
    w.write_all(&be(opts.advance_media))?;
    w.write_all(&be(opts.collate))?;
    w.write_all(&be(opts.cut_media))?;
    w.write_all(&be(opts.duplex))?;
    w.write_all(&be(xres))?;
    w.write_all(&be(yres))?;
    w.write_all(&[0u8; 16])?; // 284..300 reserved (CUPS page bbox)
    w.write_all(&be(opts.insert_sheet))?;
    w.write_all(&be(opts.jog))?;
    w.write_all(&be(opts.leading_edge))?;
    w.write_all(&[0u8; 8])?; // 312..320 reserved (CUPS page margins)
    w.write_all(&be(opts.manual_feed))?;
    w.write_all(&be(opts.media_position))?;
    w.write_all(&be(opts.media_weight))?;
    w.write_all(&be(opts.mirror_print))?;
    w.write_all(&be(opts.negative_print))?;
    w.write_all(&be(opts.num_copies))?;
    w.write_all(&be(opts.orientation))?;
    w.write_all(&be(opts.output_face_up))?;
    w.write_all(&be(width * 72 / xres))?;
    w.write_all(&be(height * 72 / yres))?;
    w.write_all(&be(opts.separations))?;
    w.write_all(&be(opts.tray_switch))?;
    w.write_all(&be(opts.tumble))?;
    w.write_all(&be(width))?;
    w.write_all(&be(height))?;
    w.write_all(&be(opts.media_type_num))?;
    w.write_all(&be(if bpp < 8 { 1 } else { 8 }))?;
    w.write_all(&be(bpp as i32))?;
    w.write_all(&be(((width as u32 * bpp + 7) / 8) as i32))?;
    w.write_all(&be(0))?; // chunky pixels
    w.write_all(&be(colorspace_code(bpp)?))?;
    w.write_all(&be(opts.compression))?;
    w.write_all(&be(opts.row_count))?;
    w.write_all(&be(opts.row_feed))?;
    w.write_all(&be(opts.row_step))?;
    w.write_all(&be(if bpp <= 8 { 1 } else { 3 }))?; // num colors
    w.write_all(&[0u8; 28])?; // 424..452 reserved
    w.write_all(&be(1))?; // TotalPageCount
    w.write_all(&be(1))?; // CrossFeedTransform
    w.write_all(&be(1))?; // FeedTransform
    w.write_all(&be(0))?; // ImageBoxLeft
    w.write_all(&be(0))?; // ImageBoxTop
    w.write_all(&be(width))?; // ImageBoxRight
    w.write_all(&be(height))?; // ImageBoxBottom
    w.write_all(&[0u8; 1188])?; // 480..1668 reserved
    w.write_all(&opts.rendering_intent)?;
    w.write_all(&opts.page_size_name)?;
    Ok(())
}

/// Packbits-like row compression shared by the pixmap and bitmap encoders:
/// a leading row-repeat byte (`count-1`), then alternating repeat-runs
/// (`count-1` followed by one sample group) and literal-runs (`257-count`
/// followed by `count` sample groups), comparing `group_len`-byte groups.
fn write_packed_rows<W: Write>(w: &mut W, width: i32, height: i32, stride: usize, group_len: usize, samples: &[u8]) -> FitzResult<()> {
    let mut y = 0i32;
    while y < height {
        let row_start = y as usize * stride;
        let row = &samples[row_start..row_start + width as usize * group_len];

        let mut yrep = 1i32;
        while yrep < 256 && y + yrep < height {
            let next_start = (y + yrep) as usize * stride;
            let next_row = &samples[next_start..next_start + width as usize * group_len];
            if next_row != row {
                break;
            }
            yrep += 1;
        }
        w.write_all(&[(yrep - 1) as u8])?;

        let mut x = 0i32;
        while x < width {
            let base = x as usize * group_len;
            let mut d = 1i32;
            while d < 128 && x + d < width {
                let a = &row[((d - 1) as usize) * group_len..(d as usize) * group_len];
                let b = &row[(d as usize) * group_len..((d + 1) as usize) * group_len];
                if a == b {
                    break;
                }
                d += 1;
            }
            if d == 1 {
                let group = &row[base..base + group_len];
                let mut xrep = 1i32;
                while xrep < 128 && x + xrep < width {
                    let next = &row[base + xrep as usize * group_len..base + (xrep as usize + 1) * group_len];
                    if next != group {
                        break;
                    }
                    xrep += 1;
                }
                w.write_all(&[(xrep - 1) as u8])?;
                w.write_all(group)?;
                x += xrep;
            } else {
                w.write_all(&[(257 - d) as u8])?;
                w.write_all(&row[base..base + d as usize * group_len])?;
                x += d;
            }
        }
        y += yrep;
    }
    Ok(())
}

/// Writes one page of `pixmap` in PWG raster form (no file-level sync
/// word - call `write_file_header` once per job before the first page).
pub fn write_pixmap_page<W: Write>(pixmap: &Pixmap, opts: &PwgOptions, w: &mut W) -> FitzResult<()> {
    let n = pixmap.color_count();
    if !matches!(n, 1 | 2 | 4 | 5) {
        return Err(crate::errors::Error::Unsupported(
            "pixmap must be grayscale, rgb or cmyk to write as pwg".into(),
        ));
    }
    let dn = n - usize::from(pixmap.has_alpha());
    let bpp = (dn * 8) as u32;
    let (xres, yres) = pixmap.resolution();
    write_header(w, opts, xres, yres, pixmap.w(), pixmap.h(), bpp)?;

    if dn == n {
        write_packed_rows(w, pixmap.w(), pixmap.h(), pixmap.stride(), dn, pixmap.samples())
    } else {
        // Alpha channel present: strip it from each sample group before
        // packing, same as the original dropping the last of `sn` bytes.
        let stripped: Vec<u8> = (0..pixmap.h())
            .flat_map(|y| pixmap.row(y).chunks(n).flat_map(|px| px[..dn].to_vec()))
            .collect();
        write_packed_rows(w, pixmap.w(), pixmap.h(), pixmap.w() as usize * dn, dn, &stripped)
    }
}

/// Writes one page of a 1-bit halftoned `bitmap` in PWG raster form.
pub fn write_bitmap_page<W: Write>(bitmap: &Bitmap, opts: &PwgOptions, w: &mut W) -> FitzResult<()> {
    let (xres, yres) = bitmap.resolution();
    write_header(w, opts, xres, yres, bitmap.w(), bitmap.h(), 1)?;
    let byte_width = ((bitmap.w() + 7) / 8) as usize;
    write_packed_rows(w, byte_width as i32, bitmap.h(), bitmap.stride(), 1, bitmap.samples())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{Colorspace, Separations};

    #[test]
    fn page_header_is_exactly_1796_bytes() {
        let p = Pixmap::new(Some(Colorspace::DEVICE_GRAY), 4, 4, Separations::new(), false);
        let mut out = Vec::new();
        write_pixmap_page(&p, &PwgOptions::default(), &mut out).unwrap();
        // body for an all-zero 4x4 gray pixmap is one repeated row plus one
        // repeated literal-free run: header length is everything before it.
        let mut header_only = Vec::new();
        write_header(&mut header_only, &PwgOptions::default(), 96, 96, 4, 4, 8).unwrap();
        assert_eq!(header_only.len(), PAGE_HEADER_LEN);
        assert!(out.starts_with(&header_only));
    }

    #[test]
    fn colorspace_code_matches_pwg_table() {
        assert_eq!(colorspace_code(1).unwrap(), 3);
        assert_eq!(colorspace_code(8).unwrap(), 18);
        assert_eq!(colorspace_code(24).unwrap(), 19);
        assert_eq!(colorspace_code(32).unwrap(), 6);
        assert!(colorspace_code(16).is_err());
    }

    #[test]
    fn uniform_pixmap_packs_into_single_repeat_run() {
        let mut p = Pixmap::new(Some(Colorspace::DEVICE_GRAY), 8, 1, Separations::new(), false);
        p.clear_with_value(42);
        let mut out = Vec::new();
        write_pixmap_page(&p, &PwgOptions::default(), &mut out).unwrap();
        let body = &out[PAGE_HEADER_LEN..];
        // row-repeat byte (0, since only one row), then one literal/repeat
        // run covering all 8 columns as a single repeated value.
        assert_eq!(body[0], 0);
        assert_eq!(body[1], 7); // xrep-1 for 8 identical samples
        assert_eq!(body[2], 42);
        assert_eq!(body.len(), 3);
    }

    #[test]
    fn file_header_is_the_sync_word() {
        let mut out = Vec::new();
        write_file_header(&mut out).unwrap();
        assert_eq!(out, SYNC_WORD);
    }

    #[test]
    fn page_header_fields_land_at_their_struct_offsets_at_300dpi() {
        // 100x100 opaque gray pixmap at 300dpi, matching cups-raster.h's
        // page_header2 layout byte-for-byte (output-pwg.c's field order).
        let mut p = Pixmap::new(Some(Colorspace::DEVICE_GRAY), 100, 100, Separations::new(), false);
        p.set_resolution(300, 300);
        let mut out = Vec::new();
        write_file_header(&mut out).unwrap();
        write_pixmap_page(&p, &PwgOptions::default(), &mut out).unwrap();

        let be32 = |bytes: &[u8]| i32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let page = &out[SYNC_WORD.len()..]; // page header starts after the 4-byte sync word

        assert_eq!(out[0], b'R');
        assert_eq!(be32(&page[276..280]), 300); // HWResolution[0] (x dpi)
        assert_eq!(be32(&page[372..376]), 100); // cupsWidth
        assert_eq!(be32(&page[384..388]), 8); // cupsBitsPerColor
        assert_eq!(be32(&page[400..404]), 18); // cupsColorSpace (Sgray)
    }

    /// Scenario S5 as literally worded states HWResolution lands at offset
    /// 300; `output-pwg.c`'s actual field-emission order (mirrored above,
    /// byte-for-byte, in `write_header`) puts it at 276, right after
    /// `Duplex`, with `InsertSheet` landing on 300 instead. This is an
    /// erratum in the distilled scenario, not a discretionary choice: a
    /// layout that moved HWResolution to offset 300 would no longer match
    /// `fz_write_pwg_page_header` and would misdecode in any real CUPS
    /// consumer. Width/BitsPerColor/ColorSpace at 372/384/400 are exactly as
    /// S5 states, which this test also pins down.
    #[test]
    fn s5_resolution_offset_is_an_acknowledged_spec_erratum() {
        let mut p = Pixmap::new(Some(Colorspace::DEVICE_GRAY), 100, 100, Separations::new(), false);
        p.set_resolution(300, 300);
        let mut out = Vec::new();
        write_file_header(&mut out).unwrap();
        write_pixmap_page(&p, &PwgOptions::default(), &mut out).unwrap();

        let be32 = |bytes: &[u8]| i32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let page = &out[SYNC_WORD.len()..];

        // S5's literal offset 300 is `InsertSheet` here (always 0), not the
        // x-resolution.
        assert_eq!(be32(&page[300..304]), 0);
        // The x-resolution this writer actually emits, matching the
        // original's field order, lives at offset 276.
        assert_eq!(be32(&page[276..280]), 300);
        // The three offsets S5 does get right.
        assert_eq!(be32(&page[372..376]), 100);
        assert_eq!(be32(&page[384..388]), 8);
        assert_eq!(be32(&page[400..404]), 18);
    }
}

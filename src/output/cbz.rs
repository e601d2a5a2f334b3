//! CBZ output (§6, elaborated in §11.5): a zip archive of PNG page frames.
//!
//! Grounded on `output-cbz.c`'s naming scheme referenced by `_INDEX.md`:
//! pages are written `p0001.png`, `p0002.png`, … in document order, with no
//! separate manifest - archive listing order *is* page order. Uses the
//! `zip` crate (already a dependency for this exact purpose) rather than
//! hand-rolling a zip writer.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::{Error, FitzResult};
use crate::pixmap::Pixmap;

use super::png;

/// Writes every pixmap in `pages` as `p%04d.png` into a zip archive,
/// returning the archive bytes. 1-indexed, matching the original's
/// filename scheme exactly.
pub fn write_cbz(pages: &[Pixmap], savealpha: bool) -> FitzResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (i, page) in pages.iter().enumerate() {
        let name = format!("p{:04}.png", i + 1);
        zip.start_file(name, options)
            .map_err(|e| Error::Generic(format!("cbz: could not start entry: {e}")))?;
        let mut buf = Vec::new();
        png::write_png(page, savealpha, &mut buf)?;
        zip.write_all(&buf)?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| Error::Generic(format!("cbz: could not finalize archive: {e}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{Colorspace, Separations};

    #[test]
    fn archive_contains_one_entry_per_page_in_order() {
        let pages: Vec<Pixmap> = (0..3)
            .map(|_| Pixmap::new(Some(Colorspace::DEVICE_GRAY), 2, 2, Separations::new(), false))
            .collect();
        let bytes = write_cbz(&pages, false).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["p0001.png", "p0002.png", "p0003.png"]);
    }

    #[test]
    fn empty_page_list_produces_valid_empty_archive() {
        let bytes = write_cbz(&[], false).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }
}

//! Embedded metadata: Exif orientation, JPEG marker segments and the
//! metadata sidecar.
//!
//! ## Orientation
//!
//! [`orientation_from_exif`] walks just enough of a TIFF structure to find
//! tag 274 in IFD0. Anything unexpected yields [`Orientation::Unknown`]
//! rather than an error: orientation is advisory.
//!
//! ## JPEG segments
//!
//! [`scan_segments`] collects the metadata a JPEG-style marker stream
//! carries, for both real JPEG files and sidecars:
//!
//! | Marker | Signature | Attached as |
//! |---|---|---|
//! | APP1 | `Exif\0\0` | `exif` (TIFF bytes, signature stripped) |
//! | APP1 | `http://ns.adobe.com/xap/1.0/\0` | `xmp` |
//! | APP2 | `ICC_PROFILE\0` + seq + count | `icc`, reassembled |
//!
//! ICC chunks are kept only when they form one complete sequence in order.
//! Repeated Exif or XMP segments are dropped with a warning.
//!
//! ## Sidecar
//!
//! [`save_metadata`] writes a file that deliberately is not a JPEG codestream:
//!
//! ```text
//! FF 01 "Exiv2"                 TEM marker + magic
//! FF E1 len "Exif\0\0" ...      one or more Exif chunks
//! FF E2 len "ICC_PROFILE\0" n N ICC chunks, 1-based sequence
//! FF E1 len "http://ns.adobe.com/xap/1.0/\0" ...
//! FF D9                         EOI
//! ```
//!
//! Metadata tools that understand JPEG markers read it directly.

use crate::buffer::Orientation;
use crate::chain::Page;
use crate::error::{Error, Result, Warning, warn};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";
pub const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
pub const ICC_SIGNATURE: &[u8] = b"ICC_PROFILE\0";
pub const SIDECAR_MAGIC: &[u8] = b"\xff\x01Exiv2";

/// Largest Exif payload per APP1 segment.
const EXIF_CHUNK: usize = 65533 - 8;
/// Largest ICC payload per APP2 segment: 65535 minus length, signature, seq and count.
const ICC_CHUNK: usize = 65535 - 2 - 14;
const MAX_SEGMENT: usize = 65535 - 2;

const TAG_ORIENTATION: u16 = 274;
const TYPE_SHORT: u16 = 3;

// ---------------------------------------------------------------------------
// Exif orientation
// ---------------------------------------------------------------------------

/// Read the orientation from Exif bytes, with or without the `Exif\0\0`
/// signature in front of the TIFF header.
pub fn orientation_from_exif(exif: &[u8]) -> Orientation {
    let data = exif.strip_prefix(EXIF_SIGNATURE).unwrap_or(exif);
    if data.len() < 8 {
        return Orientation::Unknown;
    }

    let big_endian = match &data[0..2] {
        b"MM" => true,
        b"II" => false,
        _ => return Orientation::Unknown,
    };

    let read_u16 = |offset: usize| -> Option<u16> {
        let b = data.get(offset..offset + 2)?;
        Some(if big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    };

    let read_u32 = |offset: usize| -> Option<u32> {
        let b = data.get(offset..offset + 4)?;
        Some(if big_endian {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
    };

    if read_u16(2) != Some(42) {
        return Orientation::Unknown;
    }
    let Some(ifd) = read_u32(4).map(|o| o as usize) else {
        return Orientation::Unknown;
    };
    let Some(entry_count) = read_u16(ifd) else {
        return Orientation::Unknown;
    };

    for i in 0..entry_count as usize {
        let entry = ifd + 2 + i * 12;
        let (Some(tag), Some(typ), Some(count)) =
            (read_u16(entry), read_u16(entry + 2), read_u32(entry + 4))
        else {
            return Orientation::Unknown;
        };
        if tag != TAG_ORIENTATION {
            continue;
        }
        if typ != TYPE_SHORT || count < 1 {
            return Orientation::Unknown;
        }
        // A single SHORT sits left-justified in the value field.
        return read_u16(entry + 8)
            .map(|v| Orientation::from_u32(v as u32))
            .unwrap_or(Orientation::Unknown);
    }
    Orientation::Unknown
}

/// Set `page.orientation` from its Exif block when one is attached and
/// carries a valid value.
pub fn apply_exif_orientation(page: &mut Page) {
    if let Some(exif) = &page.exif {
        let orientation = orientation_from_exif(exif);
        if orientation != Orientation::Unknown {
            page.orientation = orientation;
        }
    }
}

/// Raw value bytes of `tag` in IFD number `ifd_index` (0-based, following
/// the next-IFD chain) of a classic TIFF file. Used for blobs the decoder
/// does not expose, such as ICC (34675) and XMP (700).
pub fn tiff_tag_bytes(data: &[u8], ifd_index: usize, tag: u16) -> Option<&[u8]> {
    let big_endian = match data.get(0..2)? {
        b"MM" => true,
        b"II" => false,
        _ => return None,
    };
    let read_u16 = |offset: usize| -> Option<u16> {
        let b = data.get(offset..offset + 2)?;
        Some(if big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    };
    let read_u32 = |offset: usize| -> Option<u32> {
        let b = data.get(offset..offset + 4)?;
        Some(if big_endian {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
    };

    if read_u16(2)? != 42 {
        return None;
    }
    let mut ifd = read_u32(4)? as usize;
    for _ in 0..ifd_index {
        let count = read_u16(ifd)? as usize;
        ifd = read_u32(ifd + 2 + count * 12)? as usize;
        if ifd == 0 {
            return None;
        }
    }

    let count = read_u16(ifd)? as usize;
    for i in 0..count {
        let entry = ifd + 2 + i * 12;
        if read_u16(entry)? != tag {
            continue;
        }
        let unit = match read_u16(entry + 2)? {
            1 | 2 | 6 | 7 => 1,
            3 | 8 => 2,
            4 | 9 | 11 => 4,
            5 | 10 | 12 => 8,
            _ => return None,
        };
        let len = (read_u32(entry + 4)? as usize).checked_mul(unit)?;
        let start = if len <= 4 { entry + 8 } else { read_u32(entry + 8)? as usize };
        return data.get(start..start.checked_add(len)?);
    }
    None
}

/// The embedded JPEG thumbnail of Exif (or whole-file TIFF) bytes: IFD1
/// first, then IFD0 as RAW formats store their preview there.
pub fn exif_thumbnail(exif: &[u8]) -> Option<Vec<u8>> {
    let data = exif.strip_prefix(EXIF_SIGNATURE).unwrap_or(exif);
    let parsed = match exif::Reader::new().read_raw(data.to_vec()) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(target: "glance_io::metadata", "no Exif structure: {e}");
            return None;
        }
    };
    let uint = |tag, ifd| parsed.get_field(tag, ifd).and_then(|f| f.value.get_uint(0));
    [exif::In::THUMBNAIL, exif::In::PRIMARY].into_iter().find_map(|ifd| {
        let offset = uint(exif::Tag::JPEGInterchangeFormat, ifd)? as usize;
        let len = uint(exif::Tag::JPEGInterchangeFormatLength, ifd)? as usize;
        let jpeg = parsed.buf().get(offset..offset.checked_add(len)?)?;
        jpeg.starts_with(&[0xFF, 0xD8]).then(|| jpeg.to_vec())
    })
}

// ---------------------------------------------------------------------------
// Marker segment scanning
// ---------------------------------------------------------------------------

/// Metadata blocks found in a marker stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segments {
    pub exif: Option<Vec<u8>>,
    pub icc: Option<Vec<u8>>,
    pub xmp: Option<Vec<u8>>,
}

impl Segments {
    /// Move the blocks onto a page.
    pub fn attach(self, page: &mut Page) {
        page.exif = self.exif.map(Arc::from);
        page.icc = self.icc.map(Arc::from);
        page.xmp = self.xmp.map(Arc::from);
    }
}

#[derive(Default)]
struct IccChunks {
    chunks: Vec<(u8, u8, Vec<u8>)>,
}

impl IccChunks {
    fn assemble(self, warnings: &mut Vec<Warning>) -> Option<Vec<u8>> {
        if self.chunks.is_empty() {
            return None;
        }
        let count = self.chunks[0].1;
        let in_order = self.chunks.len() == count as usize
            && self
                .chunks
                .iter()
                .enumerate()
                .all(|(i, (seq, n, _))| *seq as usize == i + 1 && *n == count);
        if !in_order {
            warn(warnings, "ICC profile chunks incomplete or out of order, ignored");
            return None;
        }
        Some(self.chunks.into_iter().flat_map(|(_, _, data)| data).collect())
    }
}

/// Collect Exif, XMP and ICC blocks from a marker stream beginning at
/// `start`. Stops at SOS or EOI.
pub fn scan_segments(data: &[u8], start: usize, warnings: &mut Vec<Warning>) -> Segments {
    let mut out = Segments::default();
    let mut icc = IccChunks::default();
    let mut pos = start;

    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = data[pos + 1];
        match marker {
            // Fill bytes before a marker.
            0xFF => {
                pos += 1;
                continue;
            }
            0xDA | 0xD9 => break,
            0x01 | 0xD0..=0xD8 => {
                pos += 2;
                continue;
            }
            _ => {}
        }

        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if len < 2 {
            warn(warnings, format!("marker segment at {pos} has length {len}"));
            break;
        }
        let seg_end = pos + 2 + len;
        if seg_end > data.len() {
            warn(warnings, format!("marker segment at {pos} runs past the end"));
            break;
        }
        let payload = &data[pos + 4..seg_end];

        match marker {
            0xE1 if payload.starts_with(EXIF_SIGNATURE) => {
                let body = &payload[EXIF_SIGNATURE.len()..];
                match &mut out.exif {
                    None => out.exif = Some(body.to_vec()),
                    // Oversized Exif continues in the next APP1 without its own TIFF header.
                    Some(existing) if !body.starts_with(b"II") && !body.starts_with(b"MM") => {
                        existing.extend_from_slice(body)
                    }
                    Some(_) => warn(warnings, "repeated Exif segment ignored"),
                }
            }
            0xE1 if payload.starts_with(XMP_SIGNATURE) => {
                if out.xmp.is_some() {
                    warn(warnings, "repeated XMP segment ignored");
                } else {
                    out.xmp = Some(payload[XMP_SIGNATURE.len()..].to_vec());
                }
            }
            0xE2 if payload.starts_with(ICC_SIGNATURE) && payload.len() >= 14 => {
                let seq = payload[12];
                let count = payload[13];
                icc.chunks.push((seq, count, payload[14..].to_vec()));
            }
            _ => {}
        }
        pos = seg_end;
    }

    out.icc = icc.assemble(warnings);
    out
}

// ---------------------------------------------------------------------------
// Sidecar
// ---------------------------------------------------------------------------

fn push_segment(out: &mut Vec<u8>, marker: u8, parts: &[&[u8]]) {
    let len: usize = 2 + parts.iter().map(|p| p.len()).sum::<usize>();
    out.extend_from_slice(&[0xFF, marker]);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    for part in parts {
        out.extend_from_slice(part);
    }
}

/// Serialize the page's Exif, ICC and XMP into sidecar bytes.
pub fn sidecar_bytes(page: &Page) -> Vec<u8> {
    let mut out = SIDECAR_MAGIC.to_vec();

    if let Some(exif) = &page.exif {
        let body = exif.strip_prefix(EXIF_SIGNATURE).unwrap_or(exif);
        for chunk in body.chunks(EXIF_CHUNK) {
            push_segment(&mut out, 0xE1, &[EXIF_SIGNATURE, chunk]);
        }
    }

    if let Some(icc) = &page.icc {
        let chunks: Vec<&[u8]> = icc.chunks(ICC_CHUNK).collect();
        if chunks.len() > 255 {
            debug!(target: "glance_io::metadata", "ICC profile of {} bytes too large for a sidecar", icc.len());
        } else {
            let count = chunks.len() as u8;
            for (i, chunk) in chunks.iter().enumerate() {
                push_segment(&mut out, 0xE2, &[ICC_SIGNATURE, &[i as u8 + 1, count], chunk]);
            }
        }
    }

    if let Some(xmp) = &page.xmp {
        if xmp.len() + XMP_SIGNATURE.len() <= MAX_SEGMENT {
            push_segment(&mut out, 0xE1, &[XMP_SIGNATURE, xmp]);
        } else {
            debug!(target: "glance_io::metadata", "XMP packet of {} bytes does not fit one segment", xmp.len());
        }
    }

    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// Write the page's metadata sidecar to `path`, atomically.
pub fn save_metadata(page: &Page, path: &Path) -> Result<()> {
    let bytes = sidecar_bytes(page);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::open(dir, e))?;
    tmp.write_all(&bytes).map_err(|e| Error::open(path, e))?;
    tmp.persist(path).map_err(|e| Error::open(path, e.error))?;
    Ok(())
}

/// Parse a sidecar written by [`save_metadata`].
pub fn read_metadata(path: &Path) -> Result<Segments> {
    let data = std::fs::read(path).map_err(|e| Error::open(path, e))?;
    parse_sidecar(&data)
}

pub fn parse_sidecar(data: &[u8]) -> Result<Segments> {
    if !data.starts_with(SIDECAR_MAGIC) {
        return Err(Error::Metadata("missing sidecar magic".into()));
    }
    let mut warnings = Vec::new();
    let segments = scan_segments(data, SIDECAR_MAGIC.len(), &mut warnings);
    if let Some(w) = warnings.first() {
        return Err(Error::Metadata(w.to_string()));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Format};
    use crate::test_helpers::exif_with_orientation;
    use tempfile::TempDir;

    fn page() -> Page {
        Page::from_buffer(Buffer::new(Format::Xrgb32, 1, 1).unwrap())
    }

    // =========================================================================
    // orientation_from_exif
    // =========================================================================

    #[test]
    fn orientation_little_and_big_endian() {
        assert_eq!(orientation_from_exif(&exif_with_orientation(6, false)), Orientation::RightTop);
        assert_eq!(orientation_from_exif(&exif_with_orientation(3, true)), Orientation::BottomRight);
    }

    #[test]
    fn tiff_tag_bytes_follows_ifd_chain() {
        let data = crate::test_helpers::exif_with_thumbnail(b"JPEGDATA");
        assert_eq!(tiff_tag_bytes(&data, 0, TAG_ORIENTATION), Some(&[1u8, 0][..]));
        assert_eq!(tiff_tag_bytes(&data, 1, 514), Some(&8u32.to_le_bytes()[..]));
        assert_eq!(tiff_tag_bytes(&data, 1, 274), None);
        assert_eq!(tiff_tag_bytes(&data, 2, 514), None);
    }

    #[test]
    fn exif_thumbnail_reads_ifd1_jpeg() {
        let jpeg = crate::test_helpers::solid_jpeg(8, 8, [1, 2, 3], None);
        let data = crate::test_helpers::exif_with_thumbnail(&jpeg);
        assert_eq!(exif_thumbnail(&data), Some(jpeg));
        assert_eq!(exif_thumbnail(&exif_with_orientation(1, false)), None);
    }

    #[test]
    fn orientation_accepts_exif_signature() {
        let mut data = EXIF_SIGNATURE.to_vec();
        data.extend(exif_with_orientation(8, true));
        assert_eq!(orientation_from_exif(&data), Orientation::LeftBottom);
    }

    #[test]
    fn orientation_out_of_range_is_unknown() {
        assert_eq!(orientation_from_exif(&exif_with_orientation(9, false)), Orientation::Unknown);
        assert_eq!(orientation_from_exif(&exif_with_orientation(0, false)), Orientation::Unknown);
    }

    #[test]
    fn orientation_garbage_is_unknown() {
        assert_eq!(orientation_from_exif(b""), Orientation::Unknown);
        assert_eq!(orientation_from_exif(b"II*\0\xff\xff\xff\xff"), Orientation::Unknown);
        assert_eq!(orientation_from_exif(b"XX*\0\x08\0\0\0"), Orientation::Unknown);
    }

    #[test]
    fn orientation_wrong_type_is_unknown() {
        let mut data = exif_with_orientation(6, false);
        // Entry type sits at IFD offset 8 + 2 (count) + 2 (tag).
        data[12] = 4;
        assert_eq!(orientation_from_exif(&data), Orientation::Unknown);
    }

    // =========================================================================
    // scan_segments
    // =========================================================================

    fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, marker];
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn icc_segment(seq: u8, count: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = ICC_SIGNATURE.to_vec();
        payload.extend_from_slice(&[seq, count]);
        payload.extend_from_slice(body);
        segment(0xE2, &payload)
    }

    #[test]
    fn reassembles_icc_in_order() {
        let mut data = vec![0xFF, 0xD8];
        data.extend(icc_segment(1, 2, b"abc"));
        data.extend(icc_segment(2, 2, b"def"));
        let mut warnings = Vec::new();
        let s = scan_segments(&data, 2, &mut warnings);
        assert_eq!(s.icc.as_deref(), Some(&b"abcdef"[..]));
        assert!(warnings.is_empty());
    }

    #[test]
    fn drops_out_of_order_icc() {
        let mut data = vec![0xFF, 0xD8];
        data.extend(icc_segment(2, 2, b"def"));
        data.extend(icc_segment(1, 2, b"abc"));
        let mut warnings = Vec::new();
        assert_eq!(scan_segments(&data, 2, &mut warnings).icc, None);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn drops_incomplete_icc() {
        let mut data = vec![0xFF, 0xD8];
        data.extend(icc_segment(1, 3, b"abc"));
        let mut warnings = Vec::new();
        assert_eq!(scan_segments(&data, 2, &mut warnings).icc, None);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn repeated_xmp_warns_and_keeps_first() {
        let mut data = vec![0xFF, 0xD8];
        for body in [&b"<first/>"[..], b"<second/>"] {
            let mut payload = XMP_SIGNATURE.to_vec();
            payload.extend_from_slice(body);
            data.extend(segment(0xE1, &payload));
        }
        let mut warnings = Vec::new();
        let s = scan_segments(&data, 2, &mut warnings);
        assert_eq!(s.xmp.as_deref(), Some(&b"<first/>"[..]));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn stops_at_start_of_scan() {
        let mut data = vec![0xFF, 0xD8];
        data.extend(segment(0xDA, b"\x00\x01"));
        let mut payload = EXIF_SIGNATURE.to_vec();
        payload.extend(exif_with_orientation(1, false));
        data.extend(segment(0xE1, &payload));
        assert_eq!(scan_segments(&data, 2, &mut Vec::new()).exif, None);
    }

    // =========================================================================
    // Sidecar
    // =========================================================================

    #[test]
    fn sidecar_layout() {
        let mut p = page();
        p.exif = Some(Arc::from(exif_with_orientation(6, false)));
        let bytes = sidecar_bytes(&p);
        assert!(bytes.starts_with(b"\xff\x01Exiv2\xff\xe1"));
        assert!(bytes.ends_with(&[0xFF, 0xD9]));
    }

    #[test]
    fn sidecar_roundtrip_preserves_orientation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photo.exv");
        for value in 1..=8u16 {
            let mut p = page();
            p.exif = Some(Arc::from(exif_with_orientation(value, value % 2 == 0)));
            save_metadata(&p, &path).unwrap();
            let back = read_metadata(&path).unwrap();
            assert_eq!(
                orientation_from_exif(back.exif.as_deref().unwrap()),
                orientation_from_exif(p.exif.as_deref().unwrap())
            );
        }
    }

    #[test]
    fn sidecar_splits_large_blocks() {
        let mut p = page();
        let icc: Vec<u8> = (0..150_000u32).map(|i| i as u8).collect();
        let mut exif = exif_with_orientation(5, false);
        exif.resize(70_000, 0xAB);
        p.icc = Some(Arc::from(icc.clone()));
        p.exif = Some(Arc::from(exif.clone()));
        p.xmp = Some(Arc::from(&b"<x:xmpmeta/>"[..]));
        let back = parse_sidecar(&sidecar_bytes(&p)).unwrap();
        assert_eq!(back.icc.unwrap(), icc);
        assert_eq!(back.exif.unwrap(), exif);
        assert_eq!(back.xmp.as_deref(), Some(&b"<x:xmpmeta/>"[..]));
    }

    #[test]
    fn sidecar_without_magic_is_rejected() {
        assert!(matches!(parse_sidecar(b"\xff\xd8\xff\xd9"), Err(Error::Metadata(_))));
    }

    #[test]
    fn apply_orientation_ignores_invalid_exif() {
        let mut p = page();
        p.orientation = Orientation::TopLeft;
        p.exif = Some(Arc::from(&b"nonsense"[..]));
        apply_exif_orientation(&mut p);
        assert_eq!(p.orientation, Orientation::TopLeft);
        p.exif = Some(Arc::from(exif_with_orientation(6, true)));
        apply_exif_orientation(&mut p);
        assert_eq!(p.orientation, Orientation::RightTop);
    }
}

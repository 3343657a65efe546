//! WebP through `image-webp`, with our own RIFF scan for metadata.
//!
//! A truncated still image is repaired by padding its bitstream chunk to
//! the declared length twice, once with `0x00` and once with `0xFF`. Rows
//! above the first row where the two decodes disagree came from real data;
//! everything below is cleared to transparent black and a warning names
//! the decoded rectangle.

use super::animate::{animated_page, buffer_from_rgba, frame_buffer};
use super::riff::{self, Chunk};
use super::{Codec, DecodeContext};
use crate::chain::{Frame, Image, Page};
use crate::error::{Error, Result, Warning, warn};
use image_webp::{DecodingError, LoopCount, WebPDecoder};
use std::io::Cursor;
use std::sync::Arc;

pub struct WebpCodec;

impl Codec for WebpCodec {
    fn name(&self) -> &'static str {
        "webp"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["image/webp"]
    }

    fn decode(&self, data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image> {
        if !riff::is_webp(data) {
            return Err(Error::Unsupported);
        }
        let decoder = WebPDecoder::new(Cursor::new(data));
        let mut page = match decoder {
            Ok(mut decoder) if decoder.is_animated() => decode_animation(&mut decoder, ctx, warnings)?,
            Ok(mut decoder) => match read_still(&mut decoder) {
                Ok((w, h, rgba)) => Page::from_buffer(buffer_from_rgba(w, h, &rgba, ctx)?),
                Err(e) => repair_still(data, ctx, warnings, &e.to_string())?,
            },
            Err(e) => repair_still(data, ctx, warnings, &e.to_string())?,
        };
        attach_chunks(&mut page, data, warnings);
        Ok(Image::new(page))
    }
}

/// Decode a still image to RGBA8.
fn read_still<R: std::io::BufRead + std::io::Seek>(
    decoder: &mut WebPDecoder<R>,
) -> std::result::Result<(u32, u32, Vec<u8>), DecodingError> {
    let (w, h) = decoder.dimensions();
    let size = decoder.output_buffer_size().ok_or(DecodingError::ImageTooLarge)?;
    let mut buf = vec![0u8; size];
    decoder.read_image(&mut buf)?;
    Ok((w, h, to_rgba(buf, w, h)))
}

fn to_rgba(buf: Vec<u8>, w: u32, h: u32) -> Vec<u8> {
    let pixels = w as usize * h as usize;
    if buf.len() >= pixels * 4 {
        return buf;
    }
    buf.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect()
}

fn decode_animation<R: std::io::BufRead + std::io::Seek>(
    decoder: &mut WebPDecoder<R>,
    ctx: &DecodeContext,
    warnings: &mut Vec<Warning>,
) -> Result<Page> {
    let (w, h) = decoder.dimensions();
    let size = decoder
        .output_buffer_size()
        .ok_or_else(|| Error::Corrupt("WebP canvas too large".into()))?;
    let loops = match decoder.loop_count() {
        LoopCount::Forever => 0,
        LoopCount::Times(n) => n.get() as u32,
    };
    let mut frames = Vec::new();
    let mut buf = crate::buffer::try_zeroed(size)?;
    for _ in 0..decoder.num_frames() {
        match decoder.read_frame(&mut buf) {
            Ok(duration) => {
                let rgba = to_rgba(buf.clone(), w, h);
                frames.push(Frame::with_duration(frame_buffer(w, h, &rgba, ctx)?, duration));
            }
            Err(e) if !frames.is_empty() => {
                warn(warnings, format!("WebP animation truncated after {} frames: {e}", frames.len()));
                break;
            }
            Err(e) => return Err(Error::Corrupt(format!("WebP frame: {e}"))),
        }
    }
    animated_page(frames, loops).ok_or_else(|| Error::Corrupt("WebP animation without frames".into()))
}

// ---------------------------------------------------------------------------
// Truncation repair
// ---------------------------------------------------------------------------

fn repair_still(data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>, reason: &str) -> Result<Page> {
    let image_chunk = riff::chunks(data)
        .find(|c| &c.fourcc == b"VP8 " || &c.fourcc == b"VP8L")
        .filter(Chunk::is_truncated)
        .ok_or_else(|| Error::Corrupt(format!("WebP: {reason}")))?;

    let decode_padded = |fill: u8| {
        let padded = padded_file(data, &image_chunk, fill);
        WebPDecoder::new(Cursor::new(&padded[..])).and_then(|mut d| read_still(&mut d))
    };

    let (w, h, mut rgba, rows) = match (decode_padded(0x00), decode_padded(0xFF)) {
        (Ok((w, h, low)), Ok((_, _, high))) => {
            let stride = w as usize * 4;
            let rows = low
                .chunks_exact(stride)
                .zip(high.chunks_exact(stride))
                .position(|(a, b)| a != b)
                .unwrap_or(h as usize);
            (w, h, low, rows)
        }
        (Ok((w, h, rgba)), Err(_)) | (Err(_), Ok((w, h, rgba))) => {
            let rows = h as usize * image_chunk.body.len() / image_chunk.declared.max(1);
            (w, h, rgba, rows)
        }
        (Err(_), Err(_)) => {
            let (w, h) = canvas_size(data).ok_or_else(|| Error::Corrupt(format!("WebP: {reason}")))?;
            let rgba = crate::buffer::try_zeroed(w as usize * h as usize * 4)?;
            (w, h, rgba, 0)
        }
    };

    let stride = w as usize * 4;
    rgba[rows.min(h as usize) * stride..].fill(0);
    warn(warnings, format!("WebP truncated: decoded {w}x{rows} of {w}x{h}"));
    Ok(Page::from_buffer(buffer_from_rgba(w, h, &rgba, ctx)?))
}

/// A copy of `data` ending with `chunk` padded to its declared length.
fn padded_file(data: &[u8], chunk: &Chunk, fill: u8) -> Vec<u8> {
    let mut out = data[..chunk.body_offset() + chunk.body.len()].to_vec();
    out.resize(chunk.body_offset() + chunk.declared, fill);
    if chunk.declared % 2 == 1 {
        out.push(0);
    }
    let riff_size = (out.len() - 8) as u32;
    out[4..8].copy_from_slice(&riff_size.to_le_bytes());
    out
}

/// Canvas size from VP8X, or from the bitstream header when the frame
/// header survived.
fn canvas_size(data: &[u8]) -> Option<(u32, u32)> {
    for chunk in riff::chunks(data) {
        let b = chunk.body;
        match &chunk.fourcc {
            b"VP8X" if b.len() >= 10 => {
                return Some((riff::read_u24(&b[4..7]) + 1, riff::read_u24(&b[7..10]) + 1));
            }
            b"VP8L" if b.len() >= 5 && b[0] == 0x2F => {
                let bits = u32::from_le_bytes([b[1], b[2], b[3], b[4]]);
                return Some(((bits & 0x3FFF) + 1, ((bits >> 14) & 0x3FFF) + 1));
            }
            b"VP8 " if b.len() >= 10 && b[3..6] == [0x9D, 0x01, 0x2A] => {
                let w = u16::from_le_bytes([b[6], b[7]]) & 0x3FFF;
                let h = u16::from_le_bytes([b[8], b[9]]) & 0x3FFF;
                return Some((w as u32, h as u32));
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Metadata chunks
// ---------------------------------------------------------------------------

fn attach_chunks(page: &mut Page, data: &[u8], warnings: &mut Vec<Warning>) {
    for chunk in riff::chunks(data) {
        if chunk.is_truncated() {
            continue;
        }
        let slot = match &chunk.fourcc {
            b"EXIF" => &mut page.exif,
            b"ICCP" => &mut page.icc,
            b"XMP " => &mut page.xmp,
            b"THUM" => &mut page.thum,
            b"ANIM" if chunk.body.len() >= 6 => {
                page.loops = u16::from_le_bytes([chunk.body[4], chunk.body[5]]) as u32;
                continue;
            }
            _ => continue,
        };
        if slot.is_some() {
            let name = String::from_utf8_lossy(&chunk.fourcc).trim_end().to_string();
            warn(warnings, format!("repeated {name} chunk ignored"));
            continue;
        }
        let body = match &chunk.fourcc {
            // Some writers keep the JPEG APP1 signature.
            b"EXIF" => chunk.body.strip_prefix(b"Exif\0\0").unwrap_or(chunk.body),
            _ => chunk.body,
        };
        *slot = Some(Arc::from(body));
    }
}

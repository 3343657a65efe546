//! Camera RAW through `rawloader`.
//!
//! Demosaicing is a 2×2 superpixel: each Bayer quad becomes one output
//! pixel, so the result is half the sensor size on each axis. That is
//! plenty for browsing and thumbnails; the embedded preview
//! ([`embedded_preview`]) is usually preferred for the latter anyway.

use super::{Codec, DecodeContext};
use crate::buffer::{Buffer, Format, Orientation, pack_argb};
use crate::chain::{Image, Page};
use crate::error::{Error, Result, Warning};
use crate::metadata::exif_thumbnail;
use std::io::Cursor;
use tracing::debug;

const GAMMA: f32 = 1.0 / 2.2;

pub struct RawCodec;

impl Codec for RawCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &[
            "image/x-canon-cr2",
            "image/x-canon-cr3",
            "image/x-nikon-nef",
            "image/x-sony-arw",
            "image/x-fuji-raf",
            "image/x-olympus-orf",
            "image/x-panasonic-rw2",
            "image/x-minolta-mrw",
            "image/x-adobe-dng",
        ]
    }

    fn decode(&self, data: &[u8], _ctx: &DecodeContext, _warnings: &mut Vec<Warning>) -> Result<Image> {
        if !looks_like_raw(data) {
            return Err(Error::Unsupported);
        }
        // Plain TIFFs share the magic; anything rawloader refuses belongs
        // to the next codec.
        let raw = rawloader::decode(&mut Cursor::new(data)).map_err(|e| {
            debug!(target: "glance_io::decode", "rawloader: {e:?}");
            Error::Unsupported
        })?;

        let buffer = develop(&raw)?;
        let mut page = Page::from_buffer(buffer);
        page.orientation = Orientation::from_u32(raw.orientation.to_u16() as u32);
        if page.orientation == Orientation::Unknown {
            page.orientation = Orientation::TopLeft;
        }
        Ok(Image::new(page))
    }
}

fn looks_like_raw(data: &[u8]) -> bool {
    data.starts_with(b"II*\0")
        || data.starts_with(b"MM\0*")
        || data.starts_with(b"FUJIFILM")
        || data.starts_with(b"IIRO")
        || data.starts_with(b"IIRS")
        || data.starts_with(b"IIU\0")
        || data.starts_with(b"\0MRM")
        || (data.len() >= 12 && &data[4..8] == b"ftyp" && &data[8..11] == b"crx")
}

/// The camera's JPEG preview, when the file is TIFF-structured.
pub fn embedded_preview(data: &[u8]) -> Option<Vec<u8>> {
    if !looks_like_raw(data) {
        return None;
    }
    exif_thumbnail(data)
}

/// Superpixel demosaic with black/white levels, white balance and gamma.
fn develop(raw: &rawloader::RawImage) -> Result<Buffer> {
    let sample = |i: usize| -> f32 {
        match &raw.data {
            rawloader::RawImageData::Integer(d) => d.get(i).copied().unwrap_or(0) as f32,
            rawloader::RawImageData::Float(d) => d.get(i).copied().unwrap_or(0.0),
        }
    };
    let wb = white_balance(raw.wb_coeffs);
    let level = |c: usize, v: f32| -> f32 {
        let black = raw.blacklevels[c] as f32;
        let white = raw.whitelevels[c] as f32;
        let range = (white - black).max(1.0);
        ((v - black) / range * wb[c]).clamp(0.0, 1.0)
    };
    let encode = |v: f32| (v.powf(GAMMA) * 255.0 + 0.5) as u8;

    if raw.cpp == 3 {
        let (w, h) = (raw.width as u32, raw.height as u32);
        let mut buffer = Buffer::new(Format::Xrgb32, w, h)?;
        for y in 0..h {
            let row = buffer.row_mut(y);
            for x in 0..w as usize {
                let i = (y as usize * w as usize + x) * 3;
                let rgb = [0, 1, 2].map(|c| encode(level(c, sample(i + c))));
                row[x * 4..x * 4 + 4].copy_from_slice(&pack_argb(0xff, rgb[0], rgb[1], rgb[2]).to_ne_bytes());
            }
        }
        return Ok(buffer);
    }

    let (w, h) = ((raw.width / 2) as u32, (raw.height / 2) as u32);
    if w == 0 || h == 0 {
        return Err(Error::Corrupt("RAW sensor smaller than one Bayer quad".into()));
    }
    let mut buffer = Buffer::new(Format::Xrgb32, w, h)?;
    for y in 0..h as usize {
        let row = buffer.row_mut(y as u32);
        for x in 0..w as usize {
            let mut sum = [0f32; 3];
            let mut count = [0u32; 3];
            for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                let (sy, sx) = (y * 2 + dy, x * 2 + dx);
                let color = match raw.cfa.color_at(sy, sx) {
                    0 => 0,
                    2 => 2,
                    _ => 1,
                };
                let v = sample(sy * raw.width + sx);
                sum[color] += level(color, v);
                count[color] += 1;
            }
            let rgb = [0, 1, 2].map(|c| encode(if count[c] > 0 { sum[c] / count[c] as f32 } else { 0.0 }));
            row[x * 4..x * 4 + 4].copy_from_slice(&pack_argb(0xff, rgb[0], rgb[1], rgb[2]).to_ne_bytes());
        }
    }
    Ok(buffer)
}

/// Multipliers normalized to green; missing coefficients mean neutral.
fn white_balance(coeffs: [f32; 4]) -> [f32; 4] {
    let green = coeffs[1];
    if !green.is_finite() || green <= 0.0 {
        return [1.0; 4];
    }
    coeffs.map(|c| if c.is_finite() && c > 0.0 { c / green } else { 1.0 })
}

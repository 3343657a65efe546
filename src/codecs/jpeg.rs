//! JPEG through `zune-jpeg`.
//!
//! ```text
//! bytes ─► headers ─► RGB  ─► (deblock) ─► XRGB32 ──────────────► color pass
//!                  └► CMYK ─────────────► transform_cmyk ► ARGB32 (converted)
//! ```
//!
//! Exif, XMP and ICC come from our own marker scan rather than the decoder,
//! so the same rules apply to every JPEG-like container.
//!
//! Axes above 32767 pixels are reduced by the largest n/8 that fits, which
//! keeps the result addressable by 16-bit consumers.

use super::{Codec, DecodeContext};
use crate::buffer::{Buffer, Format, pack_argb};
use crate::chain::{Image, Page};
use crate::error::{Error, Result, Warning, warn};
use crate::metadata::scan_segments;
use image::imageops::{self, FilterType};
use rayon::prelude::*;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

/// Largest axis a decoded JPEG may keep.
pub const MAX_AXIS: u32 = 32767;

/// Deblocking passes on the enhanced path.
const DEBLOCK_ITERATIONS: usize = 2;
/// Step size below which a block edge is treated as an artifact.
const DEBLOCK_THRESHOLD: i32 = 20;

pub struct JpegCodec;

impl Codec for JpegCodec {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["image/jpeg", "image/pjpeg"]
    }

    fn decode(&self, data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image> {
        if !data.starts_with(&[0xFF, 0xD8]) {
            return Err(Error::Unsupported);
        }

        let options = DecoderOptions::default()
            .set_max_width(u16::MAX as usize)
            .set_max_height(u16::MAX as usize);
        let mut probe = JpegDecoder::new_with_options(data, options);
        probe
            .decode_headers()
            .map_err(|e| Error::Corrupt(format!("JPEG header: {e:?}")))?;
        let (width, height) = probe
            .dimensions()
            .ok_or_else(|| Error::Corrupt("JPEG without dimensions".into()))?;
        let cmyk = matches!(probe.get_input_colorspace(), Some(ColorSpace::CMYK | ColorSpace::YCCK));

        let out_space = if cmyk { ColorSpace::CMYK } else { ColorSpace::RGB };
        let mut decoder = JpegDecoder::new_with_options(data, options.jpeg_set_out_colorspace(out_space));
        let mut samples = decoder
            .decode()
            .map_err(|e| Error::Corrupt(format!("JPEG data: {e:?}")))?;
        let (mut width, mut height) = (width as u32, height as u32);

        if let Some(n) = downscale_factor(width, height) {
            let (w, h) = (width * n / 8, height * n / 8);
            warn(warnings, format!("JPEG {width}x{height} too large, reduced by {n}/8 to {w}x{h}"));
            samples = if cmyk {
                resize_samples::<image::Rgba<u8>>(samples, width, height, w, h)?
            } else {
                resize_samples::<image::Rgb<u8>>(samples, width, height, w, h)?
            };
            (width, height) = (w, h);
        }

        let segments = scan_segments(data, 2, warnings);
        let mut page = if cmyk {
            let src = segments.icc.as_deref().and_then(|icc| ctx.cmm.get_profile(icc));
            let (buffer, converted) = ctx.cmm.transform_cmyk(&samples, width, height, src.as_ref(), ctx.target)?;
            let mut page = Page::from_buffer(buffer);
            // A CMYK profile cannot describe the RGB result, so no second pass.
            page.color_converted = converted || segments.icc.is_some();
            page
        } else {
            if ctx.enhance {
                deblock(&mut samples, width as usize, height as usize, DEBLOCK_ITERATIONS);
            }
            Page::from_buffer(rgb_to_xrgb32(&samples, width, height)?)
        };
        segments.attach(&mut page);
        Ok(Image::new(page))
    }
}

/// `n` in 1..8 such that both axes scaled by n/8 fit, or `None` when no
/// reduction is needed.
pub fn downscale_factor(width: u32, height: u32) -> Option<u32> {
    if width <= MAX_AXIS && height <= MAX_AXIS {
        return None;
    }
    (1..8).rev().find(|n| width * n / 8 <= MAX_AXIS && height * n / 8 <= MAX_AXIS)
}

fn resize_samples<P>(samples: Vec<u8>, width: u32, height: u32, w: u32, h: u32) -> Result<Vec<u8>>
where
    P: image::Pixel<Subpixel = u8> + 'static,
{
    let source = image::ImageBuffer::<P, Vec<u8>>::from_raw(width, height, samples)
        .ok_or_else(|| Error::Corrupt("JPEG sample count mismatch".into()))?;
    Ok(imageops::resize(&source, w, h, FilterType::Triangle).into_raw())
}

fn rgb_to_xrgb32(rgb: &[u8], width: u32, height: u32) -> Result<Buffer> {
    let mut buffer = Buffer::new(Format::Xrgb32, width, height)?;
    let w = width as usize;
    for y in 0..height {
        let src = &rgb[y as usize * w * 3..(y as usize + 1) * w * 3];
        for (dst, p) in buffer.row_mut(y).chunks_exact_mut(4).zip(src.chunks_exact(3)) {
            dst.copy_from_slice(&pack_argb(0xff, p[0], p[1], p[2]).to_ne_bytes());
        }
    }
    Ok(buffer)
}

// ---------------------------------------------------------------------------
// Deblocking
// ---------------------------------------------------------------------------

/// Smooth small steps across 8×8 block boundaries of packed RGB samples.
///
/// Edges between columns are filtered row by row in place; edges between
/// rows read from a snapshot so every row can be computed independently.
pub fn deblock(rgb: &mut [u8], width: usize, height: usize, iterations: usize) {
    let stride = width * 3;
    if width < 16 && height < 16 {
        return;
    }
    for _ in 0..iterations {
        rgb.par_chunks_mut(stride).for_each(|row| {
            for x in (8..width).step_by(8) {
                if x < 2 || x + 1 >= width {
                    continue;
                }
                for c in 0..3 {
                    let at = |i: usize| row[i * 3 + c] as i32;
                    let (p1, p0, q0, q1) = (at(x - 2), at(x - 1), at(x), at(x + 1));
                    if let Some(d) = edge_delta(p1, p0, q0, q1) {
                        row[(x - 1) * 3 + c] = (p0 + d).clamp(0, 255) as u8;
                        row[x * 3 + c] = (q0 - d).clamp(0, 255) as u8;
                    }
                }
            }
        });

        let snapshot = rgb.to_vec();
        let sample = |y: usize, i: usize| snapshot[y * stride + i] as i32;
        rgb.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
            // This row is q0 of the edge above it, or p0 of the edge below it.
            let (edge, is_q) = match y % 8 {
                0 if y >= 2 && y + 1 < height => (y, true),
                7 if y >= 1 && y + 2 < height => (y + 1, false),
                _ => return,
            };
            for (i, value) in row.iter_mut().enumerate() {
                let (p1, p0, q0, q1) = (
                    sample(edge - 2, i),
                    sample(edge - 1, i),
                    sample(edge, i),
                    sample(edge + 1, i),
                );
                if let Some(d) = edge_delta(p1, p0, q0, q1) {
                    let v = if is_q { q0 - d } else { p0 + d };
                    *value = v.clamp(0, 255) as u8;
                }
            }
        });
    }
}

fn edge_delta(p1: i32, p0: i32, q0: i32, q1: i32) -> Option<i32> {
    let t = DEBLOCK_THRESHOLD;
    let step = q0 - p0;
    if step.abs() < t && (p1 - p0).abs() < t / 2 && (q1 - q0).abs() < t / 2 && step != 0 {
        Some(step / 4)
    } else {
        None
    }
}

//! PNG and APNG through the `png` crate.
//!
//! | Source | Output |
//! |---|---|
//! | 8-bit, opaque, single frame | XRGB32 |
//! | 8-bit with alpha | ARGB32 |
//! | 16-bit, single frame | 4×16-bit intermediate, packed to RGB30 / RGBA128F |
//! | APNG | ARGB32 canvases from the shared compositor |
//!
//! Metadata: `iCCP` → `icc`, `eXIf` → `exif`, `tEXt`/`iTXt` → `text`.
//! Without `iCCP` or `sRGB`, a `gAMA` (plus `cHRM`) chunk is turned into a
//! synthesized profile so the color pass treats the gamma correctly.
//! A truncated non-interlaced image keeps the rows that arrived.

use super::animate::{
    Blend, Compositor, Disposal, Rect, animated_page, buffer_from_rgba, buffer_from_wide, frame_buffer,
};
use super::{Codec, DecodeContext};
use crate::buffer::Wide16;
use crate::chain::{Frame, Image, Page};
use crate::error::{Error, Result, Warning, warn};
use std::io::Cursor;
use std::sync::Arc;

pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

pub struct PngCodec;

impl Codec for PngCodec {
    fn name(&self) -> &'static str {
        "png"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["image/png", "image/apng"]
    }

    fn decode(&self, data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image> {
        if !data.starts_with(PNG_SIGNATURE) {
            return Err(Error::Unsupported);
        }
        let mut decoder = png::Decoder::new(Cursor::new(data));
        decoder.set_transformations(png::Transformations::EXPAND);
        let mut reader = decoder
            .read_info()
            .map_err(|e| Error::Corrupt(format!("PNG header: {e}")))?;

        let mut page = if reader.info().animation_control.is_some() {
            decode_animation(&mut reader, ctx, warnings)?
        } else {
            decode_still(&mut reader, ctx, warnings)?
        };
        attach_metadata(&mut page, reader.info(), data, ctx, warnings);
        Ok(Image::new(page))
    }
}

/// Samples as they come out of the decoder after EXPAND.
struct Samples<'a> {
    data: &'a [u8],
    color: png::ColorType,
    depth: png::BitDepth,
}

impl Samples<'_> {
    fn channels(&self) -> usize {
        match self.color {
            png::ColorType::Grayscale | png::ColorType::Indexed => 1,
            png::ColorType::GrayscaleAlpha => 2,
            png::ColorType::Rgb => 3,
            png::ColorType::Rgba => 4,
        }
    }

    fn is_deep(&self) -> bool {
        self.depth == png::BitDepth::Sixteen
    }

    fn sample(&self, i: usize) -> u16 {
        if self.is_deep() {
            u16::from_be_bytes([self.data[i * 2], self.data[i * 2 + 1]])
        } else {
            self.data[i] as u16 * 257
        }
    }

    /// Expand to straight RGBA16.
    fn to_rgba16(&self, pixels: usize) -> Vec<u16> {
        let ch = self.channels();
        let mut out = Vec::with_capacity(pixels * 4);
        for p in 0..pixels {
            let base = p * ch;
            let px = match ch {
                1 => {
                    let g = self.sample(base);
                    [g, g, g, u16::MAX]
                }
                2 => {
                    let g = self.sample(base);
                    [g, g, g, self.sample(base + 1)]
                }
                3 => [self.sample(base), self.sample(base + 1), self.sample(base + 2), u16::MAX],
                _ => [
                    self.sample(base),
                    self.sample(base + 1),
                    self.sample(base + 2),
                    self.sample(base + 3),
                ],
            };
            out.extend_from_slice(&px);
        }
        out
    }

    fn to_rgba8(&self, pixels: usize) -> Vec<u8> {
        self.to_rgba16(pixels).into_iter().map(|c| (c >> 8) as u8).collect()
    }
}

fn decode_still<R: std::io::Read>(
    reader: &mut png::Reader<R>,
    ctx: &DecodeContext,
    warnings: &mut Vec<Warning>,
) -> Result<Page> {
    let (width, height) = (reader.info().width, reader.info().height);
    let interlaced = reader.info().interlaced;
    let (color, depth) = reader.output_color_type();
    let line = reader.output_line_size(width);
    let mut buf = crate::buffer::try_zeroed(line * height as usize)?;

    if interlaced {
        reader
            .next_frame(&mut buf)
            .map_err(|e| Error::Corrupt(format!("PNG data: {e}")))?;
    } else {
        let mut rows = 0usize;
        let mut failure = None;
        while rows < height as usize {
            match reader.next_row() {
                Ok(Some(row)) => {
                    let bytes = row.data();
                    let n = bytes.len().min(line);
                    buf[rows * line..rows * line + n].copy_from_slice(&bytes[..n]);
                    rows += 1;
                }
                Ok(None) => break,
                Err(e) if rows == 0 => return Err(Error::Corrupt(format!("PNG data: {e}"))),
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            }
        }
        if rows < height as usize {
            let reason = failure.unwrap_or_else(|| "end of data".into());
            warn(warnings, format!("PNG truncated: decoded {width}x{rows} of {width}x{height} ({reason})"));
        }
    }

    let samples = Samples { data: &buf, color, depth };
    let pixels = width as usize * height as usize;
    let buffer = if samples.is_deep() {
        let mut wide = Wide16::new(width, height)?;
        wide.data = samples.to_rgba16(pixels);
        // Rows that never arrived stay transparent.
        buffer_from_wide(&wide, ctx)?
    } else {
        buffer_from_rgba(width, height, &samples.to_rgba8(pixels), ctx)?
    };
    Ok(Page::from_buffer(buffer))
}

fn decode_animation<R: std::io::Read>(
    reader: &mut png::Reader<R>,
    ctx: &DecodeContext,
    warnings: &mut Vec<Warning>,
) -> Result<Page> {
    let info = reader.info();
    let (width, height) = (info.width, info.height);
    let actl = info.animation_control.ok_or(Error::Unsupported)?;
    // The default image is part of the animation only when an fcTL precedes IDAT.
    let default_is_frame = info.frame_control.is_some();
    let total = actl.num_frames as usize + usize::from(!default_is_frame);

    let mut compositor = Compositor::new(width, height, [0, 0, 0, 0]);
    let mut frames = Vec::new();
    let mut buf = crate::buffer::try_zeroed(reader.output_buffer_size())?;

    for index in 0..total {
        let out = match reader.next_frame(&mut buf) {
            Ok(out) => out,
            Err(e) if !frames.is_empty() => {
                warn(warnings, format!("APNG truncated after {} frames: {e}", frames.len()));
                break;
            }
            Err(e) => return Err(Error::Corrupt(format!("APNG frame: {e}"))),
        };
        if index == 0 && !default_is_frame {
            continue;
        }
        let Some(fc) = reader.info().frame_control else { continue };

        let samples = Samples {
            data: &buf[..out.buffer_size()],
            color: out.color_type,
            depth: out.bit_depth,
        };
        let rgba = samples.to_rgba8(out.width as usize * out.height as usize);
        let rect = Rect {
            x: fc.x_offset,
            y: fc.y_offset,
            width: out.width,
            height: out.height,
        };
        let blend = match fc.blend_op {
            png::BlendOp::Over => Blend::Over,
            png::BlendOp::Source => Blend::Source,
        };
        let disposal = match fc.dispose_op {
            png::DisposeOp::Background => Disposal::Background,
            png::DisposeOp::Previous => Disposal::Previous,
            png::DisposeOp::None => Disposal::None,
        };
        let den = if fc.delay_den == 0 { 100 } else { fc.delay_den as u32 };
        let duration_ms = fc.delay_num as u32 * 1000 / den;

        let canvas = compositor.paint(rect, &rgba, blend, disposal);
        frames.push(Frame::with_duration(frame_buffer(width, height, canvas, ctx)?, duration_ms));
    }

    animated_page(frames, actl.num_plays).ok_or_else(|| Error::Corrupt("APNG without frames".into()))
}

fn attach_metadata(page: &mut Page, info: &png::Info, data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>) {
    if let Some(icc) = &info.icc_profile {
        page.icc = Some(Arc::from(&icc[..]));
    } else if info.srgb.is_none() {
        page.icc = synthesized_profile(info, ctx).map(Arc::from);
    }

    let mut exif_seen = false;
    for (kind, body) in chunks(data) {
        if kind == *b"eXIf" {
            if exif_seen {
                warn(warnings, "repeated eXIf chunk ignored");
            } else {
                page.exif = Some(Arc::from(body));
                exif_seen = true;
            }
        }
    }

    for chunk in &info.uncompressed_latin1_text {
        page.text.entry(chunk.keyword.clone()).or_insert_with(|| chunk.text.clone());
    }
    for chunk in &info.utf8_text {
        if let Ok(text) = chunk.get_text() {
            page.text.entry(chunk.keyword.clone()).or_insert(text);
        }
    }
}

/// Profile bytes for `gAMA`/`cHRM`, unless the gamma is the sRGB default.
fn synthesized_profile(info: &png::Info, ctx: &DecodeContext) -> Option<Vec<u8>> {
    let file_gamma = info.source_gamma?.into_value() as f64;
    if file_gamma <= 0.0 {
        return None;
    }
    let gamma = 1.0 / file_gamma;
    let profile = match info.source_chromaticities {
        Some(c) => {
            let xy = |p: (png::ScaledFloat, png::ScaledFloat)| (p.0.into_value() as f64, p.1.into_value() as f64);
            ctx.cmm
                .get_profile_parametric(gamma, xy(c.white), [xy(c.red), xy(c.green), xy(c.blue)])?
        }
        None if (gamma - 2.2).abs() < 0.05 => return None,
        None => ctx.cmm.get_profile_srgb_gamma(gamma)?,
    };
    ctx.cmm.profile_to_bytes(&profile)
}

/// Walk raw PNG chunks, yielding `(type, body)` until the data runs out.
pub(crate) fn chunks(data: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    let mut pos = PNG_SIGNATURE.len();
    std::iter::from_fn(move || {
        let header = data.get(pos..pos + 8)?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = [header[4], header[5], header[6], header[7]];
        let body = data.get(pos + 8..pos.checked_add(8 + len)?)?;
        pos += 12 + len;
        Some((kind, body))
    })
}

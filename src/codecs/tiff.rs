//! TIFF through the `tiff` crate. Every IFD becomes a page.
//!
//! Orientation is normalized the way libtiff's RGBA reader does it: the
//! flips are applied here, and only a transpose remains for the viewer.
//!
//! | Tag | Applied here | Left on the page |
//! |---|---|---|
//! | 1 | none | 1 |
//! | 2 | flip horizontally | 1 |
//! | 3 | rotate 180° | 1 |
//! | 4 | flip vertically | 1 |
//! | 5 | none | 5 |
//! | 6 | flip horizontally | 7 |
//! | 7 | rotate 180° | 5 |
//! | 8 | flip vertically | 7 |

use super::animate::{buffer_from_rgba, buffer_from_wide};
use super::{Codec, DecodeContext};
use crate::buffer::{Orientation, Wide16};
use crate::chain::{Image, Page};
use crate::error::{Error, Result, Warning, warn};
use crate::metadata::tiff_tag_bytes;
use std::io::Cursor;
use std::sync::Arc;
use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

const TAG_XMP: u16 = 700;
const TAG_ICC: u16 = 34675;

pub struct TiffCodec;

impl Codec for TiffCodec {
    fn name(&self) -> &'static str {
        "tiff"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["image/tiff"]
    }

    fn decode(&self, data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image> {
        if !(data.starts_with(b"II*\0") || data.starts_with(b"MM\0*")) {
            return Err(Error::Unsupported);
        }
        let mut decoder =
            Decoder::new(Cursor::new(data)).map_err(|e| Error::Corrupt(format!("TIFF header: {e}")))?;

        let mut pages: Vec<Page> = Vec::new();
        let mut index = 0usize;
        loop {
            match decode_page(&mut decoder, data, index, ctx) {
                Ok(page) => pages.push(page),
                Err(e) if pages.is_empty() => return Err(e),
                Err(e) => {
                    warn(warnings, format!("TIFF page {index} skipped: {e}"));
                }
            }
            if !decoder.more_images() {
                break;
            }
            if let Err(e) = decoder.next_image() {
                warn(warnings, format!("TIFF directory {} unreadable: {e}", index + 1));
                break;
            }
            index += 1;
        }

        let mut pages = pages.into_iter();
        let mut image = Image::new(pages.next().ok_or(Error::Unsupported)?);
        for page in pages {
            image.append_page(page);
        }
        Ok(image)
    }
}

fn decode_page<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    data: &[u8],
    index: usize,
    ctx: &DecodeContext,
) -> Result<Page> {
    let corrupt = |e: tiff::TiffError| Error::Corrupt(format!("TIFF: {e}"));
    let (w, h) = decoder.dimensions().map_err(corrupt)?;
    let color = decoder.colortype().map_err(corrupt)?;
    let tag = decoder
        .find_tag(Tag::Orientation)
        .ok()
        .flatten()
        .and_then(|v| v.into_u16().ok())
        .unwrap_or(1);
    let (flip, residual) = normalize_orientation(tag);
    let icc = tiff_tag_bytes(data, index, TAG_ICC);
    let pixels = w as usize * h as usize;

    let mut page = match decoder.read_image().map_err(corrupt)? {
        DecodingResult::U8(samples) => {
            if let ColorType::CMYK(8) = color {
                let mut cmyk: Vec<u8> = samples.iter().map(|v| 255 - v).collect();
                flip.apply(&mut cmyk, w as usize, h as usize, 4);
                let src = icc.and_then(|b| ctx.cmm.get_profile(b));
                let (buffer, converted) = ctx.cmm.transform_cmyk(&cmyk, w, h, src.as_ref(), ctx.target)?;
                let mut page = Page::from_buffer(buffer);
                page.color_converted = converted || icc.is_some();
                page
            } else {
                let mut rgba = expand_u8(&samples, color, w as usize, h as usize)?;
                flip.apply(&mut rgba, w as usize, h as usize, 4);
                Page::from_buffer(buffer_from_rgba(w, h, &rgba, ctx)?)
            }
        }
        DecodingResult::U16(samples) => {
            let mut wide = Wide16::new(w, h)?;
            wide.data = expand_u16(&samples, color, pixels)?;
            flip.apply(&mut wide.data, w as usize, h as usize, 4);
            Page::from_buffer(buffer_from_wide(&wide, ctx)?)
        }
        DecodingResult::F32(samples) => {
            let scaled: Vec<u16> = samples
                .iter()
                .map(|v| (v.clamp(0.0, 1.0) * 65535.0).round() as u16)
                .collect();
            let mut wide = Wide16::new(w, h)?;
            wide.data = expand_u16(&scaled, color, pixels)?;
            flip.apply(&mut wide.data, w as usize, h as usize, 4);
            Page::from_buffer(buffer_from_wide(&wide, ctx)?)
        }
        _ => return Err(Error::Corrupt(format!("TIFF sample type of {color:?} not supported"))),
    };

    page.orientation = residual;
    page.icc = icc.map(Arc::from);
    page.xmp = tiff_tag_bytes(data, index, TAG_XMP).map(Arc::from);
    Ok(page)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Flip {
    horizontal: bool,
    vertical: bool,
}

impl Flip {
    fn apply<T: Copy>(self, data: &mut [T], width: usize, height: usize, channels: usize) {
        let stride = width * channels;
        if self.vertical {
            for y in 0..height / 2 {
                let (top, bottom) = data.split_at_mut((height - 1 - y) * stride);
                top[y * stride..(y + 1) * stride].swap_with_slice(&mut bottom[..stride]);
            }
        }
        if self.horizontal {
            for row in data.chunks_exact_mut(stride) {
                for x in 0..width / 2 {
                    let mirror = width - 1 - x;
                    for c in 0..channels {
                        row.swap(x * channels + c, mirror * channels + c);
                    }
                }
            }
        }
    }
}

/// Split a tag value into the flips applied in-codec and the orientation
/// left for the viewer.
fn normalize_orientation(tag: u16) -> (Flip, Orientation) {
    let flip = |horizontal, vertical| Flip { horizontal, vertical };
    match tag {
        2 => (flip(true, false), Orientation::TopLeft),
        3 => (flip(true, true), Orientation::TopLeft),
        4 => (flip(false, true), Orientation::TopLeft),
        5 => (flip(false, false), Orientation::LeftTop),
        6 => (flip(true, false), Orientation::RightBottom),
        7 => (flip(true, true), Orientation::LeftTop),
        8 => (flip(false, true), Orientation::RightBottom),
        _ => (flip(false, false), Orientation::TopLeft),
    }
}

fn expand_u8(samples: &[u8], color: ColorType, width: usize, height: usize) -> Result<Vec<u8>> {
    let pixels = width * height;
    let rgba = match color {
        ColorType::Gray(8) => samples.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        ColorType::Gray(bits @ (1 | 2 | 4)) => {
            let row_bytes = (width * bits as usize).div_ceil(8);
            let max = (1u16 << bits) - 1;
            let mut out = Vec::with_capacity(pixels * 4);
            for y in 0..height {
                let row = samples
                    .get(y * row_bytes..(y + 1) * row_bytes)
                    .ok_or_else(|| Error::Corrupt("TIFF strip too short".into()))?;
                for x in 0..width {
                    let bit = x * bits as usize;
                    let v = (row[bit / 8] >> (8 - bits as usize - bit % 8)) as u16 & max;
                    let g = (v * 255 / max) as u8;
                    out.extend_from_slice(&[g, g, g, 255]);
                }
            }
            out
        }
        ColorType::GrayA(8) => samples.chunks_exact(2).flat_map(|p| [p[0], p[0], p[0], p[1]]).collect(),
        ColorType::RGB(8) => samples.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect(),
        ColorType::RGBA(8) => samples.to_vec(),
        other => return Err(Error::Corrupt(format!("TIFF color type {other:?} not supported"))),
    };
    check_len(rgba, pixels)
}

fn expand_u16(samples: &[u16], color: ColorType, pixels: usize) -> Result<Vec<u16>> {
    let max = u16::MAX;
    let rgba = match color {
        ColorType::Gray(_) => samples.iter().flat_map(|&g| [g, g, g, max]).collect(),
        ColorType::GrayA(_) => samples.chunks_exact(2).flat_map(|p| [p[0], p[0], p[0], p[1]]).collect(),
        ColorType::RGB(_) => samples.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], max]).collect(),
        ColorType::RGBA(_) => samples.to_vec(),
        other => return Err(Error::Corrupt(format!("TIFF color type {other:?} not supported"))),
    };
    check_len(rgba, pixels)
}

fn check_len<T>(rgba: Vec<T>, pixels: usize) -> Result<Vec<T>> {
    if rgba.len() < pixels * 4 {
        return Err(Error::Corrupt("TIFF image data shorter than its dimensions".into()));
    }
    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Format;
    use tiff::encoder::{TiffEncoder, colortype};

    fn two_page_tiff() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut out).unwrap();
        let red: Vec<u8> = [255u8, 0, 0].repeat(4 * 2);
        encoder.write_image::<colortype::RGB8>(4, 2, &red).unwrap();
        let gray: Vec<u8> = vec![128; 3 * 3];
        encoder.write_image::<colortype::Gray8>(3, 3, &gray).unwrap();
        out.into_inner()
    }

    fn oriented_tiff(tag: u16) -> Vec<u8> {
        // 2x1: left pixel red, right pixel blue.
        let mut out = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut out).unwrap();
        let mut image = encoder.new_image::<colortype::RGB8>(2, 1).unwrap();
        image.encoder().write_tag(Tag::Orientation, tag).unwrap();
        image.write_data(&[255, 0, 0, 0, 0, 255]).unwrap();
        out.into_inner()
    }

    #[test]
    fn every_directory_is_a_page() {
        let image = TiffCodec
            .decode(&two_page_tiff(), &DecodeContext::default(), &mut Vec::new())
            .unwrap();
        assert_eq!(image.pages().len(), 2);
        let first = &image.pages()[0].head().buffer;
        assert_eq!(first.format(), Format::Xrgb32);
        assert_eq!((first.width(), first.height()), (4, 2));
        assert_eq!(first.pixel_u32(0, 0) & 0xffffff, 0xff0000);
        let second = &image.pages()[1].head().buffer;
        assert_eq!((second.width(), second.height()), (3, 3));
        assert_eq!(second.pixel_u32(1, 1) & 0xffffff, 0x808080);
    }

    #[test]
    fn mirrored_orientation_is_applied_in_codec() {
        let image = TiffCodec
            .decode(&oriented_tiff(2), &DecodeContext::default(), &mut Vec::new())
            .unwrap();
        assert_eq!(image.head().orientation, Orientation::TopLeft);
        assert_eq!(image.head_buffer().pixel_u32(0, 0) & 0xffffff, 0x0000ff);
    }

    #[test]
    fn transposing_orientation_keeps_a_residual() {
        let image = TiffCodec
            .decode(&oriented_tiff(6), &DecodeContext::default(), &mut Vec::new())
            .unwrap();
        assert_eq!(image.head().orientation, Orientation::RightBottom);
    }

    #[test]
    fn orientation_table() {
        let residual = |t| normalize_orientation(t).1.value();
        assert_eq!([1, 2, 3, 4, 5, 6, 7, 8].map(residual), [1, 1, 1, 1, 5, 7, 5, 7]);
    }

    #[test]
    fn flips_move_pixels() {
        let mut data = vec![1, 2, 3, 4];
        Flip { horizontal: true, vertical: false }.apply(&mut data, 2, 2, 1);
        assert_eq!(data, [2, 1, 4, 3]);
        Flip { horizontal: false, vertical: true }.apply(&mut data, 2, 2, 1);
        assert_eq!(data, [4, 3, 2, 1]);
    }

    #[test]
    fn non_tiff_is_unsupported() {
        assert!(matches!(
            TiffCodec.decode(b"\x89PNG", &DecodeContext::default(), &mut Vec::new()),
            Err(Error::Unsupported)
        ));
    }
}

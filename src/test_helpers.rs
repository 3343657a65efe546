//! Shared test utilities: in-memory fixture encoders.
//!
//! Every fixture is synthesized with the same encoder crates the library
//! links against, so tests never depend on files outside the repository.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let png = solid_png(8, 8, [255, 0, 0]);
//! let gif = two_frame_gif();
//! let exif = exif_with_orientation(6, false);
//! let jpeg = solid_jpeg(64, 32, [0, 128, 255], Some(&exif));
//! ```

use std::path::{Path, PathBuf};

// =========================================================================
// Exif
// =========================================================================

/// Minimal TIFF structure: IFD0 holding only the orientation tag.
pub fn exif_with_orientation(value: u16, big_endian: bool) -> Vec<u8> {
    let u16b = |v: u16| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
    let u32b = |v: u32| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };

    let mut out = Vec::new();
    out.extend_from_slice(if big_endian { b"MM" } else { b"II" });
    out.extend_from_slice(&u16b(42));
    out.extend_from_slice(&u32b(8));
    out.extend_from_slice(&u16b(1));
    out.extend_from_slice(&u16b(274));
    out.extend_from_slice(&u16b(3));
    out.extend_from_slice(&u32b(1));
    out.extend_from_slice(&u16b(value));
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&u32b(0));
    out
}

/// Little-endian Exif with orientation 1 in IFD0 and `jpeg` as the IFD1
/// thumbnail.
pub fn exif_with_thumbnail(jpeg: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());
    // IFD0 at 8: one entry, next IFD at 26.
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&274u16.to_le_bytes());
    out.extend_from_slice(&3u16.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&[1, 0, 0, 0]);
    out.extend_from_slice(&26u32.to_le_bytes());
    // IFD1 at 26: JPEGInterchangeFormat + length, data at 56.
    out.extend_from_slice(&2u16.to_le_bytes());
    for (tag, value) in [(513u16, 56u32), (514, jpeg.len() as u32)] {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    assert_eq!(out.len(), 56);
    out.extend_from_slice(jpeg);
    out
}

// =========================================================================
// PNG
// =========================================================================

/// An 8-bit RGB PNG filled with one color.
pub fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let data: Vec<u8> = (0..width * height).flat_map(|_| rgb).collect();
    encode_png(width, height, png::ColorType::Rgb, png::BitDepth::Eight, &data, &[])
}

/// An 8-bit RGBA PNG with pixels from `f(x, y)`.
pub fn rgba_png(width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
    let data: Vec<u8> = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .flat_map(|(x, y)| f(x, y))
        .collect();
    encode_png(width, height, png::ColorType::Rgba, png::BitDepth::Eight, &data, &[])
}

pub fn encode_png(
    width: u32,
    height: u32,
    color: png::ColorType,
    depth: png::BitDepth,
    data: &[u8],
    text: &[(&str, &str)],
) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(color);
        encoder.set_depth(depth);
        for (k, v) in text {
            encoder.add_text_chunk(k.to_string(), v.to_string()).unwrap();
        }
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(data).unwrap();
        writer.finish().unwrap();
    }
    out
}

/// Two-frame APNG, red then green, 50 ms each, played twice.
pub fn two_frame_apng() -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, 4, 4);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_animated(2, 2).unwrap();
        let mut writer = encoder.write_header().unwrap();
        for rgba in [[255u8, 0, 0, 255], [0, 255, 0, 255]] {
            writer.set_frame_delay(1, 20).unwrap();
            let data: Vec<u8> = (0..16).flat_map(|_| rgba).collect();
            writer.write_image_data(&data).unwrap();
        }
        writer.finish().unwrap();
    }
    out
}

// =========================================================================
// GIF
// =========================================================================

/// 8×8 GIF: red frame then blue frame, restore-to-background, 100 ms,
/// looping forever.
pub fn two_frame_gif() -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut out, 8, 8, &[]).unwrap();
        encoder.set_repeat(gif::Repeat::Infinite).unwrap();
        for rgb in [[255u8, 0, 0], [0, 0, 255]] {
            let mut rgba: Vec<u8> = (0..64).flat_map(|_| [rgb[0], rgb[1], rgb[2], 255]).collect();
            let mut frame = gif::Frame::from_rgba_speed(8, 8, &mut rgba, 10);
            frame.delay = 10;
            frame.dispose = gif::DisposalMethod::Background;
            encoder.write_frame(&frame).unwrap();
        }
    }
    out
}

// =========================================================================
// JPEG
// =========================================================================

/// A baseline JPEG filled with one color, with an optional APP1 Exif block
/// (given as raw TIFF bytes).
pub fn solid_jpeg(width: u16, height: u16, rgb: [u8; 3], exif: Option<&[u8]>) -> Vec<u8> {
    let data: Vec<u8> = (0..width as usize * height as usize).flat_map(|_| rgb).collect();
    let mut out = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut out, 90);
    if let Some(exif) = exif {
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(exif);
        encoder.add_app_segment(1, &payload).unwrap();
    }
    encoder
        .encode(&data, width, height, jpeg_encoder::ColorType::Rgb)
        .unwrap();
    out
}

/// A CMYK JPEG with no ICC profile.
pub fn cmyk_jpeg(width: u16, height: u16, cmyk: [u8; 4]) -> Vec<u8> {
    let data: Vec<u8> = (0..width as usize * height as usize).flat_map(|_| cmyk).collect();
    let mut out = Vec::new();
    jpeg_encoder::Encoder::new(&mut out, 90)
        .encode(&data, width, height, jpeg_encoder::ColorType::Cmyk)
        .unwrap();
    out
}

// =========================================================================
// WebP
// =========================================================================

/// Lossless still WebP from RGBA samples.
pub fn rgba_webp(width: u32, height: u32, rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    image_webp::WebPEncoder::new(&mut out)
        .encode(rgba, width, height, image_webp::ColorType::Rgba8)
        .unwrap();
    out
}

/// Busy opaque pattern whose every row is distinct from transparent black.
pub fn gradient_rgba(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| [(i % 251) as u8, ((i / width) * 3 % 256) as u8, (i * 7 % 256) as u8, 255])
        .collect()
}

// =========================================================================
// Warnings
// =========================================================================

/// Row count from a "decoded WxR of WxH" truncation warning.
pub fn decoded_rows(warning: &crate::error::Warning) -> u32 {
    let text = warning.to_string();
    let start = text.find("decoded ").unwrap() + "decoded ".len();
    let size = text[start..].split(' ').next().unwrap();
    size.split('x').nth(1).unwrap().parse().unwrap()
}

/// Assert rows before `rows` all carry pixels and rows from `rows` on are
/// transparent black.
pub fn assert_rows_split(buffer: &crate::buffer::Buffer, rows: u32) {
    for y in 0..buffer.height() {
        for x in 0..buffer.width() {
            let px = buffer.pixel_u32(x, y);
            if y < rows {
                assert_ne!(px, 0, "pixel ({x}, {y}) above the cut is empty");
            } else {
                assert_eq!(px, 0, "pixel ({x}, {y}) below the cut holds data");
            }
        }
    }
}

// =========================================================================
// Files
// =========================================================================

/// Write `bytes` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, bytes).unwrap();
    path
}

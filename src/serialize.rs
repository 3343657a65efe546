//! Hand-off of decoded pixels to another process.
//!
//! ## Wire format
//!
//! ```text
//! offset  size  field
//! 0       8     u64 user tag
//! 8       4     i32 width
//! 12      4     i32 height
//! 16      4     i32 stride (bytes per row)
//! 20      4     i32 format (see `buffer::Format`)
//! 24      …     stride × height bytes of pixels
//! ```
//!
//! All fields are native-endian: both ends run on the same machine. The
//! receiver gets a [`Buffer`] that borrows the byte array it was handed, so
//! no pixel is copied on the way in.
//!
//! ## Search encoding
//!
//! [`serialize_for_search`] emits a JPEG (4:4:4, quality 90) for opaque
//! images and a PNG otherwise. Anything neither encoder can take is
//! flattened onto black and encoded as JPEG.

use crate::buffer::{Buffer, Format};
use crate::chain::Image;
use crate::error::Error;
use crate::imaging::flatten;
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const HEADER_LEN: usize = 24;
const SEARCH_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Refusing to write binary data to a terminal")]
    Terminal,
    #[error("Invalid header: {0}")]
    Header(String),
    #[error("Invalid pixel data: {0}")]
    Buffer(#[from] Error),
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Write the header and pixels of `buffer` to stdout.
pub fn serialize_to_stdout(buffer: &Buffer, tag: u64) -> Result<(), SerializeError> {
    let stdout = io::stdout();
    if stdout.is_terminal() {
        return Err(SerializeError::Terminal);
    }
    let mut out = stdout.lock();
    serialize_to_writer(buffer, tag, &mut out)?;
    out.flush()?;
    Ok(())
}

pub fn serialize_to_writer<W: Write>(buffer: &Buffer, tag: u64, out: &mut W) -> Result<(), SerializeError> {
    let field = |v: usize, name: &str| {
        i32::try_from(v).map_err(|_| SerializeError::Header(format!("{name} {v} does not fit in i32")))
    };
    let mut header = [0u8; HEADER_LEN];
    header[0..8].copy_from_slice(&tag.to_ne_bytes());
    header[8..12].copy_from_slice(&field(buffer.width() as usize, "width")?.to_ne_bytes());
    header[12..16].copy_from_slice(&field(buffer.height() as usize, "height")?.to_ne_bytes());
    header[16..20].copy_from_slice(&field(buffer.stride(), "stride")?.to_ne_bytes());
    header[20..24].copy_from_slice(&buffer.format().as_i32().to_ne_bytes());
    out.write_all(&header)?;
    out.write_all(&buffer.data()[..buffer.stride() * buffer.height() as usize])?;
    Ok(())
}

/// Parse a serialized buffer. The returned image borrows `bytes`.
pub fn deserialize(bytes: Arc<[u8]>) -> Result<(Image, u64), SerializeError> {
    if bytes.len() < HEADER_LEN {
        return Err(SerializeError::Header(format!(
            "{} bytes is shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }
    let i32_at = |offset: usize| i32::from_ne_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]);
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&bytes[0..8]);
    let tag = u64::from_ne_bytes(tag);
    let (width, height, stride) = (i32_at(8), i32_at(12), i32_at(16));
    let format = Format::from_i32(i32_at(20))
        .ok_or_else(|| SerializeError::Header(format!("unknown format {}", i32_at(20))))?;

    if width <= 0 || height <= 0 || stride <= 0 {
        return Err(SerializeError::Header(format!(
            "non-positive geometry {width}x{height} stride {stride}"
        )));
    }
    let (width, height, stride) = (width as u32, height as u32, stride as usize);
    let needed = stride as u64 * height as u64;
    let remaining = (bytes.len() - HEADER_LEN) as u64;
    if needed > remaining {
        return Err(SerializeError::Header(format!(
            "{needed} bytes of pixels declared, {remaining} present"
        )));
    }
    // Stride against width is checked by the buffer itself.
    let buffer = Buffer::from_shared(format, width, height, stride, bytes, HEADER_LEN)?;
    Ok((Image::from_buffer(buffer), tag))
}

/// Encode for similarity-search tools.
pub fn serialize_for_search(buffer: &Buffer) -> Result<Vec<u8>, SerializeError> {
    if buffer.is_opaque() {
        return encode_jpeg(buffer);
    }
    match encode_png(buffer) {
        Ok(png) => Ok(png),
        Err(e) => {
            debug!(target: "glance_io::serialize", "PNG encoding failed ({e}), flattening");
            encode_jpeg(&flatten(buffer)?)
        }
    }
}

fn encode_jpeg(buffer: &Buffer) -> Result<Vec<u8>, SerializeError> {
    let too_big = || SerializeError::Encode(format!("{}x{} exceeds JPEG limits", buffer.width(), buffer.height()));
    let width = u16::try_from(buffer.width()).map_err(|_| too_big())?;
    let height = u16::try_from(buffer.height()).map_err(|_| too_big())?;
    let rgb: Vec<u8> = buffer
        .to_rgba8()
        .chunks_exact(4)
        .flat_map(|p| [p[0], p[1], p[2]])
        .collect();

    let mut out = Vec::new();
    let mut encoder = Encoder::new(&mut out, SEARCH_JPEG_QUALITY);
    encoder.set_sampling_factor(SamplingFactor::R_4_4_4);
    encoder
        .encode(&rgb, width, height, ColorType::Rgb)
        .map_err(|e| SerializeError::Encode(e.to_string()))?;
    Ok(out)
}

fn encode_png(buffer: &Buffer) -> Result<Vec<u8>, SerializeError> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, buffer.width(), buffer.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let encode = |e: png::EncodingError| SerializeError::Encode(e.to_string());
        let mut writer = encoder.write_header().map_err(encode)?;
        writer.write_image_data(&buffer.to_rgba8()).map_err(encode)?;
        writer.finish().map_err(encode)?;
    }
    Ok(out)
}

//! Lossless WebP "save as".
//!
//! `image-webp` produces the VP8L bitstreams; the container is muxed here:
//!
//! ```text
//! RIFF WEBP
//! ├── VP8X   flags (ICC, alpha, Exif, XMP, animation), canvas size
//! ├── ICCP   page ICC, or the serialization of the target profile
//! ├── ANIM   background 0, loop count          ┐ animation only
//! ├── ANMF × n  full-canvas frame, no blend    ┘
//! │   └── VP8L
//! ├── VP8L   still image
//! ├── EXIF
//! ├── XMP
//! └── THUM   embedded preview, when the page had one
//! ```
//!
//! A still without metadata is written as the plain VP8L file the encoder
//! returns. Frames are stored as composited canvases, so playback needs no
//! disposal or blending.

use crate::chain::{Frame, Page};
use crate::cmm::Profile;
use crate::codecs::riff::{self, push_chunk, riff_webp, u24};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Largest canvas side WebP can describe.
const MAX_SIDE: u32 = 16383;
const MAX_DURATION: u32 = 0xff_ffff;

const FLAG_ICC: u8 = 0x20;
const FLAG_ALPHA: u8 = 0x10;
const FLAG_EXIF: u8 = 0x08;
const FLAG_XMP: u8 = 0x04;
const FLAG_ANIMATION: u8 = 0x02;
/// ANMF: do not blend with the previous canvas.
const ANMF_NO_BLEND: u8 = 0x02;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("WebP encoding failed: {0}")]
    Encode(String),
    #[error("{width}x{height} exceeds the WebP canvas limit")]
    TooLarge { width: u32, height: u32 },
}

/// Encode `frame` (or the whole page) as lossless WebP and write it to
/// `path` atomically. `target` replaces the page's ICC profile.
pub fn save(page: &Page, frame: Option<&Frame>, target: Option<&Profile>, path: &Path) -> Result<(), EncodeError> {
    let bytes = encode(page, frame, target)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(target: "glance_io::encoder", "wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// The complete WebP file for `save`.
pub fn encode(page: &Page, frame: Option<&Frame>, target: Option<&Profile>) -> Result<Vec<u8>, EncodeError> {
    let frames: Vec<&Frame> = match frame {
        Some(f) => vec![f],
        None if page.frames().len() == 1 => vec![page.head()],
        None => page.frames().iter().collect(),
    };
    let animated = frames.len() > 1;

    let icc: Option<&[u8]> = match target {
        Some(profile) => profile.icc(),
        None => page.icc.as_deref(),
    };
    let exif = page.exif.as_deref();
    let xmp = page.xmp.as_deref();
    let thum = page.thum.as_deref();

    let mut bitstreams = Vec::with_capacity(frames.len());
    let (mut canvas_w, mut canvas_h, mut alpha) = (0, 0, false);
    for f in &frames {
        let (w, h) = (f.buffer.width(), f.buffer.height());
        if w > MAX_SIDE || h > MAX_SIDE || w == 0 || h == 0 {
            return Err(EncodeError::TooLarge { width: w, height: h });
        }
        canvas_w = canvas_w.max(w);
        canvas_h = canvas_h.max(h);
        alpha |= !f.buffer.is_opaque();
        bitstreams.push(vp8l(f)?);
    }

    let simple = !animated && icc.is_none() && exif.is_none() && xmp.is_none() && thum.is_none();
    if simple {
        let mut chunks = Vec::new();
        push_chunk(&mut chunks, b"VP8L", &bitstreams[0]);
        return Ok(riff_webp(&chunks));
    }

    let mut flags = 0u8;
    if icc.is_some() {
        flags |= FLAG_ICC;
    }
    if alpha {
        flags |= FLAG_ALPHA;
    }
    if exif.is_some() {
        flags |= FLAG_EXIF;
    }
    if xmp.is_some() {
        flags |= FLAG_XMP;
    }
    if animated {
        flags |= FLAG_ANIMATION;
    }

    let mut chunks = Vec::new();
    let mut vp8x = vec![flags, 0, 0, 0];
    vp8x.extend_from_slice(&u24(canvas_w - 1));
    vp8x.extend_from_slice(&u24(canvas_h - 1));
    push_chunk(&mut chunks, b"VP8X", &vp8x);
    if let Some(icc) = icc {
        push_chunk(&mut chunks, b"ICCP", icc);
    }

    if animated {
        let loops = u16::try_from(page.loops).unwrap_or(u16::MAX);
        let mut anim = 0u32.to_le_bytes().to_vec();
        anim.extend_from_slice(&loops.to_le_bytes());
        push_chunk(&mut chunks, b"ANIM", &anim);

        for (f, bitstream) in frames.iter().zip(&bitstreams) {
            let mut anmf = Vec::with_capacity(16 + 8 + bitstream.len());
            anmf.extend_from_slice(&u24(0));
            anmf.extend_from_slice(&u24(0));
            anmf.extend_from_slice(&u24(f.buffer.width() - 1));
            anmf.extend_from_slice(&u24(f.buffer.height() - 1));
            anmf.extend_from_slice(&u24(f.duration_ms.min(MAX_DURATION)));
            anmf.push(ANMF_NO_BLEND);
            push_chunk(&mut anmf, b"VP8L", bitstream);
            push_chunk(&mut chunks, b"ANMF", &anmf);
        }
    } else {
        push_chunk(&mut chunks, b"VP8L", &bitstreams[0]);
    }

    if let Some(exif) = exif {
        push_chunk(&mut chunks, b"EXIF", exif);
    }
    if let Some(xmp) = xmp {
        push_chunk(&mut chunks, b"XMP ", xmp);
    }
    if let Some(thum) = thum {
        push_chunk(&mut chunks, b"THUM", thum);
    }
    Ok(riff_webp(&chunks))
}

/// The VP8L chunk body for one frame.
fn vp8l(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    let buffer = &frame.buffer;
    let rgba = buffer.to_rgba8();
    let mut file = Vec::new();
    image_webp::WebPEncoder::new(&mut file)
        .encode(&rgba, buffer.width(), buffer.height(), image_webp::ColorType::Rgba8)
        .map_err(|e| EncodeError::Encode(e.to_string()))?;
    riff::chunks(&file)
        .find(|c| &c.fourcc == b"VP8L" && !c.is_truncated())
        .map(|c| c.body.to_vec())
        .ok_or_else(|| EncodeError::Encode("encoder produced no VP8L chunk".into()))
}

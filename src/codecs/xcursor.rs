//! X11 cursor files.
//!
//! ```text
//! header:  "Xcur" u32 header_len u32 version u32 ntoc
//! toc:     { u32 type, u32 subtype, u32 position } × ntoc
//! image:   u32 header_len(36) u32 type u32 subtype(nominal size) u32 version
//!          u32 width u32 height u32 xhot u32 yhot u32 delay_ms
//!          width × height × u32 ARGB, premultiplied
//! ```
//!
//! All integers are little-endian. Every nominal size becomes a page, in
//! the order the sizes first appear; the images of one size become the
//! frames of its page.

use super::{Codec, DecodeContext};
use crate::buffer::{Buffer, Format, unpremultiply_argb32};
use crate::chain::{Frame, Image, Page};
use crate::error::{Error, Result, Warning, warn};

const IMAGE_TYPE: u32 = 0xfffd_0002;
const IMAGE_HEADER_LEN: usize = 36;
/// Cursors larger than this are not real cursors.
const MAX_SIDE: u32 = 0x7fff;

pub struct XcursorCodec;

impl Codec for XcursorCodec {
    fn name(&self) -> &'static str {
        "xcursor"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["image/x-xcursor"]
    }

    fn decode(&self, data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image> {
        if !data.starts_with(b"Xcur") {
            return Err(Error::Unsupported);
        }
        let read_u32 = |offset: usize| -> Option<u32> {
            let b = data.get(offset..offset + 4)?;
            Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };
        let corrupt = |what: &str| Error::Corrupt(format!("Xcursor: {what}"));

        let header_len = read_u32(4).ok_or_else(|| corrupt("short header"))? as usize;
        let ntoc = read_u32(12).ok_or_else(|| corrupt("short header"))? as usize;

        // (nominal size, frames) in first-seen order.
        let mut sizes: Vec<(u32, Vec<Frame>)> = Vec::new();
        for i in 0..ntoc {
            let entry = header_len + i * 12;
            let (Some(kind), Some(subtype), Some(position)) =
                (read_u32(entry), read_u32(entry + 4), read_u32(entry + 8))
            else {
                warn(warnings, format!("Xcursor table truncated at entry {i}"));
                break;
            };
            if kind != IMAGE_TYPE {
                continue;
            }
            match read_image(data, position as usize, ctx) {
                Ok(frame) => match sizes.iter_mut().find(|(size, _)| *size == subtype) {
                    Some((_, frames)) => frames.push(frame),
                    None => sizes.push((subtype, vec![frame])),
                },
                Err(e) => warn(warnings, format!("Xcursor image {i} skipped: {e}")),
            }
        }

        let mut pages = sizes.into_iter().map(|(_, frames)| {
            let animated = frames.len() > 1;
            let mut frames = frames.into_iter();
            let mut page = Page::new(frames.next()?);
            for frame in frames {
                page.append_frame(frame);
            }
            if animated {
                page.close_frame_loop();
            }
            Some(page)
        });
        let head = pages.next().flatten().ok_or_else(|| corrupt("no images"))?;
        let mut image = Image::new(head);
        for page in pages.flatten() {
            image.append_page(page);
        }
        Ok(image)
    }
}

fn read_image(data: &[u8], position: usize, ctx: &DecodeContext) -> Result<Frame> {
    let read_u32 = |offset: usize| -> Result<u32> {
        data.get(position + offset..position + offset + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| Error::Corrupt("image header past end of file".into()))
    };
    let header_len = read_u32(0)? as usize;
    if read_u32(4)? != IMAGE_TYPE || header_len < IMAGE_HEADER_LEN {
        return Err(Error::Corrupt("bad image chunk header".into()));
    }
    let (width, height) = (read_u32(16)?, read_u32(20)?);
    let delay = read_u32(32)?;
    if width == 0 || height == 0 || width > MAX_SIDE || height > MAX_SIDE {
        return Err(Error::Corrupt(format!("bad cursor size {width}x{height}")));
    }

    let start = position + header_len;
    let len = width as usize * height as usize * 4;
    let pixels = data
        .get(start..start + len)
        .ok_or_else(|| Error::Corrupt("pixels past end of file".into()))?;

    // Always ARGB32 so the frames of one size agree.
    let mut buffer = Buffer::new(Format::Argb32, width, height)?;
    for y in 0..height {
        let src = &pixels[y as usize * width as usize * 4..(y as usize + 1) * width as usize * 4];
        let row = buffer.row_mut(y);
        for (dst, p) in row.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
            let word = u32::from_le_bytes([p[0], p[1], p[2], p[3]]);
            dst.copy_from_slice(&word.to_ne_bytes());
        }
    }
    if ctx.cmm_pending() {
        straighten(&mut buffer);
    }
    Ok(Frame::with_duration(buffer, delay))
}

/// Cursor pixels are stored premultiplied; a pending color pass wants
/// them straight.
fn straighten(buffer: &mut Buffer) {
    for y in 0..buffer.height() {
        let w = buffer.width() as usize;
        let row = &mut buffer.row_mut(y)[..w * 4];
        unpremultiply_argb32(row);
    }
    buffer.set_straight_alpha();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Cursor;

    /// A cursor file with one image per `(nominal, side, argb, delay)`.
    fn cursor(images: &[(u32, u32, u32, u32)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"Xcur");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&0x10000u32.to_le_bytes());
        out.extend_from_slice(&(images.len() as u32).to_le_bytes());
        let mut position = 16 + images.len() * 12;
        for &(nominal, side, _, _) in images {
            out.extend_from_slice(&IMAGE_TYPE.to_le_bytes());
            out.extend_from_slice(&nominal.to_le_bytes());
            out.extend_from_slice(&(position as u32).to_le_bytes());
            position += IMAGE_HEADER_LEN + (side * side * 4) as usize;
        }
        for &(nominal, side, argb, delay) in images {
            for v in [36, IMAGE_TYPE, nominal, 1, side, side, 0, 0, delay] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            for _ in 0..side * side {
                out.extend_from_slice(&argb.to_le_bytes());
            }
        }
        out
    }

    #[test]
    fn sizes_become_pages_and_frames_cycle() {
        let data = cursor(&[
            (24, 24, 0xff00ff00, 50),
            (32, 32, 0xffff0000, 50),
            (24, 24, 0x80800000, 70),
        ]);
        let mut warnings = Vec::new();
        let image = XcursorCodec.decode(&data, &DecodeContext::default(), &mut warnings).unwrap();
        assert_eq!(image.pages().len(), 2);

        let first = &image.pages()[0];
        assert_eq!(first.frames().len(), 2);
        assert_eq!(first.width(), 24);
        assert_eq!(first.frames()[1].duration_ms, 70);
        assert_eq!(first.frames()[0].buffer.format(), Format::Argb32);
        assert_eq!(first.frames()[1].buffer.format(), Format::Argb32);
        assert_eq!(first.frames()[1].buffer.pixel_u32(0, 0), 0x80800000);
        assert!(first.is_loop_closed());

        let second = &image.pages()[1];
        assert_eq!(second.width(), 32);
        assert_eq!(second.frames().len(), 1);

        let head = Cursor::default();
        assert_eq!(image.frame_next(image.frame_next(head).unwrap()), Some(head));
        assert!(warnings.is_empty());
    }

    #[test]
    fn truncated_image_is_skipped_with_warning() {
        let mut data = cursor(&[(16, 16, 0xff000000, 0), (32, 32, 0xff000000, 0)]);
        data.truncate(data.len() - 100);
        let mut warnings = Vec::new();
        let image = XcursorCodec.decode(&data, &DecodeContext::default(), &mut warnings).unwrap();
        assert_eq!(image.pages().len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn not_a_cursor() {
        assert!(matches!(
            XcursorCodec.decode(b"GIF89a", &DecodeContext::default(), &mut Vec::new()),
            Err(Error::Unsupported)
        ));
    }
}

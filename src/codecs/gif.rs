//! GIF through the `gif` crate, composited by the shared animation driver.

use super::animate::{Blend, Compositor, Disposal, Rect, animated_page, buffer_from_rgba, frame_buffer};
use super::{Codec, DecodeContext};
use crate::chain::{Frame, Image, Page};
use crate::error::{Error, Result, Warning, warn};

pub struct GifCodec;

impl Codec for GifCodec {
    fn name(&self) -> &'static str {
        "gif"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["image/gif"]
    }

    fn decode(&self, data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image> {
        if !(data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a")) {
            return Err(Error::Unsupported);
        }
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options
            .read_info(data)
            .map_err(|e| Error::Corrupt(format!("GIF header: {e}")))?;
        let (width, height) = (decoder.width() as u32, decoder.height() as u32);
        if width == 0 || height == 0 {
            return Err(Error::Corrupt("GIF has zero dimensions".into()));
        }

        // Restore-to-background clears to transparent black.
        let mut compositor = Compositor::new(width, height, [0, 0, 0, 0]);
        let mut canvases: Vec<(Vec<u8>, u32)> = Vec::new();

        loop {
            let frame = match decoder.read_next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) if !canvases.is_empty() => {
                    warn(warnings, format!("GIF truncated after {} frames: {e}", canvases.len()));
                    break;
                }
                Err(e) => return Err(Error::Corrupt(format!("GIF frame: {e}"))),
            };
            let rect = Rect {
                x: frame.left as u32,
                y: frame.top as u32,
                width: frame.width as u32,
                height: frame.height as u32,
            };
            let disposal = match frame.dispose {
                gif::DisposalMethod::Background => Disposal::Background,
                gif::DisposalMethod::Previous => Disposal::Previous,
                _ => Disposal::None,
            };
            let delay_ms = frame.delay as u32 * 10;
            let canvas = compositor.paint(rect, &frame.buffer, Blend::Over, disposal);
            canvases.push((canvas.to_vec(), delay_ms));
        }

        let loops = match decoder.repeat() {
            gif::Repeat::Infinite => 0,
            gif::Repeat::Finite(n) => (n as u32).max(1),
        };

        if canvases.len() == 1 {
            let (rgba, delay) = &canvases[0];
            let buffer = buffer_from_rgba(width, height, rgba, ctx)?;
            let mut page = Page::new(Frame::with_duration(buffer, *delay));
            page.loops = loops;
            return Ok(Image::new(page));
        }

        let frames = canvases
            .iter()
            .map(|(rgba, delay)| Ok(Frame::with_duration(frame_buffer(width, height, rgba, ctx)?, *delay)))
            .collect::<Result<Vec<_>>>()?;
        let page = animated_page(frames, loops).ok_or_else(|| Error::Corrupt("GIF without frames".into()))?;
        Ok(Image::new(page))
    }
}

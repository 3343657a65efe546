//! Frame compositing shared by the GIF and APNG decoders, plus the helpers
//! every codec uses to turn decoded samples into pages.
//!
//! Each output frame is a full canvas. For frame N the canvas starts as a
//! copy of frame N−1, then:
//!
//! 1. frame N−1's disposal runs over frame N−1's rectangle
//!    (`Background` clears it with SOURCE, `Previous` restores the snapshot
//!    taken before N−1 was painted, `None` keeps it);
//! 2. frame N is painted into its own rectangle, clipped to the canvas,
//!    with SOURCE or OVER.
//!
//! The canvas holds straight RGBA8 so that OVER can be done exactly.

use super::DecodeContext;
use crate::buffer::{Buffer, Wide16};
use crate::chain::{Frame, Page};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposal {
    None,
    Background,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Blend {
    Source,
    Over,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub(crate) struct Compositor {
    width: u32,
    height: u32,
    background: [u8; 4],
    canvas: Vec<u8>,
    snapshot: Option<Vec<u8>>,
    pending: Option<(Rect, Disposal)>,
}

impl Compositor {
    pub fn new(width: u32, height: u32, background: [u8; 4]) -> Self {
        Self {
            width,
            height,
            background,
            canvas: vec![0; width as usize * height as usize * 4],
            snapshot: None,
            pending: None,
        }
    }

    /// Paint one frame. `rgba` holds `rect.width × rect.height` straight
    /// RGBA pixels. Returns the composited canvas.
    pub fn paint(&mut self, rect: Rect, rgba: &[u8], blend: Blend, disposal: Disposal) -> &[u8] {
        if let Some((prev, how)) = self.pending.take() {
            match how {
                Disposal::None => {}
                Disposal::Background => self.fill(prev, self.background),
                Disposal::Previous => {
                    if let Some(snapshot) = self.snapshot.take() {
                        self.canvas = snapshot;
                    }
                }
            }
        }
        if disposal == Disposal::Previous {
            self.snapshot = Some(self.canvas.clone());
        }

        let cw = self.width as usize;
        let x_end = (rect.x.saturating_add(rect.width)).min(self.width);
        let y_end = (rect.y.saturating_add(rect.height)).min(self.height);
        for y in rect.y..y_end {
            let src_row = (y - rect.y) as usize * rect.width as usize * 4;
            for x in rect.x..x_end {
                let s = src_row + (x - rect.x) as usize * 4;
                let Some(src) = rgba.get(s..s + 4) else { continue };
                let d = (y as usize * cw + x as usize) * 4;
                let dst = &mut self.canvas[d..d + 4];
                match blend {
                    Blend::Source => dst.copy_from_slice(src),
                    Blend::Over => over(dst, src),
                }
            }
        }

        self.pending = Some((rect, disposal));
        &self.canvas
    }

    fn fill(&mut self, rect: Rect, color: [u8; 4]) {
        let cw = self.width as usize;
        let x_end = (rect.x.saturating_add(rect.width)).min(self.width);
        let y_end = (rect.y.saturating_add(rect.height)).min(self.height);
        for y in rect.y..y_end {
            for x in rect.x..x_end {
                let d = (y as usize * cw + x as usize) * 4;
                self.canvas[d..d + 4].copy_from_slice(&color);
            }
        }
    }
}

/// Straight-alpha OVER.
fn over(dst: &mut [u8], src: &[u8]) {
    let sa = src[3] as u32;
    match sa {
        255 => dst.copy_from_slice(src),
        0 => {}
        _ => {
            let da = dst[3] as u32;
            let inv = 255 - sa;
            let out_a = sa * 255 + da * inv;
            if out_a == 0 {
                dst.copy_from_slice(&[0, 0, 0, 0]);
                return;
            }
            for i in 0..3 {
                let c = src[i] as u32 * sa * 255 + dst[i] as u32 * da * inv;
                dst[i] = ((c + out_a / 2) / out_a) as u8;
            }
            dst[3] = ((out_a + 127) / 255) as u8;
        }
    }
}

pub(crate) fn rgba_is_opaque(rgba: &[u8]) -> bool {
    rgba.chunks_exact(4).all(|p| p[3] == 255)
}

/// A buffer for straight RGBA8 samples: XRGB32 when every pixel is opaque,
/// otherwise ARGB32, left straight when a color pass is pending.
pub(crate) fn buffer_from_rgba(width: u32, height: u32, rgba: &[u8], ctx: &DecodeContext) -> Result<Buffer> {
    let opaque = rgba_is_opaque(rgba);
    Buffer::from_rgba8(width, height, rgba, opaque, ctx.cmm_pending())
}

/// An animation frame: always ARGB32 so every frame of a page agrees.
pub(crate) fn frame_buffer(width: u32, height: u32, rgba: &[u8], ctx: &DecodeContext) -> Result<Buffer> {
    Buffer::from_rgba8(width, height, rgba, false, ctx.cmm_pending())
}

/// A buffer for deep samples: RGB30 or RGBA128F when wide output is
/// allowed, otherwise 8-bit.
pub(crate) fn buffer_from_wide(wide: &Wide16, ctx: &DecodeContext) -> Result<Buffer> {
    let opaque = wide.is_opaque();
    if ctx.wide_output {
        return if opaque { wide.pack_rgb30() } else { wide.pack_rgba128f() };
    }
    let rgba: Vec<u8> = wide.data.iter().map(|&c| (c >> 8) as u8).collect();
    Buffer::from_rgba8(wide.width, wide.height, &rgba, opaque, ctx.cmm_pending())
}

/// Gather composited frames into a looping page.
pub(crate) fn animated_page(frames: Vec<Frame>, loops: u32) -> Option<Page> {
    let mut frames = frames.into_iter();
    let mut page = Page::new(frames.next()?);
    for frame in frames {
        page.append_frame(frame);
    }
    page.close_frame_loop();
    page.loops = loops;
    Some(page)
}

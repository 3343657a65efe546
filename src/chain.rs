//! Pages and frames: how a decoded [`Image`] is arranged.
//!
//! An image is a list of pages (independent pictures in one container, like
//! a multi-page TIFF or the sizes of an X cursor). Each page is a list of
//! frames (animation steps). Links are derived from indices through a
//! [`Cursor`] rather than stored as pointers:
//!
//! ```text
//! page 0: frame 0 → frame 1 → frame 2 ─┐   (closed loop: wraps to frame 0)
//!           ▲─────────────────────────-┘
//!   │
//! page 1: frame 0                          (single frame: no frame links)
//! ```
//!
//! Orientation, metadata and the optional vector `render` hook live on the
//! page, so every frame of a page shares them.

use crate::buffer::{Buffer, Orientation};
use crate::cmm::{Cmm, Profile};
use crate::error::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Deferred re-rasterization for vector sources.
///
/// `render` produces a fresh single-page image at `scale` times the
/// document's natural size, converted to `target` when given.
pub trait Rasterize: Send + Sync {
    fn render(&self, cmm: &Cmm, target: Option<&Profile>, scale: f64) -> Result<Image>;
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub buffer: Buffer,
    pub duration_ms: u32,
}

impl Frame {
    pub fn new(buffer: Buffer) -> Self {
        Self {
            buffer,
            duration_ms: 0,
        }
    }

    pub fn with_duration(buffer: Buffer, duration_ms: u32) -> Self {
        Self {
            buffer,
            duration_ms,
        }
    }
}

#[derive(Clone)]
pub struct Page {
    frames: Vec<Frame>,
    loop_closed: bool,
    /// Repetitions of the animation, 0 meaning forever.
    pub loops: u32,
    pub orientation: Orientation,
    pub exif: Option<Arc<[u8]>>,
    pub icc: Option<Arc<[u8]>>,
    pub xmp: Option<Arc<[u8]>>,
    /// An embedded preview in its original encoding (WebP `THUM`).
    pub thum: Option<Arc<[u8]>>,
    pub text: BTreeMap<String, String>,
    pub render: Option<Arc<dyn Rasterize>>,
    /// Pixels are already in the target color space (a codec ran its own
    /// ICC transform), so the final color pass only premultiplies.
    pub color_converted: bool,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("frames", &self.frames.len())
            .field("loop_closed", &self.loop_closed)
            .field("loops", &self.loops)
            .field("orientation", &self.orientation)
            .field("exif", &self.exif.as_ref().map(|b| b.len()))
            .field("icc", &self.icc.as_ref().map(|b| b.len()))
            .field("xmp", &self.xmp.as_ref().map(|b| b.len()))
            .field("thum", &self.thum.as_ref().map(|b| b.len()))
            .field("text", &self.text)
            .field("render", &self.render.is_some())
            .field("color_converted", &self.color_converted)
            .finish()
    }
}

impl Page {
    pub fn new(head: Frame) -> Self {
        Self {
            frames: vec![head],
            loop_closed: false,
            loops: 0,
            orientation: Orientation::TopLeft,
            exif: None,
            icc: None,
            xmp: None,
            thum: None,
            text: BTreeMap::new(),
            render: None,
            color_converted: false,
        }
    }

    pub fn from_buffer(buffer: Buffer) -> Self {
        Self::new(Frame::new(buffer))
    }

    pub fn head(&self) -> &Frame {
        &self.frames[0]
    }

    pub fn head_mut(&mut self) -> &mut Frame {
        &mut self.frames[0]
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [Frame] {
        &mut self.frames
    }

    /// Add a frame after the current tail. Reopens the loop if it was closed.
    pub fn append_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
        self.loop_closed = false;
    }

    /// Make the frame list cyclic once every frame is in. A single frame
    /// has no successor even in a closed loop.
    pub fn close_frame_loop(&mut self) {
        self.loop_closed = true;
    }

    pub fn is_loop_closed(&self) -> bool {
        self.loop_closed
    }

    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    pub fn width(&self) -> u32 {
        self.head().buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.head().buffer.height()
    }

    /// Copy the metadata bags of `other` onto this page, keeping frames.
    pub fn copy_metadata_from(&mut self, other: &Page) {
        self.orientation = other.orientation;
        self.exif = other.exif.clone();
        self.icc = other.icc.clone();
        self.xmp = other.xmp.clone();
        self.thum = other.thum.clone();
        self.text = other.text.clone();
    }
}

/// Position of one frame inside an [`Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cursor {
    pub page: usize,
    pub frame: usize,
}

#[derive(Debug, Clone)]
pub struct Image {
    pages: Vec<Page>,
}

impl Image {
    pub fn new(head: Page) -> Self {
        Self { pages: vec![head] }
    }

    pub fn from_buffer(buffer: Buffer) -> Self {
        Self::new(Page::from_buffer(buffer))
    }

    pub fn head(&self) -> &Page {
        &self.pages[0]
    }

    pub fn head_mut(&mut self) -> &mut Page {
        &mut self.pages[0]
    }

    pub fn head_buffer(&self) -> &Buffer {
        &self.pages[0].frames[0].buffer
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn pages_mut(&mut self) -> &mut [Page] {
        &mut self.pages
    }

    pub fn into_pages(self) -> Vec<Page> {
        self.pages
    }

    pub fn append_page(&mut self, page: Page) {
        self.pages.push(page);
    }

    pub fn page(&self, cursor: Cursor) -> Option<&Page> {
        self.pages.get(cursor.page)
    }

    pub fn frame(&self, cursor: Cursor) -> Option<&Frame> {
        self.pages.get(cursor.page)?.frames.get(cursor.frame)
    }

    pub fn page_next(&self, cursor: Cursor) -> Option<Cursor> {
        (cursor.page + 1 < self.pages.len()).then(|| Cursor {
            page: cursor.page + 1,
            frame: 0,
        })
    }

    pub fn page_previous(&self, cursor: Cursor) -> Option<Cursor> {
        (cursor.page > 0 && cursor.page < self.pages.len()).then(|| Cursor {
            page: cursor.page - 1,
            frame: 0,
        })
    }

    pub fn frame_next(&self, cursor: Cursor) -> Option<Cursor> {
        let page = self.pages.get(cursor.page)?;
        let n = page.frames.len();
        let frame = if cursor.frame + 1 < n {
            cursor.frame + 1
        } else if page.loop_closed && n > 1 && cursor.frame + 1 == n {
            0
        } else {
            return None;
        };
        Some(Cursor { frame, ..cursor })
    }

    pub fn frame_previous(&self, cursor: Cursor) -> Option<Cursor> {
        let page = self.pages.get(cursor.page)?;
        let n = page.frames.len();
        let frame = if cursor.frame > 0 && cursor.frame < n {
            cursor.frame - 1
        } else if cursor.frame == 0 && page.loop_closed && n > 1 {
            n - 1
        } else {
            return None;
        };
        Some(Cursor { frame, ..cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Format;

    fn frame() -> Frame {
        Frame::new(Buffer::new(Format::Xrgb32, 2, 2).unwrap())
    }

    fn animated(frames: usize) -> Page {
        let mut page = Page::new(frame());
        for _ in 1..frames {
            page.append_frame(frame());
        }
        page.close_frame_loop();
        page
    }

    #[test]
    fn single_frame_has_no_links() {
        let image = Image::new(animated(1));
        let head = Cursor::default();
        assert_eq!(image.frame_next(head), None);
        assert_eq!(image.frame_previous(head), None);
        assert_eq!(image.page_next(head), None);
        assert_eq!(image.page_previous(head), None);
    }

    #[test]
    fn closed_loop_wraps_both_ways() {
        let image = Image::new(animated(3));
        let head = Cursor::default();
        let tail = Cursor { page: 0, frame: 2 };
        assert_eq!(image.frame_previous(head), Some(tail));
        assert_eq!(image.frame_next(tail), Some(head));
    }

    #[test]
    fn open_loop_stops_at_tail() {
        let mut page = Page::new(frame());
        page.append_frame(frame());
        let image = Image::new(page);
        assert_eq!(image.frame_next(Cursor { page: 0, frame: 1 }), None);
        assert_eq!(image.frame_previous(Cursor::default()), None);
    }

    #[test]
    fn append_reopens_loop() {
        let mut page = animated(2);
        assert!(page.is_loop_closed());
        page.append_frame(frame());
        assert!(!page.is_loop_closed());
    }

    #[test]
    fn next_then_previous_is_identity() {
        let mut image = Image::new(animated(4));
        image.append_page(animated(1));
        image.append_page(animated(2));

        for (p, page) in image.pages().iter().enumerate() {
            for f in 0..page.frames().len() {
                let c = Cursor { page: p, frame: f };
                if let Some(n) = image.frame_next(c) {
                    assert_eq!(image.frame_previous(n), Some(c));
                }
                if let Some(n) = image.page_next(c) {
                    assert_eq!(image.page_previous(n), Some(Cursor { page: p, frame: 0 }));
                }
            }
        }
    }

    #[test]
    fn following_frames_returns_to_head() {
        let image = Image::new(animated(5));
        let mut c = Cursor::default();
        for _ in 0..5 {
            c = image.frame_next(c).unwrap();
        }
        assert_eq!(c, Cursor::default());
    }

    #[test]
    fn page_list_terminates() {
        let mut image = Image::new(animated(1));
        image.append_page(animated(1));
        image.append_page(animated(1));
        let mut c = Cursor::default();
        let mut steps = 0;
        while let Some(n) = image.page_next(c) {
            c = n;
            steps += 1;
        }
        assert_eq!(steps, 2);
    }
}

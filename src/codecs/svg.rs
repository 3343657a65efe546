//! SVG through `resvg`.
//!
//! Decoding rasterizes once at the document's natural size and attaches a
//! [`Rasterize`] hook that keeps the source bytes, so thumbnails and zoomed
//! views can be rendered sharply at any scale.

use super::{Codec, DecodeContext};
use crate::buffer::{Buffer, Format, pack_argb};
use crate::chain::{Image, Page, Rasterize};
use crate::cmm::{Cmm, Profile};
use crate::error::{Error, Result, Warning};
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::{Options, Tree};
use std::sync::Arc;

/// Largest axis a rasterization may have.
const MAX_AXIS: f64 = 32767.0;
const SNIFF_WINDOW: usize = 4096;

pub struct SvgCodec;

impl Codec for SvgCodec {
    fn name(&self) -> &'static str {
        "svg"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["image/svg+xml", "image/svg+xml-compressed"]
    }

    fn decode(&self, data: &[u8], _ctx: &DecodeContext, _warnings: &mut Vec<Warning>) -> Result<Image> {
        let gzipped = data.starts_with(&[0x1F, 0x8B]);
        if !gzipped && !mentions_svg(data) {
            return Err(Error::Unsupported);
        }
        let tree = Tree::from_data(data, &Options::default()).map_err(|e| {
            if gzipped {
                Error::Unsupported
            } else {
                Error::Corrupt(format!("SVG: {e}"))
            }
        })?;

        let buffer = rasterize(&tree, 1.0)?;
        let mut page = Page::from_buffer(buffer);
        page.render = Some(Arc::new(SvgRender {
            source: Arc::from(data),
        }));
        Ok(Image::new(page))
    }
}

fn mentions_svg(data: &[u8]) -> bool {
    data[..data.len().min(SNIFF_WINDOW)].windows(4).any(|w| w == b"<svg")
}

/// Re-renders the document from its source bytes.
pub struct SvgRender {
    source: Arc<[u8]>,
}

impl Rasterize for SvgRender {
    fn render(&self, cmm: &Cmm, target: Option<&Profile>, scale: f64) -> Result<Image> {
        let tree = Tree::from_data(&self.source, &Options::default())
            .map_err(|e| Error::Corrupt(format!("SVG: {e}")))?;
        let mut buffer = rasterize(&tree, scale)?;
        cmm.transform_argb32_premultiplied(&mut buffer, None, target);
        Ok(Image::from_buffer(buffer))
    }
}

/// Render `tree` at `scale` into premultiplied ARGB32.
fn rasterize(tree: &Tree, scale: f64) -> Result<Buffer> {
    let size = tree.size();
    let (natural_w, natural_h) = (size.width() as f64, size.height() as f64);
    if !(scale.is_finite() && scale > 0.0) {
        return Err(Error::Corrupt(format!("invalid SVG scale {scale}")));
    }
    let scale = scale.min(MAX_AXIS / natural_w.max(natural_h).max(1.0));
    let width = (natural_w * scale).ceil().max(1.0) as u32;
    let height = (natural_h * scale).ceil().max(1.0) as u32;

    let mut pixmap =
        Pixmap::new(width, height).ok_or_else(|| Error::OutOfMemory(width as usize * height as usize * 4))?;
    resvg::render(tree, Transform::from_scale(scale as f32, scale as f32), &mut pixmap.as_mut());

    // tiny-skia holds premultiplied RGBA bytes; swizzle into native ARGB words.
    let mut buffer = Buffer::new(Format::Argb32, width, height)?;
    let src = pixmap.data();
    for y in 0..height {
        let row = buffer.row_mut(y);
        let line = &src[y as usize * width as usize * 4..(y as usize + 1) * width as usize * 4];
        for (dst, p) in row.chunks_exact_mut(4).zip(line.chunks_exact(4)) {
            dst.copy_from_slice(&pack_argb(p[3], p[0], p[1], p[2]).to_ne_bytes());
        }
    }
    Ok(buffer)
}

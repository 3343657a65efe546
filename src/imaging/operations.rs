//! Pixel operations on [`Buffer`]s.
//!
//! Resampling goes through `image::imageops` on premultiplied samples so
//! transparent edges do not bleed dark fringes. Results are always 32-bit:
//! XRGB32 for opaque sources, premultiplied ARGB32 otherwise.

use crate::buffer::{Buffer, Format, Orientation, pack_argb, unpack_argb};
use crate::error::Result;
use image::RgbaImage;
use image::imageops::{self, FilterType};

/// Resize to exactly `width × height` with a Lanczos3 filter.
pub fn resize(buffer: &Buffer, width: u32, height: u32) -> Result<Buffer> {
    let source = buffer.to_argb32()?;
    if (source.width(), source.height()) == (width, height) {
        return Ok(source);
    }
    let opaque = source.format() == Format::Xrgb32;
    let samples = premultiplied_samples(&source);
    let resized = imageops::resize(&samples, width, height, FilterType::Lanczos3);
    from_premultiplied_samples(&resized, opaque)
}

/// Bake an Exif orientation into the pixels.
pub fn apply_orientation(buffer: &Buffer, orientation: Orientation) -> Result<Buffer> {
    let source = buffer.to_argb32()?;
    if matches!(orientation, Orientation::TopLeft | Orientation::Unknown) {
        return Ok(source);
    }
    let (w, h) = (source.width(), source.height());
    let (out_w, out_h) = if orientation.swaps_axes() { (h, w) } else { (w, h) };
    let mut out = Buffer::new(source.format(), out_w, out_h)?;

    for y in 0..out_h {
        for x in 0..out_w {
            let (sx, sy) = match orientation {
                Orientation::TopRight => (w - 1 - x, y),
                Orientation::BottomRight => (w - 1 - x, h - 1 - y),
                Orientation::BottomLeft => (x, h - 1 - y),
                Orientation::LeftTop => (y, x),
                Orientation::RightTop => (y, h - 1 - x),
                Orientation::RightBottom => (w - 1 - y, h - 1 - x),
                Orientation::LeftBottom => (w - 1 - y, x),
                Orientation::TopLeft | Orientation::Unknown => (x, y),
            };
            out.set_pixel_u32(x, y, source.pixel_u32(sx, sy));
        }
    }
    Ok(out)
}

/// Paint onto opaque black, producing XRGB32.
pub fn flatten(buffer: &Buffer) -> Result<Buffer> {
    let source = buffer.to_argb32()?;
    if source.format() == Format::Xrgb32 {
        return Ok(source);
    }
    let (w, h) = (source.width(), source.height());
    let mut out = Buffer::new(Format::Xrgb32, w, h)?;
    for y in 0..h {
        for x in 0..w {
            // Premultiplied over black is the color channels as stored.
            let (_, r, g, b) = unpack_argb(source.pixel_u32(x, y));
            out.set_pixel_u32(x, y, pack_argb(0xff, r, g, b));
        }
    }
    Ok(out)
}

/// Premultiplied ARGB32 regardless of source format; XRGB32 gains an
/// opaque alpha byte.
pub fn to_argb32(buffer: &Buffer) -> Result<Buffer> {
    let source = buffer.to_argb32()?;
    if source.format() == Format::Argb32 {
        return Ok(source);
    }
    let (w, h) = (source.width(), source.height());
    let mut out = Buffer::new(Format::Argb32, w, h)?;
    for y in 0..h {
        for x in 0..w {
            out.set_pixel_u32(x, y, source.pixel_u32(x, y) | 0xff00_0000);
        }
    }
    Ok(out)
}

fn premultiplied_samples(buffer: &Buffer) -> RgbaImage {
    let (w, h) = (buffer.width(), buffer.height());
    RgbaImage::from_fn(w, h, |x, y| {
        let (a, r, g, b) = unpack_argb(buffer.pixel_u32(x, y));
        let a = if buffer.format() == Format::Xrgb32 { 0xff } else { a };
        image::Rgba([r, g, b, a])
    })
}

fn from_premultiplied_samples(samples: &RgbaImage, opaque: bool) -> Result<Buffer> {
    let format = if opaque { Format::Xrgb32 } else { Format::Argb32 };
    let mut out = Buffer::new(format, samples.width(), samples.height())?;
    for (x, y, p) in samples.enumerate_pixels() {
        let [r, g, b, a] = p.0;
        let value = if opaque {
            pack_argb(0xff, r, g, b)
        } else {
            // Lanczos rings; keep color within alpha.
            pack_argb(a, r.min(a), g.min(a), b.min(a))
        };
        out.set_pixel_u32(x, y, value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> Buffer {
        let mut b = Buffer::new(Format::Xrgb32, w, h).unwrap();
        for y in 0..h {
            for x in 0..w {
                b.set_pixel_u32(x, y, pack_argb(0xff, x as u8, y as u8, 0));
            }
        }
        b
    }

    #[test]
    fn resize_keeps_opaque_format() {
        let out = resize(&gradient(40, 20), 10, 5).unwrap();
        assert_eq!((out.width(), out.height()), (10, 5));
        assert_eq!(out.format(), Format::Xrgb32);
    }

    #[test]
    fn resize_translucent_stays_premultiplied() {
        let mut b = Buffer::new(Format::Argb32, 8, 8).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                // Half-transparent red, premultiplied.
                b.set_pixel_u32(x, y, pack_argb(128, 128, 0, 0));
            }
        }
        let out = resize(&b, 4, 4).unwrap();
        assert_eq!(out.format(), Format::Argb32);
        let (a, r, _, _) = unpack_argb(out.pixel_u32(1, 1));
        assert_eq!(a, 128);
        assert!(r <= a);
    }

    #[test]
    fn orientation_rotates_and_mirrors() {
        let src = gradient(3, 2);
        let corner = |b: &Buffer, x, y| unpack_argb(b.pixel_u32(x, y));

        let right = apply_orientation(&src, Orientation::RightTop).unwrap();
        assert_eq!((right.width(), right.height()), (2, 3));
        // Rotated clockwise: the stored bottom-left lands top-left.
        assert_eq!(corner(&right, 0, 0), corner(&src, 0, 1));
        assert_eq!(corner(&right, 1, 0), corner(&src, 0, 0));

        let mirrored = apply_orientation(&src, Orientation::TopRight).unwrap();
        assert_eq!(corner(&mirrored, 0, 0), corner(&src, 2, 0));

        let left = apply_orientation(&src, Orientation::LeftBottom).unwrap();
        assert_eq!(corner(&left, 0, 0), corner(&src, 2, 0));

        let half = apply_orientation(&src, Orientation::BottomRight).unwrap();
        assert_eq!(corner(&half, 0, 0), corner(&src, 2, 1));
    }

    #[test]
    fn to_argb32_sets_opaque_alpha() {
        let out = to_argb32(&gradient(2, 2)).unwrap();
        assert_eq!(out.format(), Format::Argb32);
        assert_eq!(unpack_argb(out.pixel_u32(1, 1)), (255, 1, 1, 0));
    }

    #[test]
    fn flatten_paints_on_black() {
        let mut b = Buffer::new(Format::Argb32, 1, 1).unwrap();
        b.set_pixel_u32(0, 0, pack_argb(128, 100, 50, 0));
        let out = flatten(&b).unwrap();
        assert_eq!(out.format(), Format::Xrgb32);
        assert_eq!(unpack_argb(out.pixel_u32(0, 0)), (255, 100, 50, 0));
    }
}

//! BMP and TGA: single-frame formats read through the `image` crate and
//! handed to the same buffer selection as the animated formats.

use super::animate::{buffer_from_rgba, buffer_from_wide};
use super::{Codec, DecodeContext};
use crate::buffer::Wide16;
use crate::chain::{Image, Page};
use crate::error::{Error, Result, Warning};
use image::{DynamicImage, ImageFormat};

pub struct BmpCodec;
pub struct TgaCodec;

impl Codec for BmpCodec {
    fn name(&self) -> &'static str {
        "bmp"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["image/bmp", "image/x-bmp"]
    }

    fn decode(&self, data: &[u8], ctx: &DecodeContext, _warnings: &mut Vec<Warning>) -> Result<Image> {
        if !data.starts_with(b"BM") {
            return Err(Error::Unsupported);
        }
        decode_with(data, ImageFormat::Bmp, ctx)
    }
}

impl Codec for TgaCodec {
    fn name(&self) -> &'static str {
        "tga"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["image/x-tga", "image/x-targa"]
    }

    fn decode(&self, data: &[u8], ctx: &DecodeContext, _warnings: &mut Vec<Warning>) -> Result<Image> {
        decode_with(data, ImageFormat::Tga, ctx)
    }
}

fn decode_with(data: &[u8], format: ImageFormat, ctx: &DecodeContext) -> Result<Image> {
    let decoded = image::load_from_memory_with_format(data, format).map_err(map_image_error)?;
    Ok(Image::new(Page::from_buffer(dynamic_to_buffer(decoded, ctx)?)))
}

/// Select the output format for anything the `image` crate decoded.
pub(crate) fn dynamic_to_buffer(decoded: DynamicImage, ctx: &DecodeContext) -> Result<crate::buffer::Buffer> {
    let (width, height) = (decoded.width(), decoded.height());
    let deep = matches!(
        decoded,
        DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_)
            | DynamicImage::ImageRgb32F(_)
            | DynamicImage::ImageRgba32F(_)
    );
    if deep {
        let mut wide = Wide16::new(width, height)?;
        wide.data = decoded.into_rgba16().into_raw();
        buffer_from_wide(&wide, ctx)
    } else {
        buffer_from_rgba(width, height, decoded.into_rgba8().as_raw(), ctx)
    }
}

pub(crate) fn map_image_error(e: image::ImageError) -> Error {
    match e {
        image::ImageError::Unsupported(_) => Error::Unsupported,
        image::ImageError::Limits(l) => Error::Corrupt(format!("limits exceeded: {l}")),
        other => Error::Corrupt(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Format, unpack_argb};
    use std::io::Cursor;

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn bmp_opaque_is_xrgb() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(3, 2, image::Rgb([0, 0, 255])));
        let data = encode(img, ImageFormat::Bmp);
        let image = BmpCodec.decode(&data, &DecodeContext::default(), &mut Vec::new()).unwrap();
        let b = image.head_buffer();
        assert_eq!(b.format(), Format::Xrgb32);
        assert_eq!((b.width(), b.height()), (3, 2));
        assert_eq!(b.pixel_u32(2, 1) & 0xffffff, 0x0000ff);
    }

    #[test]
    fn tga_with_alpha_is_premultiplied_argb() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 100, 0, 128])));
        let data = encode(img, ImageFormat::Tga);
        let image = TgaCodec.decode(&data, &DecodeContext::default(), &mut Vec::new()).unwrap();
        let b = image.head_buffer();
        assert_eq!(b.format(), Format::Argb32);
        let (a, r, _, _) = unpack_argb(b.pixel_u32(0, 0));
        assert_eq!(a, 128);
        assert!(r < 200);
    }

    #[test]
    fn bmp_codec_rejects_other_bytes() {
        assert!(matches!(
            BmpCodec.decode(b"GIF89a", &DecodeContext::default(), &mut Vec::new()),
            Err(Error::Unsupported)
        ));
    }
}

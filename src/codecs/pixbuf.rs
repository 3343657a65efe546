//! Last-resort decoder: anything the `image` crate can read, as one frame.

use super::still::{dynamic_to_buffer, map_image_error};
use super::{Codec, DecodeContext};
use crate::chain::{Image, Page};
use crate::error::{Error, Result, Warning};
use image::ImageFormat;

pub struct PixbufCodec;

impl Codec for PixbufCodec {
    fn name(&self) -> &'static str {
        "pixbuf"
    }

    /// The list is dynamic; see [`mime_types`].
    fn mime_types(&self) -> &'static [&'static str] {
        &[]
    }

    fn decode(&self, data: &[u8], ctx: &DecodeContext, _warnings: &mut Vec<Warning>) -> Result<Image> {
        let format = image::guess_format(data).map_err(|_| Error::Unsupported)?;
        if !format.reading_enabled() {
            return Err(Error::Unsupported);
        }
        let decoded = image::load_from_memory_with_format(data, format).map_err(map_image_error)?;
        Ok(Image::new(Page::from_buffer(dynamic_to_buffer(decoded, ctx)?)))
    }
}

/// MIME types of every format this build of `image` can read.
pub fn mime_types() -> impl Iterator<Item = String> {
    ImageFormat::all()
        .filter(|f| f.reading_enabled())
        .map(|f| f.to_mime_type().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Format;
    use std::io::Cursor;

    #[test]
    fn decodes_formats_without_a_dedicated_codec() {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(4, 3, image::Rgb([1, 2, 3])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Qoi).unwrap();
        let image = PixbufCodec
            .decode(out.get_ref(), &DecodeContext::default(), &mut Vec::new())
            .unwrap();
        assert_eq!(image.head_buffer().format(), Format::Xrgb32);
        assert_eq!(image.head_buffer().width(), 4);
    }

    #[test]
    fn garbage_is_unsupported() {
        assert!(matches!(
            PixbufCodec.decode(b"nothing to see", &DecodeContext::default(), &mut Vec::new()),
            Err(Error::Unsupported)
        ));
    }

    #[test]
    fn mime_list_has_common_types() {
        let types: Vec<String> = mime_types().collect();
        assert!(types.iter().any(|t| t == "image/png"));
        assert!(types.iter().any(|t| t == "image/tiff"));
    }
}

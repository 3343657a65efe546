//! Codec dispatch: from bytes to an [`Image`] chain.
//!
//! ```text
//! bytes ──sniff──► BMP/GIF/PNG/TGA ──► animation driver ─┐
//!             ├──► JPEG ──────────────► jpeg (enhanced?) ─┤
//!             ├──► WebP ──────────────► webp ─────────────┤
//!             └──► other ──► registry: RAW, SVG, Xcursor, │
//!                            HEIF/AVIF, TIFF (in order) ──┤
//!                  (any failure) ──► `image` fallback ────┤
//!                                                         ▼
//!                                  Exif orientation ► color pass ► Image
//! ```
//!
//! A codec answers [`Error::Unsupported`] for bytes it does not recognize
//! and the next one is tried. Other failures are remembered and, unless a
//! later codec succeeds, the last of them is returned. Running out of
//! memory stops the search at once.
//!
//! The registry set is chosen at build time through cargo features (`raw`,
//! `svg`, `xcursor`, `heif`, `tiff`); the dispatch code does not know which
//! codecs exist.

mod animate;
pub mod gif;
#[cfg(feature = "heif")]
pub mod heif;
pub mod jpeg;
pub mod pixbuf;
pub mod png;
#[cfg(feature = "raw")]
pub mod raw;
pub(crate) mod riff;
pub mod still;
#[cfg(feature = "svg")]
pub mod svg;
#[cfg(feature = "tiff")]
pub mod tiff;
pub mod webp;
#[cfg(feature = "xcursor")]
pub mod xcursor;

use crate::chain::Image;
use crate::cmm::{Cmm, Profile};
use crate::error::{Error, Result, Warning};
use crate::metadata::apply_exif_orientation;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Per-call decode settings.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    pub cmm: &'a Cmm,
    /// Convert pixels into this profile. `None` leaves them in the source space.
    pub target: Option<&'a Profile>,
    /// Use the slower JPEG path with deblocking.
    pub enhance: bool,
    /// Allow RGB30 and RGBA128F output for deep sources.
    pub wide_output: bool,
}

impl<'a> DecodeContext<'a> {
    pub fn new(cmm: &'a Cmm) -> Self {
        Self {
            cmm,
            target: None,
            enhance: false,
            wide_output: false,
        }
    }

    pub fn with_target(mut self, target: Option<&'a Profile>) -> Self {
        self.target = target;
        self
    }

    pub fn with_enhance(mut self, enhance: bool) -> Self {
        self.enhance = enhance;
        self
    }

    pub fn with_wide_output(mut self, wide_output: bool) -> Self {
        self.wide_output = wide_output;
        self
    }

    /// Whether a color pass will follow, so alpha should stay straight.
    pub fn cmm_pending(&self) -> bool {
        self.target.is_some()
    }
}

impl Default for DecodeContext<'static> {
    fn default() -> Self {
        DecodeContext::new(Cmm::global())
    }
}

/// One decoder.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    /// MIME types this codec can read.
    fn mime_types(&self) -> &'static [&'static str];

    /// Decode `data`, or return [`Error::Unsupported`] if it is not this
    /// codec's format.
    fn decode(&self, data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image>;
}

/// Formats recognized by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bmp,
    Gif,
    Png,
    Tga,
    Jpeg,
    WebP,
    Other,
}

/// Classify `data` by magic number. TGA has none, so it is recognized from
/// a plausible header only when nothing else matched.
pub fn sniff(data: &[u8]) -> Kind {
    if data.starts_with(b"BM") && data.len() >= 14 {
        Kind::Bmp
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Kind::Gif
    } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Kind::Png
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Kind::Jpeg
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Kind::WebP
    } else if looks_like_tga(data) {
        Kind::Tga
    } else {
        Kind::Other
    }
}

fn looks_like_tga(data: &[u8]) -> bool {
    if data.len() < 18 {
        return false;
    }
    let color_map_type = data[1];
    let image_type = data[2];
    let width = u16::from_le_bytes([data[12], data[13]]);
    let height = u16::from_le_bytes([data[14], data[15]]);
    let depth = data[16];
    color_map_type <= 1
        && matches!(image_type, 1 | 2 | 3 | 9 | 10 | 11)
        && width > 0
        && height > 0
        && matches!(depth, 8 | 15 | 16 | 24 | 32)
}

/// The ordered "try next" decoders for bytes without a known magic.
pub struct Registry {
    codecs: Vec<Box<dyn Codec>>,
}

impl Registry {
    /// The build's opt-in codecs, in dispatch order.
    pub fn standard() -> Self {
        #[allow(unused_mut)]
        let mut codecs: Vec<Box<dyn Codec>> = Vec::new();
        #[cfg(feature = "raw")]
        codecs.push(Box::new(raw::RawCodec));
        #[cfg(feature = "svg")]
        codecs.push(Box::new(svg::SvgCodec));
        #[cfg(feature = "xcursor")]
        codecs.push(Box::new(xcursor::XcursorCodec));
        #[cfg(feature = "heif")]
        codecs.push(Box::new(heif::HeifCodec));
        #[cfg(feature = "tiff")]
        codecs.push(Box::new(tiff::TiffCodec));
        Self { codecs }
    }

    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::standard)
    }

    pub fn codecs(&self) -> impl Iterator<Item = &dyn Codec> {
        self.codecs.iter().map(|c| c.as_ref())
    }

    /// Every MIME type the dispatcher can read, sorted and deduplicated.
    pub fn supported_media_types(&self) -> Vec<String> {
        let mut types: Vec<String> = [
            gif::GifCodec.mime_types(),
            png::PngCodec.mime_types(),
            still::BmpCodec.mime_types(),
            still::TgaCodec.mime_types(),
            jpeg::JpegCodec.mime_types(),
            webp::WebpCodec.mime_types(),
        ]
        .into_iter()
        .chain(self.codecs().map(|c| c.mime_types()))
        .flatten()
        .map(|s| s.to_string())
        .chain(pixbuf::mime_types())
        .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Run the whole pipeline on `data`: decode, attach orientation, color
    /// convert.
    pub fn decode(&self, data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image> {
        let kind = sniff(data);
        debug!(target: "glance_io::decode", "sniffed {kind:?}, {} bytes", data.len());

        let mut last_error: Option<Error> = None;
        let mut attempt = |codec: &dyn Codec, warnings: &mut Vec<Warning>| -> Result<Option<Image>> {
            match codec.decode(data, ctx, warnings) {
                Ok(image) => Ok(Some(image)),
                Err(Error::Unsupported) => Ok(None),
                Err(e) if !e.is_recoverable() => Err(e),
                Err(e) => {
                    debug!(target: "glance_io::decode", "{} failed: {e}", codec.name());
                    last_error = Some(e);
                    Ok(None)
                }
            }
        };

        let primary: Option<&dyn Codec> = match kind {
            Kind::Gif => Some(&gif::GifCodec),
            Kind::Png => Some(&png::PngCodec),
            Kind::Bmp => Some(&still::BmpCodec),
            Kind::Tga => Some(&still::TgaCodec),
            Kind::Jpeg => Some(&jpeg::JpegCodec),
            Kind::WebP => Some(&webp::WebpCodec),
            Kind::Other => None,
        };

        let mut image = None;
        match primary {
            Some(codec) => image = attempt(codec, warnings)?,
            None => {
                for codec in self.codecs() {
                    if let Some(found) = attempt(codec, warnings)? {
                        image = Some(found);
                        break;
                    }
                }
            }
        }
        if image.is_none() {
            image = attempt(&pixbuf::PixbufCodec, warnings)?;
        }

        let Some(mut image) = image else {
            return Err(last_error.unwrap_or(Error::Unsupported));
        };

        for page in image.pages_mut() {
            apply_exif_orientation(page);
        }
        ctx.cmm.cmm_finish(&mut image, ctx.target, warnings)?;
        Ok(image)
    }
}

/// Decode bytes with the standard registry.
pub fn decode(data: &[u8], ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image> {
    Registry::global().decode(data, ctx, warnings)
}

/// Read and decode a local file.
pub fn open_path(path: &Path, ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image> {
    let data = std::fs::read(path).map_err(|e| Error::open(path, e))?;
    decode(&data, ctx, warnings)
}

/// Resolve a `file://` URI (or a plain path) to a local path.
pub fn uri_to_path(uri: &str) -> Result<PathBuf> {
    match url::Url::parse(uri) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| Error::Open(format!("{uri}: not a local file URI"))),
        Ok(url) if url.scheme().len() > 1 => {
            Err(Error::Open(format!("{uri}: unsupported scheme {}", url.scheme())))
        }
        // Plain paths, including Windows drive letters that parse as a scheme.
        _ => Ok(PathBuf::from(uri)),
    }
}

/// Absolute `file://` URI for a local path.
pub fn path_to_uri(path: &Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| Error::open(path, e))?
            .join(path)
    };
    url::Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| Error::Open(format!("{}: cannot form a file URI", path.display())))
}

pub fn open_uri(uri: &str, ctx: &DecodeContext, warnings: &mut Vec<Warning>) -> Result<Image> {
    open_path(&uri_to_path(uri)?, ctx, warnings)
}

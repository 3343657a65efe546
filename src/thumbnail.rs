//! Thumbnail production, extraction and lookup.
//!
//! ## Produce
//!
//! ```text
//! file ──decode (target profile)──► head page
//!      ──fit (never upscale)──► vector? re-render at scale : Lanczos3
//!      ──orientation baked in──► ARGB32
//!      ──PNG + Thumb::* text──► temp file ──rename──► cache
//! ```
//!
//! The returned buffer is the same one written to the cache. A failure at
//! any step leaves no cache entry behind and is logged at debug level.
//!
//! ## Extract
//!
//! Embedded previews are tried in order: a WebP `THUM` chunk, the Exif
//! IFD1 JPEG thumbnail, then a camera RAW preview. The first one that
//! decodes is fitted to the requested size and oriented like the image it
//! belongs to.

use crate::buffer::{Buffer, Orientation};
use crate::cache::{CacheLayout, InvalidateStats, SourceInfo, ThumbInfo, ThumbnailSize, write_thumbnail};
use crate::chain::Page;
use crate::cmm::{Cmm, Profile};
use crate::codecs::{DecodeContext, decode, path_to_uri};
use crate::error::{Error, Warning};
use crate::imaging::{
    apply_orientation, fit_dimensions, oriented_dimensions, resize, scale_for, to_argb32,
    wide_fit_dimensions,
};
use crate::metadata::exif_thumbnail;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("Decode failed: {0}")]
    Decode(#[from] Error),
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl ThumbnailError {
    fn io(path: &Path, source: io::Error) -> Self {
        ThumbnailError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Produces and reads thumbnails under one cache root.
#[derive(Debug, Clone)]
pub struct Thumbnailer {
    layout: CacheLayout,
    producer: String,
    cmm: Cmm,
    target: Option<Profile>,
    enhance: bool,
    wide_output: bool,
}

impl Thumbnailer {
    /// Thumbnails converted to sRGB, tagged with this crate as producer.
    pub fn new(layout: CacheLayout) -> Self {
        let cmm = Cmm::global().clone();
        let target = Some(cmm.get_profile_srgb());
        Self {
            layout,
            producer: concat!("glance-io ", env!("CARGO_PKG_VERSION")).to_string(),
            cmm,
            target,
            enhance: false,
            wide_output: false,
        }
    }

    /// Value of the `Software` text chunk.
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    /// Color space of produced pixels; `None` keeps the source's.
    pub fn with_target(mut self, target: Option<Profile>) -> Self {
        self.target = target;
        self
    }

    pub fn with_enhance(mut self, enhance: bool) -> Self {
        self.enhance = enhance;
        self
    }

    /// Decode deep sources to RGB30 / RGBA128F before scaling, so color
    /// conversion runs at 16 bits per channel.
    pub fn with_wide_output(mut self, wide_output: bool) -> Self {
        self.wide_output = wide_output;
        self
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    fn context(&self) -> DecodeContext<'_> {
        DecodeContext::new(&self.cmm)
            .with_target(self.target.as_ref())
            .with_enhance(self.enhance)
            .with_wide_output(self.wide_output)
    }

    /// Square-fit thumbnail, written to the cache and returned.
    pub fn produce(&self, path: &Path, size: ThumbnailSize) -> Result<Buffer, ThumbnailError> {
        self.produce_shaped(path, size, false)
    }

    /// Height-bound thumbnail (width at most twice the size) for the wide
    /// namespace.
    pub fn produce_wide(&self, path: &Path, size: ThumbnailSize) -> Result<Buffer, ThumbnailError> {
        self.produce_shaped(path, size, true)
    }

    /// Square-fit rendering that bypasses the cache.
    pub fn scaled(&self, path: &Path, size: ThumbnailSize) -> Result<Buffer, ThumbnailError> {
        let data = std::fs::read(path).map_err(|e| ThumbnailError::io(path, e))?;
        let mut warnings = Vec::new();
        let image = decode(&data, &self.context(), &mut warnings)?;
        log_warnings(path, &warnings);
        let page = image.head();
        Ok(self.render(page, page.orientation, size.pixels(), false)?.0)
    }

    fn produce_shaped(&self, path: &Path, size: ThumbnailSize, wide: bool) -> Result<Buffer, ThumbnailError> {
        let result = self.try_produce(path, size, wide);
        if let Err(e) = &result {
            debug!(target: "glance_io::thumbnail", "no thumbnail for {}: {e}", path.display());
        }
        result
    }

    fn try_produce(&self, path: &Path, size: ThumbnailSize, wide: bool) -> Result<Buffer, ThumbnailError> {
        let uri = path_to_uri(path)?;
        // Stat before reading so a concurrent change makes the entry stale.
        let source = SourceInfo::stat(path, uri.clone()).map_err(|e| ThumbnailError::io(path, e))?;
        let data = std::fs::read(path).map_err(|e| ThumbnailError::io(path, e))?;

        let mut warnings = Vec::new();
        let image = decode(&data, &self.context(), &mut warnings)?;
        log_warnings(path, &warnings);

        let page = image.head();
        let (buffer, display) = self.render(page, page.orientation, size.pixels(), wide)?;
        let dest = self.layout.path_for(&uri, size, wide);
        write_thumbnail(&dest, &buffer, &source, display, &self.producer)
            .map_err(|e| ThumbnailError::io(&dest, e))?;
        debug!(
            target: "glance_io::thumbnail",
            "{} → {} ({}x{})",
            path.display(),
            dest.display(),
            buffer.width(),
            buffer.height()
        );
        Ok(buffer)
    }

    /// Fit, render and orient one page. Returns the thumbnail and the
    /// displayed size of the original.
    fn render(
        &self,
        page: &Page,
        orientation: Orientation,
        size: u32,
        wide: bool,
    ) -> Result<(Buffer, (u32, u32)), ThumbnailError> {
        let stored = (page.width(), page.height());
        let swaps = orientation.swaps_axes();
        let display = oriented_dimensions(stored, swaps);
        let fitted = if wide {
            wide_fit_dimensions(display, size)
        } else {
            fit_dimensions(display, size)
        };
        let fitted_stored = oriented_dimensions(fitted, swaps);

        let rendered = match &page.render {
            Some(hook) if fitted_stored != stored => {
                let scale = scale_for(stored, fitted_stored);
                match hook.render(&self.cmm, self.target.as_ref(), scale) {
                    Ok(image) => Some(image.head_buffer().clone()),
                    Err(e) => {
                        debug!(target: "glance_io::thumbnail", "re-render at {scale} failed: {e}");
                        None
                    }
                }
            }
            _ => None,
        };
        let base = rendered.as_ref().unwrap_or(&page.head().buffer);

        let resized = resize(base, fitted_stored.0, fitted_stored.1)?;
        let oriented = apply_orientation(&resized, orientation)?;
        Ok((to_argb32(&oriented)?, display))
    }

    /// An embedded preview fitted to `size`, or `None` when the file
    /// carries none.
    pub fn extract(&self, path: &Path, size: ThumbnailSize) -> Result<Option<Buffer>, ThumbnailError> {
        let data = std::fs::read(path).map_err(|e| ThumbnailError::io(path, e))?;
        let ctx = self.context();
        let mut warnings = Vec::new();

        let page = match decode(&data, &ctx, &mut warnings) {
            Ok(image) => image.into_pages().into_iter().next(),
            Err(e) => {
                debug!(target: "glance_io::thumbnail", "{}: {e}", path.display());
                None
            }
        };

        let mut candidates: Vec<Vec<u8>> = Vec::new();
        let mut orientation = Orientation::TopLeft;
        if let Some(page) = &page {
            orientation = page.orientation;
            if let Some(thum) = &page.thum {
                candidates.push(thum.to_vec());
            }
            if let Some(jpeg) = page.exif.as_deref().and_then(exif_thumbnail) {
                candidates.push(jpeg);
            }
        }
        #[cfg(feature = "raw")]
        if let Some(preview) = crate::codecs::raw::embedded_preview(&data) {
            candidates.push(preview);
        }

        for blob in candidates {
            let preview = match decode(&blob, &ctx, &mut warnings) {
                Ok(image) => image,
                Err(e) => {
                    debug!(target: "glance_io::thumbnail", "embedded preview rejected: {e}");
                    continue;
                }
            };
            let head = preview.head();
            // Previews rarely carry their own orientation; inherit the image's.
            let orientation = match head.orientation {
                Orientation::TopLeft | Orientation::Unknown => orientation,
                own => own,
            };
            let (buffer, _) = self.render(head, orientation, size.pixels(), false)?;
            log_warnings(path, &warnings);
            return Ok(Some(buffer));
        }
        Ok(None)
    }

    /// A cached square thumbnail that is still current.
    pub fn lookup(&self, path: &Path, size: ThumbnailSize) -> Option<Buffer> {
        self.lookup_shaped(path, size, false)
    }

    pub fn lookup_wide(&self, path: &Path, size: ThumbnailSize) -> Option<Buffer> {
        self.lookup_shaped(path, size, true)
    }

    fn lookup_shaped(&self, path: &Path, size: ThumbnailSize, wide: bool) -> Option<Buffer> {
        let uri = path_to_uri(path).ok()?;
        let cached = self.layout.path_for(&uri, size, wide);
        let info = ThumbInfo::read(&cached)?;
        if info.uri.as_deref() != Some(uri.as_str()) || !info.is_current() {
            return None;
        }
        let data = std::fs::read(&cached).ok()?;
        // Cached pixels are already in the target space.
        let image = decode(&data, &DecodeContext::new(&self.cmm), &mut Vec::new()).ok()?;
        Some(image.head_buffer().clone())
    }

    /// Delete stale entries across every size directory.
    pub fn invalidate(&self) -> InvalidateStats {
        crate::cache::invalidate(&self.layout)
    }
}

fn log_warnings(path: &Path, warnings: &[Warning]) {
    for w in warnings {
        debug!(target: "glance_io::thumbnail", "{}: {w}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Format;
    use crate::cache::{KEY_MTIME, KEY_URI};
    use crate::test_helpers::*;
    use std::fs;
    use tempfile::TempDir;

    fn thumbnailer(tmp: &TempDir) -> Thumbnailer {
        Thumbnailer::new(CacheLayout::new(tmp.path().join("thumbnails")))
    }

    #[test]
    fn produce_fits_and_writes_cache_entry() {
        let tmp = TempDir::new().unwrap();
        let source = write_file(tmp.path(), "wide.jpg", &solid_jpeg(2000, 1000, [30, 120, 200], None));
        let t = thumbnailer(&tmp);

        let thumb = t.produce(&source, ThumbnailSize::Large).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (512, 256));
        assert_eq!(thumb.format(), Format::Argb32);

        let uri = path_to_uri(&source).unwrap();
        let cached = t.layout().path_for(&uri, ThumbnailSize::Large, false);
        let info = ThumbInfo::read(&cached).unwrap();
        assert_eq!(info.uri.as_deref(), Some(uri.as_str()), "{KEY_URI}");
        let mtime = SourceInfo::stat(&source, uri.clone()).unwrap().mtime;
        assert_eq!(info.mtime, Some(mtime), "{KEY_MTIME}");
        assert_eq!((info.image_width, info.image_height), (Some(2000), Some(1000)));

        let again = t.lookup(&source, ThumbnailSize::Large).unwrap();
        assert_eq!((again.width(), again.height()), (512, 256));
    }

    #[test]
    fn produce_never_upscales() {
        let tmp = TempDir::new().unwrap();
        let source = write_file(tmp.path(), "small.png", &solid_png(40, 30, [0, 0, 0]));
        let thumb = thumbnailer(&tmp).produce(&source, ThumbnailSize::Giant).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (40, 30));
    }

    #[test]
    fn produce_applies_orientation() {
        let tmp = TempDir::new().unwrap();
        let exif = exif_with_orientation(6, false);
        let source = write_file(tmp.path(), "rotated.jpg", &solid_jpeg(64, 32, [9, 9, 9], Some(&exif)));
        let thumb = thumbnailer(&tmp).produce(&source, ThumbnailSize::Small).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (32, 64));
    }

    #[test]
    fn produce_wide_uses_wide_namespace() {
        let tmp = TempDir::new().unwrap();
        let source = write_file(tmp.path(), "pano.png", &solid_png(600, 100, [1, 2, 3]));
        let t = thumbnailer(&tmp);
        let thumb = t.produce_wide(&source, ThumbnailSize::Small).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (256, 43));

        let uri = path_to_uri(&source).unwrap();
        assert!(t.layout().path_for(&uri, ThumbnailSize::Small, true).exists());
        assert!(!t.layout().path_for(&uri, ThumbnailSize::Small, false).exists());
        assert!(t.lookup_wide(&source, ThumbnailSize::Small).is_some());
    }

    #[test]
    fn scaled_skips_the_cache() {
        let tmp = TempDir::new().unwrap();
        let source = write_file(tmp.path(), "s.png", &solid_png(300, 150, [7, 7, 7]));
        let t = thumbnailer(&tmp);
        let thumb = t.scaled(&source, ThumbnailSize::Small).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (128, 64));
        assert!(!t.layout().directory(ThumbnailSize::Small, false).exists());
    }

    #[test]
    fn failed_produce_leaves_no_entry() {
        let tmp = TempDir::new().unwrap();
        let source = write_file(tmp.path(), "broken.png", b"definitely not an image");
        let t = thumbnailer(&tmp);
        assert!(t.produce(&source, ThumbnailSize::Small).is_err());
        let dir = t.layout().directory(ThumbnailSize::Small, false);
        let leftovers = fs::read_dir(&dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn lookup_misses_after_source_changes() {
        let tmp = TempDir::new().unwrap();
        let source = write_file(tmp.path(), "a.png", &solid_png(8, 8, [255, 0, 0]));
        let t = thumbnailer(&tmp);
        t.produce(&source, ThumbnailSize::Small).unwrap();

        let file = fs::File::options().write(true).open(&source).unwrap();
        file.set_modified(std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1000))
            .unwrap();
        assert!(t.lookup(&source, ThumbnailSize::Small).is_none());
        assert_eq!(t.invalidate().removed, 1);
    }

    #[test]
    fn extract_exif_thumbnail() {
        let tmp = TempDir::new().unwrap();
        let preview = solid_jpeg(16, 8, [0, 255, 0], None);
        let exif = exif_with_thumbnail(&preview);
        let source = write_file(tmp.path(), "camera.jpg", &solid_jpeg(320, 160, [0, 0, 255], Some(&exif)));

        let thumb = thumbnailer(&tmp).extract(&source, ThumbnailSize::Small).unwrap().unwrap();
        assert_eq!((thumb.width(), thumb.height()), (16, 8));
    }

    #[test]
    fn extract_without_preview_is_none() {
        let tmp = TempDir::new().unwrap();
        let source = write_file(tmp.path(), "plain.png", &solid_png(8, 8, [1, 1, 1]));
        assert!(thumbnailer(&tmp).extract(&source, ThumbnailSize::Small).unwrap().is_none());
    }

    #[test]
    fn wide_output_reaches_the_decoder() {
        let tmp = TempDir::new().unwrap();
        let (w, h) = (300u32, 150u32);
        let data: Vec<u8> = (0..w * h * 3).flat_map(|_| 0x8000u16.to_be_bytes()).collect();
        let deep = encode_png(w, h, png::ColorType::Rgb, png::BitDepth::Sixteen, &data, &[]);
        let source = write_file(tmp.path(), "deep.png", &deep);

        let t = thumbnailer(&tmp).with_wide_output(true);
        assert!(t.context().wide_output);
        assert!(!thumbnailer(&tmp).context().wide_output);

        let thumb = t.scaled(&source, ThumbnailSize::Small).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (128, 64));
        assert_eq!(thumb.format(), Format::Xrgb32);
        let (_, r, g, b) = crate::buffer::unpack_argb(thumb.pixel_u32(64, 32));
        for c in [r, g, b] {
            assert!(c.abs_diff(128) <= 2, "channel {c}");
        }
    }

    #[cfg(feature = "svg")]
    #[test]
    fn vector_sources_are_rerendered_at_scale() {
        let tmp = TempDir::new().unwrap();
        let svg = br##"<svg xmlns="http://www.w3.org/2000/svg" width="2000" height="1000">
            <rect width="2000" height="1000" fill="#00ff00"/></svg>"##;
        let source = write_file(tmp.path(), "big.svg", svg);
        let thumb = thumbnailer(&tmp).produce(&source, ThumbnailSize::Small).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (128, 64));
    }
}

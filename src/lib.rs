//! # glance-io
//!
//! The image I/O core of an image browser: decode anything a user is likely
//! to point it at, color-manage it, and hand pixels to a viewer or a
//! thumbnail cache.
//!
//! # Architecture
//!
//! ```text
//! bytes ──► codecs ──► Image (pages × frames of Buffers + metadata)
//!                          │
//!            cmm ◄─────────┤ convert into the target profile
//!                          │
//!       ┌──────────────────┼───────────────────┬──────────────┐
//!       ▼                  ▼                   ▼              ▼
//!   thumbnail          serialize            encoder       metadata
//!   (freedesktop       (IPC header +        (lossless     (sidecar,
//!    cache)             raw pixels)          WebP)         Exif)
//! ```
//!
//! A decoded [`chain::Image`] is a list of pages; each page is a looping
//! list of composited frames. Frames own a [`buffer::Buffer`] in one of four
//! pixel formats. Metadata blobs (Exif, ICC, XMP, embedded thumbnails) hang
//! off the page as explicit fields.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`buffer`] | Pixel buffers, formats, orientation |
//! | [`chain`] | Pages and frames: the decoded image structure |
//! | [`cmm`] | ICC profiles and color transforms (`moxcms`) |
//! | [`codecs`] | Format sniffing, dispatch and every decoder |
//! | [`metadata`] | Exif orientation and thumbnails, JPEG segments, sidecar files |
//! | [`imaging`] | Fit arithmetic, resampling, orientation, flattening |
//! | [`cache`] | freedesktop thumbnail cache layout, attributes and invalidation |
//! | [`thumbnail`] | Produce, extract and look up thumbnails |
//! | [`collate`] | Natural filename sort keys |
//! | [`dirmodel`] | Watched, sorted listing of one directory |
//! | [`serialize`] | Raw pixel hand-off between processes, search encoding |
//! | [`encoder`] | Lossless WebP "save as" with metadata |
//! | [`config`] | `config.toml` loading, merging and validation |
//! | [`error`] | Error kinds and decode warnings |
//!
//! # Design Decisions
//!
//! ## Straight Alpha Until the Color Pass
//!
//! Codecs hand out premultiplied ARGB32 unless a color conversion is still
//! pending, in which case alpha stays straight and [`cmm::Cmm::cmm_finish`]
//! premultiplies after converting. Color transforms never see premultiplied
//! samples.
//!
//! ## Metadata Is Never Fatal
//!
//! A malformed Exif block, a repeated chunk or an unreadable ICC profile
//! becomes an [`error::Warning`]; the pixels are still returned.
//!
//! ## Codecs Are Chosen at Build Time
//!
//! RAW, SVG, Xcursor, HEIF/AVIF and TIFF are cargo features. The dispatcher
//! walks whatever registry was compiled in and falls back to the `image`
//! crate for anything nobody claimed.

pub mod buffer;
pub mod cache;
pub mod chain;
pub mod cmm;
pub mod codecs;
pub mod collate;
pub mod config;
pub mod dirmodel;
pub mod encoder;
pub mod error;
pub mod imaging;
pub mod metadata;
pub mod serialize;
pub mod thumbnail;

#[cfg(test)]
pub(crate) mod test_helpers;

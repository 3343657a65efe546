//! Image processing for thumbnails and search encodings.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Fit** | pure math, never upscales |
//! | **Resize** | `image::imageops::resize` with `Lanczos3`, premultiplied |
//! | **Orientation** | per-pixel remap of the eight Exif orientations |
//! | **Flatten** | premultiplied over opaque black |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Operations**: Pixel work on [`Buffer`](crate::buffer::Buffer)s

mod calculations;
pub mod operations;

pub use calculations::{fit_dimensions, oriented_dimensions, scale_for, wide_fit_dimensions};
pub use operations::{apply_orientation, flatten, resize, to_argb32};

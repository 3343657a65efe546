//! Pure calculation functions for thumbnail dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Fit `source` inside a `size × size` square, preserving aspect ratio.
///
/// Never upscales: a source already inside the square comes back unchanged.
/// Neither axis drops below one pixel.
///
/// # Examples
/// ```
/// # use glance_io::imaging::fit_dimensions;
/// // 2000x1000 into 512 → 512x256
/// assert_eq!(fit_dimensions((2000, 1000), 512), (512, 256));
///
/// // Small sources are left alone
/// assert_eq!(fit_dimensions((100, 40), 512), (100, 40));
/// ```
pub fn fit_dimensions(source: (u32, u32), size: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    let longer = src_w.max(src_h);
    if longer <= size || longer == 0 {
        return source;
    }
    let scale = size as f64 / longer as f64;
    scaled(source, scale)
}

/// Height-bound fit for the wide namespace.
///
/// The height is fitted to `size`; the width follows the aspect ratio but
/// may not exceed `2 × size`, in which case the width becomes the bound.
/// Never upscales.
pub fn wide_fit_dimensions(source: (u32, u32), size: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w == 0 || src_h == 0 {
        return source;
    }
    let max_w = size.saturating_mul(2);
    let scale = (size as f64 / src_h as f64).min(max_w as f64 / src_w as f64);
    if scale >= 1.0 {
        return source;
    }
    scaled(source, scale)
}

/// Scale factor that takes `natural` to `target` along the longer axis.
pub fn scale_for(natural: (u32, u32), target: (u32, u32)) -> f64 {
    let natural_long = natural.0.max(natural.1).max(1) as f64;
    let target_long = target.0.max(target.1) as f64;
    target_long / natural_long
}

/// Dimensions as displayed after applying an orientation that may swap axes.
pub fn oriented_dimensions(stored: (u32, u32), swaps_axes: bool) -> (u32, u32) {
    if swaps_axes {
        (stored.1, stored.0)
    } else {
        stored
    }
}

fn scaled((w, h): (u32, u32), scale: f64) -> (u32, u32) {
    let out_w = ((w as f64 * scale).round() as u32).max(1);
    let out_h = ((h as f64 * scale).round() as u32).max(1);
    (out_w, out_h)
}

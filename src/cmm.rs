//! Color management on top of `moxcms`.
//!
//! Profiles are built from ICC bytes, from the sRGB shortcut, or from
//! parametric arguments (gamma, white point and primaries, as found in PNG
//! `gAMA`/`cHRM` chunks). Transforms always use the perceptual intent with
//! black-point compensation off.
//!
//! | Buffer format | Route |
//! |---|---|
//! | ARGB32 | [`Cmm::transform_argb32_premultiplied`]: un-premultiply, transform, premultiply |
//! | XRGB32 | [`Cmm::transform_xrgb32`] |
//! | RGB30, RGBA128F | unpack to 16-bit RGBA, [`Cmm::transform_4x16le`], repack |
//!
//! Every call builds the transform it needs and drops it before returning,
//! so a [`Cmm`] can be shared freely; nothing mutable lives in it.

use crate::buffer::{
    Buffer, Format, Wide16, pack_argb, premultiply_argb32, unpack_argb, unpremultiply,
};
use crate::chain::{Frame, Image, Page};
use crate::error::{Result, Warning, warn};
use moxcms::{ColorProfile, Layout, RenderingIntent, TransformOptions, Xyzd, curve_from_gamma};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// A parsed color profile plus its ICC serialization.
#[derive(Clone)]
pub struct Profile {
    inner: ColorProfile,
    icc: Arc<[u8]>,
}

impl Profile {
    fn from_color_profile(inner: ColorProfile) -> Self {
        let icc: Arc<[u8]> = match inner.encode() {
            Ok(bytes) => Arc::from(bytes),
            Err(_) => Arc::from(Vec::new()),
        };
        Self { inner, icc }
    }

    /// The ICC bytes, when the profile can be serialized.
    pub fn icc(&self) -> Option<&[u8]> {
        (!self.icc.is_empty()).then_some(&*self.icc)
    }

    /// Two profiles with identical serializations convert to nothing.
    pub fn is_identical(&self, other: &Profile) -> bool {
        !self.icc.is_empty() && self.icc == other.icc
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("color_space", &self.inner.color_space)
            .field("icc_len", &self.icc.len())
            .finish()
    }
}

/// The color-management context.
#[derive(Debug, Clone)]
pub struct Cmm {
    srgb: Profile,
}

impl Default for Cmm {
    fn default() -> Self {
        Self::new()
    }
}

fn options() -> TransformOptions {
    TransformOptions {
        rendering_intent: RenderingIntent::Perceptual,
        ..Default::default()
    }
}

impl Cmm {
    pub fn new() -> Self {
        Self {
            srgb: Profile::from_color_profile(ColorProfile::new_srgb()),
        }
    }

    /// The lazily created process-wide context.
    pub fn global() -> &'static Cmm {
        static GLOBAL: OnceLock<Cmm> = OnceLock::new();
        GLOBAL.get_or_init(Cmm::new)
    }

    pub fn get_profile(&self, bytes: &[u8]) -> Option<Profile> {
        match ColorProfile::new_from_slice(bytes) {
            Ok(inner) => Some(Profile {
                inner,
                icc: Arc::from(bytes),
            }),
            Err(e) => {
                debug!(target: "glance_io::cmm", "ICC profile rejected: {e:?}");
                None
            }
        }
    }

    pub fn get_profile_srgb(&self) -> Profile {
        self.srgb.clone()
    }

    /// sRGB primaries with a pure power-law transfer of exponent `gamma`
    /// (encoded to linear, so 2.2 for a typical display).
    pub fn get_profile_srgb_gamma(&self, gamma: f64) -> Option<Profile> {
        if !(gamma > 0.0 && gamma.is_finite()) {
            return None;
        }
        let mut profile = ColorProfile::new_srgb();
        set_gamma(&mut profile, gamma);
        Some(Profile::from_color_profile(profile))
    }

    /// A matrix/TRC profile from chromaticities. `None` when the gamma is
    /// not positive, a `y` coordinate is not positive, or the primaries are
    /// collinear.
    pub fn get_profile_parametric(
        &self,
        gamma: f64,
        white: (f64, f64),
        primaries: [(f64, f64); 3],
    ) -> Option<Profile> {
        if !(gamma > 0.0 && gamma.is_finite()) {
            return None;
        }
        let [red, green, blue] = colorants_d50(white, primaries)?;
        let mut profile = ColorProfile::new_srgb();
        set_gamma(&mut profile, gamma);
        profile.red_colorant = red;
        profile.green_colorant = green;
        profile.blue_colorant = blue;
        Some(Profile::from_color_profile(profile))
    }

    pub fn profile_to_bytes(&self, profile: &Profile) -> Option<Vec<u8>> {
        profile.icc().map(<[u8]>::to_vec)
    }

    /// Convert Adobe-inverted CMYK samples (4 bytes per pixel, tightly
    /// packed) to an opaque ARGB32 buffer.
    ///
    /// With both profiles present and a buildable transform the ICC path
    /// runs; otherwise each channel is `C · K / 255` on the raw samples.
    /// The flag reports whether the ICC path produced the pixels.
    pub fn transform_cmyk(
        &self,
        cmyk: &[u8],
        width: u32,
        height: u32,
        src: Option<&Profile>,
        dst: Option<&Profile>,
    ) -> Result<(Buffer, bool)> {
        let mut out = Buffer::new(Format::Argb32, width, height)?;
        let w = width as usize;

        let transform = match (src, dst) {
            (Some(src), Some(dst)) => {
                match src
                    .inner
                    .create_transform_8bit(Layout::Rgba, &dst.inner, Layout::Rgb, options())
                {
                    Ok(t) => Some(t),
                    Err(e) => {
                        debug!(target: "glance_io::cmm", "CMYK transform unavailable: {e:?}");
                        None
                    }
                }
            }
            _ => None,
        };

        let mut ink = vec![0u8; w * 4];
        let mut rgb = vec![0u8; w * 3];
        let mut all_converted = transform.is_some();
        for y in 0..height {
            let samples = &cmyk[y as usize * w * 4..(y as usize + 1) * w * 4];
            let converted = match &transform {
                Some(t) => {
                    for (dst, src) in ink.iter_mut().zip(samples) {
                        *dst = 255 - src;
                    }
                    t.transform(&ink, &mut rgb).is_ok()
                }
                None => false,
            };
            if !converted {
                all_converted = false;
                for (px, s) in rgb.chunks_exact_mut(3).zip(samples.chunks_exact(4)) {
                    let k = s[3] as u32;
                    px[0] = (s[0] as u32 * k / 255) as u8;
                    px[1] = (s[1] as u32 * k / 255) as u8;
                    px[2] = (s[2] as u32 * k / 255) as u8;
                }
            }
            let row = out.row_mut(y);
            for (dst, p) in row.chunks_exact_mut(4).zip(rgb.chunks_exact(3)) {
                dst.copy_from_slice(&pack_argb(0xff, p[0], p[1], p[2]).to_ne_bytes());
            }
        }
        Ok((out, all_converted))
    }

    /// Convert an XRGB32 buffer in place. A missing `src` means sRGB; a
    /// missing `dst` means no conversion.
    pub fn transform_xrgb32(&self, buffer: &mut Buffer, src: Option<&Profile>, dst: Option<&Profile>) {
        let Some(dst) = dst else { return };
        let src = src.unwrap_or(&self.srgb);
        if src.is_identical(dst) {
            return;
        }
        let transform = match src
            .inner
            .create_transform_8bit(Layout::Rgb, &dst.inner, Layout::Rgb, options())
        {
            Ok(t) => t,
            Err(e) => {
                debug!(target: "glance_io::cmm", "RGB transform unavailable: {e:?}");
                return;
            }
        };
        let w = buffer.width() as usize;
        let mut rgb_in = vec![0u8; w * 3];
        let mut rgb_out = vec![0u8; w * 3];
        for y in 0..buffer.height() {
            let row = buffer.row_mut(y);
            for (px, p) in rgb_in.chunks_exact_mut(3).zip(row.chunks_exact(4)) {
                let (_, r, g, b) = unpack_argb(u32::from_ne_bytes([p[0], p[1], p[2], p[3]]));
                px.copy_from_slice(&[r, g, b]);
            }
            if transform.transform(&rgb_in, &mut rgb_out).is_err() {
                return;
            }
            for (p, px) in row.chunks_exact_mut(4).zip(rgb_out.chunks_exact(3)) {
                let (x, _, _, _) = unpack_argb(u32::from_ne_bytes([p[0], p[1], p[2], p[3]]));
                p.copy_from_slice(&pack_argb(x, px[0], px[1], px[2]).to_ne_bytes());
            }
        }
    }

    /// Convert straight 16-bit RGBA in place, leaving alpha untouched.
    pub fn transform_4x16le(&self, wide: &mut Wide16, src: Option<&Profile>, dst: Option<&Profile>) {
        let Some(dst) = dst else { return };
        let src = src.unwrap_or(&self.srgb);
        if src.is_identical(dst) {
            return;
        }
        let transform = match src
            .inner
            .create_transform_16bit(Layout::Rgb, &dst.inner, Layout::Rgb, options())
        {
            Ok(t) => t,
            Err(e) => {
                debug!(target: "glance_io::cmm", "16-bit transform unavailable: {e:?}");
                return;
            }
        };
        let w = wide.width as usize;
        if w == 0 || wide.height == 0 {
            return;
        }
        let mut rgb_in = vec![0u16; w * 3];
        let mut rgb_out = vec![0u16; w * 3];
        for row in wide.data.chunks_exact_mut(w * 4) {
            for (px, p) in rgb_in.chunks_exact_mut(3).zip(row.chunks_exact(4)) {
                px.copy_from_slice(&p[..3]);
            }
            if transform.transform(&rgb_in, &mut rgb_out).is_err() {
                return;
            }
            for (p, px) in row.chunks_exact_mut(4).zip(rgb_out.chunks_exact(3)) {
                p[..3].copy_from_slice(px);
            }
        }
    }

    /// Convert an ARGB32 buffer and leave it premultiplied.
    ///
    /// Premultiplied input is un-premultiplied first; straight input (a
    /// codec that knew this pass was coming) is used as is. Without a
    /// transform only the premultiplication happens.
    pub fn transform_argb32_premultiplied(
        &self,
        buffer: &mut Buffer,
        src: Option<&Profile>,
        dst: Option<&Profile>,
    ) {
        let transform = match dst {
            Some(dst) => {
                let src = src.unwrap_or(&self.srgb);
                if src.is_identical(dst) {
                    None
                } else {
                    src.inner
                        .create_transform_8bit(Layout::Rgb, &dst.inner, Layout::Rgb, options())
                        .map_err(|e| debug!(target: "glance_io::cmm", "ARGB transform unavailable: {e:?}"))
                        .ok()
                }
            }
            None => None,
        };
        let Some(transform) = transform else {
            buffer.premultiply();
            return;
        };

        let straight = !buffer.is_premultiplied();
        let w = buffer.width() as usize;
        let mut rgb_in = vec![0u8; w * 3];
        let mut rgb_out = vec![0u8; w * 3];
        for y in 0..buffer.height() {
            let row = &mut buffer.row_mut(y)[..w * 4];
            for (px, p) in rgb_in.chunks_exact_mut(3).zip(row.chunks_exact(4)) {
                let (a, r, g, b) = unpack_argb(u32::from_ne_bytes([p[0], p[1], p[2], p[3]]));
                if straight {
                    px.copy_from_slice(&[r, g, b]);
                } else {
                    px.copy_from_slice(&[unpremultiply(r, a), unpremultiply(g, a), unpremultiply(b, a)]);
                }
            }
            let ok = transform.transform(&rgb_in, &mut rgb_out).is_ok();
            let rgb = if ok { &rgb_out } else { &rgb_in };
            for (p, px) in row.chunks_exact_mut(4).zip(rgb.chunks_exact(3)) {
                let (a, _, _, _) = unpack_argb(u32::from_ne_bytes([p[0], p[1], p[2], p[3]]));
                p.copy_from_slice(&pack_argb(a, px[0], px[1], px[2]).to_ne_bytes());
            }
            premultiply_argb32(row);
        }
        buffer.set_premultiplied(true);
    }

    /// Run `per_frame` over every frame of `page` with the page's source
    /// profile parsed once. An unparsable profile is a warning and the
    /// frames are treated as sRGB.
    pub fn cmm_page<F>(
        &self,
        page: &mut Page,
        dst: Option<&Profile>,
        warnings: &mut Vec<Warning>,
        mut per_frame: F,
    ) -> Result<()>
    where
        F: FnMut(&Cmm, &mut Frame, Option<&Profile>, Option<&Profile>) -> Result<()>,
    {
        let src = match &page.icc {
            Some(icc) => {
                let parsed = self.get_profile(icc);
                if parsed.is_none() {
                    warn(warnings, "embedded ICC profile could not be parsed, assuming sRGB");
                }
                parsed
            }
            None => None,
        };
        for frame in page.frames_mut() {
            per_frame(self, frame, src.as_ref(), dst)?;
        }
        Ok(())
    }

    /// Final color pass over a whole image. Without a target only the
    /// pending premultiplication runs.
    pub fn cmm_finish(&self, image: &mut Image, dst: Option<&Profile>, warnings: &mut Vec<Warning>) -> Result<()> {
        for page in image.pages_mut() {
            if dst.is_none() || page.color_converted {
                for frame in page.frames_mut() {
                    frame.buffer.premultiply();
                }
                continue;
            }
            self.cmm_page(page, dst, warnings, cmm_any)?;
        }
        Ok(())
    }
}

/// Per-format routing used by [`Cmm::cmm_finish`].
pub fn cmm_any(cmm: &Cmm, frame: &mut Frame, src: Option<&Profile>, dst: Option<&Profile>) -> Result<()> {
    let buffer = &mut frame.buffer;
    match buffer.format() {
        Format::Argb32 => cmm.transform_argb32_premultiplied(buffer, src, dst),
        Format::Xrgb32 => cmm.transform_xrgb32(buffer, src, dst),
        Format::Rgb30 => {
            let mut wide = Wide16::from_buffer(buffer);
            cmm.transform_4x16le(&mut wide, src, dst);
            *buffer = wide.pack_rgb30()?;
        }
        Format::Rgba128f => {
            let mut wide = Wide16::from_buffer(buffer);
            cmm.transform_4x16le(&mut wide, src, dst);
            *buffer = wide.pack_rgba128f()?;
        }
    }
    Ok(())
}

fn set_gamma(profile: &mut ColorProfile, gamma: f64) {
    let curve = curve_from_gamma(gamma as f32);
    profile.red_trc = Some(curve.clone());
    profile.green_trc = Some(curve.clone());
    profile.blue_trc = Some(curve);
    profile.cicp = None;
}

type Mat3 = [[f64; 3]; 3];

fn mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn apply(m: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [0, 1, 2].map(|i| m[i][0] * v[0] + m[i][1] * v[1] + m[i][2] * v[2])
}

fn invert(m: &Mat3) -> Option<Mat3> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 || !det.is_finite() {
        return None;
    }
    let c = |r0: usize, c0: usize, r1: usize, c1: usize| m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0];
    Some([
        [c(1, 1, 2, 2) / det, -c(0, 1, 2, 2) / det, c(0, 1, 1, 2) / det],
        [-c(1, 0, 2, 2) / det, c(0, 0, 2, 2) / det, -c(0, 0, 1, 2) / det],
        [c(1, 0, 2, 1) / det, -c(0, 0, 2, 1) / det, c(0, 0, 1, 1) / det],
    ])
}

fn xy_to_xyz((x, y): (f64, f64)) -> Option<[f64; 3]> {
    (y > 0.0 && x.is_finite() && y.is_finite()).then(|| [x / y, 1.0, (1.0 - x - y) / y])
}

const BRADFORD: Mat3 = [
    [0.8951, 0.2664, -0.1614],
    [-0.7502, 1.7135, 0.0367],
    [0.0389, -0.0685, 1.0296],
];

const D50: [f64; 3] = [0.9642, 1.0, 0.8249];

/// RGB colorants for the given chromaticities, adapted to D50 with Bradford.
fn colorants_d50(white: (f64, f64), primaries: [(f64, f64); 3]) -> Option<[Xyzd; 3]> {
    let w = xy_to_xyz(white)?;
    let [r, g, b] = [
        xy_to_xyz(primaries[0])?,
        xy_to_xyz(primaries[1])?,
        xy_to_xyz(primaries[2])?,
    ];
    let m: Mat3 = [[r[0], g[0], b[0]], [r[1], g[1], b[1]], [r[2], g[2], b[2]]];
    let s = apply(&invert(&m)?, w);

    let src_cone = apply(&BRADFORD, w);
    let dst_cone = apply(&BRADFORD, D50);
    if src_cone.iter().any(|&c| c.abs() < 1e-12) {
        return None;
    }
    let scale: Mat3 = [
        [dst_cone[0] / src_cone[0], 0.0, 0.0],
        [0.0, dst_cone[1] / src_cone[1], 0.0],
        [0.0, 0.0, dst_cone[2] / src_cone[2]],
    ];
    let adapt = mul(&invert(&BRADFORD)?, &mul(&scale, &BRADFORD));

    let colorant = |i: usize| {
        let v = apply(&adapt, [m[0][i] * s[i], m[1][i] * s[i], m[2][i] * s[i]]);
        Xyzd {
            x: v[0],
            y: v[1],
            z: v[2],
        }
    };
    Some([colorant(0), colorant(1), colorant(2)])
}

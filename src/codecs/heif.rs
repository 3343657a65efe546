//! HEIF/AVIF: container parsing with `avif-parse`, AV1 decoding with
//! `rav1d` (a pure-Rust port of dav1d).
//!
//! Both the primary item and the optional alpha item are decoded into
//! owned planes, converted with BT.601 coefficients into 16-bit RGBA and
//! then packed like any other deep source: 8-bit streams end up XRGB32 or
//! ARGB32, deeper ones RGB30 or RGBA128F when wide output is allowed.
//!
//! HEVC-coded HEIF is not decodable here and is reported as unsupported.

use super::animate::{buffer_from_rgba, buffer_from_wide};
use super::{Codec, DecodeContext};
use crate::buffer::Wide16;
use crate::chain::{Image, Page};
use crate::error::{Error, Result, Warning};
use std::io::Cursor;
use std::sync::Arc;

pub struct HeifCodec;

impl Codec for HeifCodec {
    fn name(&self) -> &'static str {
        "heif"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["image/avif", "image/heif"]
    }

    fn decode(&self, data: &[u8], ctx: &DecodeContext, _warnings: &mut Vec<Warning>) -> Result<Image> {
        if !is_av1_heif(data) {
            return Err(Error::Unsupported);
        }
        let avif = avif_parse::read_avif(&mut Cursor::new(data))
            .map_err(|e| Error::Corrupt(format!("AVIF container: {e:?}")))?;

        let color = decode_av1(&avif.primary_item)?;
        let alpha = match &avif.alpha_item {
            Some(item) => Some(decode_av1(item)?),
            None => None,
        };

        let mut wide = color.to_rgba16()?;
        if let Some(alpha) = &alpha {
            apply_alpha(&mut wide, alpha, avif.premultiplied_alpha);
        }
        let buffer = if color.bpc > 8 {
            buffer_from_wide(&wide, ctx)?
        } else {
            let rgba: Vec<u8> = wide.data.iter().map(|&c| (c >> 8) as u8).collect();
            buffer_from_rgba(wide.width, wide.height, &rgba, ctx)?
        };

        let mut page = Page::from_buffer(buffer);
        page.icc = colr_profile(data).map(Arc::from);
        Ok(Image::new(page))
    }
}

/// `ftyp` with an AV1 image brand, major or compatible.
fn is_av1_heif(data: &[u8]) -> bool {
    if data.len() < 16 || &data[4..8] != b"ftyp" {
        return false;
    }
    let size = (u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize).min(data.len());
    let brands = std::iter::once(&data[8..12]).chain(data.get(16..size).unwrap_or(&[]).chunks_exact(4));
    brands.into_iter().any(|b| b == b"avif" || b == b"avis")
}

/// ICC bytes from the first `colr` box of type `prof` or `rICC`.
fn colr_profile(data: &[u8]) -> Option<Vec<u8>> {
    let mut from = 0;
    while let Some(at) = data[from..].windows(4).position(|w| w == b"colr") {
        let pos = from + at;
        from = pos + 4;
        let Some(size_bytes) = pos.checked_sub(4).and_then(|s| data.get(s..pos)) else {
            continue;
        };
        let size = u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]) as usize;
        let Some(body) = size.checked_sub(8).and_then(|len| data.get(pos + 4..pos + 4 + len)) else {
            continue;
        };
        if body.len() > 4 && (&body[0..4] == b"prof" || &body[0..4] == b"rICC") {
            return Some(body[4..].to_vec());
        }
    }
    None
}

/// One decoded plane, samples widened to u16.
struct Plane {
    data: Vec<u16>,
    width: usize,
}

impl Plane {
    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x] as f32
    }
}

struct Picture {
    width: u32,
    height: u32,
    bpc: u32,
    y: Plane,
    /// Cb and Cr; `None` for monochrome.
    chroma: Option<(Plane, Plane)>,
    ss_x: bool,
    ss_y: bool,
}

impl Picture {
    /// BT.601 YCbCr to straight RGBA16.
    fn to_rgba16(&self) -> Result<Wide16> {
        let mut wide = Wide16::new(self.width, self.height)?;
        let max = ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let to16 = |v: f32| ((v / max).clamp(0.0, 1.0) * 65535.0 + 0.5) as u16;

        for row in 0..self.height as usize {
            for col in 0..self.width as usize {
                let y = self.y.at(col, row);
                let (r, g, b) = match &self.chroma {
                    None => (y, y, y),
                    Some((u, v)) => {
                        let cx = if self.ss_x { col / 2 } else { col };
                        let cy = if self.ss_y { row / 2 } else { row };
                        let cb = u.at(cx, cy) - center;
                        let cr = v.at(cx, cy) - center;
                        (
                            y + 1.402 * cr,
                            y - 0.344136 * cb - 0.714136 * cr,
                            y + 1.772 * cb,
                        )
                    }
                };
                let i = (row * self.width as usize + col) * 4;
                wide.data[i..i + 4].copy_from_slice(&[to16(r), to16(g), to16(b), u16::MAX]);
            }
        }
        Ok(wide)
    }
}

/// Take alpha from the alpha item's luma, undoing premultiplication when
/// the container says the color item carries it.
fn apply_alpha(wide: &mut Wide16, alpha: &Picture, premultiplied: bool) {
    let max = ((1u32 << alpha.bpc) - 1) as f32;
    let (w, h) = (wide.width as usize, wide.height as usize);
    for row in 0..h.min(alpha.height as usize) {
        for col in 0..w.min(alpha.width as usize) {
            let a = (alpha.y.at(col, row) / max).clamp(0.0, 1.0);
            let i = (row * w + col) * 4;
            if premultiplied && a > 0.0 {
                for c in &mut wide.data[i..i + 3] {
                    *c = ((*c as f32 / a).min(65535.0)) as u16;
                }
            }
            wide.data[i + 3] = (a * 65535.0 + 0.5) as u16;
        }
    }
}

/// Decode one AV1 still into owned planes.
fn decode_av1(av1_bytes: &[u8]) -> Result<Picture> {
    use rav1d::include::dav1d::data::Dav1dData;
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::include::dav1d::headers::{
        DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422, DAV1D_PIXEL_LAYOUT_I444,
    };
    use rav1d::include::dav1d::picture::Dav1dPicture;
    use std::ptr::NonNull;

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    unsafe { rav1d::src::lib::dav1d_default_settings(NonNull::from(&mut settings).cast()) };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc = unsafe { rav1d::src::lib::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(Error::Corrupt(format!("rav1d open failed ({})", rc.0)));
    }

    let mut data = Dav1dData::default();
    let buf_ptr = unsafe { rav1d::src::lib::dav1d_data_create(NonNull::new(&mut data), av1_bytes.len()) };
    if buf_ptr.is_null() {
        unsafe { rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(Error::OutOfMemory(av1_bytes.len()));
    }
    unsafe { std::ptr::copy_nonoverlapping(av1_bytes.as_ptr(), buf_ptr, av1_bytes.len()) };

    let rc = unsafe { rav1d::src::lib::dav1d_send_data(ctx, NonNull::new(&mut data)) };
    if rc.0 != 0 {
        unsafe {
            rav1d::src::lib::dav1d_data_unref(NonNull::new(&mut data));
            rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx));
        }
        return Err(Error::Corrupt(format!("rav1d send_data failed ({})", rc.0)));
    }

    let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
    let rc = unsafe { rav1d::src::lib::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
    if rc.0 != 0 {
        unsafe { rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(Error::Corrupt(format!("rav1d get_picture failed ({})", rc.0)));
    }

    let width = pic.p.w as usize;
    let height = pic.p.h as usize;
    let bpc = pic.p.bpc as u32;
    let layout = pic.p.layout;
    let subsampling = match layout {
        DAV1D_PIXEL_LAYOUT_I400 => Some((false, false)),
        DAV1D_PIXEL_LAYOUT_I420 => Some((true, true)),
        DAV1D_PIXEL_LAYOUT_I422 => Some((true, false)),
        DAV1D_PIXEL_LAYOUT_I444 => Some((false, false)),
        _ => None,
    };
    let planes = pic.data.map(|p| p.map(|p| p.as_ptr() as *const u8));

    let result = match (subsampling, planes[0]) {
        (Some((ss_x, ss_y)), Some(y_ptr)) => {
            let y = copy_plane(y_ptr, pic.stride[0], width, height, bpc);
            let chroma = if layout == DAV1D_PIXEL_LAYOUT_I400 {
                None
            } else {
                let cw = if ss_x { width.div_ceil(2) } else { width };
                let ch = if ss_y { height.div_ceil(2) } else { height };
                match (planes[1], planes[2]) {
                    (Some(u), Some(v)) => Some((
                        copy_plane(u, pic.stride[1], cw, ch, bpc),
                        copy_plane(v, pic.stride[1], cw, ch, bpc),
                    )),
                    _ => None,
                }
            };
            if layout != DAV1D_PIXEL_LAYOUT_I400 && chroma.is_none() {
                Err(Error::Corrupt("AV1 picture without chroma planes".into()))
            } else {
                Ok(Picture {
                    width: width as u32,
                    height: height as u32,
                    bpc,
                    y,
                    chroma,
                    ss_x,
                    ss_y,
                })
            }
        }
        (None, _) => Err(Error::Corrupt(format!("unsupported AV1 pixel layout {layout}"))),
        (_, None) => Err(Error::Corrupt("AV1 picture without luma plane".into())),
    };

    unsafe {
        rav1d::src::lib::dav1d_picture_unref(NonNull::new(&mut pic));
        rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx));
    }
    result
}

/// Copy a plane out of decoder memory; samples above 8 bits are stored as u16.
fn copy_plane(ptr: *const u8, stride: isize, width: usize, height: usize, bpc: u32) -> Plane {
    let mut data = Vec::with_capacity(width * height);
    for y in 0..height as isize {
        for x in 0..width as isize {
            let v = if bpc <= 8 {
                unsafe { *ptr.offset(y * stride + x) as u16 }
            } else {
                unsafe { (ptr.offset(y * stride + x * 2) as *const u16).read_unaligned() }
            };
            data.push(v);
        }
    }
    Plane { data, width }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ftyp(major: &[u8; 4], compatible: &[&[u8; 4]]) -> Vec<u8> {
        let size = 16 + compatible.len() * 4;
        let mut out = (size as u32).to_be_bytes().to_vec();
        out.extend_from_slice(b"ftyp");
        out.extend_from_slice(major);
        out.extend_from_slice(&[0, 0, 0, 0]);
        for brand in compatible {
            out.extend_from_slice(*brand);
        }
        out
    }

    #[test]
    fn brand_detection() {
        assert!(is_av1_heif(&ftyp(b"avif", &[b"mif1"])));
        assert!(is_av1_heif(&ftyp(b"mif1", &[b"miaf", b"avif"])));
        assert!(!is_av1_heif(&ftyp(b"heic", &[b"mif1", b"heic"])));
        assert!(!is_av1_heif(b"\x89PNG\r\n\x1a\n\0\0\0\0\0\0\0\0"));
    }

    #[test]
    fn heic_is_unsupported() {
        let data = ftyp(b"heic", &[b"mif1"]);
        assert!(matches!(
            HeifCodec.decode(&data, &DecodeContext::default(), &mut Vec::new()),
            Err(Error::Unsupported)
        ));
    }

    #[test]
    fn broken_avif_is_corrupt() {
        let data = ftyp(b"avif", &[b"mif1"]);
        assert!(matches!(
            HeifCodec.decode(&data, &DecodeContext::default(), &mut Vec::new()),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn colr_prof_box_is_found() {
        let mut data = b"....junk".to_vec();
        let icc = b"fake icc bytes";
        data.extend_from_slice(&((12 + icc.len()) as u32).to_be_bytes());
        data.extend_from_slice(b"colrprof");
        data.extend_from_slice(icc);
        assert_eq!(colr_profile(&data).as_deref(), Some(&icc[..]));

        let mut nclx = 19u32.to_be_bytes().to_vec();
        nclx.extend_from_slice(b"colrnclx\0\x01\0\x0d\0\x01\x80");
        assert_eq!(colr_profile(&nclx), None);
    }

    #[test]
    fn monochrome_picture_to_rgba() {
        let pic = Picture {
            width: 2,
            height: 1,
            bpc: 8,
            y: Plane { data: vec![0, 255], width: 2 },
            chroma: None,
            ss_x: false,
            ss_y: false,
        };
        let wide = pic.to_rgba16().unwrap();
        assert_eq!(&wide.data[..4], &[0, 0, 0, u16::MAX]);
        assert_eq!(&wide.data[4..], &[u16::MAX; 4]);
    }
}

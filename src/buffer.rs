//! The pixel buffer at the center of every decode.
//!
//! A [`Buffer`] is a flat, row-major image matrix: `height` rows of `stride`
//! bytes each, the first `width × bytes_per_pixel` of which carry pixels.
//! 32-bit formats store one native-endian `u32` per pixel, so external code
//! can read the memory directly given `(format, width, height, stride)`.
//!
//! | Format | Layout | Alpha |
//! |---|---|---|
//! | [`Format::Argb32`] | `A<<24 \| R<<16 \| G<<8 \| B` | premultiplied (straight while a CMM pass is pending) |
//! | [`Format::Xrgb32`] | `x<<24 \| R<<16 \| G<<8 \| B` | opaque |
//! | [`Format::Rgb30`] | `x<<30 \| R<<20 \| G<<10 \| B` | opaque |
//! | [`Format::Rgba128f`] | `[R, G, B, A]` as `f32` | premultiplied |
//!
//! Pixel bytes are either owned or borrowed from a shared byte array (the
//! IPC deserializer hands out views into the bytes it received). Mutable
//! access to a borrowed buffer copies it first.

use crate::error::{Error, Result};
use std::sync::Arc;

/// Pixel formats. Discriminants match the wire values used by
/// [`serialize`](crate::serialize).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Argb32 = 0,
    /// Opaque 8-bit RGB in a 32-bit word, also known as "RGB24".
    Xrgb32 = 1,
    Rgb30 = 5,
    Rgba128f = 7,
}

impl Format {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Format::Argb32 | Format::Xrgb32 | Format::Rgb30 => 4,
            Format::Rgba128f => 16,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, Format::Argb32 | Format::Rgba128f)
    }

    /// Minimal stride for `width` pixels, a multiple of 4 bytes.
    pub fn stride_for_width(self, width: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(self.bytes_per_pixel())
            .and_then(|n| n.checked_add(3))
            .map(|n| n & !3)
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Format::Argb32),
            1 => Some(Format::Xrgb32),
            5 => Some(Format::Rgb30),
            7 => Some(Format::Rgba128f),
            _ => None,
        }
    }
}

/// Exif orientation, 1..8. `Unknown` means no usable tag was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    Unknown = 0,
    #[default]
    TopLeft = 1,
    TopRight = 2,
    BottomRight = 3,
    BottomLeft = 4,
    LeftTop = 5,
    RightTop = 6,
    RightBottom = 7,
    LeftBottom = 8,
}

impl Orientation {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Orientation::TopLeft,
            2 => Orientation::TopRight,
            3 => Orientation::BottomRight,
            4 => Orientation::BottomLeft,
            5 => Orientation::LeftTop,
            6 => Orientation::RightTop,
            7 => Orientation::RightBottom,
            8 => Orientation::LeftBottom,
            _ => Orientation::Unknown,
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }

    /// Whether displaying with this orientation exchanges width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Orientation::LeftTop
                | Orientation::RightTop
                | Orientation::RightBottom
                | Orientation::LeftBottom
        )
    }
}

#[derive(Debug, Clone)]
enum Pixels {
    Owned(Vec<u8>),
    Shared { bytes: Arc<[u8]>, offset: usize, len: usize },
}

impl Pixels {
    fn as_slice(&self) -> &[u8] {
        match self {
            Pixels::Owned(v) => v,
            Pixels::Shared { bytes, offset, len } => &bytes[*offset..*offset + *len],
        }
    }
}

/// Allocate `len` zeroed bytes, reporting failure instead of aborting.
pub(crate) fn try_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| Error::OutOfMemory(len))?;
    v.resize(len, 0);
    Ok(v)
}

#[derive(Debug, Clone)]
pub struct Buffer {
    format: Format,
    width: u32,
    height: u32,
    stride: usize,
    pixels: Pixels,
    premultiplied: bool,
}

impl Buffer {
    /// A zero-filled buffer (transparent black, or black for opaque formats).
    pub fn new(format: Format, width: u32, height: u32) -> Result<Self> {
        let stride = format
            .stride_for_width(width)
            .ok_or(Error::OutOfMemory(usize::MAX))?;
        let len = stride
            .checked_mul(height as usize)
            .ok_or(Error::OutOfMemory(usize::MAX))?;
        Ok(Self {
            format,
            width,
            height,
            stride,
            pixels: Pixels::Owned(try_zeroed(len)?),
            premultiplied: true,
        })
    }

    /// Wrap existing bytes. Fails unless the extents fit inside `data`.
    pub fn from_vec(
        format: Format,
        width: u32,
        height: u32,
        stride: usize,
        data: Vec<u8>,
    ) -> Result<Self> {
        check_extents(format, width, height, stride, data.len())?;
        Ok(Self {
            format,
            width,
            height,
            stride,
            pixels: Pixels::Owned(data),
            premultiplied: true,
        })
    }

    /// Borrow `bytes[offset..]` without copying; the array stays alive as
    /// long as this buffer (or a clone of it) does.
    pub fn from_shared(
        format: Format,
        width: u32,
        height: u32,
        stride: usize,
        bytes: Arc<[u8]>,
        offset: usize,
    ) -> Result<Self> {
        let available = bytes.len().saturating_sub(offset);
        check_extents(format, width, height, stride, available)?;
        let len = stride * height as usize;
        Ok(Self {
            format,
            width,
            height,
            stride,
            pixels: Pixels::Shared { bytes, offset, len },
            premultiplied: true,
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        self.pixels.as_slice()
    }

    /// Mutable pixel bytes; a borrowed buffer is copied into an owned one first.
    pub fn data_mut(&mut self) -> &mut [u8] {
        if let Pixels::Shared { .. } = self.pixels {
            self.pixels = Pixels::Owned(self.pixels.as_slice().to_vec());
        }
        match &mut self.pixels {
            Pixels::Owned(v) => v,
            Pixels::Shared { .. } => unreachable!("converted to owned above"),
        }
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.pixels, Pixels::Shared { .. })
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data()[start..start + self.stride]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let stride = self.stride;
        &mut self.data_mut()[start..start + stride]
    }

    /// `false` only for ARGB32 data whose alpha has not been associated yet.
    pub fn is_premultiplied(&self) -> bool {
        self.premultiplied
    }

    /// Mark ARGB32 contents as straight alpha, to be premultiplied after
    /// color conversion.
    pub(crate) fn set_straight_alpha(&mut self) {
        if self.format == Format::Argb32 {
            self.premultiplied = false;
        }
    }

    pub(crate) fn set_premultiplied(&mut self, value: bool) {
        self.premultiplied = value || self.format != Format::Argb32;
    }

    /// Associate alpha if it is still straight. No-op otherwise.
    pub fn premultiply(&mut self) {
        if self.format == Format::Argb32 && !self.premultiplied {
            let (w, h) = (self.width, self.height);
            for y in 0..h {
                let row = self.row_mut(y);
                premultiply_argb32(&mut row[..w as usize * 4]);
            }
            self.premultiplied = true;
        }
    }

    /// Read one 32-bit pixel word (ARGB32, XRGB32 and RGB30 only).
    pub fn pixel_u32(&self, x: u32, y: u32) -> u32 {
        let i = y as usize * self.stride + x as usize * 4;
        let d = self.data();
        u32::from_ne_bytes([d[i], d[i + 1], d[i + 2], d[i + 3]])
    }

    pub fn set_pixel_u32(&mut self, x: u32, y: u32, value: u32) {
        let i = y as usize * self.stride + x as usize * 4;
        self.data_mut()[i..i + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// Whether every pixel is fully opaque.
    pub fn is_opaque(&self) -> bool {
        match self.format {
            Format::Xrgb32 | Format::Rgb30 => true,
            Format::Argb32 => (0..self.height).all(|y| {
                self.row(y)[..self.width as usize * 4]
                    .chunks_exact(4)
                    .all(|p| u32::from_ne_bytes([p[0], p[1], p[2], p[3]]) >> 24 == 0xff)
            }),
            Format::Rgba128f => (0..self.height).all(|y| {
                self.row(y)[..self.width as usize * 16]
                    .chunks_exact(16)
                    .all(|p| f32::from_ne_bytes([p[12], p[13], p[14], p[15]]) >= 1.0)
            }),
        }
    }

    /// Build an ARGB32 or XRGB32 buffer from tightly packed RGBA8 samples.
    ///
    /// With `opaque` the alpha channel is ignored and XRGB32 results;
    /// otherwise ARGB32 is produced, premultiplied unless `straight` is set.
    pub fn from_rgba8(
        width: u32,
        height: u32,
        rgba: &[u8],
        opaque: bool,
        straight: bool,
    ) -> Result<Self> {
        let format = if opaque { Format::Xrgb32 } else { Format::Argb32 };
        let mut buffer = Buffer::new(format, width, height)?;
        let w = width as usize;
        for y in 0..height {
            let src = &rgba[y as usize * w * 4..(y as usize + 1) * w * 4];
            let row = buffer.row_mut(y);
            for (dst, p) in row.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                let a = if opaque { 0xff } else { p[3] };
                dst.copy_from_slice(&pack_argb(a, p[0], p[1], p[2]).to_ne_bytes());
            }
        }
        if !opaque {
            buffer.premultiplied = false;
            if !straight {
                buffer.premultiply();
            }
        }
        Ok(buffer)
    }

    /// Straight-alpha RGBA8 samples, tightly packed, for encoders.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut out = Vec::with_capacity(w * h * 4);
        match self.format {
            Format::Argb32 | Format::Xrgb32 => {
                let opaque = self.format == Format::Xrgb32;
                for y in 0..self.height {
                    for p in self.row(y)[..w * 4].chunks_exact(4) {
                        let v = u32::from_ne_bytes([p[0], p[1], p[2], p[3]]);
                        let (a, r, g, b) = unpack_argb(v);
                        if opaque {
                            out.extend_from_slice(&[r, g, b, 0xff]);
                        } else if self.premultiplied {
                            out.extend_from_slice(&[
                                unpremultiply(r, a),
                                unpremultiply(g, a),
                                unpremultiply(b, a),
                                a,
                            ]);
                        } else {
                            out.extend_from_slice(&[r, g, b, a]);
                        }
                    }
                }
            }
            Format::Rgb30 | Format::Rgba128f => {
                let wide = Wide16::from_buffer(self);
                for px in wide.data.chunks_exact(4) {
                    out.extend(px.iter().map(|&c| ((c as u32 * 255 + 32767) / 65535) as u8));
                }
            }
        }
        out
    }

    /// Convert to premultiplied ARGB32 (XRGB32 stays XRGB32).
    pub fn to_argb32(&self) -> Result<Buffer> {
        match self.format {
            Format::Argb32 => {
                let mut copy = self.clone();
                copy.premultiply();
                Ok(copy)
            }
            Format::Xrgb32 => Ok(self.clone()),
            Format::Rgb30 => Buffer::from_rgba8(self.width, self.height, &self.to_rgba8(), true, false),
            Format::Rgba128f => {
                Buffer::from_rgba8(self.width, self.height, &self.to_rgba8(), false, false)
            }
        }
    }
}

fn check_extents(format: Format, width: u32, height: u32, stride: usize, available: usize) -> Result<()> {
    let min_stride = (width as usize)
        .checked_mul(format.bytes_per_pixel())
        .ok_or_else(|| Error::Corrupt("width overflows".into()))?;
    if stride < min_stride || stride % 4 != 0 {
        return Err(Error::Corrupt(format!(
            "stride {stride} cannot hold {width} pixels of {format:?}"
        )));
    }
    let needed = stride
        .checked_mul(height as usize)
        .ok_or_else(|| Error::Corrupt("height overflows".into()))?;
    if needed > available {
        return Err(Error::Corrupt(format!(
            "{needed} bytes of pixels needed, {available} available"
        )));
    }
    Ok(())
}

#[inline]
pub fn pack_argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    (a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32
}

#[inline]
pub fn unpack_argb(v: u32) -> (u8, u8, u8, u8) {
    ((v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8)
}

/// `c · a / 255` using the exact integer rule `(c · a · 32897) >> 23`.
#[inline]
pub fn premultiply_channel(c: u8, a: u8) -> u8 {
    ((c as u32 * a as u32 * 32897) >> 23) as u8
}

#[inline]
pub fn unpremultiply(c: u8, a: u8) -> u8 {
    match a {
        0 => 0,
        255 => c,
        _ => ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8,
    }
}

/// Premultiply native-endian ARGB32 words in place. Fully transparent
/// pixels become all-zero; opaque pixels are left untouched.
pub fn premultiply_argb32(data: &mut [u8]) {
    for p in data.chunks_exact_mut(4) {
        let v = u32::from_ne_bytes([p[0], p[1], p[2], p[3]]);
        let (a, r, g, b) = unpack_argb(v);
        let out = match a {
            255 => continue,
            0 => 0,
            _ => pack_argb(
                a,
                premultiply_channel(r, a),
                premultiply_channel(g, a),
                premultiply_channel(b, a),
            ),
        };
        p.copy_from_slice(&out.to_ne_bytes());
    }
}

/// Undo [`premultiply_argb32`] in place (lossy for small alpha).
pub fn unpremultiply_argb32(data: &mut [u8]) {
    for p in data.chunks_exact_mut(4) {
        let v = u32::from_ne_bytes([p[0], p[1], p[2], p[3]]);
        let (a, r, g, b) = unpack_argb(v);
        if a == 255 || a == 0 {
            continue;
        }
        let out = pack_argb(a, unpremultiply(r, a), unpremultiply(g, a), unpremultiply(b, a));
        p.copy_from_slice(&out.to_ne_bytes());
    }
}

/// Straight-alpha RGBA with 16 bits per channel: the intermediate for deep
/// sources on their way to RGB30 or RGBA128F.
#[derive(Debug, Clone, PartialEq)]
pub struct Wide16 {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
}

impl Wide16 {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let len = width as usize * height as usize * 4;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory(len * 2))?;
        data.resize(len, 0);
        Ok(Self { width, height, data })
    }

    pub fn is_opaque(&self) -> bool {
        self.data.chunks_exact(4).all(|p| p[3] == u16::MAX)
    }

    /// Pack to opaque 2-10-10-10.
    pub fn pack_rgb30(&self) -> Result<Buffer> {
        let mut out = Buffer::new(Format::Rgb30, self.width, self.height)?;
        let w = self.width as usize;
        for y in 0..self.height {
            let src = &self.data[y as usize * w * 4..(y as usize + 1) * w * 4];
            let row = out.row_mut(y);
            for (dst, p) in row.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                let v = to10(p[0]) << 20 | to10(p[1]) << 10 | to10(p[2]);
                dst.copy_from_slice(&v.to_ne_bytes());
            }
        }
        Ok(out)
    }

    /// Pack to premultiplied float RGBA.
    pub fn pack_rgba128f(&self) -> Result<Buffer> {
        let mut out = Buffer::new(Format::Rgba128f, self.width, self.height)?;
        let w = self.width as usize;
        for y in 0..self.height {
            let src = &self.data[y as usize * w * 4..(y as usize + 1) * w * 4];
            let row = out.row_mut(y);
            for (dst, p) in row.chunks_exact_mut(16).zip(src.chunks_exact(4)) {
                let a = p[3] as f32 / 65535.0;
                let px = [
                    p[0] as f32 / 65535.0 * a,
                    p[1] as f32 / 65535.0 * a,
                    p[2] as f32 / 65535.0 * a,
                    a,
                ];
                for (chunk, c) in dst.chunks_exact_mut(4).zip(px) {
                    chunk.copy_from_slice(&c.to_ne_bytes());
                }
            }
        }
        Ok(out)
    }

    /// Unpack any buffer into straight 16-bit RGBA.
    pub fn from_buffer(buffer: &Buffer) -> Self {
        let (w, h) = (buffer.width, buffer.height);
        let mut data = Vec::with_capacity(w as usize * h as usize * 4);
        for y in 0..h {
            let row = buffer.row(y);
            match buffer.format {
                Format::Rgb30 => {
                    for p in row[..w as usize * 4].chunks_exact(4) {
                        let v = u32::from_ne_bytes([p[0], p[1], p[2], p[3]]);
                        data.extend_from_slice(&[
                            from10(v >> 20),
                            from10(v >> 10),
                            from10(v),
                            u16::MAX,
                        ]);
                    }
                }
                Format::Rgba128f => {
                    for p in row[..w as usize * 16].chunks_exact(16) {
                        let f = |i: usize| f32::from_ne_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]]);
                        let a = f(12).clamp(0.0, 1.0);
                        let un = |c: f32| {
                            if a <= 0.0 {
                                0
                            } else {
                                ((c / a).clamp(0.0, 1.0) * 65535.0 + 0.5) as u16
                            }
                        };
                        data.extend_from_slice(&[un(f(0)), un(f(4)), un(f(8)), (a * 65535.0 + 0.5) as u16]);
                    }
                }
                Format::Argb32 | Format::Xrgb32 => {
                    for p in row[..w as usize * 4].chunks_exact(4) {
                        let v = u32::from_ne_bytes([p[0], p[1], p[2], p[3]]);
                        let (mut a, mut r, mut g, mut b) = unpack_argb(v);
                        if buffer.format == Format::Xrgb32 {
                            a = 255;
                        } else if buffer.premultiplied {
                            r = unpremultiply(r, a);
                            g = unpremultiply(g, a);
                            b = unpremultiply(b, a);
                        }
                        let e = |c: u8| c as u16 * 257;
                        data.extend_from_slice(&[e(r), e(g), e(b), e(a)]);
                    }
                }
            }
        }
        Self { width: w, height: h, data }
    }
}

#[inline]
fn to10(c: u16) -> u32 {
    (c as u32 * 1023 + 32767) / 65535
}

#[inline]
fn from10(v: u32) -> u16 {
    let c = v & 0x3ff;
    (c << 6 | c >> 4) as u16
}

//! End-to-end decoding through the public dispatcher.

mod common;

use common::*;
use glance_io::buffer::{Format, Orientation, unpack_argb};
use glance_io::chain::Cursor;
use glance_io::cmm::Cmm;
use glance_io::codecs::{DecodeContext, Registry, decode, open_uri, path_to_uri};
use tempfile::TempDir;

#[test]
fn opaque_png_is_a_single_xrgb_frame() {
    let image = decode(&solid_png(8, 8, [255, 0, 0]), &DecodeContext::default(), &mut Vec::new()).unwrap();
    let page = image.head();
    let b = image.head_buffer();
    assert_eq!(b.format(), Format::Xrgb32);
    assert_eq!((b.width(), b.height()), (8, 8));
    assert_eq!(image.frame_next(Cursor::default()), None);
    assert!(page.icc.is_none());
    assert_eq!(page.orientation, Orientation::TopLeft);
    assert_eq!(unpack_argb(b.pixel_u32(4, 4)).1, 255);
}

#[test]
fn gif_animation_is_a_closed_loop() {
    let image = decode(&red_blue_gif(), &DecodeContext::default(), &mut Vec::new()).unwrap();
    let page = image.head();
    assert_eq!(page.loops, 0);
    assert_eq!(page.frames().len(), 2);

    let first = Cursor::default();
    let second = image.frame_next(first).unwrap();
    assert_eq!(image.frame_next(second), Some(first));

    let colors: Vec<_> = page
        .frames()
        .iter()
        .map(|f| {
            assert_eq!(f.duration_ms, 100);
            let (_, r, g, b) = unpack_argb(f.buffer.pixel_u32(3, 3));
            (r, g, b)
        })
        .collect();
    assert_eq!(colors, vec![(255, 0, 0), (0, 0, 255)]);
}

#[test]
fn jpeg_orientation_is_reported_not_applied() {
    let exif = exif_orientation(6);
    let image = decode(&solid_jpeg(64, 32, [90, 90, 90], Some(&exif)), &DecodeContext::default(), &mut Vec::new())
        .unwrap();
    let page = image.head();
    assert_eq!(page.orientation, Orientation::RightTop);
    assert_eq!(page.exif.as_deref(), Some(exif.as_slice()));
    assert_eq!((page.width(), page.height()), (64, 32));
}

#[test]
fn cmyk_jpeg_converts_to_srgb() {
    let cmm = Cmm::new();
    let srgb = cmm.get_profile_srgb();
    let ctx = DecodeContext::new(&cmm).with_target(Some(&srgb));
    let image = decode(&cmyk_jpeg(16, 16, [0, 200, 200, 0]), &ctx, &mut Vec::new()).unwrap();
    let b = image.head_buffer();
    assert_eq!(b.format(), Format::Argb32);
    assert_eq!((b.width(), b.height()), (16, 16));
    assert_eq!(unpack_argb(b.pixel_u32(8, 8)).0, 255);
}

#[test]
fn truncated_webp_keeps_what_arrived() {
    let file = pattern_webp(100, 100);
    let cut = &file[..file.len() / 2];
    let mut warnings = Vec::new();
    let image = decode(cut, &DecodeContext::default(), &mut warnings).unwrap();
    let b = image.head_buffer();
    assert_eq!(b.format(), Format::Argb32);
    assert_eq!((b.width(), b.height()), (100, 100));
    assert_eq!(warnings.len(), 1);

    let message = warnings[0].to_string();
    let rows: u32 = message
        .split("decoded 100x")
        .nth(1)
        .and_then(|rest| rest.split(' ').next())
        .unwrap()
        .parse()
        .unwrap();
    assert!(rows >= 1 && rows < 100, "{message}");
    for y in 0..100 {
        let filled = (0..100).filter(|&x| b.pixel_u32(x, y) != 0).count();
        if y < rows {
            assert_eq!(filled, 100, "row {y} above the cut");
        } else {
            assert_eq!(filled, 0, "row {y} below the cut");
        }
    }
}

#[test]
fn open_by_file_uri() {
    let tmp = TempDir::new().unwrap();
    let path = write_file(tmp.path(), "pic 1.png", &solid_png(3, 2, [0, 255, 0]));
    let uri = path_to_uri(&path).unwrap();
    assert!(uri.starts_with("file://"));
    let image = open_uri(&uri, &DecodeContext::default(), &mut Vec::new()).unwrap();
    assert_eq!((image.head().width(), image.head().height()), (3, 2));
}

#[test]
fn garbage_is_an_error() {
    assert!(decode(b"\x00\x01\x02 nothing here", &DecodeContext::default(), &mut Vec::new()).is_err());
}

#[test]
fn media_types_cover_the_common_formats() {
    let types = Registry::global().supported_media_types();
    for expected in ["image/png", "image/jpeg", "image/gif", "image/webp"] {
        assert!(types.iter().any(|t| t == expected), "missing {expected}");
    }
}

//! On-disk thumbnail cache.
//!
//! The layout follows the freedesktop Thumbnail Managing Standard: a PNG per
//! source file, named by the MD5 of the source's absolute URI, inside a
//! directory named after the size bucket. Wide (height-bound) thumbnails
//! live in sibling directories carrying a `wide-` prefix.
//!
//! ```text
//! $XDG_CACHE_HOME/thumbnails/
//! ├── normal/       128   ─┐
//! ├── large/        256    │ square fit
//! ├── x-large/      512    │
//! ├── xx-large/     1024   │
//! ├── huge/         2048  ─┘
//! ├── wide-normal/  128   ─┐
//! ├── …                    │ height fit, width ≤ 2 × size
//! └── wide-huge/    2048  ─┘
//! ```
//!
//! # Validity
//!
//! Every thumbnail embeds `Thumb::URI` and `Thumb::MTime` as PNG text
//! chunks. An entry is current when the URI still resolves to a local file
//! whose modification time (whole seconds) matches `Thumb::MTime`. Readers
//! check this on every lookup, which also makes partially written files
//! harmless: writes go to a temp file in the same directory and are renamed
//! into place.
//!
//! [`invalidate`] walks every cache directory and deletes entries that are
//! no longer current.

use crate::buffer::Buffer;
use crate::codecs::uri_to_path;
use md5::{Digest, Md5};
use rayon::prelude::*;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

pub const KEY_URI: &str = "Thumb::URI";
pub const KEY_MTIME: &str = "Thumb::MTime";
pub const KEY_SIZE: &str = "Thumb::Size";
pub const KEY_WIDTH: &str = "Thumb::Image::Width";
pub const KEY_HEIGHT: &str = "Thumb::Image::Height";
pub const KEY_SOFTWARE: &str = "Software";

/// The five canonical size buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ThumbnailSize {
    Small,
    Normal,
    Large,
    Huge,
    Giant,
}

impl ThumbnailSize {
    pub const ALL: [ThumbnailSize; 5] = [
        ThumbnailSize::Small,
        ThumbnailSize::Normal,
        ThumbnailSize::Large,
        ThumbnailSize::Huge,
        ThumbnailSize::Giant,
    ];

    pub fn pixels(self) -> u32 {
        match self {
            ThumbnailSize::Small => 128,
            ThumbnailSize::Normal => 256,
            ThumbnailSize::Large => 512,
            ThumbnailSize::Huge => 1024,
            ThumbnailSize::Giant => 2048,
        }
    }

    /// Directory name under the cache root.
    pub fn dir_name(self) -> &'static str {
        match self {
            ThumbnailSize::Small => "normal",
            ThumbnailSize::Normal => "large",
            ThumbnailSize::Large => "x-large",
            ThumbnailSize::Huge => "xx-large",
            ThumbnailSize::Giant => "huge",
        }
    }

    /// Smallest bucket that holds `pixels` on its longer side.
    pub fn for_pixels(pixels: u32) -> Self {
        Self::ALL
            .into_iter()
            .find(|size| size.pixels() >= pixels)
            .unwrap_or(ThumbnailSize::Giant)
    }

    /// Parse a pixel count (`"512"`) or a directory name (`"x-large"`).
    pub fn parse(value: &str) -> Option<Self> {
        if let Ok(pixels) = value.parse::<u32>() {
            return Some(Self::for_pixels(pixels));
        }
        Self::ALL.into_iter().find(|size| size.dir_name() == value)
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Where thumbnails of a given shape are stored.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$XDG_CACHE_HOME/thumbnails`, falling back to `~/.cache/thumbnails`.
    pub fn default_root() -> Option<PathBuf> {
        let base = std::env::var_os("XDG_CACHE_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))?;
        Some(base.join("thumbnails"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn directory(&self, size: ThumbnailSize, wide: bool) -> PathBuf {
        if wide {
            self.root.join(format!("wide-{}", size.dir_name()))
        } else {
            self.root.join(size.dir_name())
        }
    }

    /// Every size directory, square then wide.
    pub fn directories(&self) -> Vec<PathBuf> {
        [false, true]
            .into_iter()
            .flat_map(|wide| ThumbnailSize::ALL.map(|size| self.directory(size, wide)))
            .collect()
    }

    pub fn path_for(&self, uri: &str, size: ThumbnailSize, wide: bool) -> PathBuf {
        self.directory(size, wide).join(format!("{}.png", cache_key(uri)))
    }
}

/// Lowercase hex MD5 of the URI.
pub fn cache_key(uri: &str) -> String {
    format!("{:x}", Md5::digest(uri.as_bytes()))
}

/// The freedesktop attributes of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub uri: String,
    pub mtime: u64,
    pub size: u64,
}

impl SourceInfo {
    pub fn stat(path: &Path, uri: String) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Self {
            uri,
            mtime,
            size: meta.len(),
        })
    }
}

/// Text attributes read back from a cached thumbnail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThumbInfo {
    pub uri: Option<String>,
    pub mtime: Option<u64>,
    pub size: Option<u64>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub software: Option<String>,
}

impl ThumbInfo {
    /// Read the text chunks preceding the image data.
    pub fn read(path: &Path) -> Option<Self> {
        let file = File::open(path).ok()?;
        let decoder = png::Decoder::new(io::BufReader::new(file));
        let reader = decoder.read_info().ok()?;
        let mut info = ThumbInfo::default();
        for chunk in &reader.info().uncompressed_latin1_text {
            let text = chunk.text.clone();
            match chunk.keyword.as_str() {
                KEY_URI => info.uri = Some(text),
                KEY_MTIME => info.mtime = text.trim().parse().ok(),
                KEY_SIZE => info.size = text.trim().parse().ok(),
                KEY_WIDTH => info.image_width = text.trim().parse().ok(),
                KEY_HEIGHT => info.image_height = text.trim().parse().ok(),
                KEY_SOFTWARE => info.software = Some(text),
                _ => {}
            }
        }
        Some(info)
    }

    /// Whether the thumbnail still describes the file its URI points at.
    pub fn is_current(&self) -> bool {
        let (Some(uri), Some(mtime)) = (&self.uri, self.mtime) else {
            return false;
        };
        let Ok(path) = uri_to_path(uri) else {
            return false;
        };
        match SourceInfo::stat(&path, uri.clone()) {
            Ok(source) => source.mtime == mtime,
            Err(_) => false,
        }
    }
}

/// Encode `buffer` as an RGBA PNG carrying the freedesktop attributes and
/// move it into place at `dest`, readable only by the owner.
pub fn write_thumbnail(
    dest: &Path,
    buffer: &Buffer,
    source: &SourceInfo,
    image_size: (u32, u32),
    software: &str,
) -> io::Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "thumbnail path has no parent"))?;
    std::fs::create_dir_all(dir)?;

    let mut encoded = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut encoded, buffer.width(), buffer.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let text = [
            (KEY_URI, source.uri.clone()),
            (KEY_MTIME, source.mtime.to_string()),
            (KEY_SIZE, source.size.to_string()),
            (KEY_WIDTH, image_size.0.to_string()),
            (KEY_HEIGHT, image_size.1.to_string()),
            (KEY_SOFTWARE, software.to_string()),
        ];
        for (key, value) in text {
            encoder.add_text_chunk(key.to_string(), value).map_err(io::Error::other)?;
        }
        let mut writer = encoder.write_header().map_err(io::Error::other)?;
        writer
            .write_image_data(&buffer.to_rgba8())
            .map_err(io::Error::other)?;
        writer.finish().map_err(io::Error::other)?;
    }

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&encoded)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

/// Outcome of an invalidation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvalidateStats {
    pub checked: u32,
    pub removed: u32,
    pub failed: u32,
}

impl fmt::Display for InvalidateStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failed > 0 {
            write!(
                f,
                "{} checked, {} removed, {} could not be removed",
                self.checked, self.removed, self.failed
            )
        } else {
            write!(f, "{} checked, {} removed", self.checked, self.removed)
        }
    }
}

/// Delete every cached thumbnail whose source is gone or has changed.
pub fn invalidate(layout: &CacheLayout) -> InvalidateStats {
    let files: Vec<PathBuf> = layout
        .directories()
        .into_iter()
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| {
            WalkDir::new(dir)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
                .map(|e| e.into_path())
        })
        .collect();

    files
        .par_iter()
        .map(|path| {
            let current = ThumbInfo::read(path).is_some_and(|info| info.is_current());
            if current {
                return InvalidateStats { checked: 1, ..Default::default() };
            }
            match std::fs::remove_file(path) {
                Ok(()) => {
                    debug!(target: "glance_io::cache", "removed stale thumbnail {}", path.display());
                    InvalidateStats { checked: 1, removed: 1, failed: 0 }
                }
                Err(e) => {
                    debug!(target: "glance_io::cache", "cannot remove {}: {e}", path.display());
                    InvalidateStats { checked: 1, removed: 0, failed: 1 }
                }
            }
        })
        .reduce(InvalidateStats::default, |a, b| InvalidateStats {
            checked: a.checked + b.checked,
            removed: a.removed + b.removed,
            failed: a.failed + b.failed,
        })
}

//! Runtime configuration.
//!
//! Loads `config.toml`, layers it over the stock defaults and validates the
//! result. The file is looked up at:
//!
//! ```text
//! --config PATH                                  (explicit, must exist)
//! $XDG_CONFIG_HOME/glance-io/config.toml         (optional)
//! $HOME/.config/glance-io/config.toml            (when XDG_CONFIG_HOME is unset)
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [decode]
//! enhance_jpeg = false      # Deblocking JPEG path
//! wide_output = false       # RGB30 / RGBA128F for deep sources
//!
//! [color]
//! target = "srgb"           # "srgb", "none", or a path to an ICC file
//!
//! [thumbnails]
//! # cache_dir = "/var/cache/thumbnails"
//! # producer = "my-viewer 1.0"
//!
//! [processing]
//! # max_threads = 4
//! ```
//!
//! Files are sparse: override just the values you want. Unknown keys are
//! rejected to catch typos early.

use crate::cache::CacheLayout;
use crate::cmm::{Cmm, Profile};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlanceConfig {
    pub decode: DecodeConfig,
    pub color: ColorConfig,
    pub thumbnails: ThumbnailsConfig,
    pub processing: ProcessingConfig,
}

impl GlanceConfig {
    /// Validate values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.color.target.trim().is_empty() {
            return Err(ConfigError::Validation(
                "color.target must be \"srgb\", \"none\" or a path".into(),
            ));
        }
        if self.processing.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_threads must be at least 1".into(),
            ));
        }
        if let Some(producer) = &self.thumbnails.producer
            && producer.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "thumbnails.producer must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Thumbnail cache layout: `cache_dir` if set, else the per-user default.
    pub fn cache_layout(&self) -> Option<CacheLayout> {
        match &self.thumbnails.cache_dir {
            Some(dir) => Some(CacheLayout::new(dir)),
            None => CacheLayout::default_root().map(CacheLayout::new),
        }
    }
}

/// Decoder switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodeConfig {
    /// Take the slower JPEG path with block-edge smoothing.
    pub enhance_jpeg: bool,
    /// Keep more than 8 bits per channel where the source has them.
    pub wide_output: bool,
}

/// Color management settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColorConfig {
    /// `"srgb"`, `"none"`, or a path to an ICC profile.
    pub target: String,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            target: "srgb".to_string(),
        }
    }
}

/// Where decoded pixels end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpace {
    Srgb,
    /// Leave pixels in the source space.
    Source,
    Profile(PathBuf),
}

impl ColorConfig {
    pub fn target_space(&self) -> TargetSpace {
        match self.target.trim().to_ascii_lowercase().as_str() {
            "srgb" => TargetSpace::Srgb,
            "none" => TargetSpace::Source,
            _ => TargetSpace::Profile(PathBuf::from(self.target.trim())),
        }
    }

    /// Resolve the target into a profile, reading the ICC file if one is named.
    pub fn load_target(&self, cmm: &Cmm) -> Result<Option<Profile>, ConfigError> {
        match self.target_space() {
            TargetSpace::Srgb => Ok(Some(cmm.get_profile_srgb())),
            TargetSpace::Source => Ok(None),
            TargetSpace::Profile(path) => {
                let bytes = fs::read(&path)?;
                cmm.get_profile(&bytes).map(Some).ok_or_else(|| {
                    ConfigError::Validation(format!("{} is not a usable ICC profile", path.display()))
                })
            }
        }
    }
}

/// Thumbnail cache settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    /// Cache root replacing `$XDG_CACHE_HOME/thumbnails`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// `Software` attribute written into thumbnails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Worker threads for the JPEG enhance path and cache invalidation.
    /// When absent, defaults to the number of CPU cores. Values larger than
    /// the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_threads.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// The stock defaults as a `toml::Value::Table`, the base layer for merging.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(GlanceConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// `glance-io/config.toml` under an XDG-style config home.
pub fn config_path_in(config_home: &Path) -> PathBuf {
    config_home.join("glance-io").join("config.toml")
}

/// The per-user config file location, if a home can be found.
pub fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(config_path_in(&home))
}

/// Read a config file as a raw TOML value; `Ok(None)` if it does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(base: toml::Value, overlay: Option<toml::Value>) -> Result<GlanceConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: GlanceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the effective configuration.
///
/// An explicit `path` must exist; the per-user file is optional.
pub fn load_config(path: Option<&Path>) -> Result<GlanceConfig, ConfigError> {
    let overlay = match path {
        Some(p) => Some(toml::from_str(&fs::read_to_string(p)?)?),
        None => match default_config_path() {
            Some(p) => load_raw_config(&p)?,
            None => None,
        },
    };
    resolve_config(stock_defaults_value()?, overlay)
}

/// A fully-commented stock `config.toml`, printed by `--gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# glance-io Configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Read from $XDG_CONFIG_HOME/glance-io/config.toml, or the file named
# with --config. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Decoding
# ---------------------------------------------------------------------------
[decode]
# Decode JPEG through the slower path that smooths 8x8 block edges.
enhance_jpeg = false

# Keep 10-bit and deeper sources as RGB30 / RGBA128F instead of 8 bits.
wide_output = false

# ---------------------------------------------------------------------------
# Color management
# ---------------------------------------------------------------------------
[color]
# "srgb" converts everything to sRGB, "none" leaves pixels in the source
# space, anything else is the path of an ICC profile to convert into.
target = "srgb"

# ---------------------------------------------------------------------------
# Thumbnail cache
# ---------------------------------------------------------------------------
[thumbnails]
# Cache root. Omit to use $XDG_CACHE_HOME/thumbnails.
# cache_dir = "/home/me/.cache/thumbnails"

# Software attribute written into every thumbnail.
# producer = "glance-io"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Worker threads for enhanced JPEG decoding and cache invalidation.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_threads = 4
"##
}

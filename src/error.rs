//! Error kinds and decode warnings shared by every component.
//!
//! Codecs report one of five kinds. The dispatcher treats
//! [`Error::Unsupported`] as "not my format" and keeps trying; everything
//! except [`Error::OutOfMemory`] is swallowed while a fallback remains.
//! Problems that should not abort a decode are pushed as [`Warning`]s onto
//! the caller's vector instead.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// I/O failure, or bytes recognized but unusable at the container level.
    #[error("open failed: {0}")]
    Open(String),
    #[error("unsupported image format")]
    Unsupported,
    /// Bytes matched a codec but failed mid-decode.
    #[error("corrupt image data: {0}")]
    Corrupt(String),
    /// A metadata block was malformed. Codecs downgrade this to a warning.
    #[error("malformed metadata: {0}")]
    Metadata(String),
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),
}

impl Error {
    pub fn open(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Error::Open(format!("{}: {}", path.into().display(), err))
    }

    /// Whether the dispatcher may continue with the next codec.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::OutOfMemory(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A non-fatal problem noticed during a decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning(pub String);

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Push a warning and mirror it to the log.
pub(crate) fn warn(warnings: &mut Vec<Warning>, message: impl Into<String>) {
    let message = message.into();
    tracing::debug!(target: "glance_io::decode", "{message}");
    warnings.push(Warning(message));
}

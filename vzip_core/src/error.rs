use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VzipError>;

/// Coarse category of a [`VzipError`], for callers that only need to branch
/// on what went wrong and not on the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    Io,
    Internal,
    Config,
    Codec,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum VzipError {
    /// The bytes on disk are not a VZIP archive, or are damaged.
    #[error("invalid archive format: {0}")]
    Format(String),

    #[error("{context}: {source}")]
    IoContext {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A bookkeeping invariant was broken. Always a bug.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("codec failed on block {index}: {source}")]
    Codec {
        index: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("source file {} is empty", .0.display())]
    EmptySource(PathBuf),

    #[error("pipeline run was cancelled")]
    Cancelled,
}

impl VzipError {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Format(_) => ErrorKind::Format,
            Self::IoContext { .. } | Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Config(_) | Self::EmptySource(_) => ErrorKind::Config,
            Self::Codec { .. } => ErrorKind::Codec,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Attach a human-readable context to an `io::Result`.
pub(crate) trait IoResultExt<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| VzipError::IoContext {
            context: f().into(),
            source,
        })
    }
}

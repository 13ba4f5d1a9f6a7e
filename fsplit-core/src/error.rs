//! Error types for split, verify and merge operations.

use std::io;
use std::path::Path;

/// Coarse error category, stable across message wording changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    IoFailure,
    MissingPart,
    IntegrityFailure,
    UnsupportedVersion,
    InvalidDescriptor,
    Cancelled,
}

/// Errors that can occur while splitting, verifying or merging.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    /// A caller-supplied argument is out of range or unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Creating, opening, reading or writing a file failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done, including the offending path.
        context: String,
        #[source]
        source: io::Error,
    },

    /// A part referenced by the descriptor is not present.
    #[error("Part file not found: {file_name} (part {part_number})")]
    MissingPart { part_number: u32, file_name: String },

    /// A computed digest differs from the recorded one.
    #[error("hash mismatch for {subject}: expected {expected}, got {actual}")]
    IntegrityFailure {
        subject: String,
        expected: String,
        actual: String,
    },

    /// Descriptor carries a format version this build does not understand.
    #[error("unsupported metadata version {found}, this build supports version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Descriptor parsed but breaks one of its structural invariants.
    #[error("invalid metadata: {0}")]
    InvalidDescriptor(String),

    #[error("metadata json: {0}")]
    Json(#[from] serde_json::Error),

    /// Cancellation was requested through [`crate::progress::Progress::cancel`].
    #[error("operation cancelled")]
    Cancelled,
}

impl SplitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SplitError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SplitError::Io { .. } => ErrorKind::IoFailure,
            SplitError::MissingPart { .. } => ErrorKind::MissingPart,
            SplitError::IntegrityFailure { .. } => ErrorKind::IntegrityFailure,
            SplitError::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            SplitError::InvalidDescriptor(_) | SplitError::Json(_) => {
                ErrorKind::InvalidDescriptor
            }
            SplitError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        SplitError::Io { context: context.into(), source }
    }
}

pub type Result<T, E = SplitError> = std::result::Result<T, E>;

/// Attach a path-bearing context to `io::Result`s.
pub(crate) trait IoResultExt<T> {
    fn at(self, what: &str, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, what: &str, path: &Path) -> Result<T> {
        self.map_err(|e| SplitError::io(format!("{what} {}", path.display()), e))
    }
}

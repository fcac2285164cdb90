//! Error types for copysess.
//!
//! A session either succeeds or fails with one [`Error`]. Every error carries
//! an OS-level error code (see [`Error::raw_os_error`]); paths are attached
//! only when the primitive reported them.
//!
//! # Error Categories
//!
//! | Category | Errors |
//! |----------|--------|
//! | Setup | [`Error::OutOfMemory`] |
//! | Primitive | [`Error::Copy`] |

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for copysess operations.
///
/// This is a type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Check if an IO error indicates "no space left on device".
///
/// # Example
///
/// ```
/// use std::io;
/// use copysess::is_no_space_error;
///
/// let error = io::Error::new(io::ErrorKind::StorageFull, "disk full");
/// assert!(is_no_space_error(&error));
/// ```
pub fn is_no_space_error(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::StorageFull {
        return true;
    }

    #[cfg(unix)]
    if let Some(raw_error) = error.raw_os_error() {
        return raw_error == libc::ENOSPC;
    }

    false
}

/// Errors that can occur during a copy session.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The primitive's per-call state could not be allocated.
    ///
    /// The session was aborted before anything was copied.
    #[error("Out of memory allocating copy state")]
    OutOfMemory,

    /// The primitive reported a failure.
    ///
    /// `source` is the OS error captured when the primitive returned. The
    /// paths are those of the item whose error ended the session, when the
    /// primitive reported one.
    #[error("{}", describe_copy(.source, .src.as_deref(), .dst.as_deref()))]
    Copy {
        /// Underlying OS error
        source: io::Error,
        /// Source item being copied when the error occurred
        src: Option<PathBuf>,
        /// Destination item being written when the error occurred
        dst: Option<PathBuf>,
    },
}

fn describe_copy(source: &io::Error, src: Option<&Path>, dst: Option<&Path>) -> String {
    match (src, dst) {
        (Some(src), Some(dst)) => format!(
            "Failed to copy {} to {}: {}",
            src.display(),
            dst.display(),
            source
        ),
        (Some(src), None) => format!("Failed to copy {}: {}", src.display(), source),
        (None, Some(dst)) => format!("Failed to copy to {}: {}", dst.display(), source),
        (None, None) => format!("Copy failed: {source}"),
    }
}

impl Error {
    /// Create a primitive failure without path information.
    pub(crate) fn copy(source: io::Error) -> Self {
        Self::Copy {
            source,
            src: None,
            dst: None,
        }
    }

    /// The OS error code behind this error.
    ///
    /// [`Error::OutOfMemory`] reports `ENOMEM`. An [`Error::Copy`] built from
    /// a synthetic `io::Error` without a code reports `None`.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::OutOfMemory => Some(libc::ENOMEM),
            Self::Copy { source, .. } => source.raw_os_error(),
        }
    }

    /// The source path of the failing item, if the primitive reported one.
    pub fn src_path(&self) -> Option<&Path> {
        match self {
            Self::Copy { src, .. } => src.as_deref(),
            Self::OutOfMemory => None,
        }
    }

    /// The destination path of the failing item, if the primitive reported one.
    pub fn dst_path(&self) -> Option<&Path> {
        match self {
            Self::Copy { dst, .. } => dst.as_deref(),
            Self::OutOfMemory => None,
        }
    }

    /// Stable, machine-readable classification of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::OutOfMemory => ErrorCode::OutOfMemory,
            Self::Copy { source, .. } => ErrorCode::from_io(source),
        }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Self::copy(source)
    }
}

/// Machine-readable error classification.
///
/// The string forms returned by [`ErrorCode::as_str`] are stable and meant
/// for scripts and structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// Per-call state allocation failed
    OutOfMemory,
    /// Destination ran out of space
    NoSpace,
    /// Access was denied
    PermissionDenied,
    /// A path did not exist
    NotFound,
    /// A destination item already existed
    AlreadyExists,
    /// A hook stopped the session
    Cancelled,
    /// Any other IO failure
    IoError,
}

impl ErrorCode {
    fn from_io(error: &io::Error) -> Self {
        if is_no_space_error(error) {
            return Self::NoSpace;
        }
        if error.raw_os_error() == Some(libc::ECANCELED) {
            return Self::Cancelled;
        }
        match error.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::AlreadyExists => Self::AlreadyExists,
            io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::IoError,
        }
    }

    /// The stable string form of this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutOfMemory => "out_of_memory",
            Self::NoSpace => "no_space",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Cancelled => "cancelled",
            Self::IoError => "io_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

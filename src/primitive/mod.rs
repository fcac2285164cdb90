//! The platform copy primitive.
//!
//! A primitive walks a source and destination (paths or open descriptors),
//! copies bytes and metadata, and calls a status callback at well-defined
//! checkpoints. The callback answers each checkpoint with a [`Control`]
//! code that the primitive honors:
//!
//! | checkpoint | [`Control::Continue`] | [`Control::Skip`] | [`Control::Quit`] |
//! |---|---|---|---|
//! | item start | copy the item | omit the item, keep walking | fail with `ECANCELED` |
//! | error | drop the item, keep walking | fail with the item's error | fail with `ECANCELED` |
//! | progress / finish | go on | go on | fail with `ECANCELED` |
//!
//! An item whose start checkpoint answered [`Control::Skip`] is never
//! touched again, so it never reaches an error checkpoint.
//!
//! Two implementations ship with the crate: [`PortablePrimitive`], written
//! in Rust for any Unix, and (on macOS) `NativePrimitive`, which wraps
//! `copyfile(3)`. [`default_primitive`] picks the right one.

use crate::options::CopyFlags;
use std::io;
use std::os::fd::BorrowedFd;
use std::path::Path;
use std::sync::Arc;

#[cfg(target_os = "macos")]
mod native;

#[cfg(target_os = "macos")]
pub use native::NativePrimitive;
pub use crate::portable::PortablePrimitive;

/// Which part of the copy a checkpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum What {
    /// An item of a recursive copy failed
    RecurseError,
    /// A non-directory item of a recursive copy
    RecurseFile,
    /// A directory of a recursive copy
    RecurseDir,
    /// A directory whose children have all been visited
    RecurseDirCleanup,
    /// File data is being copied
    CopyData,
    /// Extended attributes are being copied
    CopyXattr,
}

/// Where within that part the checkpoint sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// About to start
    Start,
    /// Done
    Finish,
    /// Failed; the checkpoint carries the OS error code
    Error,
    /// Partway; the checkpoint carries the bytes copied so far
    Progress,
}

/// Answer returned by the status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Control {
    /// Proceed normally
    #[default]
    Continue,
    /// Omit the current item (start) or stop on the current error (error)
    Skip,
    /// Abort the whole call with `ECANCELED`
    Quit,
}

/// One status callback invocation.
///
/// Borrowed from the primitive for the duration of the call only.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint<'a> {
    /// Which part of the copy is reporting
    pub what: What,
    /// Where within that part
    pub stage: Stage,
    /// Source item, when the primitive knows it
    pub src: Option<&'a Path>,
    /// Destination item, when the primitive knows it
    pub dst: Option<&'a Path>,
    /// OS error code, set for [`Stage::Error`] and [`What::RecurseError`]
    pub errno: Option<i32>,
    /// Bytes of the current item copied so far
    pub copied: u64,
}

impl<'a> Checkpoint<'a> {
    /// A checkpoint with no error and nothing copied yet.
    pub fn new(what: What, stage: Stage, src: Option<&'a Path>, dst: Option<&'a Path>) -> Self {
        Self {
            what,
            stage,
            src,
            dst,
            errno: None,
            copied: 0,
        }
    }

    /// Attach an OS error code.
    #[must_use]
    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    /// Attach the cumulative byte count of the current item.
    #[must_use]
    pub fn with_copied(mut self, copied: u64) -> Self {
        self.copied = copied;
        self
    }

    /// Whether this checkpoint reports an item-level error.
    pub fn is_error(&self) -> bool {
        self.what == What::RecurseError || self.stage == Stage::Error
    }
}

/// Status callback bound to a primitive state.
pub type StatusCallback = Box<dyn FnMut(&Checkpoint<'_>) -> Control + Send>;

/// A copy primitive: a factory for per-call states.
pub trait Primitive: Send + Sync {
    /// Allocate the state for one call.
    ///
    /// Returns `None` when the state cannot be allocated; the session then
    /// fails with [`Error::OutOfMemory`](crate::Error::OutOfMemory).
    fn alloc_state(&self) -> Option<Box<dyn PrimitiveState>>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Per-call primitive state.
///
/// The state is released when dropped, which also drops the bound callback.
pub trait PrimitiveState: Send {
    /// Bind the status callback. Replaces any earlier callback.
    fn set_status_callback(&mut self, callback: StatusCallback);

    /// Copy `src` to `dst`.
    ///
    /// The returned error is the OS error observed when the call failed.
    fn copy_path(&mut self, src: &Path, dst: &Path, flags: CopyFlags) -> io::Result<()>;

    /// Copy between two open descriptors, starting at their current offsets.
    ///
    /// [`CopyFlags::RECURSIVE`] and the path-only flags are ignored.
    fn copy_fd(&mut self, src: BorrowedFd<'_>, dst: BorrowedFd<'_>, flags: CopyFlags)
    -> io::Result<()>;
}

/// The primitive used by [`CopyManager::new`](crate::CopyManager::new).
///
/// `copyfile(3)` on macOS, [`PortablePrimitive`] elsewhere.
pub fn default_primitive() -> Arc<dyn Primitive> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(NativePrimitive)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(PortablePrimitive)
    }
}

//! Portable copy primitive.
//!
//! A Rust implementation of the checkpoint contract described in
//! [`crate::primitive`], built on `std::fs`, `filetime`, `xattr` and
//! `reflink-copy`. It walks the source physically (children that are
//! symlinks are copied as links), visits entries in name order, creates
//! directories before their children and applies directory metadata after
//! them.
//!
//! Item errors are routed through an error checkpoint: [`What::RecurseError`]
//! during recursive copies, otherwise [`What::CopyData`] or
//! [`What::CopyXattr`] depending on the phase that failed.

mod dir;
mod file;
mod meta;
mod reflink;
mod utils;

use crate::options::CopyFlags;
use crate::primitive::{
    Checkpoint, Control, Primitive, PrimitiveState, Stage, StatusCallback, What,
};
use std::collections::HashSet;
use std::io;
use std::os::fd::BorrowedFd;
use std::path::Path;

/// The pure-Rust copy primitive.
///
/// Allocation of its state never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortablePrimitive;

impl Primitive for PortablePrimitive {
    fn alloc_state(&self) -> Option<Box<dyn PrimitiveState>> {
        Some(Box::new(PortableState::default()))
    }

    fn name(&self) -> &'static str {
        "portable"
    }
}

#[derive(Default)]
struct PortableState {
    callback: Option<StatusCallback>,
}

impl PrimitiveState for PortableState {
    fn set_status_callback(&mut self, callback: StatusCallback) {
        self.callback = Some(callback);
    }

    fn copy_path(&mut self, src: &Path, dst: &Path, flags: CopyFlags) -> io::Result<()> {
        Copier::new(self.callback.as_mut(), flags).copy_path(src, dst)
    }

    fn copy_fd(
        &mut self,
        src: BorrowedFd<'_>,
        dst: BorrowedFd<'_>,
        flags: CopyFlags,
    ) -> io::Result<()> {
        Copier::new(self.callback.as_mut(), flags).copy_fd(src, dst)
    }
}

pub(crate) fn cancelled() -> io::Error {
    io::Error::from_raw_os_error(libc::ECANCELED)
}

/// Calls the status callback and remembers whether it ever asked to quit.
pub(crate) struct Emitter<'a> {
    callback: Option<&'a mut StatusCallback>,
    quit: bool,
}

impl<'a> Emitter<'a> {
    fn new(callback: Option<&'a mut StatusCallback>) -> Self {
        Self {
            callback,
            quit: false,
        }
    }

    pub(crate) fn emit(&mut self, checkpoint: Checkpoint<'_>) -> Control {
        let control = match self.callback.as_mut() {
            Some(callback) => (*callback)(&checkpoint),
            None => Control::Continue,
        };
        if control == Control::Quit {
            self.quit = true;
        }
        control
    }

    /// Emit a start/finish checkpoint, turning `Quit` into an error.
    fn step(&mut self, what: What, stage: Stage, src: &Path, dst: &Path) -> io::Result<Control> {
        match self.emit(Checkpoint::new(what, stage, Some(src), Some(dst))) {
            Control::Quit => Err(cancelled()),
            control => Ok(control),
        }
    }

    /// Route an item error through the error checkpoint.
    ///
    /// `Ok(())` means the callback chose to continue past the item.
    fn item_error(
        &mut self,
        what: What,
        src: Option<&Path>,
        dst: Option<&Path>,
        error: io::Error,
    ) -> io::Result<()> {
        if self.quit {
            return Err(cancelled());
        }
        let errno = error.raw_os_error().unwrap_or(libc::EIO);
        let checkpoint = Checkpoint::new(what, Stage::Error, src, dst).with_errno(errno);
        match self.emit(checkpoint) {
            Control::Continue => {
                tracing::debug!(
                    src = ?src,
                    error = %error,
                    "continuing past failed item"
                );
                Ok(())
            }
            // Errors without an OS code leave with the errno the callback saw.
            Control::Skip if error.raw_os_error().is_some() => Err(error),
            Control::Skip => Err(io::Error::from_raw_os_error(errno)),
            Control::Quit => Err(cancelled()),
        }
    }
}

/// Which step of an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Opening, creating, stat-ing or removing the item
    Item,
    /// Copying file data
    Data,
    /// Copying extended attributes or ACLs
    Xattr,
}

/// An item failure together with what must be undone if it is skipped.
#[derive(Debug)]
pub(crate) struct Failure {
    pub phase: Phase,
    pub error: io::Error,
    /// The destination was created by this copy.
    pub created: bool,
}

impl Failure {
    pub(crate) fn new(phase: Phase, error: io::Error) -> Self {
        Self {
            phase,
            error,
            created: false,
        }
    }

    pub(crate) fn created(mut self, created: bool) -> Self {
        self.created |= created;
        self
    }
}

impl From<io::Error> for Failure {
    fn from(error: io::Error) -> Self {
        Self::new(Phase::Item, error)
    }
}

/// One `copy_path`/`copy_fd` call in progress.
pub(crate) struct Copier<'a> {
    emitter: Emitter<'a>,
    flags: CopyFlags,
    /// (dev, ino) of destination directories, so a destination nested in
    /// its source is never walked.
    output_dirs: HashSet<(u64, u64)>,
}

impl<'a> Copier<'a> {
    fn new(callback: Option<&'a mut StatusCallback>, flags: CopyFlags) -> Self {
        Self {
            emitter: Emitter::new(callback),
            flags,
            output_dirs: HashSet::new(),
        }
    }

    fn recursive(&self) -> bool {
        self.flags.contains(CopyFlags::RECURSIVE)
    }

    /// The checkpoint kind that reports a failure in `phase`.
    fn error_what(&self, phase: Phase) -> What {
        if self.recursive() {
            return What::RecurseError;
        }
        match phase {
            Phase::Item | Phase::Data => What::CopyData,
            Phase::Xattr => What::CopyXattr,
        }
    }

    /// Report a failed item; undo a partially created destination if the
    /// callback continues past it.
    fn fail_item(&mut self, src: Option<&Path>, dst: Option<&Path>, failure: Failure) -> io::Result<()> {
        let what = self.error_what(failure.phase);
        self.emitter.item_error(what, src, dst, failure.error)?;
        if failure.created {
            if let Some(dst) = dst {
                let _ = utils::remove_partial(dst);
            }
        }
        Ok(())
    }
}

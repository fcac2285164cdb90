//! Builder API for one-off copies.
//!
//! The builder wraps [`CopyManager::copy_item`] with a fluent interface for
//! the common flag combinations.
//!
//! # Examples
//!
//! ## Basic Usage
//!
//! ```no_run
//! use copysess::CopyBuilder;
//!
//! // Recursive copy of data and all metadata
//! CopyBuilder::new("src", "dst").run()?;
//! # Ok::<(), copysess::Error>(())
//! ```
//!
//! ## Clone When Possible
//!
//! ```no_run
//! use copysess::CopyBuilder;
//!
//! CopyBuilder::new("disk.img", "disk-copy.img")
//!     .clone_first()
//!     .run()?;
//! # Ok::<(), copysess::Error>(())
//! ```
//!
//! ## Move Without Clobbering
//!
//! ```no_run
//! use copysess::CopyBuilder;
//!
//! CopyBuilder::new("inbox", "archive/inbox")
//!     .exclusive()
//!     .move_source()
//!     .run()?;
//! # Ok::<(), copysess::Error>(())
//! ```

use crate::error::Result;
use crate::manager::CopyManager;
use crate::options::CopyFlags;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::{Path, PathBuf};

/// A builder for configuring and running one copy.
///
/// Starts from the default flags (`ALL | RECURSIVE`) and the shared
/// [`CopyManager`].
///
/// # Example
///
/// ```no_run
/// use copysess::CopyBuilder;
///
/// CopyBuilder::new("/data/project", "/backup/project")
///     .no_follow()
///     .on_progress(|_, _, bytes| eprintln!("{bytes} bytes"))
///     .run()?;
/// # Ok::<(), copysess::Error>(())
/// ```
pub struct CopyBuilder {
    src: PathBuf,
    dst: PathBuf,
    flags: CopyFlags,
    manager: Option<CopyManager>,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for CopyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyBuilder")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("flags", &self.flags)
            .field("manager", &self.manager)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl CopyBuilder {
    /// Create a new `CopyBuilder` with the given source and destination paths.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use copysess::CopyBuilder;
    ///
    /// let builder = CopyBuilder::new("src", "dst");
    /// ```
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> Self {
        Self {
            src: src.as_ref().to_path_buf(),
            dst: dst.as_ref().to_path_buf(),
            flags: CopyFlags::default(),
            manager: None,
            progress: None,
        }
    }

    /// Replace the flags entirely.
    #[must_use]
    pub fn flags(mut self, flags: CopyFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Copy only the top-level item.
    #[must_use]
    pub fn non_recursive(mut self) -> Self {
        self.flags.remove(CopyFlags::RECURSIVE);
        self
    }

    /// Try a copy-on-write clone first, falling back to a byte copy.
    ///
    /// Adds [`CopyFlags::CLONE`], which also makes the copy exclusive and
    /// leaves source symlinks unresolved.
    #[must_use]
    pub fn clone_first(mut self) -> Self {
        self.flags |= CopyFlags::CLONE;
        self
    }

    /// Require a copy-on-write clone; fail where none is possible.
    #[must_use]
    pub fn clone_only(mut self) -> Self {
        self.flags |= CopyFlags::CLONE_FORCE;
        self
    }

    /// Fail on items that already exist at the destination.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.flags.insert(CopyFlags::EXCL);
        self
    }

    /// Unlink existing destination files first.
    #[must_use]
    pub fn unlink(mut self) -> Self {
        self.flags.insert(CopyFlags::UNLINK);
        self
    }

    /// Remove each source item once it has been copied.
    #[must_use]
    pub fn move_source(mut self) -> Self {
        self.flags.insert(CopyFlags::MOVE);
        self
    }

    /// Resolve neither source nor destination symlinks.
    #[must_use]
    pub fn no_follow(mut self) -> Self {
        self.flags.insert(CopyFlags::NOFOLLOW);
        self
    }

    /// Preserve holes in sparse files.
    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.flags.insert(CopyFlags::DATA_SPARSE);
        self
    }

    /// Copy data only, no metadata.
    #[must_use]
    pub fn data_only(mut self) -> Self {
        self.flags.remove(CopyFlags::METADATA);
        self
    }

    /// Run on `manager` instead of [`CopyManager::shared`].
    ///
    /// The manager's delegate, if any, is consulted during the copy.
    #[must_use]
    pub fn manager(mut self, manager: CopyManager) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Receive `(src, dst, bytes)` progress per item.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Option<&Path>, Option<&Path>, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// The flags the copy will use.
    pub fn current_flags(&self) -> CopyFlags {
        self.flags
    }

    /// Run the copy, blocking until it finishes.
    ///
    /// # Errors
    ///
    /// See [`CopyManager::copy_item`].
    pub fn run(self) -> Result<()> {
        futures::executor::block_on(self.run_async())
    }

    /// Run the copy on the manager's queue and await the outcome.
    ///
    /// # Errors
    ///
    /// See [`CopyManager::copy_item`].
    pub async fn run_async(self) -> Result<()> {
        let manager = match self.manager {
            Some(manager) => manager,
            None => CopyManager::shared().clone(),
        };
        manager
            .copy_item(&self.src, &self.dst, self.flags, self.progress)
            .await
    }
}

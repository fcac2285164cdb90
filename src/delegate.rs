//! Policy hooks consulted during a copy.
//!
//! A [`CopyDelegate`] is registered on a [`CopyManager`] and asked two
//! questions while the primitive walks the source: whether an item should be
//! copied at all, and whether the copy should go on after an item failed.
//!
//! The manager only keeps a weak reference. Once the owner drops the
//! delegate, copies behave as if none were registered: every item is copied
//! and the first error ends the copy.
//!
//! # Example
//!
//! ```no_run
//! use copysess::{CopyDelegate, CopyManager};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! struct SkipHidden;
//!
//! impl CopyDelegate for SkipHidden {
//!     fn should_copy_item(&self, _: &CopyManager, src: &Path, _: &Path, _: bool) -> bool {
//!         !src
//!             .file_name()
//!             .is_some_and(|name| name.to_string_lossy().starts_with('.'))
//!     }
//! }
//!
//! let delegate = Arc::new(SkipHidden);
//! let manager = CopyManager::new();
//! manager.set_delegate(&delegate);
//! manager.copy_item_blocking("src", "dst", Default::default(), None)?;
//! # Ok::<(), copysess::Error>(())
//! ```

use crate::error::Error;
use crate::manager::CopyManager;
use std::fmt;
use std::path::Path;

/// Policy hooks for a [`CopyManager`].
///
/// Hooks run on the worker executing the copy and must not block for long.
/// Both methods have defaults, so an implementation overrides only what it
/// needs.
pub trait CopyDelegate: Send + Sync {
    /// Whether the item at `src` should be copied to `dst`.
    ///
    /// Returning `false` for a directory omits everything inside it. Only
    /// asked when the primitive reports both paths.
    fn should_copy_item(
        &self,
        manager: &CopyManager,
        src: &Path,
        dst: &Path,
        is_dir: bool,
    ) -> bool {
        let _ = (manager, src, dst, is_dir);
        true
    }

    /// Whether the copy should go on after `error`.
    ///
    /// Returning `true` drops the failing item and continues; `false` ends
    /// the copy with `error`.
    fn should_proceed_after_error(
        &self,
        manager: &CopyManager,
        error: &Error,
        src: Option<&Path>,
        dst: Option<&Path>,
    ) -> bool {
        let _ = (manager, error, src, dst);
        false
    }
}

type ItemHook = Box<dyn Fn(&Path, &Path, bool) -> bool + Send + Sync>;
type ErrorHook = Box<dyn Fn(&Error, Option<&Path>, Option<&Path>) -> bool + Send + Sync>;

/// A [`CopyDelegate`] assembled from closures.
///
/// Hooks that are not set keep the trait defaults.
///
/// ```
/// use copysess::HookDelegate;
///
/// let delegate = HookDelegate::new()
///     .on_item(|src, _, _| src.extension().is_none_or(|ext| ext != "tmp"))
///     .on_error(|error, _, _| {
///         eprintln!("{error}");
///         true
///     });
/// ```
#[derive(Default)]
pub struct HookDelegate {
    item: Option<ItemHook>,
    error: Option<ErrorHook>,
}

impl HookDelegate {
    /// A delegate with no hooks set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide per item: `(src, dst, is_dir) -> copy?`.
    #[must_use]
    pub fn on_item<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Path, &Path, bool) -> bool + Send + Sync + 'static,
    {
        self.item = Some(Box::new(hook));
        self
    }

    /// Decide per error: `(error, src, dst) -> continue?`.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Error, Option<&Path>, Option<&Path>) -> bool + Send + Sync + 'static,
    {
        self.error = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for HookDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDelegate")
            .field("item", &self.item.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl CopyDelegate for HookDelegate {
    fn should_copy_item(&self, _: &CopyManager, src: &Path, dst: &Path, is_dir: bool) -> bool {
        self.item.as_ref().is_none_or(|hook| hook(src, dst, is_dir))
    }

    fn should_proceed_after_error(
        &self,
        _: &CopyManager,
        error: &Error,
        src: Option<&Path>,
        dst: Option<&Path>,
    ) -> bool {
        self.error.as_ref().is_some_and(|hook| hook(error, src, dst))
    }
}

//! Progress reporting.
//!
//! Progress arrives per item as a cumulative byte count: every data chunk of
//! a file reports how much of *that file* has been copied so far, together
//! with its source and destination paths. Clones report nothing.
//!
//! With the `progress` feature, [`progress_bar_callback`] turns these
//! per-item counts into increments of an indicatif bar.

use std::path::Path;

/// Progress sink: `(src, dst, bytes copied of the current item)`.
///
/// Runs on the worker executing the copy; keep it cheap.
pub type ProgressCallback = Box<dyn Fn(Option<&Path>, Option<&Path>, u64) + Send + Sync>;

#[cfg(feature = "progress")]
pub use bar::{create_progress_bar, progress_bar_callback};

#[cfg(feature = "progress")]
mod bar {
    use super::ProgressCallback;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Create a byte-based progress bar for `total` bytes.
    #[must_use]
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb
    }

    /// Feed `bar` from a copy's progress.
    ///
    /// Each report is converted into the bytes added since the previous
    /// report for the same item, so the bar advances by the total size of
    /// everything copied.
    ///
    /// ```no_run
    /// use copysess::{CopyBuilder, create_progress_bar, progress_bar_callback};
    ///
    /// let bar = create_progress_bar(1 << 20);
    /// CopyBuilder::new("src", "dst")
    ///     .on_progress(progress_bar_callback(bar.clone()))
    ///     .run()?;
    /// bar.finish();
    /// # Ok::<(), copysess::Error>(())
    /// ```
    #[must_use]
    pub fn progress_bar_callback(bar: ProgressBar) -> ProgressCallback {
        let tracker = Mutex::new(ItemTracker::default());
        Box::new(move |src: Option<&Path>, _: Option<&Path>, bytes: u64| {
            let delta = tracker
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .advance(src, bytes);
            bar.inc(delta);
        })
    }

    /// Last cumulative count seen, and for which item.
    #[derive(Debug, Default)]
    pub(super) struct ItemTracker {
        item: Option<PathBuf>,
        copied: u64,
    }

    impl ItemTracker {
        pub(super) fn advance(&mut self, src: Option<&Path>, bytes: u64) -> u64 {
            let same_item = self.item.as_deref() == src && bytes >= self.copied;
            let delta = if same_item { bytes - self.copied } else { bytes };
            if !same_item {
                self.item = src.map(Path::to_path_buf);
            }
            self.copied = bytes;
            delta
        }
    }
}

//! # copysess
//!
//! Recursive file and directory copies driven by a platform copy primitive,
//! with per-item policy hooks, progress reporting and a clone fast path.
//!
//! ## Core Features
//!
//! - **One primitive call per copy**: `copyfile(3)` on macOS, a portable Rust walker elsewhere
//! - **Selective copies**: [`CopyFlags`] pick data, POSIX stat info, ACLs and extended attributes
//! - **Per-item control**: a [`CopyDelegate`] skips items or keeps going past failures
//! - **Progress**: cumulative byte counts per item, optionally into an indicatif bar
//! - **Clone fast path**: copy-on-write clones on Btrfs/XFS/APFS, with byte-copy fallback
//! - **Async or blocking**: copies run on a rayon pool; await them or block
//! - **Sparse files**: holes are preserved with [`CopyFlags::DATA_SPARSE`]
//!
//! ## Quick Start with Builder API
//!
//! ```no_run
//! use copysess::CopyBuilder;
//!
//! // Recursive copy of data and all metadata
//! CopyBuilder::new("src", "dst").run()?;
//! # Ok::<(), copysess::Error>(())
//! ```
//!
//! ## Manager API
//!
//! For hooks and custom queues, use a [`CopyManager`]:
//!
//! ```no_run
//! use copysess::{CopyFlags, CopyManager, HookDelegate};
//! use std::sync::Arc;
//!
//! let delegate = Arc::new(
//!     HookDelegate::new()
//!         .on_item(|src, _, _| !src.ends_with("target"))
//!         .on_error(|error, _, _| {
//!             eprintln!("skipping: {error}");
//!             true
//!         }),
//! );
//!
//! let manager = CopyManager::new();
//! manager.set_delegate(&delegate);
//! manager.copy_item_blocking("project", "backup", CopyFlags::default(), None)?;
//! # Ok::<(), copysess::Error>(())
//! ```
//!
//! ## Control Semantics
//!
//! | hook | returns `true` | returns `false` | not registered |
//! |------|----------------|-----------------|----------------|
//! | `should_copy_item` | copy the item | skip it (and its contents) | copy |
//! | `should_proceed_after_error` | drop the item, continue | fail with the item's error | fail |
//!
//! A skipped item is never reported as an error.
//!
//! ## Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `reflink` | Clone fast path for the portable primitive (default) |
//! | `progress` | Progress bar support with indicatif |
//! | `serde` | Serialize/Deserialize for [`CopyFlags`] |
//! | `full` | Enable all optional features |

#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(unix))]
compile_error!("copysess supports Unix platforms only");

mod bridge;
mod builder;
mod delegate;
mod error;
mod manager;
mod options;
mod portable;
pub mod primitive;
mod progress;
mod session;

pub use builder::CopyBuilder;
pub use delegate::{CopyDelegate, HookDelegate};
pub use error::{Error, ErrorCode, Result, is_no_space_error};
pub use manager::CopyManager;
pub use options::CopyFlags;
pub use progress::ProgressCallback;

#[cfg(feature = "progress")]
#[cfg_attr(docsrs, doc(cfg(feature = "progress")))]
pub use progress::{create_progress_bar, progress_bar_callback};

//! Translation between primitive checkpoints and caller policy.
//!
//! The bridge is the status callback bound to every primitive state. It turns
//! each [`Checkpoint`] into a [`CopyEvent`], asks the delegate or progress
//! sink registered for the session, and answers with a [`Control`] code:
//!
//! | checkpoint | consulted | answer |
//! |---|---|---|
//! | file/dir start, both paths known | `should_copy_item` | `true` → Continue, `false` → Skip |
//! | file/dir start, a path missing | nobody | Continue |
//! | error | `should_proceed_after_error` | `true` → Continue, `false` → Skip |
//! | data progress | progress sink | Continue |
//! | anything else | nobody | Continue |
//!
//! Without a delegate, items are copied and errors end the copy.

use crate::error::Error;
use crate::primitive::{Checkpoint, Control, Stage, StatusCallback, What};
use crate::session::SessionContext;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// One checkpoint as seen by policy code.
///
/// Borrowed from the primitive for the duration of one callback.
#[derive(Debug)]
pub(crate) struct CopyEvent<'a> {
    /// What happened
    pub kind: EventKind<'a>,
    /// Source item, when the primitive reported it
    pub src: Option<&'a Path>,
    /// Destination item, when the primitive reported it
    pub dst: Option<&'a Path>,
}

/// The kind of a [`CopyEvent`].
#[derive(Debug)]
pub(crate) enum EventKind<'a> {
    /// An item is about to be copied
    ShouldCopy {
        /// The item is a directory
        is_dir: bool,
    },
    /// An item failed
    Error(&'a Error),
    /// Data of the current item is being copied
    Progress {
        /// Bytes of the item copied so far
        bytes: u64,
    },
}

/// Status callback state: the session context it reports to.
pub(crate) struct StatusBridge {
    context: Arc<SessionContext>,
}

impl StatusBridge {
    pub(crate) fn new(context: Arc<SessionContext>) -> Self {
        Self { context }
    }

    /// Box the bridge as the callback a primitive state expects.
    pub(crate) fn into_callback(self) -> StatusCallback {
        Box::new(move |checkpoint: &Checkpoint<'_>| self.on_checkpoint(checkpoint))
    }

    pub(crate) fn on_checkpoint(&self, checkpoint: &Checkpoint<'_>) -> Control {
        let (src, dst) = (checkpoint.src, checkpoint.dst);

        if checkpoint.is_error() {
            let errno = checkpoint.errno.unwrap_or(libc::EIO);
            let error = Error::Copy {
                source: io::Error::from_raw_os_error(errno),
                src: src.map(Path::to_path_buf),
                dst: dst.map(Path::to_path_buf),
            };
            let control = self.context.decide(&CopyEvent {
                kind: EventKind::Error(&error),
                src,
                dst,
            });
            tracing::trace!(?src, errno, ?control, "error checkpoint");
            if control == Control::Skip {
                self.context.record_declined(error);
            }
            return control;
        }

        match (checkpoint.what, checkpoint.stage) {
            (What::RecurseFile | What::RecurseDir, Stage::Start) => {
                let is_dir = checkpoint.what == What::RecurseDir;
                let control = self.context.decide(&CopyEvent {
                    kind: EventKind::ShouldCopy { is_dir },
                    src,
                    dst,
                });
                tracing::trace!(?src, is_dir, ?control, "item checkpoint");
                control
            }
            (What::CopyData, Stage::Progress) => self.context.decide(&CopyEvent {
                kind: EventKind::Progress {
                    bytes: checkpoint.copied,
                },
                src,
                dst,
            }),
            _ => Control::Continue,
        }
    }
}

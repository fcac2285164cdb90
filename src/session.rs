//! One copy from request to outcome.
//!
//! A session allocates the primitive's per-call state, binds the status
//! bridge to it, invokes the primitive exactly once and converts the result.
//! The state and the callback context are owned by the session and released
//! when it drops, whichever way the copy ended.

use crate::bridge::{CopyEvent, EventKind, StatusBridge};
use crate::error::{Error, Result};
use crate::manager::CopyManager;
use crate::options::CopyFlags;
use crate::primitive::{Control, Primitive, PrimitiveState};
use crate::progress::ProgressCallback;
use std::io;
use std::os::fd::BorrowedFd;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// What the status callback can reach during one session.
pub(crate) struct SessionContext {
    manager: CopyManager,
    progress: Option<ProgressCallback>,
    /// The error a hook declined to continue past.
    declined: Mutex<Option<Error>>,
}

impl SessionContext {
    pub(crate) fn new(manager: CopyManager, progress: Option<ProgressCallback>) -> Self {
        Self {
            manager,
            progress,
            declined: Mutex::new(None),
        }
    }

    /// Answer one event with the registered delegate or progress sink.
    ///
    /// The delegate is looked up on every call so that a delegate dropped
    /// mid-copy stops being consulted.
    pub(crate) fn decide(&self, event: &CopyEvent<'_>) -> Control {
        match event.kind {
            EventKind::ShouldCopy { is_dir } => {
                // Skipping needs an addressable item.
                let (Some(src), Some(dst)) = (event.src, event.dst) else {
                    return Control::Continue;
                };
                match self.manager.delegate() {
                    Some(delegate) if !delegate.should_copy_item(&self.manager, src, dst, is_dir) => {
                        Control::Skip
                    }
                    _ => Control::Continue,
                }
            }
            EventKind::Error(error) => match self.manager.delegate() {
                Some(delegate)
                    if delegate.should_proceed_after_error(
                        &self.manager,
                        error,
                        event.src,
                        event.dst,
                    ) =>
                {
                    Control::Continue
                }
                _ => Control::Skip,
            },
            EventKind::Progress { bytes } => {
                if let Some(progress) = &self.progress {
                    progress(event.src, event.dst, bytes);
                }
                Control::Continue
            }
        }
    }

    pub(crate) fn record_declined(&self, error: Error) {
        let mut declined = self.declined.lock().unwrap_or_else(|e| e.into_inner());
        *declined = Some(error);
    }

    pub(crate) fn take_declined(&self) -> Option<Error> {
        self.declined
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// An allocated primitive state with the bridge bound to it.
pub(crate) struct CopySession {
    primitive: &'static str,
    state: Box<dyn PrimitiveState>,
    context: Arc<SessionContext>,
}

impl CopySession {
    /// Allocate the state and bind the bridge.
    ///
    /// Fails with [`Error::OutOfMemory`] when the primitive cannot allocate
    /// its state; the context is released before returning.
    pub(crate) fn open(primitive: &dyn Primitive, context: SessionContext) -> Result<Self> {
        let Some(mut state) = primitive.alloc_state() else {
            tracing::debug!(primitive = primitive.name(), "copy state allocation failed");
            return Err(Error::OutOfMemory);
        };

        let context = Arc::new(context);
        state.set_status_callback(StatusBridge::new(Arc::clone(&context)).into_callback());
        Ok(Self {
            primitive: primitive.name(),
            state,
            context,
        })
    }

    /// Copy `src` to `dst`, consuming the session.
    pub(crate) fn copy_path(mut self, src: &Path, dst: &Path, flags: CopyFlags) -> Result<()> {
        tracing::debug!(
            primitive = self.primitive,
            src = %src.display(),
            dst = %dst.display(),
            ?flags,
            "copy session started"
        );
        let result = self.state.copy_path(src, dst, flags);
        self.finish(result)
    }

    /// Copy between two descriptors, consuming the session.
    pub(crate) fn copy_fd(
        mut self,
        src: BorrowedFd<'_>,
        dst: BorrowedFd<'_>,
        flags: CopyFlags,
    ) -> Result<()> {
        tracing::debug!(primitive = self.primitive, ?src, ?dst, ?flags, "copy session started");
        let result = self.state.copy_fd(src, dst, flags);
        self.finish(result)
    }

    fn finish(&self, result: io::Result<()>) -> Result<()> {
        let declined = self.context.take_declined();
        let Err(source) = result else {
            tracing::debug!(primitive = self.primitive, "copy session finished");
            return Ok(());
        };

        // Paths come from the error a hook declined, and only when that error
        // is the one the primitive returned.
        let (src, dst) = match declined {
            Some(Error::Copy { source: seen, src, dst })
                if seen.raw_os_error() == source.raw_os_error() =>
            {
                (src, dst)
            }
            _ => (None, None),
        };
        let error = Error::Copy { source, src, dst };
        tracing::debug!(primitive = self.primitive, error = %error, "copy session failed");
        Err(error)
    }
}

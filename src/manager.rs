//! The copy manager: entry point for copy sessions.
//!
//! A [`CopyManager`] owns an I/O queue (a rayon thread pool), an optional
//! weakly held [`CopyDelegate`] and the [`Primitive`] that does the copying.
//! Each copy runs as one blocking primitive call on the queue; the caller
//! awaits a future (or blocks) for the outcome.
//!
//! # Example
//!
//! ```no_run
//! use copysess::{CopyFlags, CopyManager};
//!
//! # async fn demo() -> copysess::Result<()> {
//! let manager = CopyManager::shared();
//! manager
//!     .copy_item("project", "backup/project", CopyFlags::default(), None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::delegate::CopyDelegate;
use crate::error::{Error, Result};
use crate::options::CopyFlags;
use crate::primitive::{Primitive, default_primitive};
use crate::progress::ProgressCallback;
use crate::session::{CopySession, SessionContext};
use futures::channel::oneshot;
use std::any::Any;
use std::fmt;
use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock, Weak};

/// Where blocking primitive calls run.
#[derive(Clone)]
enum IoQueue {
    /// rayon's global pool
    Global,
    /// A caller supplied pool
    Pool(Arc<rayon::ThreadPool>),
}

impl IoQueue {
    fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            Self::Global => rayon::spawn(job),
            Self::Pool(pool) => pool.spawn(job),
        }
    }
}

struct Inner {
    queue: IoQueue,
    delegate: RwLock<Option<Weak<dyn CopyDelegate>>>,
    primitive: Arc<dyn Primitive>,
}

/// Runs copy sessions.
///
/// Cheap to clone; clones share the queue, delegate and primitive.
#[derive(Clone)]
pub struct CopyManager {
    inner: Arc<Inner>,
}

impl Default for CopyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CopyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = match self.inner.queue {
            IoQueue::Global => "global",
            IoQueue::Pool(_) => "pool",
        };
        f.debug_struct("CopyManager")
            .field("queue", &queue)
            .field("primitive", &self.inner.primitive.name())
            .field("has_delegate", &self.delegate().is_some())
            .finish()
    }
}

type Outcome = std::result::Result<Result<()>, Box<dyn Any + Send>>;

impl CopyManager {
    /// A manager on rayon's global pool with the platform's default primitive.
    pub fn new() -> Self {
        Self::with_parts(IoQueue::Global, default_primitive())
    }

    /// A manager whose copies run on `pool`.
    pub fn with_pool(pool: Arc<rayon::ThreadPool>) -> Self {
        Self::with_parts(IoQueue::Pool(pool), default_primitive())
    }

    /// The same queue and delegate with a different primitive.
    ///
    /// The delegate registration is copied, not shared.
    #[must_use]
    pub fn with_primitive(&self, primitive: Arc<dyn Primitive>) -> Self {
        let manager = Self::with_parts(self.inner.queue.clone(), primitive);
        let delegate = self.read_delegate().clone();
        *manager.write_delegate() = delegate;
        manager
    }

    fn with_parts(queue: IoQueue, primitive: Arc<dyn Primitive>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                delegate: RwLock::new(None),
                primitive,
            }),
        }
    }

    /// The process-wide manager, created on first use.
    pub fn shared() -> &'static CopyManager {
        static SHARED: OnceLock<CopyManager> = OnceLock::new();
        SHARED.get_or_init(CopyManager::new)
    }

    /// Register `delegate`. Only a weak reference is kept.
    pub fn set_delegate<D: CopyDelegate + 'static>(&self, delegate: &Arc<D>) {
        let weak = Arc::downgrade(delegate);
        let weak: Weak<dyn CopyDelegate> = weak;
        *self.write_delegate() = Some(weak);
    }

    /// Remove the registered delegate.
    pub fn clear_delegate(&self) {
        *self.write_delegate() = None;
    }

    /// The delegate, if one is registered and still alive.
    pub fn delegate(&self) -> Option<Arc<dyn CopyDelegate>> {
        self.read_delegate().as_ref().and_then(Weak::upgrade)
    }

    /// Name of the primitive this manager copies with.
    pub fn primitive_name(&self) -> &'static str {
        self.inner.primitive.name()
    }

    fn read_delegate(&self) -> std::sync::RwLockReadGuard<'_, Option<Weak<dyn CopyDelegate>>> {
        self.inner.delegate.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_delegate(&self) -> std::sync::RwLockWriteGuard<'_, Option<Weak<dyn CopyDelegate>>> {
        self.inner.delegate.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy `src` to `dst` with `flags`.
    ///
    /// The copy runs on the manager's queue. `progress` receives cumulative
    /// byte counts per item.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfMemory`] if the primitive state cannot be allocated
    /// - [`Error::Copy`] with the primitive's OS error otherwise; cancelled
    ///   copies report `ECANCELED`
    ///
    /// # Panics
    ///
    /// A panic raised by a hook is resumed here.
    pub async fn copy_item(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
        flags: CopyFlags,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let src = src.as_ref().to_path_buf();
        let dst = dst.as_ref().to_path_buf();
        let receiver = self.dispatch(progress, move |session| session.copy_path(&src, &dst, flags));
        Self::wait(receiver).await
    }

    /// Copy the content and metadata of one open file to another.
    ///
    /// Both descriptors are duplicated before the copy is queued, so the
    /// caller keeps ownership of its own. Duplicates share file offsets
    /// with the originals: the copy starts at their current positions.
    ///
    /// # Errors
    ///
    /// As [`CopyManager::copy_item`]; a failed duplication is an
    /// [`Error::Copy`] carrying its OS error.
    pub async fn copy_file_handle(
        &self,
        src: impl AsFd,
        dst: impl AsFd,
        flags: CopyFlags,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let (src, dst) = match duplicate(src, dst) {
            Ok(fds) => fds,
            Err(error) => return Err(Error::from(error)),
        };
        let receiver = self.dispatch(progress, move |session| {
            session.copy_fd(src.as_fd(), dst.as_fd(), flags)
        });
        Self::wait(receiver).await
    }

    /// Blocking form of [`CopyManager::copy_item`].
    pub fn copy_item_blocking(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
        flags: CopyFlags,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        futures::executor::block_on(self.copy_item(src, dst, flags, progress))
    }

    /// Blocking form of [`CopyManager::copy_file_handle`].
    pub fn copy_file_handle_blocking(
        &self,
        src: impl AsFd,
        dst: impl AsFd,
        flags: CopyFlags,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        futures::executor::block_on(self.copy_file_handle(src, dst, flags, progress))
    }

    /// Queue one session and return the receiver of its outcome.
    fn dispatch<F>(&self, progress: Option<ProgressCallback>, run: F) -> oneshot::Receiver<Outcome>
    where
        F: FnOnce(CopySession) -> Result<()> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let manager = self.clone();
        self.inner.queue.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let context = SessionContext::new(manager.clone(), progress);
                let session = CopySession::open(manager.inner.primitive.as_ref(), context)?;
                run(session)
            }));
            // The caller may have stopped waiting.
            let _ = sender.send(outcome);
        });
        receiver
    }

    async fn wait(receiver: oneshot::Receiver<Outcome>) -> Result<()> {
        match receiver.await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(oneshot::Canceled) => {
                tracing::debug!("copy queue dropped the session");
                Err(Error::from(io::Error::from_raw_os_error(libc::ECANCELED)))
            }
        }
    }
}

fn duplicate(src: impl AsFd, dst: impl AsFd) -> io::Result<(OwnedFd, OwnedFd)> {
    let src = src.as_fd().try_clone_to_owned()?;
    let dst = dst.as_fd().try_clone_to_owned()?;
    Ok((src, dst))
}

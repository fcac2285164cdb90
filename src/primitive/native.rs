//! `copyfile(3)` bindings for macOS.
//!
//! The state owns the `copyfile_state_t` and the boxed callback context
//! whose address is handed to `copyfile` as the status context. Both are
//! released together when the state drops.

use super::{Checkpoint, Control, Primitive, PrimitiveState, Stage, StatusCallback, What};
use crate::options::CopyFlags;
use std::any::Any;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use libc::{
    COPYFILE_CONTINUE, COPYFILE_COPY_DATA, COPYFILE_COPY_XATTR, COPYFILE_ERR, COPYFILE_FINISH,
    COPYFILE_PROGRESS, COPYFILE_QUIT, COPYFILE_RECURSE_DIR, COPYFILE_RECURSE_DIR_CLEANUP,
    COPYFILE_RECURSE_ERROR, COPYFILE_RECURSE_FILE, COPYFILE_SKIP, COPYFILE_START,
    COPYFILE_STATE_COPIED, COPYFILE_STATE_STATUS_CB, COPYFILE_STATE_STATUS_CTX, copyfile,
    copyfile_state_alloc, copyfile_state_free, copyfile_state_get, copyfile_state_set,
    copyfile_state_t, fcopyfile,
};

type StatusFn = extern "C" fn(
    what: c_int,
    stage: c_int,
    state: copyfile_state_t,
    src: *const c_char,
    dst: *const c_char,
    ctx: *mut c_void,
) -> c_int;

/// `copyfile(3)` / `fcopyfile(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePrimitive;

impl Primitive for NativePrimitive {
    fn alloc_state(&self) -> Option<Box<dyn PrimitiveState>> {
        // SAFETY: no preconditions; a null return signals allocation failure.
        let raw = unsafe { copyfile_state_alloc() };
        if raw.is_null() {
            return None;
        }
        Some(Box::new(NativeState { raw, context: None }))
    }

    fn name(&self) -> &'static str {
        "copyfile"
    }
}

/// What the trampoline sees through the context pointer.
struct TrampolineContext {
    callback: StatusCallback,
    /// Code of an error the callback declined to continue past.
    declined: Option<i32>,
    /// Panic raised by the callback, resumed once `copyfile` returns.
    panic: Option<Box<dyn Any + Send>>,
}

struct NativeState {
    /// Never null.
    raw: copyfile_state_t,
    context: Option<Box<TrampolineContext>>,
}

// SAFETY: the copyfile state is only ever used by the thread that owns this
// value; it has no thread affinity.
unsafe impl Send for NativeState {}

impl Drop for NativeState {
    fn drop(&mut self) {
        // SAFETY: `raw` came from copyfile_state_alloc and is freed once here.
        // The context box outlives this call because fields drop afterwards.
        unsafe {
            copyfile_state_free(self.raw);
        }
    }
}

impl NativeState {
    fn run(&mut self, call: impl FnOnce(copyfile_state_t) -> c_int) -> io::Result<()> {
        if let Some(context) = self.context.as_mut() {
            context.declined = None;
        }
        let status = call(self.raw);
        // errno must be read before anything else touches it.
        let last_error = io::Error::last_os_error();

        let (declined, panicked) = match self.context.as_mut() {
            Some(context) => (context.declined.take(), context.panic.take()),
            None => (None, None),
        };
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
        if status < 0 {
            return Err(declined.map_or(last_error, io::Error::from_raw_os_error));
        }
        Ok(())
    }
}

impl PrimitiveState for NativeState {
    fn set_status_callback(&mut self, callback: StatusCallback) {
        let mut context = Box::new(TrampolineContext {
            callback,
            declined: None,
            panic: None,
        });
        let ctx: *mut TrampolineContext = &mut *context;
        let trampoline: StatusFn = status_trampoline;
        // SAFETY: the state is live; the context box is kept alive by `self`
        // for as long as the state can call back.
        unsafe {
            copyfile_state_set(
                self.raw,
                COPYFILE_STATE_STATUS_CB as u32,
                trampoline as *const c_void,
            );
            copyfile_state_set(
                self.raw,
                COPYFILE_STATE_STATUS_CTX as u32,
                ctx.cast::<c_void>(),
            );
        }
        self.context = Some(context);
    }

    fn copy_path(&mut self, src: &Path, dst: &Path, flags: CopyFlags) -> io::Result<()> {
        let src = path_to_cstring(src)?;
        let dst = path_to_cstring(dst)?;
        // SAFETY: both strings are NUL-terminated and outlive the call.
        self.run(|state| unsafe { copyfile(src.as_ptr(), dst.as_ptr(), state, flags.bits()) })
    }

    fn copy_fd(
        &mut self,
        src: BorrowedFd<'_>,
        dst: BorrowedFd<'_>,
        flags: CopyFlags,
    ) -> io::Result<()> {
        // SAFETY: the descriptors are borrowed and open for the whole call.
        self.run(|state| unsafe {
            fcopyfile(src.as_raw_fd(), dst.as_raw_fd(), state, flags.bits())
        })
    }
}

fn path_to_cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn decode_what(what: c_int) -> Option<What> {
    match what {
        COPYFILE_RECURSE_ERROR => Some(What::RecurseError),
        COPYFILE_RECURSE_FILE => Some(What::RecurseFile),
        COPYFILE_RECURSE_DIR => Some(What::RecurseDir),
        COPYFILE_RECURSE_DIR_CLEANUP => Some(What::RecurseDirCleanup),
        COPYFILE_COPY_DATA => Some(What::CopyData),
        COPYFILE_COPY_XATTR => Some(What::CopyXattr),
        _ => None,
    }
}

fn decode_stage(stage: c_int) -> Option<Stage> {
    match stage {
        COPYFILE_START => Some(Stage::Start),
        COPYFILE_FINISH => Some(Stage::Finish),
        COPYFILE_ERR => Some(Stage::Error),
        COPYFILE_PROGRESS => Some(Stage::Progress),
        _ => None,
    }
}

/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
unsafe fn borrow_path<'a>(path: *const c_char) -> Option<&'a Path> {
    if path.is_null() {
        return None;
    }
    // SAFETY: guaranteed by the caller.
    let bytes = unsafe { CStr::from_ptr(path) }.to_bytes();
    Some(Path::new(std::ffi::OsStr::from_bytes(bytes)))
}

extern "C" fn status_trampoline(
    what: c_int,
    stage: c_int,
    state: copyfile_state_t,
    src: *const c_char,
    dst: *const c_char,
    ctx: *mut c_void,
) -> c_int {
    // Read errno first: any later call may clobber it.
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);

    if ctx.is_null() {
        return COPYFILE_CONTINUE;
    }
    // SAFETY: ctx is the TrampolineContext registered by set_status_callback,
    // alive for the duration of the copyfile call.
    let context = unsafe { &mut *ctx.cast::<TrampolineContext>() };
    if context.panic.is_some() {
        return COPYFILE_QUIT;
    }

    let (Some(what), Some(stage)) = (decode_what(what), decode_stage(stage)) else {
        return COPYFILE_CONTINUE;
    };

    let mut copied: libc::off_t = 0;
    if stage == Stage::Progress {
        // SAFETY: state is the live state copyfile passed in; COPIED writes an off_t.
        unsafe {
            copyfile_state_get(
                state,
                COPYFILE_STATE_COPIED as u32,
                (&mut copied as *mut libc::off_t).cast::<c_void>(),
            );
        }
    }

    // SAFETY: copyfile passes null or NUL-terminated paths.
    let (src, dst) = unsafe { (borrow_path(src), borrow_path(dst)) };
    let mut checkpoint =
        Checkpoint::new(what, stage, src, dst).with_copied(u64::try_from(copied).unwrap_or(0));
    let is_error = what == What::RecurseError || stage == Stage::Error;
    if is_error {
        checkpoint = checkpoint.with_errno(errno);
    }

    let callback = &mut context.callback;
    match panic::catch_unwind(AssertUnwindSafe(|| callback(&checkpoint))) {
        Ok(control) => {
            if control == Control::Skip && is_error {
                context.declined = Some(errno);
            }
            encode_control(control, is_error)
        }
        Err(payload) => {
            context.panic = Some(payload);
            COPYFILE_QUIT
        }
    }
}

/// The `COPYFILE_*` answer for `control`.
///
/// copyfile keeps walking after SKIP on an error; stopping needs QUIT, with
/// the declined code restored when the call returns.
fn encode_control(control: Control, is_error: bool) -> c_int {
    match control {
        Control::Continue => COPYFILE_CONTINUE,
        Control::Skip if is_error => COPYFILE_QUIT,
        Control::Skip => COPYFILE_SKIP,
        Control::Quit => COPYFILE_QUIT,
    }
}

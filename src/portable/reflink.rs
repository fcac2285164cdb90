//! Copy-on-write clones.
//!
//! Clones are attempted only on filesystems known to support them (Btrfs and
//! XFS on Linux, APFS on macOS). Anything else reports `ENOTSUP` without a
//! syscall, so callers can fall back to a byte copy.

use std::io;
use std::path::Path;

#[cfg(all(feature = "reflink", target_os = "linux"))]
mod platform {
    use std::collections::HashMap;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;
    use std::sync::Mutex;

    // From linux/magic.h. XFS needs reflink enabled at mkfs time; the clone
    // itself reports that.
    const BTRFS_SUPER_MAGIC: i64 = 0x9123683E;
    const XFS_SUPER_MAGIC: i64 = 0x58465342;

    // device id -> supports clones
    static REFLINK_CACHE: Mutex<Option<HashMap<u64, bool>>> = Mutex::new(None);

    pub(super) fn supports_reflink(dir: &Path) -> bool {
        let dev_id = match dir.metadata() {
            Ok(meta) => meta.dev(),
            Err(_) => return false,
        };

        {
            let cache = REFLINK_CACHE.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(&supported) = cache.as_ref().and_then(|map| map.get(&dev_id)) {
                return supported;
            }
        }

        let supported = filesystem_is_cow(dir);
        tracing::trace!(dev_id, supported, "probed filesystem for clone support");

        let mut cache = REFLINK_CACHE.lock().unwrap_or_else(|e| e.into_inner());
        cache.get_or_insert_with(HashMap::new).insert(dev_id, supported);
        supported
    }

    fn filesystem_is_cow(dir: &Path) -> bool {
        let Ok(path) = CString::new(dir.as_os_str().as_bytes()) else {
            return false;
        };
        // SAFETY: statfs is plain old data; an all-zero value is valid.
        let mut buf: libc::statfs = unsafe { std::mem::zeroed() };
        // SAFETY: path is NUL-terminated and buf is a valid out pointer.
        if unsafe { libc::statfs(path.as_ptr(), &mut buf) } != 0 {
            return false;
        }
        #[allow(clippy::unnecessary_cast)]
        let fs_type = buf.f_type as i64;
        fs_type == BTRFS_SUPER_MAGIC || fs_type == XFS_SUPER_MAGIC
    }
}

#[cfg(all(feature = "reflink", target_os = "macos"))]
mod platform {
    use std::path::Path;

    /// APFS is the default on supported macOS versions; the clone reports
    /// anything else.
    pub(super) fn supports_reflink(_dir: &Path) -> bool {
        true
    }
}

/// Directory whose filesystem will hold `dst`.
#[cfg(all(feature = "reflink", any(target_os = "linux", target_os = "macos")))]
fn parent_dir(dst: &Path) -> &Path {
    match dst.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Clone `src` to the new file `dst`.
#[cfg(all(feature = "reflink", any(target_os = "linux", target_os = "macos")))]
pub(super) fn clone_file(src: &Path, dst: &Path) -> io::Result<()> {
    if !platform::supports_reflink(parent_dir(dst)) {
        return Err(io::Error::from_raw_os_error(libc::ENOTSUP));
    }
    reflink_copy::reflink(src, dst)
}

/// Clones need the `reflink` feature on Linux or macOS.
#[cfg(not(all(feature = "reflink", any(target_os = "linux", target_os = "macos"))))]
pub(super) fn clone_file(_src: &Path, _dst: &Path) -> io::Result<()> {
    Err(io::Error::from_raw_os_error(libc::ENOTSUP))
}

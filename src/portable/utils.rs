//! Helpers for the portable primitive.
//!
//! Content copying (kernel-side where possible), sparse copying, directory
//! listing and cleanup of partially copied items.

use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Chunk size for data copies; progress is reported once per chunk.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Progress sink fed with the cumulative number of bytes copied.
pub(super) type Report<'a> = dyn FnMut(u64) -> io::Result<()> + 'a;

// =============================================================================
// Content copying
// =============================================================================

/// Copy the rest of `src` into `dst`, from their current offsets.
///
/// On Linux, uses `copy_file_range` so data stays in the kernel. Falls back
/// to read/write when the kernel refuses on the first chunk (cross-device,
/// unsupported filesystem).
pub(super) fn copy_contents(src: &File, dst: &File, report: &mut Report<'_>) -> io::Result<u64> {
    #[cfg(target_os = "linux")]
    {
        copy_file_range_all(src, dst, report)
    }
    #[cfg(not(target_os = "linux"))]
    {
        copy_read_write(src, dst, report)
    }
}

#[cfg(target_os = "linux")]
fn copy_file_range_all(src: &File, dst: &File, report: &mut Report<'_>) -> io::Result<u64> {
    use std::os::fd::AsRawFd;

    let mut copied: u64 = 0;
    loop {
        // SAFETY: both descriptors are open for the whole call; null offsets
        // mean the kernel uses and advances the file offsets.
        let result = unsafe {
            libc::copy_file_range(
                src.as_raw_fd(),
                std::ptr::null_mut(),
                dst.as_raw_fd(),
                std::ptr::null_mut(),
                CHUNK_SIZE,
                0,
            )
        };

        if result < 0 {
            let err = io::Error::last_os_error();
            if copied == 0
                && matches!(
                    err.raw_os_error(),
                    Some(libc::EXDEV)
                        | Some(libc::ENOSYS)
                        | Some(libc::EINVAL)
                        | Some(libc::EOPNOTSUPP)
                )
            {
                return copy_read_write(src, dst, report);
            }
            return Err(err);
        }
        if result == 0 {
            break;
        }

        copied += result as u64;
        report(copied)?;
    }
    Ok(copied)
}

fn copy_read_write(mut src: &File, mut dst: &File, report: &mut Report<'_>) -> io::Result<u64> {
    let mut copied: u64 = 0;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match src.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        dst.write_all(&buffer[..read])?;
        copied += read as u64;
        report(copied)?;
    }
    Ok(copied)
}

// =============================================================================
// Sparse copying
// =============================================================================

/// Outcome of a sparse copy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Sparse {
    /// Data regions were copied and holes preserved
    Copied,
    /// The source has no holes or the platform cannot find them
    Unsupported,
}

/// Copy only the data regions of `src`, leaving holes in `dst`.
///
/// Progress reports the offset reached, so it ends at the file size.
#[cfg(target_os = "linux")]
pub(super) fn copy_sparse(src: &File, dst: &File, report: &mut Report<'_>) -> io::Result<Sparse> {
    use std::os::fd::AsRawFd;

    let meta = src.metadata()?;
    let len = meta.len();
    if len == 0 {
        return Ok(Sparse::Copied);
    }
    // Allocated blocks cover the whole size: nothing to skip.
    if meta.blocks().saturating_mul(512) >= len {
        return Ok(Sparse::Unsupported);
    }

    let fd = src.as_raw_fd();
    let end = i64::try_from(len).map_err(|_| io::Error::from_raw_os_error(libc::EFBIG))?;
    let mut offset: i64 = 0;
    let mut reported: u64 = 0;

    while offset < end {
        // SAFETY: fd is open for the duration of the call.
        let data = unsafe { libc::lseek(fd, offset, libc::SEEK_DATA) };
        if data < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                // Only a hole remains.
                Some(libc::ENXIO) => break,
                Some(libc::EINVAL) if offset == 0 => return Ok(Sparse::Unsupported),
                _ => return Err(err),
            }
        }
        // SAFETY: as above.
        let hole = unsafe { libc::lseek(fd, data, libc::SEEK_HOLE) };
        if hole < 0 {
            return Err(io::Error::last_os_error());
        }
        let hole = hole.min(end);

        copy_region(src, dst, data as u64, hole as u64, report)?;
        reported = hole as u64;
        offset = hole;
    }

    dst.set_len(len)?;
    if reported < len {
        report(len)?;
    }
    Ok(Sparse::Copied)
}

#[cfg(not(target_os = "linux"))]
pub(super) fn copy_sparse(
    _src: &File,
    _dst: &File,
    _report: &mut Report<'_>,
) -> io::Result<Sparse> {
    Ok(Sparse::Unsupported)
}

#[cfg(target_os = "linux")]
fn copy_region(
    src: &File,
    dst: &File,
    start: u64,
    end: u64,
    report: &mut Report<'_>,
) -> io::Result<()> {
    use std::os::unix::fs::FileExt;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut position = start;
    while position < end {
        let want = usize::try_from(end - position).map_or(CHUNK_SIZE, |left| left.min(CHUNK_SIZE));
        let read = src.read_at(&mut buffer[..want], position)?;
        if read == 0 {
            break;
        }
        dst.write_all_at(&buffer[..read], position)?;
        position += read as u64;
        report(position)?;
    }
    Ok(())
}

// =============================================================================
// Directory utilities
// =============================================================================

/// Identity of a file or directory: (device, inode).
pub(super) fn file_key(meta: &Metadata) -> (u64, u64) {
    (meta.dev(), meta.ino())
}

/// `EINVAL` when `src` and `dst` are the same file; copying would truncate
/// the source.
pub(super) fn refuse_same_file(src: &Metadata, dst: &Metadata) -> io::Result<()> {
    if file_key(src) == file_key(dst) {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    }
    Ok(())
}

/// List a directory in name order.
pub(super) fn read_dir_sorted(path: &Path) -> io::Result<Vec<fs::DirEntry>> {
    let mut entries = fs::read_dir(path)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    Ok(entries)
}

/// Remove a destination item left behind by a failed copy.
pub(super) fn remove_partial(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

// =============================================================================
// Tests
// =============================================================================

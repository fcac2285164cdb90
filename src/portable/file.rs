//! Copying a single non-directory item.

use super::meta::{self, Node};
use super::utils::{self, Sparse, refuse_same_file};
use super::{Copier, Failure, Phase, cancelled, reflink};
use crate::options::CopyFlags;
use crate::primitive::{Checkpoint, Control, Stage, What};
use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt, symlink};
use std::path::Path;

fn os_error(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

impl Copier<'_> {
    /// Copy a regular file or symlink. Other file types are not supported.
    pub(super) fn copy_item(&mut self, src: &Path, dst: &Path, meta: &Metadata) -> Result<(), Failure> {
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            return self.copy_symlink(src, dst, meta);
        }
        if !file_type.is_file() {
            return Err(Failure::new(Phase::Item, os_error(libc::ENOTSUP)));
        }
        self.copy_regular(src, dst, meta)
    }

    /// Copy between two open descriptors.
    pub(super) fn copy_fd(&mut self, src: BorrowedFd<'_>, dst: BorrowedFd<'_>) -> io::Result<()> {
        let src_file = File::from(src.try_clone_to_owned()?);
        let dst_file = File::from(dst.try_clone_to_owned()?);

        match self.copy_open_file(&src_file, &dst_file) {
            Ok(()) => Ok(()),
            Err(failure) => self.fail_item(None, None, failure),
        }
    }

    fn copy_open_file(&mut self, src_file: &File, dst_file: &File) -> Result<(), Failure> {
        let meta = src_file.metadata()?;
        refuse_same_file(&meta, &dst_file.metadata()?)?;
        if meta.is_dir() {
            return Err(Failure::new(Phase::Item, os_error(libc::EISDIR)));
        }
        // Descriptors have no clone path.
        if self.flags.contains(CopyFlags::CLONE_REQUIRED) {
            return Err(Failure::new(Phase::Data, os_error(libc::ENOTSUP)));
        }

        self.copy_data(None, None, src_file, dst_file)
            .map_err(|error| Failure::new(Phase::Data, error))?;
        meta::copy_metadata(&Node::File(src_file), &Node::File(dst_file), &meta, self.flags)
    }

    /// Clear the way for `dst`. Returns whether something is still there.
    ///
    /// `src_meta` describes the item being copied; a destination that is the
    /// same file is refused before anything is removed or truncated.
    fn prepare_destination(&self, dst: &Path, src_meta: &Metadata) -> io::Result<bool> {
        let existing = match fs::symlink_metadata(dst) {
            Ok(meta) => meta,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(error) => return Err(error),
        };

        if self.flags.contains(CopyFlags::EXCL) {
            return Err(os_error(libc::EEXIST));
        }
        refuse_same_file(src_meta, &existing)?;
        if existing.file_type().is_symlink() && !self.flags.contains(CopyFlags::NOFOLLOW_DST) {
            // The link's target is what gets opened for writing.
            if let Ok(target) = fs::metadata(dst) {
                refuse_same_file(src_meta, &target)?;
            }
        }
        if existing.is_dir() {
            return Err(os_error(libc::EISDIR));
        }
        if self.flags.contains(CopyFlags::UNLINK) {
            fs::remove_file(dst)?;
            return Ok(false);
        }
        if existing.file_type().is_symlink() && self.flags.contains(CopyFlags::NOFOLLOW_DST) {
            return Err(os_error(libc::ELOOP));
        }
        Ok(true)
    }

    fn copy_symlink(&mut self, src: &Path, dst: &Path, meta: &Metadata) -> Result<(), Failure> {
        let target = fs::read_link(src)?;
        if self.prepare_destination(dst, meta)? {
            fs::remove_file(dst)?;
        }
        symlink(&target, dst)?;

        meta::copy_metadata(&Node::path(src, false), &Node::path(dst, false), meta, self.flags)
            .map_err(|failure| failure.created(true))?;
        self.remove_source(src);
        Ok(())
    }

    fn copy_regular(&mut self, src: &Path, dst: &Path, meta: &Metadata) -> Result<(), Failure> {
        let existed = self.prepare_destination(dst, meta)?;

        if self.flags.wants_clone() && self.try_clone(src, dst, existed)? {
            meta::copy_metadata(&Node::path(src, true), &Node::path(dst, true), meta, self.flags)
                .map_err(|failure| failure.created(true))?;
            self.remove_source(src);
            return Ok(());
        }

        let src_file = File::open(src)?;
        let mode = meta.permissions().mode() & 0o777;
        let mut options = OpenOptions::new();
        options
            .write(true)
            .create(true)
            .truncate(self.flags.copies_data())
            .mode(mode);
        if self.flags.contains(CopyFlags::NOFOLLOW_DST) {
            options.custom_flags(libc::O_NOFOLLOW);
        }
        let dst_file = options.open(dst)?;
        let created = !existed;

        self.copy_data(Some(src), Some(dst), &src_file, &dst_file)
            .map_err(|error| Failure::new(Phase::Data, error).created(created))?;
        meta::copy_metadata(&Node::File(&src_file), &Node::File(&dst_file), meta, self.flags)
            .map_err(|failure| failure.created(created))?;

        drop(dst_file);
        self.remove_source(src);
        Ok(())
    }

    /// Try the copy-on-write fast path. `Ok(false)` means copy the bytes.
    fn try_clone(&mut self, src: &Path, dst: &Path, existed: bool) -> Result<bool, Failure> {
        let required = self.flags.contains(CopyFlags::CLONE_REQUIRED);
        if existed {
            if required {
                return Err(Failure::new(Phase::Item, os_error(libc::EEXIST)));
            }
            return Ok(false);
        }

        match reflink::clone_file(src, dst) {
            Ok(()) => {
                tracing::trace!(src = %src.display(), "cloned");
                Ok(true)
            }
            Err(error) => {
                if fs::symlink_metadata(dst).is_ok() {
                    let _ = fs::remove_file(dst);
                }
                if required {
                    return Err(Failure::new(Phase::Data, error));
                }
                tracing::debug!(
                    src = %src.display(),
                    error = %error,
                    "clone unavailable, copying data"
                );
                Ok(false)
            }
        }
    }

    /// Copy file content, reporting cumulative progress.
    fn copy_data(
        &mut self,
        src: Option<&Path>,
        dst: Option<&Path>,
        src_file: &File,
        dst_file: &File,
    ) -> io::Result<()> {
        let flags = self.flags;
        let emitter = &mut self.emitter;
        let mut report = |copied: u64| -> io::Result<()> {
            let checkpoint =
                Checkpoint::new(What::CopyData, Stage::Progress, src, dst).with_copied(copied);
            match emitter.emit(checkpoint) {
                Control::Quit => Err(cancelled()),
                _ => Ok(()),
            }
        };

        if flags.contains(CopyFlags::DATA_SPARSE) {
            match utils::copy_sparse(src_file, dst_file, &mut report)? {
                Sparse::Copied => return Ok(()),
                Sparse::Unsupported if flags.contains(CopyFlags::DATA) => {}
                Sparse::Unsupported => return Err(os_error(libc::ENOTSUP)),
            }
        }
        if flags.contains(CopyFlags::DATA) {
            utils::copy_contents(src_file, dst_file, &mut report)?;
        }
        Ok(())
    }

    fn remove_source(&self, src: &Path) {
        if self.flags.contains(CopyFlags::MOVE) {
            let _ = fs::remove_file(src);
        }
    }
}

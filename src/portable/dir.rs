//! Path copies and the recursive walk.

use super::meta::{self, Node};
use super::utils::{file_key, read_dir_sorted, refuse_same_file};
use super::{Copier, Failure, Phase, cancelled};
use crate::options::CopyFlags;
use crate::primitive::{Control, Stage, What};
use std::fs::{self, DirBuilder, Metadata};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

impl Copier<'_> {
    /// Entry point for `copy_path`.
    pub(super) fn copy_path(&mut self, src: &Path, dst: &Path) -> io::Result<()> {
        let root_meta = if self.flags.contains(CopyFlags::NOFOLLOW_SRC) {
            fs::symlink_metadata(src)
        } else {
            fs::metadata(src)
        };
        let root_meta = match root_meta {
            Ok(meta) => meta,
            Err(error) => {
                return self.fail_item(Some(src), Some(dst), Failure::new(Phase::Item, error));
            }
        };

        if root_meta.is_dir() && self.flags.contains(CopyFlags::CLONE_REQUIRED) {
            return Err(io::Error::from_raw_os_error(libc::EISDIR));
        }

        tracing::trace!(
            src = %src.display(),
            dst = %dst.display(),
            recursive = self.recursive(),
            "portable copy"
        );

        match (self.recursive(), root_meta.is_dir()) {
            (true, true) => self.copy_tree(src, dst, &root_meta),
            (true, false) => self.visit_file(src, dst, &root_meta),
            (false, true) => self.copy_lone_dir(src, dst, &root_meta),
            (false, false) => match self.copy_item(src, dst, &root_meta) {
                Ok(()) => Ok(()),
                Err(failure) => self.fail_item(Some(src), Some(dst), failure),
            },
        }
    }

    /// Copy one directory and everything below it.
    fn copy_tree(&mut self, src: &Path, dst: &Path, meta: &Metadata) -> io::Result<()> {
        if self.emitter.step(What::RecurseDir, Stage::Start, src, dst)? == Control::Skip {
            tracing::trace!(src = %src.display(), "directory skipped");
            return Ok(());
        }

        // Read before creating anything so an unreadable directory leaves
        // nothing behind.
        let entries = match read_dir_sorted(src) {
            Ok(entries) => entries,
            Err(error) => return self.fail_item(Some(src), Some(dst), error.into()),
        };
        if let Err(error) = self.make_dir(dst, meta) {
            return self.fail_item(Some(src), Some(dst), error.into());
        }

        for entry in entries {
            let child_src = entry.path();
            let child_dst = dst.join(entry.file_name());
            let child_meta = match fs::symlink_metadata(&child_src) {
                Ok(meta) => meta,
                Err(error) => {
                    self.fail_item(Some(&child_src), Some(&child_dst), error.into())?;
                    continue;
                }
            };

            if child_meta.is_dir() {
                if self.output_dirs.contains(&file_key(&child_meta)) {
                    tracing::debug!(
                        path = %child_src.display(),
                        "not descending into the copy's own destination"
                    );
                    continue;
                }
                self.copy_tree(&child_src, &child_dst, &child_meta)?;
            } else {
                self.visit_file(&child_src, &child_dst, &child_meta)?;
            }
        }

        if let Err(failure) = self.finish_dir(src, dst, meta) {
            self.fail_item(Some(src), Some(dst), failure)?;
        }
        self.emitter
            .step(What::RecurseDirCleanup, Stage::Finish, src, dst)?;

        if self.flags.contains(CopyFlags::MOVE) {
            let _ = fs::remove_dir(src);
        }
        Ok(())
    }

    /// Copy one non-directory entry of a recursive copy.
    fn visit_file(&mut self, src: &Path, dst: &Path, meta: &Metadata) -> io::Result<()> {
        if self.emitter.step(What::RecurseFile, Stage::Start, src, dst)? == Control::Skip {
            tracing::trace!(src = %src.display(), "file skipped");
            return Ok(());
        }

        if let Err(failure) = self.copy_item(src, dst, meta) {
            if self.emitter.quit {
                return Err(cancelled());
            }
            return self.fail_item(Some(src), Some(dst), failure);
        }

        self.emitter.step(What::RecurseFile, Stage::Finish, src, dst)?;
        Ok(())
    }

    /// A directory copied without `RECURSIVE`: the directory itself and its
    /// metadata, none of its children.
    fn copy_lone_dir(&mut self, src: &Path, dst: &Path, meta: &Metadata) -> io::Result<()> {
        if let Err(error) = self.make_dir(dst, meta) {
            return self.fail_item(Some(src), Some(dst), error.into());
        }
        if let Err(failure) = self.finish_dir(src, dst, meta) {
            return self.fail_item(Some(src), Some(dst), failure);
        }
        if self.flags.contains(CopyFlags::MOVE) {
            let _ = fs::remove_dir(src);
        }
        Ok(())
    }

    /// Create (or reuse) the destination directory.
    ///
    /// New directories are owner-writable until [`Copier::finish_dir`] sets
    /// their final mode.
    fn make_dir(&mut self, dst: &Path, src_meta: &Metadata) -> io::Result<()> {
        let existing = if self.flags.contains(CopyFlags::NOFOLLOW_DST) {
            fs::symlink_metadata(dst)
        } else {
            fs::metadata(dst)
        };

        match existing {
            Ok(meta) if meta.is_dir() => {
                if self.flags.contains(CopyFlags::EXCL) {
                    return Err(io::Error::from_raw_os_error(libc::EEXIST));
                }
                refuse_same_file(src_meta, &meta)?;
                self.output_dirs.insert(file_key(&meta));
                return Ok(());
            }
            Ok(_) => {
                if !self.flags.contains(CopyFlags::UNLINK) {
                    return Err(io::Error::from_raw_os_error(libc::EEXIST));
                }
                fs::remove_file(dst)?;
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                // A dangling destination symlink still occupies the name.
                if fs::symlink_metadata(dst).is_ok() {
                    return Err(io::Error::from_raw_os_error(libc::EEXIST));
                }
            }
            Err(error) => return Err(error),
        }

        let mode = src_meta.permissions().mode() & 0o7777;
        DirBuilder::new().mode(mode | 0o700).create(dst)?;
        let created = fs::symlink_metadata(dst)?;
        self.output_dirs.insert(file_key(&created));
        Ok(())
    }

    /// Apply directory metadata once its children are in place.
    fn finish_dir(&mut self, src: &Path, dst: &Path, src_meta: &Metadata) -> Result<(), Failure> {
        let src_node = Node::path(src, true);
        let dst_node = Node::path(dst, true);
        meta::copy_metadata(&src_node, &dst_node, src_meta, self.flags)?;

        if !self.flags.contains(CopyFlags::STAT) {
            // Drop the temporary owner-write bit unless the source had it.
            let mode = src_meta.permissions().mode() & 0o7777;
            if mode & 0o700 != 0o700 {
                fs::set_permissions(dst, fs::Permissions::from_mode(mode))
                    .map_err(|error| Failure::new(Phase::Item, error))?;
            }
        }
        Ok(())
    }
}

//! Metadata copy: extended attributes, ACLs and POSIX stat info.

use super::{Failure, Phase};
use crate::options::CopyFlags;
use filetime::FileTime;
use std::ffi::OsStr;
use std::fs::{self, File, Metadata};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use xattr::FileExt;

/// POSIX ACLs as stored by Linux filesystems.
const ACL_ATTRIBUTES: [&str; 2] = ["system.posix_acl_access", "system.posix_acl_default"];

/// Something metadata can be read from or written to.
pub(super) enum Node<'a> {
    /// A path; `follow` decides whether a final symlink is resolved.
    Path { path: &'a Path, follow: bool },
    /// An open file.
    File(&'a File),
}

impl<'a> Node<'a> {
    pub(super) fn path(path: &'a Path, follow: bool) -> Self {
        Self::Path { path, follow }
    }

    fn list(&self) -> io::Result<Vec<std::ffi::OsString>> {
        let names = match self {
            Self::Path { path, follow: true } => xattr::list_deref(path)?,
            Self::Path { path, follow: false } => xattr::list(path)?,
            Self::File(file) => file.list_xattr()?,
        };
        Ok(names.collect())
    }

    fn get(&self, name: &OsStr) -> io::Result<Option<Vec<u8>>> {
        match self {
            Self::Path { path, follow: true } => xattr::get_deref(path, name),
            Self::Path { path, follow: false } => xattr::get(path, name),
            Self::File(file) => file.get_xattr(name),
        }
    }

    fn set(&self, name: &OsStr, value: &[u8]) -> io::Result<()> {
        match self {
            Self::Path { path, follow: true } => xattr::set_deref(path, name, value),
            Self::Path { path, follow: false } => xattr::set(path, name, value),
            Self::File(file) => file.set_xattr(name, value),
        }
    }
}

fn is_unsupported(error: &io::Error) -> bool {
    let code = error.raw_os_error();
    code == Some(libc::ENOTSUP) || code == Some(libc::EOPNOTSUPP)
}

/// Whether a failure to set `name` on the destination can be ignored.
///
/// Filesystems without xattr support never fail a copy, and neither do
/// attributes outside the `user.` namespace that an unprivileged caller
/// may not write.
fn is_tolerated(name: &OsStr, error: &io::Error) -> bool {
    if is_unsupported(error) {
        return true;
    }
    let denied = matches!(
        error.raw_os_error(),
        Some(libc::EPERM) | Some(libc::EACCES)
    );
    denied && !name.to_string_lossy().starts_with("user.")
}

/// Copy what `flags` selects from `src` to `dst`: attributes first, then
/// ownership, mode and times.
pub(super) fn copy_metadata(
    src: &Node<'_>,
    dst: &Node<'_>,
    src_meta: &Metadata,
    flags: CopyFlags,
) -> Result<(), Failure> {
    if flags.intersects(CopyFlags::XATTR | CopyFlags::ACL) {
        copy_xattrs(src, dst, flags).map_err(|error| Failure::new(Phase::Xattr, error))?;
    }
    if flags.contains(CopyFlags::STAT) {
        copy_stat(dst, src_meta).map_err(|error| Failure::new(Phase::Item, error))?;
    }
    Ok(())
}

fn copy_xattrs(src: &Node<'_>, dst: &Node<'_>, flags: CopyFlags) -> io::Result<()> {
    let names = match src.list() {
        Ok(names) => names,
        Err(error) if is_unsupported(&error) => return Ok(()),
        Err(error) => return Err(error),
    };

    for name in names {
        let is_acl = ACL_ATTRIBUTES
            .iter()
            .any(|acl| name.as_os_str() == OsStr::new(acl));
        let wanted = if is_acl {
            flags.contains(CopyFlags::ACL)
        } else {
            flags.contains(CopyFlags::XATTR)
        };
        if !wanted {
            continue;
        }

        let Some(value) = src.get(&name)? else {
            continue;
        };
        if let Err(error) = dst.set(&name, &value) {
            if !is_tolerated(&name, &error) {
                return Err(error);
            }
            tracing::warn!(
                name = %name.to_string_lossy(),
                error = %error,
                "extended attribute not copied"
            );
        }
    }
    Ok(())
}

/// Owner (best effort), mode and access/modification times.
fn copy_stat(dst: &Node<'_>, src_meta: &Metadata) -> io::Result<()> {
    use std::os::unix::fs::{chown, fchown, lchown};

    let (uid, gid) = (Some(src_meta.uid()), Some(src_meta.gid()));
    let owner = match dst {
        Node::Path { path, follow: true } => chown(path, uid, gid),
        Node::Path { path, follow: false } => lchown(path, uid, gid),
        Node::File(file) => fchown(file, uid, gid),
    };
    if let Err(error) = owner {
        tracing::trace!(error = %error, "ownership not copied");
    }

    let permissions = fs::Permissions::from_mode(src_meta.mode() & 0o7777);
    let atime = FileTime::from_last_access_time(src_meta);
    let mtime = FileTime::from_last_modification_time(src_meta);
    match dst {
        Node::Path { path, follow: true } => {
            fs::set_permissions(path, permissions)?;
            filetime::set_file_times(path, atime, mtime)
        }
        // Symlink modes are not meaningful.
        Node::Path { path, follow: false } => filetime::set_symlink_file_times(path, atime, mtime),
        Node::File(file) => {
            file.set_permissions(permissions)?;
            filetime::set_file_handle_times(file, Some(atime), Some(mtime))
        }
    }
}

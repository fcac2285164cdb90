//! Flags describing what a copy session copies and how.
//!
//! [`CopyFlags`] is a plain bit set. The primitive flags each toggle one
//! independent behaviour; the composite names ([`CopyFlags::METADATA`],
//! [`CopyFlags::ALL`], [`CopyFlags::CLONE`], ...) are unions of primitive
//! flags and carry no bits of their own.
//!
//! Bit values match `copyfile.h`, so the native macOS primitive hands them
//! to `copyfile(3)` unchanged.
//!
//! # Example
//!
//! ```
//! use copysess::CopyFlags;
//!
//! let flags = CopyFlags::DATA | CopyFlags::STAT | CopyFlags::RECURSIVE;
//! assert!(flags.contains(CopyFlags::DATA));
//! assert!(!flags.contains(CopyFlags::METADATA));
//!
//! // Composite names are shorthands for their parts.
//! assert_eq!(CopyFlags::SECURITY, CopyFlags::STAT | CopyFlags::ACL);
//! ```

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// What to copy and how.
    ///
    /// # Default
    ///
    /// [`CopyFlags::default()`] is `ALL | RECURSIVE`: a full recursive copy
    /// of data and metadata.
    ///
    /// # Parsing
    ///
    /// Flags can be parsed from their text form:
    ///
    /// ```
    /// use copysess::CopyFlags;
    ///
    /// let flags = CopyFlags::parse("DATA | STAT").unwrap();
    /// assert_eq!(flags, CopyFlags::DATA | CopyFlags::STAT);
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(transparent))]
    pub struct CopyFlags: u32 {
        /// Copy the source's access control lists.
        const ACL = 1 << 0;

        /// Copy the source's POSIX information: mode, ownership (best
        /// effort) and access/modification times.
        const STAT = 1 << 1;

        /// Copy the source's extended attributes. ACLs stored as extended
        /// attributes are governed by [`CopyFlags::ACL`] instead.
        const XATTR = 1 << 2;

        /// Copy the source file's data.
        const DATA = 1 << 3;

        /// Recursively copy a hierarchy. Ignored by descriptor copies.
        const RECURSIVE = 1 << 15;

        /// Fail if the destination item already exists.
        const EXCL = 1 << 17;

        /// Do not follow the source if it is a symbolic link; the link
        /// itself is copied.
        const NOFOLLOW_SRC = 1 << 18;

        /// Do not follow the destination if it is a symbolic link.
        const NOFOLLOW_DST = 1 << 19;

        /// Remove the source after it has been copied. Removal errors are
        /// ignored; a symbolic link is removed, not its target.
        const MOVE = 1 << 20;

        /// Unlink the destination before starting.
        const UNLINK = 1 << 21;

        /// Try a copy-on-write clone before copying bytes. When the clone
        /// succeeds no progress checkpoints are emitted for that file.
        const CLONE_ATTEMPT = 1 << 24;

        /// Treat a failed clone as an error instead of falling back to a
        /// byte copy. Directories cannot be cloned.
        const CLONE_REQUIRED = 1 << 25;

        /// Copy sparsely, preserving holes. Together with
        /// [`CopyFlags::DATA`] this falls back to a full copy when sparse
        /// copying is impossible; alone, that is an error.
        const DATA_SPARSE = 1 << 27;

        /// `STAT | ACL`
        const SECURITY = Self::STAT.bits() | Self::ACL.bits();

        /// `SECURITY | XATTR`
        const METADATA = Self::SECURITY.bits() | Self::XATTR.bits();

        /// `METADATA | DATA`
        const ALL = Self::METADATA.bits() | Self::DATA.bits();

        /// `NOFOLLOW_SRC | NOFOLLOW_DST`
        const NOFOLLOW = Self::NOFOLLOW_SRC.bits() | Self::NOFOLLOW_DST.bits();

        /// Best-effort clone: `EXCL | ACL | STAT | XATTR | DATA |
        /// NOFOLLOW_SRC | CLONE_ATTEMPT`. Falls back to copying when the
        /// clone fails; directories are copied (recursively with
        /// [`CopyFlags::RECURSIVE`]).
        const CLONE = Self::EXCL.bits()
            | Self::ACL.bits()
            | Self::STAT.bits()
            | Self::XATTR.bits()
            | Self::DATA.bits()
            | Self::NOFOLLOW_SRC.bits()
            | Self::CLONE_ATTEMPT.bits();

        /// Forced clone: `CLONE | CLONE_REQUIRED`. Fails when the clone
        /// fails or the source is a directory.
        const CLONE_FORCE = Self::CLONE.bits() | Self::CLONE_REQUIRED.bits();
    }
}

impl Default for CopyFlags {
    fn default() -> Self {
        Self::ALL | Self::RECURSIVE
    }
}

impl CopyFlags {
    /// Parse flags from their text form, e.g. `"ALL | RECURSIVE"`.
    pub fn parse(text: &str) -> Result<Self, bitflags::parser::ParseError> {
        bitflags::parser::from_str(text)
    }

    /// Whether any metadata component (stat, ACL, xattr) is requested.
    #[must_use]
    pub fn copies_metadata(self) -> bool {
        self.intersects(Self::METADATA)
    }

    /// Whether the clone fast path should be tried.
    #[must_use]
    pub fn wants_clone(self) -> bool {
        self.intersects(Self::CLONE_ATTEMPT | Self::CLONE_REQUIRED)
    }

    /// Whether file content is copied at all (fully or sparsely).
    #[must_use]
    pub fn copies_data(self) -> bool {
        self.intersects(Self::DATA | Self::DATA_SPARSE)
    }
}

/// The text form accepted by [`CopyFlags::parse`].
impl fmt::Display for CopyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

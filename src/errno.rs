//! Error currency for the dispatcher.
//!
//! `VError` is the single type every handler returns through `?`. It wraps
//! the host `errno` space (via `nix::errno::Errno`) plus two values that are
//! not really errors but distinguished VFS statuses: "just-return" (spec
//! §4.5 step 6) and a marker recording that a ticket's reply was killed
//! before the caller observed an errno at all.

use std::fmt;

use nix::errno::Errno;

/// Sentinel used by BSD-derived kernels for "lookup succeeded in the sense
/// that the parent is usable, but the name itself does not exist" at the
/// last component of a CREATE/RENAME lookup. Not a real errno; never
/// returned to userspace, only consumed by the VFS's own lookup retry.
pub const EJUSTRETURN: i32 = -2;

/// Error/status currency threaded through dispatcher handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VError {
    /// A concrete host errno.
    Errno(Errno),
    /// Spec §4.5 step 6: name absent at last component under a
    /// create/rename intent; the parent vnode is otherwise usable.
    JustReturn,
}

impl VError {
    /// Shorthand constructors for the errno kinds spec §7 names explicitly.
    pub const EIO: VError = VError::Errno(Errno::EIO);
    pub const EACCES: VError = VError::Errno(Errno::EACCES);
    pub const EPERM: VError = VError::Errno(Errno::EPERM);
    pub const ENOENT: VError = VError::Errno(Errno::ENOENT);
    pub const EISDIR: VError = VError::Errno(Errno::EISDIR);
    pub const ENOTDIR: VError = VError::Errno(Errno::ENOTDIR);
    pub const EEXIST: VError = VError::Errno(Errno::EEXIST);
    pub const EXDEV: VError = VError::Errno(Errno::EXDEV);
    pub const EMLINK: VError = VError::Errno(Errno::EMLINK);
    pub const EFBIG: VError = VError::Errno(Errno::EFBIG);
    pub const ENAMETOOLONG: VError = VError::Errno(Errno::ENAMETOOLONG);
    pub const ERANGE: VError = VError::Errno(Errno::ERANGE);
    pub const E2BIG: VError = VError::Errno(Errno::E2BIG);
    pub const EROFS: VError = VError::Errno(Errno::EROFS);
    pub const EINVAL: VError = VError::Errno(Errno::EINVAL);
    pub const EAGAIN: VError = VError::Errno(Errno::EAGAIN);
    pub const EINTR: VError = VError::Errno(Errno::EINTR);
    pub const ENOTSUP: VError = VError::Errno(Errno::EOPNOTSUPP);
    pub const ENXIO: VError = VError::Errno(Errno::ENXIO);
    pub const ENOTCONN: VError = VError::Errno(Errno::ENOTCONN);
    pub const EBADF: VError = VError::Errno(Errno::EBADF);

    /// True if the daemon told us the op is not implemented. Only
    /// `capability.rs` is allowed to act on this; handlers must not match
    /// on `ENOSYS` directly (spec §7 propagation policy).
    pub(crate) fn is_enosys(self) -> bool {
        matches!(self, VError::Errno(Errno::ENOSYS))
    }
}

impl From<Errno> for VError {
    fn from(e: Errno) -> Self {
        // ENOSYS must never escape this boundary into handler logic that
        // isn't the capability table (spec §7): callers that receive a raw
        // transport errno route it through `Capability::note_reply` first.
        VError::Errno(e)
    }
}

impl fmt::Display for VError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VError::Errno(e) => write!(f, "{e}"),
            VError::JustReturn => write!(f, "just-return"),
        }
    }
}

impl std::error::Error for VError {}

/// Converts to the raw errno a VFS op descriptor returns. `ENOSYS` never
/// appears here: it is downgraded to `ENOTSUP` by the capability table
/// before a handler ever builds a `VError` from it.
impl From<VError> for i32 {
    fn from(e: VError) -> i32 {
        match e {
            VError::Errno(errno) if errno.is_enosys() => Errno::EOPNOTSUPP as i32,
            VError::Errno(errno) => errno as i32,
            VError::JustReturn => EJUSTRETURN,
        }
    }
}

trait ErrnoExt {
    fn is_enosys(self) -> bool;
}

impl ErrnoExt for Errno {
    fn is_enosys(self) -> bool {
        self == Errno::ENOSYS
    }
}

/// Result currency for every dispatcher handler.
pub type VResult<T> = Result<T, VError>;

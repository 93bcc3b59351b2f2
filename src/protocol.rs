//! Reply shapes the dispatcher expects back from the daemon, keyed by
//! opcode. Byte-level wire encoding is the transport's concern (spec §1
//! Non-goals, §6 "Downward"); this crate only needs to agree with the
//! transport on what a decoded reply looks like.

use std::time::Duration;

use crate::node::{Attr, NodeId, VnodeType};

/// Decoded reply body for any RPC. One variant per reply *shape*, not per
/// opcode — several opcodes (e.g. LOOKUP and CREATE) share `Entry`.
#[derive(Debug, Clone)]
pub enum Reply {
    /// LOOKUP, CREATE, MKNOD, MKDIR, SYMLINK, LINK: a child node plus its
    /// attributes and the two cache TTLs (spec §4.5, §4.3). `handle` is
    /// set only for a single-round-trip CREATE, which bundles the open
    /// handle the impending OPEN would otherwise have to fetch on its own.
    Entry {
        node: NodeId,
        attr: Attr,
        attr_valid: Duration,
        entry_valid: Duration,
        handle: Option<OpenHandle>,
    },
    /// A LOOKUP that resolved to "does not exist" (node identifier zero,
    /// spec §4.5 step 5).
    NegativeEntry { entry_valid: Duration },
    /// GETATTR, SETATTR and any other op whose reply only carries a fresh
    /// stat (spec §4.3 "on any reply that carries attributes").
    Attr { attr: Attr, valid: Duration },
    /// OPEN/OPENDIR/CREATE's handle half.
    Open { handle: u64, flags: u32 },
    /// WRITE: bytes actually written.
    Write { size: u32 },
    /// READ/READLINK: bytes returned.
    Data { bytes: Vec<u8> },
    /// GETXATTR/LISTXATTR: either just a size (probe) or size plus data.
    Xattr { size: u32, data: Option<Vec<u8>> },
    /// INIT handshake result.
    Init {
        block_size: u32,
        io_size: u32,
        max_write: u32,
    },
    /// A directory listing page.
    Readdir {
        entries: Vec<DirEntry>,
        eof: bool,
    },
    /// No body, just success (FORGET has no reply at all but RELEASE,
    /// RMDIR, UNLINK, RENAME, FSYNC, FLUSH, LINK-less ops do).
    Empty,
    /// statfs-style reply, for the pathconf/statvfs surface.
    Statfs(StatfsAnswer),
}

/// The handle half of a single-round-trip CREATE's bundled reply.
#[derive(Debug, Clone, Copy)]
pub struct OpenHandle {
    pub daemon_handle: u64,
    pub open_flags: u32,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub node: NodeId,
    pub name: std::ffi::OsString,
    pub kind: VnodeType,
    pub offset: i64,
}

/// statvfs-shaped answer (SPEC_FULL §4.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatfsAnswer {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub frsize: u32,
    pub namelen: u32,
}

/// Fixed pathconf constants (spec §6 "Pathconf constants").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathconfAnswer {
    pub link_max: u32,
    pub name_max: u32,
    pub path_max: u32,
    pub chown_restricted: bool,
    pub no_trunc: bool,
    pub name_chars_max: u32,
    pub case_sensitive: bool,
    pub case_preserving: bool,
}

impl PathconfAnswer {
    /// Values named explicitly by spec §6, parameterized only by the
    /// protocol's own name-length maximum (a mount-time negotiated value).
    pub fn for_protocol_name_max(protocol_name_max: u32) -> Self {
        PathconfAnswer {
            link_max: protocol_name_max,
            name_max: protocol_name_max,
            path_max: libc::PATH_MAX as u32,
            chown_restricted: true,
            no_trunc: false,
            name_chars_max: 255,
            case_sensitive: true,
            case_preserving: true,
        }
    }
}

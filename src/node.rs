//! Per-inode protocol state (spec §3 "Node").

use std::time::SystemTime;

use bitflags::bitflags;

use crate::attr_cache;
use crate::handle_table::HandleTable;
use crate::hostvfs::HostVfs;

/// Opaque 64-bit handle by which the daemon names an inode (GLOSSARY).
/// Unique within a mount for as long as its lookup count is nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

/// The daemon's reserved identifier for the mount root.
pub const ROOT_NODE_ID: NodeId = NodeId(1);

/// File types the daemon can report (mirrors the teacher's `FileType`,
/// spec §3/§9 type-change detection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VnodeType {
    RegularFile,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    NamedPipe,
    Socket,
}

/// Attributes as reported by the daemon (subset of the teacher's
/// `FileAttr`, trimmed to what the attribute cache and dispatcher need).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attr {
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub kind: VnodeType,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
}

bitflags! {
    /// Per-node flag set (spec §3 "Node").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u32 {
        /// Direct-I/O enabled for this vnode (UBC bypassed).
        const DIRECT_IO = 1 << 0;
        /// At least one write has dirtied timestamps since the last
        /// successful setattr/getattr round trip.
        const TIMES_DIRTY = 1 << 1;
        /// Node was invalidated by a forced unmount; further RPCs for it
        /// are suppressed even if somehow still reachable.
        const REVOKED = 1 << 2;
    }
}

/// Per-inode state, owned exclusively by its vnode (spec §3 "Ownership and
/// lifetimes"). Generic over the host VFS so this crate doesn't need to
/// know the host's vnode representation.
pub struct Node<H: HostVfs> {
    pub id: NodeId,
    pub parent: NodeId,
    /// Non-owning: resolved through the mount's node tree on demand: see
    /// DESIGN NOTES §9 "Cyclic parent references".
    pub parent_vnode: Option<H::WeakVnode>,
    /// Authoritative only under direct-I/O (spec §3, §4.3).
    pub file_size: u64,
    pub cached_attr: Option<attr_cache::Entry>,
    pub handles: HandleTable,
    /// Count of un-forgiven LOOKUP replies the daemon believes we hold.
    pub lookup_count: u64,
    pub flags: NodeFlags,
}

impl<H: HostVfs> Node<H> {
    pub fn new(id: NodeId, parent: NodeId) -> Self {
        Node {
            id,
            parent,
            parent_vnode: None,
            file_size: 0,
            cached_attr: None,
            handles: HandleTable::default(),
            lookup_count: 0,
            flags: NodeFlags::empty(),
        }
    }

    /// Spec §3 invariant: nonzero lookup count means the node identifier
    /// is still valid at the daemon.
    pub fn is_live_at_daemon(&self) -> bool {
        self.lookup_count > 0
    }

    /// Records one more LOOKUP reply the daemon sent us for this node.
    pub fn record_lookup_reply(&mut self) {
        self.lookup_count += 1;
    }

    /// Drains the lookup count for a FORGET, per spec §3 "transitioning it
    /// to zero requires sending a FORGET with the exact count".
    pub fn take_forget_count(&mut self) -> u64 {
        std::mem::take(&mut self.lookup_count)
    }
}

//! The host-VFS collaborator boundary (spec §1 "Host VFS").
//!
//! Represents the kernel this crate is embedded in: its vnode cache, the
//! unified buffer cache (UBC), the name cache, and uio scatter/gather.
//! Concrete vnode representation, UBC implementation, and name-cache
//! internals are all host-specific and out of scope (spec §1); this trait
//! only fixes the shape of the calls the dispatcher needs to make.

use std::ffi::OsStr;
use std::time::Duration;

use crate::access_flags::AccessFlags;
use crate::errno::VResult;
use crate::node::VnodeType;
use crate::transport::Credentials;

/// Result of consulting the host name cache (spec §4.5 step 4).
pub enum NameCacheAnswer<V> {
    /// Cached positive entry.
    Hit(V),
    /// Cached negative entry: the name is known not to exist.
    NegativeHit,
    /// No cached answer either way.
    Miss,
}

/// The collaborator contract for the host kernel's VFS. `Vnode` is the
/// host's reference-counted vnode handle; `WeakVnode` is a non-owning
/// counterpart used for parent pointers (DESIGN NOTES §9 "Cyclic parent
/// references"); `Uio` is the host's scatter/gather I/O descriptor.
///
/// Every method that may block (on userspace or on the page cache) is
/// documented as such; callers must release the big per-mount lock around
/// those calls (spec §5) using [`crate::mount::MountGuard::suspend`].
pub trait HostVfs {
    type Vnode: Clone;
    type WeakVnode: Clone;
    type Uio;

    fn downgrade(&self, v: &Self::Vnode) -> Self::WeakVnode;
    fn upgrade(&self, w: &Self::WeakVnode) -> Option<Self::Vnode>;

    /// The mount's root vnode, held alive for the mount's lifetime.
    fn root_vnode(&self) -> Self::Vnode;

    /// Allocates (or returns the cached) vnode for `node`, of the given
    /// type, parented under `parent`. Vnode allocation itself is host
    /// territory (spec §1 "Host VFS"); this crate only decides *when* one
    /// is needed.
    fn vnode_for(
        &self,
        node: crate::node::NodeId,
        parent: &Self::Vnode,
        kind: VnodeType,
    ) -> Self::Vnode;

    /// The type the daemon most recently reported for this vnode, as
    /// tracked by the host vnode cache. Used for spec §4.5's type-change
    /// detection.
    fn cached_vnode_type(&self, v: &Self::Vnode) -> VnodeType;

    /// May block: consults the host name cache (spec §4.5 step 4).
    fn name_cache_lookup(&self, parent: &Self::Vnode, name: &OsStr) -> NameCacheAnswer<Self::Vnode>;

    /// Enters a positive entry good for `ttl` (the LOOKUP reply's
    /// `entry_valid`, spec §4.5 step 5/§4.3 "the two cache TTLs"). TTL
    /// bookkeeping is the host namecache's own affair; this crate only
    /// hands over the daemon's deadline.
    fn name_cache_enter_positive(&self, parent: &Self::Vnode, name: &OsStr, child: &Self::Vnode, ttl: Duration);

    /// Enters a negative entry good for `ttl` (the NegativeEntry reply's
    /// `entry_valid`).
    fn name_cache_enter_negative(&self, parent: &Self::Vnode, name: &OsStr, ttl: Duration);

    /// Purges any entry for `vnode`, used on ENOENT (spec §4.3 getattr),
    /// on type mismatch (spec §4.5), and on rename/reclaim (spec §4.6).
    fn name_cache_purge(&self, vnode: &Self::Vnode);

    /// Host authorization layer, consulted by `preflight` (spec §4.2) and
    /// the dispatcher's "blanket denial" prologue (spec §4.6).
    fn authorize(&self, vnode: &Self::Vnode, creds: Credentials, access: AccessFlags) -> bool;

    /// Bytes remaining to transfer in `uio`.
    fn uio_resid(&self, uio: &Self::Uio) -> usize;

    /// Current file offset the uio addresses.
    fn uio_offset(&self, uio: &Self::Uio) -> u64;

    /// Rewinds `uio` to `offset`, used to restore unit-semantics on a
    /// direct-I/O write error (spec §4.6 "write").
    fn uio_set_offset(&self, uio: &mut Self::Uio, offset: u64);

    /// May block: moves bytes between a uio and a kernel buffer.
    fn uiomove(&self, buf: &mut [u8], uio: &mut Self::Uio) -> VResult<usize>;

    /// May block: buffered read through the host cluster layer, bounded
    /// by `file_size` (spec §4.6 "read"/"write" buffered path).
    fn cluster_read(&self, vnode: &Self::Vnode, uio: &mut Self::Uio, file_size: u64) -> VResult<usize>;

    /// May block: buffered write through the host cluster layer.
    fn cluster_write(&self, vnode: &Self::Vnode, uio: &mut Self::Uio, file_size: u64) -> VResult<usize>;

    /// May block: pagein through the host cluster layer.
    fn cluster_pagein(&self, vnode: &Self::Vnode, file_size: u64) -> VResult<()>;

    /// May block: pageout through the host cluster layer.
    fn cluster_pageout(&self, vnode: &Self::Vnode, file_size: u64) -> VResult<()>;

    /// Flushes and invalidates the UBC for `vnode` (spec §4.6 "open":
    /// direct-I/O switch-over and "purge-UBC" reply handling).
    fn ubc_invalidate(&self, vnode: &Self::Vnode);

    /// Updates the UBC's notion of file size after a write or setattr
    /// that changes size (spec §4.6 "write", "setattr").
    fn ubc_set_size(&self, vnode: &Self::Vnode, size: u64);

    /// Errors and synchronously completes a strategy-routine buffer on a
    /// dead filesystem (spec §4.6 "strategy").
    fn strategy_error_buffer(&self, uio: &mut Self::Uio);

    /// Dispatches to the internal strategy routine on a live filesystem.
    fn strategy_dispatch(&self, vnode: &Self::Vnode, uio: &mut Self::Uio) -> VResult<()>;
}

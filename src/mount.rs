//! Mount-level data and the big-lock discipline (spec §3 "Mount-level
//! data", §5 "Concurrency & resource model", §4.6 "State machine — mount").

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::capability::CapabilityTable;
use crate::hostvfs::HostVfs;
use crate::node::{Node, NodeId};
use crate::transport::{Credentials, Transport};

/// `Uninitialized` -> (INIT handshake) -> `Live` -> (daemon death or
/// unmount) -> `Dead`. In `Dead`, all ops short-circuit; reclaim still
/// runs but elides RPCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Live,
    Dead,
}

/// Mount-wide policy knobs, built once from parsed mount options (parsing
/// itself is out of scope — spec §1 Non-goals "mount-option parsing").
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub read_only: bool,
    pub direct_io_default: bool,
    pub name_cache_enabled: bool,
    pub hide_apple_double: bool,
    pub blanket_deny: bool,
    pub nosyncwrites: bool,
    pub auto_xattr: bool,
    pub init_timeout: Duration,
    /// When `blanket_deny` is set, the only uid a handler's prologue lets
    /// through before any RPC (spec §4.6 prologue "blanket denial";
    /// GLOSSARY "Blanket denial"). `None` means blanket denial is
    /// configured but has no owner to compare against, so it never fires.
    pub blanket_deny_uid: Option<u32>,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            read_only: false,
            direct_io_default: false,
            name_cache_enabled: true,
            hide_apple_double: false,
            blanket_deny: false,
            nosyncwrites: false,
            auto_xattr: false,
            init_timeout: Duration::from_secs(60),
            blanket_deny_uid: None,
        }
    }
}

/// Everything guarded by the big per-mount lock (spec §5: "the file-handle
/// table and attribute cache are protected by the big lock").
pub struct MountState<H: HostVfs> {
    pub lifecycle: Lifecycle,
    pub capabilities: CapabilityTable,
    pub config: MountConfig,
    pub daemon_creds: Credentials,
    pub block_size: u32,
    pub io_size: u32,
    /// The wire protocol's own name-length ceiling (spec §4.5 step 1, §6
    /// "Pathconf constants"). Fixed by the protocol, not daemon-negotiated.
    pub protocol_name_max: u32,
    /// Enumerable view of live nodes, used for forced unmount and forget
    /// accounting (spec §3 "Mount-level data"). A vnode's exclusive
    /// ownership of its own `Node` is modeled by the fact that only the
    /// owning vnode's `NodeId` can reach this entry through dispatcher
    /// calls; this map exists for mount-wide enumeration, not aliasing.
    pub nodes: BTreeMap<NodeId, Node<H>>,
}

impl<H: HostVfs> MountState<H> {
    fn new(config: MountConfig, daemon_creds: Credentials) -> Self {
        MountState {
            lifecycle: Lifecycle::Uninitialized,
            capabilities: CapabilityTable::default(),
            config,
            daemon_creds,
            block_size: 4096,
            io_size: 128 * 1024,
            protocol_name_max: 255,
            nodes: BTreeMap::new(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.lifecycle == Lifecycle::Dead
    }

    /// The uid a "blanket denial" check compares against, if the mount has
    /// one configured.
    pub fn allowed_uid(&self) -> Option<u32> {
        self.config.blanket_deny_uid
    }

    /// Marks the mount dead (daemon death or forced unmount, spec §4.6
    /// mount state machine). Monotonic: once dead, stays dead.
    pub fn mark_dead(&mut self) {
        self.lifecycle = Lifecycle::Dead;
    }

    /// Completes the INIT handshake (spec §4.6 prologue references "the
    /// mount has not completed its INIT handshake").
    pub fn complete_init(&mut self, block_size: u32, io_size: u32) {
        if self.lifecycle == Lifecycle::Uninitialized {
            self.lifecycle = Lifecycle::Live;
        }
        self.block_size = block_size;
        self.io_size = io_size;
    }

    /// Enumerates every live node for forced-unmount mass invalidation
    /// (spec §3 "Ownership and lifetimes").
    pub fn live_node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }
}

/// Owns the big per-mount lock plus the collaborators the dispatcher talks
/// to. `T` and `H` are the out-of-scope transport/daemon and host-VFS
/// collaborators (spec §1).
pub struct Mount<H: HostVfs, T: Transport> {
    state: Mutex<MountState<H>>,
    pub transport: T,
    pub hostvfs: H,
}

impl<H: HostVfs, T: Transport> Mount<H, T> {
    pub fn new(config: MountConfig, daemon_creds: Credentials, transport: T, hostvfs: H) -> Self {
        Mount {
            state: Mutex::new(MountState::new(config, daemon_creds)),
            transport,
            hostvfs,
        }
    }

    /// Acquires the big lock. Every vnode-op handler prologue starts here.
    pub fn lock(&self) -> MutexGuard<'_, MountState<H>> {
        self.state.lock()
    }

    /// DESIGN NOTES §9 "Big-lock discipline": release the lock for the
    /// duration of `f` — which must be the only place a call that can
    /// block on userspace or the page cache happens — then reacquire it.
    /// Every call site that suspends must be on every exit path between
    /// the release and the blocking call, which this signature enforces
    /// by taking the guard by value: there is no way to hold a stale
    /// guard across the suspension.
    pub fn suspend<R>(
        &self,
        guard: MutexGuard<'_, MountState<H>>,
        f: impl FnOnce() -> R,
    ) -> (MutexGuard<'_, MountState<H>>, R) {
        drop(guard);
        let result = f();
        (self.state.lock(), result)
    }
}

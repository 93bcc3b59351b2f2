//! Vnode-op dispatcher (spec §4.6): one handler per VFS entry point.
//!
//! Every handler shares the prologue described in spec §4.6: dead-mount
//! short-circuit, uninitialized-mount short-circuit, and an optional
//! blanket-denial authorization check, before it ever builds a request.
//! Handlers are methods on [`Mount`] so they have direct access to the big
//! lock, the node tree, the capability table, and the collaborators.

use std::ffi::{OsStr, OsString};
use std::time::SystemTime;

use log::{debug, trace, warn};
use parking_lot::MutexGuard;

use crate::access_flags::AccessFlags;
use crate::attr_cache;
use crate::errno::{VError, VResult};
use crate::handle_table::{self, Mode};
use crate::hostvfs::{HostVfs, NameCacheAnswer};
use crate::mount::{Lifecycle, Mount, MountState};
use crate::name_cache::{self, Intent};
use crate::node::{Attr, Node, NodeId, VnodeType, ROOT_NODE_ID};
use crate::opcode::Opcode;
use crate::protocol::{PathconfAnswer, Reply, StatfsAnswer};
use crate::ticket;
use crate::transport::{Credentials, Transport};

/// Outcome of the `lookup` handler (spec §4.5 step 6, "just-return").
pub enum LookupOutcome<V> {
    Found(V),
    JustReturn,
}

/// Dirty fields a `setattr` call may carry (mirrors the teacher's pattern
/// of a single struct of `Option<T>` fields encoding "what changed").
#[derive(Debug, Clone, Copy, Default)]
pub struct SetattrChanges {
    pub size: Option<u64>,
    pub mode: Option<u16>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

/// Whether the caller is the daemon's own process or the superuser — the
/// only callers allowed to touch the root vnode before INIT completes
/// (spec §4.6 prologue).
fn is_root_authority(creds: Credentials, daemon_uid: u32) -> bool {
    creds.uid == 0 || creds.uid == daemon_uid
}

impl<H: HostVfs, T: Transport> Mount<H, T> {
    /// Common prologue. Returns `Err` with the status the caller must
    /// return immediately; `Ok(())` means proceed to capability/request
    /// building. `root_short_circuit_ok` lets a handler (e.g. `access`,
    /// `close`) treat a dead-root call as success-so-far rather than an
    /// error, per the per-op contracts in spec §4.6.
    fn prologue(
        &self,
        guard: &MountState<H>,
        node_id: NodeId,
        creds: Credentials,
    ) -> VResult<()> {
        if guard.is_dead() {
            if node_id == ROOT_NODE_ID {
                return Ok(());
            }
            return Err(VError::ENXIO);
        }
        if guard.lifecycle == Lifecycle::Uninitialized
            && !(node_id == ROOT_NODE_ID && is_root_authority(creds, guard.daemon_creds.uid))
        {
            return Err(VError::EBADF);
        }
        if guard.config.blanket_deny {
            if let Some(owner) = guard.allowed_uid() {
                if creds.uid != owner {
                    return Err(VError::EACCES);
                }
            }
        }
        Ok(())
    }

    fn get_node<'a>(guard: &'a mut MountState<H>, id: NodeId) -> VResult<&'a mut Node<H>> {
        guard.nodes.get_mut(&id).ok_or(VError::EIO)
    }

    /// Spec §4.4: records a daemon reply for an optional op, clearing the
    /// capability bit on `ENOSYS` and translating it to `ENOTSUP`.
    fn note_optional_reply<R>(
        guard: &mut MountState<H>,
        op: Opcode,
        result: VResult<R>,
    ) -> VResult<R> {
        match result {
            Err(e) if e.is_enosys() => {
                guard.capabilities.clear(op);
                Err(VError::ENOTSUP)
            }
            other => other,
        }
    }

    /// Returns a valid handle for `mode`, sending OPEN/OPENDIR via `opcode`
    /// only if one isn't already held. The big lock is dropped around that
    /// RPC (spec §5: released around anything that may block on userspace,
    /// since the daemon may itself re-enter the filesystem, e.g. paging).
    fn acquire_handle<'a>(
        &'a self,
        mut guard: MutexGuard<'a, MountState<H>>,
        node_id: NodeId,
        mode: Mode,
        opcode: Opcode,
        creds: Credentials,
    ) -> (MutexGuard<'a, MountState<H>>, VResult<handle_table::Handle>) {
        let existing = match Self::get_node(&mut guard, node_id) {
            Ok(node) => node.handles.handle(mode),
            Err(e) => return (guard, Err(e)),
        };
        if existing.is_some() {
            let handle = Self::get_node(&mut guard, node_id).unwrap().handles.bump(mode);
            return (guard, Ok(handle));
        }
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::simple_put_get(&self.transport, opcode, node_id, creds)
        });
        let mut guard = new_guard;
        let open_reply = match reply.and_then(|t| match t.into_reply() {
            Some(Reply::Open { handle, flags }) => Ok(handle_table::OpenReply {
                daemon_handle: handle,
                open_flags: flags,
            }),
            _ => Err(VError::EIO),
        }) {
            Ok(r) => r,
            Err(e) => return (guard, Err(e)),
        };
        let handle = match Self::get_node(&mut guard, node_id) {
            Ok(node) => node.handles.install_or_bump(mode, open_reply),
            Err(e) => return (guard, Err(e)),
        };
        (guard, Ok(handle))
    }

    /// Decrements the slot for `mode`; if that was the last reference,
    /// sends RELEASE/RELEASEDIR with the big lock dropped around the RPC.
    fn release_handle<'a>(
        &'a self,
        mut guard: MutexGuard<'a, MountState<H>>,
        node_id: NodeId,
        mode: Mode,
        release_op: Opcode,
        creds: Credentials,
    ) -> (MutexGuard<'a, MountState<H>>, VResult<()>) {
        let to_release = match Self::get_node(&mut guard, node_id) {
            Ok(node) => node.handles.begin_put(mode),
            Err(e) => return (guard, Err(e)),
        };
        let Some(daemon_handle) = to_release else {
            return (guard, Ok(()));
        };
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::simple_put_get(&self.transport, release_op, node_id, creds)
        });
        let guard = new_guard;
        match reply {
            Ok(_) => {
                handle_table::debug_released(mode, daemon_handle);
                (guard, Ok(()))
            }
            Err(e) => (guard, Err(e)),
        }
    }

    // ---------------------------------------------------------------
    // init
    // ---------------------------------------------------------------

    /// Runs the INIT handshake (spec §4.6 "mount" state machine) and
    /// completes the mount's transition out of `Uninitialized`. Only the
    /// daemon's own credentials or the superuser may drive this (checked
    /// by `prologue`'s root-authority rule before the mount is live).
    pub fn init(&self, creds: Credentials) -> VResult<()> {
        let guard = self.lock();
        self.prologue(&guard, ROOT_NODE_ID, creds)?;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::simple_put_get(&self.transport, Opcode::Init, ROOT_NODE_ID, creds)
        });
        let mut guard = new_guard;
        let reply = reply?;
        match reply.into_reply() {
            Some(Reply::Init {
                block_size,
                io_size,
                max_write,
            }) => {
                let io_size = io_size.min(max_write.max(1));
                guard.complete_init(block_size, io_size);
                debug!("init: block_size={block_size} io_size={io_size}");
                Ok(())
            }
            _ => Err(VError::EIO),
        }
    }

    // ---------------------------------------------------------------
    // §4.5 lookup
    // ---------------------------------------------------------------

    /// The `lookup` vnode op, driven by the name-lookup bridge policy in
    /// `crate::name_cache`.
    #[allow(clippy::too_many_arguments)]
    pub fn lookup(
        &self,
        dvp: &H::Vnode,
        dvp_id: NodeId,
        name: &OsStr,
        intent: Intent,
        last_component: bool,
        creds: Credentials,
    ) -> VResult<LookupOutcome<H::Vnode>> {
        let mut guard = self.lock();
        self.prologue(&guard, dvp_id, creds)?;

        let protocol_name_max = guard.protocol_name_max;
        if name_cache::is_name_too_long(name, protocol_name_max) {
            return Err(VError::ENAMETOOLONG);
        }
        if guard.config.hide_apple_double && name_cache::is_apple_double(name) {
            return Err(VError::ENOENT);
        }

        match name_cache::classify(name) {
            name_cache::Component::Dot => return Ok(LookupOutcome::Found(dvp.clone())),
            name_cache::Component::DotDot => {
                let parent_id = Self::get_node(&mut guard, dvp_id)?.parent;
                let parent_weak = Self::get_node(&mut guard, dvp_id)?.parent_vnode.clone();
                if let Some(weak) = parent_weak {
                    if let Some(parent_vnode) = self.hostvfs.upgrade(&weak) {
                        return Ok(LookupOutcome::Found(parent_vnode));
                    }
                }
                // Parent vnode has been reclaimed; fall back to a GETATTR
                // on the recorded parent identifier (spec §4.5 step 3).
                let creds2 = creds;
                let (new_guard, reply) = self.suspend(guard, || {
                    ticket::simple_put_get(&self.transport, Opcode::Getattr, parent_id, creds2)
                });
                guard = new_guard;
                let reply = reply?;
                match reply.into_reply() {
                    Some(Reply::Attr { .. }) => {}
                    _ => return Err(VError::EIO),
                }
                let vnode = self.hostvfs.vnode_for(parent_id, dvp, VnodeType::Directory);
                return Ok(LookupOutcome::Found(vnode));
            }
            name_cache::Component::Named => {}
        }

        if name_cache::rejects_for_read_only(guard.config.read_only, intent, last_component) {
            return Err(VError::EROFS);
        }

        if guard.config.name_cache_enabled {
            let (new_guard, answer) =
                self.suspend(guard, || self.hostvfs.name_cache_lookup(dvp, name));
            guard = new_guard;
            match answer {
                NameCacheAnswer::Hit(v) => {
                    drop(guard);
                    return Ok(LookupOutcome::Found(v));
                }
                NameCacheAnswer::NegativeHit => {
                    return match name_cache::negative_last_component_outcome(
                        intent,
                        last_component,
                    ) {
                        Some(true) => Ok(LookupOutcome::JustReturn),
                        _ => Err(VError::ENOENT),
                    };
                }
                NameCacheAnswer::Miss => {}
            }
        }

        let name_owned = name.to_os_string();
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(
                &self.transport,
                Opcode::Lookup,
                dvp_id,
                creds2,
                name_owned,
                false,
            )
        });
        guard = new_guard;
        let reply = reply?.into_reply();
        let name_cache_enabled = guard.config.name_cache_enabled;

        let (node_id, attr, attr_valid, entry_valid) = match reply {
            Some(Reply::NegativeEntry { entry_valid }) => {
                if name_cache_enabled {
                    self.hostvfs.name_cache_enter_negative(
                        dvp,
                        name,
                        entry_valid,
                    );
                }
                return match name_cache::negative_last_component_outcome(
                    intent,
                    last_component,
                ) {
                    Some(true) => Ok(LookupOutcome::JustReturn),
                    _ => Err(VError::ENOENT),
                };
            }
            None => return Err(VError::EIO),
            Some(Reply::Entry {
                node, attr, attr_valid, entry_valid, ..
            }) => match name_cache::classify_lookup_reply(node, ROOT_NODE_ID) {
                name_cache::ReplyClass::Negative => {
                    if name_cache_enabled {
                        self.hostvfs.name_cache_enter_negative(
                            dvp,
                            name,
                            entry_valid,
                        );
                    }
                    return match name_cache::negative_last_component_outcome(
                        intent,
                        last_component,
                    ) {
                        Some(true) => Ok(LookupOutcome::JustReturn),
                        _ => Err(VError::ENOENT),
                    };
                }
                name_cache::ReplyClass::ProtocolErrorRoot => {
                    warn!("lookup: daemon returned the root identifier for a non-root name");
                    return Err(VError::EIO);
                }
                name_cache::ReplyClass::Found(n) => (n, attr, attr_valid, entry_valid),
            },
            _ => return Err(VError::EIO),
        };

        let vnode = self.hostvfs.vnode_for(node_id, dvp, attr.kind);
        let now = std::time::Instant::now();
        let entry = guard
            .nodes
            .entry(node_id)
            .or_insert_with(|| Node::new(node_id, dvp_id));
        if let Some(prev) = entry.cached_attr {
            if prev.attr.kind != attr.kind {
                self.hostvfs.name_cache_purge(&vnode);
                return Err(VError::EIO);
            }
        }
        entry.record_lookup_reply();
        entry.cached_attr = Some(attr_cache::cache(attr, attr_valid, now));
        entry.parent_vnode = Some(self.hostvfs.downgrade(dvp));
        if name_cache_enabled {
            self.hostvfs
                .name_cache_enter_positive(dvp, name, &vnode, entry_valid);
        }
        Ok(LookupOutcome::Found(vnode))
    }

    // ---------------------------------------------------------------
    // access
    // ---------------------------------------------------------------

    /// There is no ACCESS opcode (spec §6 "Downward"); permission checks
    /// round-trip a GETATTR and apply the host's own authorization rules
    /// to the fresh attributes (spec §4.6 "access": "otherwise round-trip").
    pub fn access(
        &self,
        vnode: &H::Vnode,
        node_id: NodeId,
        vp_kind: VnodeType,
        mode: AccessFlags,
        creds: Credentials,
    ) -> VResult<()> {
        if vp_kind == VnodeType::Symlink {
            return Ok(());
        }
        {
            let guard = self.lock();
            if guard.is_dead() && node_id == ROOT_NODE_ID {
                return Ok(());
            }
        }
        self.getattr(vnode, node_id, creds)?;
        if self.hostvfs.authorize(vnode, creds, mode) {
            Ok(())
        } else {
            Err(VError::EACCES)
        }
    }

    // ---------------------------------------------------------------
    // open / close
    // ---------------------------------------------------------------

    pub fn open(
        &self,
        vnode: &H::Vnode,
        node_id: NodeId,
        is_dir: bool,
        fflags: i32,
        creds: Credentials,
    ) -> VResult<()> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        let mode = handle_table::mode_from_fflags(fflags);
        let opcode = handle_table::open_opcode_for(is_dir);
        let (new_guard, result) = self.acquire_handle(guard, node_id, mode, opcode, creds);
        guard = new_guard;
        match result {
            Ok(handle) => {
                // direct-I/O / purge-UBC replies flow through `open_flags`
                // as a small out-of-band bitset the transport decodes;
                // bits 0/1 below are this crate's own convention for them.
                const FOPEN_DIRECT_IO: u32 = 1 << 0;
                const FOPEN_PURGE_UBC: u32 = 1 << 1;
                let direct_io = handle.open_flags & FOPEN_DIRECT_IO != 0;
                let purge_ubc = handle.open_flags & FOPEN_PURGE_UBC != 0;
                if direct_io {
                    Self::get_node(&mut guard, node_id)?
                        .flags
                        .insert(crate::node::NodeFlags::DIRECT_IO);
                }
                drop(guard);
                // UBC flush/invalidate and disabling read-ahead both touch
                // the host's page cache: release around them (spec §4.3
                // OPEN reply handling).
                if direct_io || purge_ubc {
                    self.hostvfs.ubc_invalidate(vnode);
                }
                Ok(())
            }
            Err(VError::Errno(e)) if e == nix::errno::Errno::ENOENT => {
                drop(guard);
                self.hostvfs.name_cache_purge(vnode);
                Err(VError::ENOENT)
            }
            Err(e) => Err(e),
        }
    }

    pub fn close(
        &self,
        node_id: NodeId,
        is_dir: bool,
        mode: Mode,
        dirty: bool,
        io_ndelay: bool,
        creds: Credentials,
    ) -> VResult<()> {
        if io_ndelay {
            // spec DESIGN NOTES §9(c): IO_NDELAY suppresses FLUSH even for
            // dirty files; the vclean path will reclaim and flush
            // separately.
            return Ok(());
        }
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        if guard.is_dead() {
            // prologue already rejected any node but the root with ENXIO;
            // a dead mount's root close always succeeds without an RPC
            // (spec §8 property 5).
            return Ok(());
        }

        if dirty && !guard.config.nosyncwrites {
            let creds2 = creds;
            let (new_guard, reply) = self.suspend(guard, || {
                ticket::simple_put_get(&self.transport, Opcode::Write, node_id, creds2)
            });
            guard = new_guard;
            reply?;
        }

        if guard.capabilities.implemented(Opcode::Flush) {
            let creds2 = creds;
            let (new_guard, reply) = self.suspend(guard, || {
                ticket::simple_put_get(&self.transport, Opcode::Flush, node_id, creds2)
            });
            guard = new_guard;
            let reply = Self::note_optional_reply(&mut guard, Opcode::Flush, reply);
            if let Err(e) = reply {
                if e != VError::ENOTSUP {
                    return Err(e);
                }
            }
        }

        let release_op = handle_table::release_opcode_for(is_dir);
        let (_guard, result) = self.release_handle(guard, node_id, mode, release_op, creds);
        result
    }

    // ---------------------------------------------------------------
    // create
    // ---------------------------------------------------------------

    pub fn create(
        &self,
        dvp_id: NodeId,
        name: &OsStr,
        mode_bits: u16,
        creds: Credentials,
    ) -> VResult<(NodeId, Attr)> {
        let mut guard = self.lock();
        self.prologue(&guard, dvp_id, creds)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }

        if guard.capabilities.implemented(Opcode::Create) {
            let name_owned = name.to_os_string();
            let creds2 = creds;
            let (new_guard, reply) = self.suspend(guard, || {
                ticket::dispatch_and_wait(
                    &self.transport,
                    Opcode::Create,
                    dvp_id,
                    creds2,
                    (name_owned, mode_bits),
                    false,
                )
            });
            guard = new_guard;
            let outcome = Self::note_optional_reply(&mut guard, Opcode::Create, reply);
            match outcome {
                Ok(ticket) => {
                    return self.install_created(&mut guard, dvp_id, ticket.into_reply());
                }
                Err(VError::ENOTSUP) => {
                    // fall through to MKNOD + OPEN retry below.
                }
                Err(e) => return Err(e),
            }
        }

        let name_owned = name.to_os_string();
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(
                &self.transport,
                Opcode::Mknod,
                dvp_id,
                creds2,
                (name_owned, mode_bits),
                false,
            )
        });
        guard = new_guard;
        let reply = reply?;
        let (node_id, attr, attr_valid) = match reply.into_reply() {
            Some(Reply::Entry { node, attr, attr_valid, .. }) => (node, attr, attr_valid),
            _ => return Err(VError::EIO),
        };
        let creds3 = creds;
        let (new_guard, open_reply) = self.suspend(guard, || {
            ticket::simple_put_get(&self.transport, Opcode::Open, node_id, creds3)
        });
        guard = new_guard;
        match open_reply?.into_reply() {
            Some(Reply::Open { handle, flags }) => {
                let now = std::time::Instant::now();
                let entry = guard
                    .nodes
                    .entry(node_id)
                    .or_insert_with(|| Node::new(node_id, dvp_id));
                entry.handles.install(
                    Mode::ReadWrite,
                    handle_table::OpenReply {
                        daemon_handle: handle,
                        open_flags: flags,
                    },
                );
                entry.record_lookup_reply();
                entry.cached_attr = Some(attr_cache::cache(attr, attr_valid, now));
                Ok((node_id, attr))
            }
            _ => Err(VError::EIO),
        }
    }

    /// Single-round-trip CREATE success path (spec §4.6 "create"): installs
    /// the bundled handle in the read-write slot with open-count 1, to be
    /// claimed by the impending OPEN, exactly like the MKNOD+OPEN fallback.
    fn install_created(
        &self,
        guard: &mut MountState<H>,
        dvp_id: NodeId,
        reply: Option<Reply>,
    ) -> VResult<(NodeId, Attr)> {
        match reply {
            Some(Reply::Entry {
                node,
                attr,
                attr_valid,
                handle: Some(handle),
                ..
            }) => {
                let now = std::time::Instant::now();
                let entry = guard
                    .nodes
                    .entry(node)
                    .or_insert_with(|| Node::new(node, dvp_id));
                entry.handles.install(
                    Mode::ReadWrite,
                    handle_table::OpenReply {
                        daemon_handle: handle.daemon_handle,
                        open_flags: handle.open_flags,
                    },
                );
                entry.record_lookup_reply();
                entry.cached_attr = Some(attr_cache::cache(attr, attr_valid, now));
                Ok((node, attr))
            }
            _ => Err(VError::EIO),
        }
    }

    /// Compensating cleanup when vnode allocation fails after a
    /// successful CREATE (spec §4.6 "create", §7): releases the
    /// provisional handle and forgets the node so the daemon's
    /// accounting stays consistent. Fire-and-forget; errors are logged,
    /// not propagated (spec §7 "best-effort").
    pub fn compensate_failed_create(&self, node_id: NodeId, daemon_handle: u64, creds: Credentials) {
        let transport = &self.transport;
        if let Err(e) =
            ticket::simple_put_get(transport, Opcode::Release, node_id, creds)
        {
            warn!("create: compensating RELEASE for handle {daemon_handle:#x} failed: {e}");
        }
        if let Err(e) = ticket::simple_put_get(transport, Opcode::Forget, node_id, creds) {
            warn!("create: compensating FORGET for node {node_id:?} failed: {e}");
        }
    }

    // ---------------------------------------------------------------
    // read / write
    // ---------------------------------------------------------------

    /// Buffered path: delegate to the host cluster layer using the
    /// cached file size.
    pub fn read_buffered_with(
        &self,
        vnode: &H::Vnode,
        node_id: NodeId,
        uio: &mut H::Uio,
        creds: Credentials,
    ) -> VResult<usize> {
        let guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        let file_size = guard.nodes.get(&node_id).map(|n| n.file_size).unwrap_or(0);
        let (_guard, result) = self.suspend(guard, || self.hostvfs.cluster_read(vnode, uio, file_size));
        result
    }

    pub fn write_buffered_with(
        &self,
        vnode: &H::Vnode,
        node_id: NodeId,
        uio: &mut H::Uio,
        creds: Credentials,
    ) -> VResult<usize> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }
        let file_size = guard.nodes.get(&node_id).map(|n| n.file_size).unwrap_or(0);
        let (new_guard, result) = self.suspend(guard, || self.hostvfs.cluster_write(vnode, uio, file_size));
        guard = new_guard;
        let written = result?;
        let node = Self::get_node(&mut guard, node_id)?;
        let new_size = node.file_size.max(file_size + written as u64);
        node.file_size = new_size;
        drop(guard);
        self.hostvfs.ubc_set_size(vnode, new_size);
        Ok(written)
    }

    /// Direct path: loop issuing READ RPCs bounded by the negotiated I/O
    /// size (spec §4.6 "read"/"write").
    pub fn read_direct(&self, node_id: NodeId, uio: &mut H::Uio, creds: Credentials) -> VResult<usize> {
        let mut total = 0usize;
        loop {
            let mut guard = self.lock();
            self.prologue(&guard, node_id, creds)?;
            let resid = self.hostvfs.uio_resid(uio);
            if resid == 0 {
                return Ok(total);
            }
            let chunk = resid.min(guard.io_size as usize);
            let offset = self.hostvfs.uio_offset(uio);
            let handle = {
                let node = Self::get_node(&mut guard, node_id)?;
                node.handles
                    .handle(Mode::Read)
                    .or_else(|| node.handles.handle(Mode::ReadWrite))
                    .ok_or(VError::EBADF)?
            };
            let creds2 = creds;
            let (new_guard, reply) = self.suspend(guard, || {
                ticket::dispatch_and_wait(
                    &self.transport,
                    Opcode::Read,
                    node_id,
                    creds2,
                    (handle.daemon_handle, offset, chunk as u32),
                    false,
                )
            });
            guard = new_guard;
            let bytes = match reply?.into_reply() {
                Some(Reply::Data { bytes }) => bytes,
                _ => return Err(VError::EIO),
            };
            if bytes.is_empty() {
                return Ok(total);
            }
            let mut bytes = bytes;
            let (new_guard, moved) = self.suspend(guard, || self.hostvfs.uiomove(&mut bytes, uio));
            guard = new_guard;
            let moved = moved?;
            drop(guard);
            total += moved;
            if moved < chunk {
                return Ok(total);
            }
        }
    }

    /// Direct path write, falling back from a missing write-only/read-only
    /// handle to the read-write handle (spec §4.6 "read"/"write").
    pub fn write_direct(&self, node_id: NodeId, uio: &mut H::Uio, creds: Credentials) -> VResult<usize> {
        let start_offset = self.hostvfs.uio_offset(uio);
        let mut total = 0usize;
        loop {
            let mut guard = self.lock();
            self.prologue(&guard, node_id, creds)?;
            if guard.config.read_only {
                return Err(VError::EROFS);
            }
            let resid = self.hostvfs.uio_resid(uio);
            if resid == 0 {
                return Ok(total);
            }
            let chunk = resid.min(guard.io_size as usize);
            let offset = self.hostvfs.uio_offset(uio);
            let handle = {
                let node = Self::get_node(&mut guard, node_id)?;
                node.handles
                    .handle(Mode::Write)
                    .or_else(|| node.handles.handle(Mode::ReadWrite))
                    .ok_or(VError::EBADF)?
            };
            let mut buf = vec![0u8; chunk];
            let (new_guard, moved) = self.suspend(guard, || self.hostvfs.uiomove(&mut buf, uio));
            guard = new_guard;
            let moved = match moved {
                Ok(m) => m,
                Err(e) => {
                    self.hostvfs.uio_set_offset(uio, start_offset);
                    return Err(e);
                }
            };
            buf.truncate(moved);
            let creds2 = creds;
            let (new_guard, reply) = self.suspend(guard, || {
                ticket::dispatch_and_wait(
                    &self.transport,
                    Opcode::Write,
                    node_id,
                    creds2,
                    (handle.daemon_handle, offset, buf),
                    false,
                )
            });
            guard = new_guard;
            let written = match reply.and_then(|t| match t.into_reply() {
                Some(Reply::Write { size }) => Ok(size as usize),
                _ => Err(VError::EIO),
            }) {
                Ok(w) => w,
                Err(e) => {
                    self.hostvfs.uio_set_offset(uio, start_offset + total as u64);
                    return Err(e);
                }
            };
            total += written;
            let node = Self::get_node(&mut guard, node_id)?;
            let new_end = offset + written as u64;
            if new_end > node.file_size {
                // Direct I/O bypasses the UBC (spec §3 "Node"): only the
                // node's own authoritative size needs updating here.
                node.file_size = new_end;
            }
            drop(guard);
            if written < chunk {
                return Ok(total);
            }
        }
    }

    // ---------------------------------------------------------------
    // fsync
    // ---------------------------------------------------------------

    pub fn fsync(&self, node_id: NodeId, is_dir: bool, creds: Credentials) -> VResult<()> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        let op = if is_dir { Opcode::Fsyncdir } else { Opcode::Fsync };
        if !guard.capabilities.implemented(op) {
            return Err(VError::ENOTSUP);
        }
        let handles: Vec<_> = Self::get_node(&mut guard, node_id)?
            .handles
            .valid_handles()
            .map(|(_, h)| h.daemon_handle)
            .collect();
        for _handle in handles {
            let creds2 = creds;
            let (new_guard, reply) = self.suspend(guard, || {
                ticket::simple_put_get(&self.transport, op, node_id, creds2)
            });
            guard = new_guard;
            let reply = Self::note_optional_reply(&mut guard, op, reply);
            match reply {
                Ok(_) => {}
                Err(VError::ENOTSUP) if guard.config.nosyncwrites => {
                    // ENOSYS with nosyncwrites disabled downgrades to
                    // success (spec §4.6 "fsync").
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // getattr / setattr
    // ---------------------------------------------------------------

    pub fn getattr(&self, vnode: &H::Vnode, node_id: NodeId, creds: Credentials) -> VResult<Attr> {
        let mut guard = self.lock();
        if guard.is_dead() && node_id == ROOT_NODE_ID {
            return Ok(Self::fabricated_root_attr(guard.daemon_creds.uid, guard.daemon_creds.gid));
        }
        self.prologue(&guard, node_id, creds)?;

        let now = std::time::Instant::now();
        if let Some(node) = guard.nodes.get(&node_id) {
            if let Some(attr) = attr_cache::load(node.cached_attr.as_ref(), now) {
                return Ok(attr);
            }
        }

        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::simple_put_get(&self.transport, Opcode::Getattr, node_id, creds2)
        });
        guard = new_guard;
        match reply {
            Ok(t) => match t.into_reply() {
                Some(Reply::Attr { attr, valid }) => {
                    // spec §4.5 type-change detection generalizes to any
                    // reply that carries a fresh type, not just lookup's.
                    if self.hostvfs.cached_vnode_type(vnode) != attr.kind {
                        drop(guard);
                        self.hostvfs.name_cache_purge(vnode);
                        return Err(VError::EIO);
                    }
                    let node = Self::get_node(&mut guard, node_id)?;
                    node.cached_attr = Some(attr_cache::cache(attr, valid, now));
                    if node.flags.contains(crate::node::NodeFlags::DIRECT_IO) {
                        node.file_size = attr.size;
                    }
                    Ok(attr)
                }
                _ => Err(VError::EIO),
            },
            Err(VError::Errno(e)) if e == nix::errno::Errno::ENOTCONN && node_id == ROOT_NODE_ID => {
                Ok(Self::fabricated_root_attr(guard.daemon_creds.uid, guard.daemon_creds.gid))
            }
            Err(VError::Errno(e)) if e == nix::errno::Errno::ENOENT => {
                drop(guard);
                self.hostvfs.name_cache_purge(vnode);
                Err(VError::ENOENT)
            }
            Err(e) => Err(e),
        }
    }

    fn fabricated_root_attr(uid: u32, gid: u32) -> Attr {
        Attr {
            size: 0,
            blocks: 0,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
            kind: VnodeType::Directory,
            perm: 0o700,
            nlink: 2,
            uid,
            gid,
            rdev: 0,
        }
    }

    pub fn setattr(
        &self,
        vnode: &H::Vnode,
        node_id: NodeId,
        kind: VnodeType,
        changes: SetattrChanges,
        creds: Credentials,
    ) -> VResult<Attr> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }
        if changes.size.is_some() && kind == VnodeType::Directory {
            return Err(VError::EISDIR);
        }

        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(&self.transport, Opcode::Setattr, node_id, creds2, changes, false)
        });
        guard = new_guard;
        let reply = reply?;
        match reply.into_reply() {
            Some(Reply::Attr { attr, valid }) => {
                if attr.kind != kind {
                    drop(guard);
                    self.hostvfs.name_cache_purge(vnode);
                    return Err(VError::EAGAIN);
                }
                let now = std::time::Instant::now();
                let node = Self::get_node(&mut guard, node_id)?;
                node.cached_attr = Some(attr_cache::cache(attr, valid, now));
                if changes.size.is_some() {
                    node.file_size = attr.size;
                    let size = attr.size;
                    drop(guard);
                    self.hostvfs.ubc_set_size(vnode, size);
                }
                Ok(attr)
            }
            _ => Err(VError::EIO),
        }
    }

    // ---------------------------------------------------------------
    // pagein / pageout
    // ---------------------------------------------------------------

    pub fn pagein(&self, vnode: &H::Vnode, node_id: NodeId, abort_no_commit: bool, creds: Credentials) -> VResult<()> {
        let guard = self.lock();
        let direct_io = guard
            .nodes
            .get(&node_id)
            .map(|n| n.flags.contains(crate::node::NodeFlags::DIRECT_IO))
            .unwrap_or(false);
        if guard.is_dead() || direct_io {
            let _ = abort_no_commit; // UPL abort is the host's responsibility.
            return Err(VError::ENOTSUP);
        }
        self.prologue(&guard, node_id, creds)?;
        let file_size = guard.nodes.get(&node_id).map(|n| n.file_size).unwrap_or(0);
        let (_guard, result) = self.suspend(guard, || self.hostvfs.cluster_pagein(vnode, file_size));
        result
    }

    pub fn pageout(&self, vnode: &H::Vnode, node_id: NodeId, abort_no_commit: bool, creds: Credentials) -> VResult<()> {
        let guard = self.lock();
        let direct_io = guard
            .nodes
            .get(&node_id)
            .map(|n| n.flags.contains(crate::node::NodeFlags::DIRECT_IO))
            .unwrap_or(false);
        if guard.is_dead() || direct_io {
            let _ = abort_no_commit;
            return Err(VError::ENOTSUP);
        }
        self.prologue(&guard, node_id, creds)?;
        let file_size = guard.nodes.get(&node_id).map(|n| n.file_size).unwrap_or(0);
        let (_guard, result) = self.suspend(guard, || self.hostvfs.cluster_pageout(vnode, file_size));
        result
    }

    // ---------------------------------------------------------------
    // reclaim
    // ---------------------------------------------------------------

    pub fn reclaim(&self, vnode: &H::Vnode, node_id: NodeId, creds: Credentials) {
        let mut guard = self.lock();
        let dead = guard.is_dead();
        let (handles, forget_count) = match guard.nodes.get_mut(&node_id) {
            Some(node) => {
                let handles = if dead { Vec::new() } else { node.handles.take_all() };
                (handles, node.take_forget_count())
            }
            None => (Vec::new(), 0),
        };
        for (mode, daemon_handle) in handles {
            let release_op = handle_table::release_opcode_for(false);
            let (new_guard, _) = self.suspend(guard, || {
                let _ = ticket::dispatch_and_wait(
                    &self.transport,
                    release_op,
                    node_id,
                    creds,
                    daemon_handle,
                    false,
                );
                handle_table::debug_released(mode, daemon_handle);
            });
            guard = new_guard;
        }
        if !dead && forget_count > 0 {
            let (new_guard, _) = self.suspend(guard, || {
                let _ = ticket::dispatch_and_wait(
                    &self.transport,
                    Opcode::Forget,
                    node_id,
                    creds,
                    forget_count,
                    false,
                );
            });
            guard = new_guard;
        }
        guard.nodes.remove(&node_id);
        drop(guard);
        self.hostvfs.name_cache_purge(vnode);
        trace!("reclaim: node {node_id:?} removed (dead={dead}, forgot={forget_count})");
    }

    // ---------------------------------------------------------------
    // xattr ops
    // ---------------------------------------------------------------

    fn xattr_name_allowed(&self, guard: &MountState<H>, name: &OsStr) -> VResult<()> {
        if name.is_empty() {
            return Err(VError::EINVAL);
        }
        if !guard.config.auto_xattr
            && name.as_encoded_bytes().starts_with(b"com.apple.")
            && guard.config.hide_apple_double
        {
            return Err(VError::ENOTSUP);
        }
        Ok(())
    }

    pub fn getxattr(
        &self,
        vnode: &H::Vnode,
        node_id: NodeId,
        name: &OsStr,
        buf_size: usize,
        creds: Credentials,
    ) -> VResult<Vec<u8>> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        self.xattr_name_allowed(&guard, name)?;
        if guard.config.auto_xattr || !guard.capabilities.implemented(Opcode::Getxattr) {
            return Err(VError::ENOTSUP);
        }
        let name_owned = name.to_os_string();
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(
                &self.transport,
                Opcode::Getxattr,
                node_id,
                creds2,
                (name_owned, buf_size as u32),
                false,
            )
        });
        guard = new_guard;
        let mut ticket = match Self::note_optional_reply(&mut guard, Opcode::Getxattr, reply) {
            Ok(t) => t,
            Err(VError::Errno(e)) if e == nix::errno::Errno::ENOENT => {
                drop(guard);
                self.hostvfs.name_cache_purge(vnode);
                return Err(VError::ENOENT);
            }
            Err(e) => return Err(e),
        };
        match ticket.reply().cloned() {
            Some(Reply::Xattr { size, data }) => {
                if buf_size == 0 {
                    return Ok(vec![0u8; size as usize]);
                }
                match data {
                    Some(bytes) if bytes.len() <= buf_size => Ok(bytes),
                    _ => {
                        ticket.mark_killed();
                        Err(VError::ERANGE)
                    }
                }
            }
            _ => Err(VError::EIO),
        }
    }

    pub fn listxattr(
        &self,
        vnode: &H::Vnode,
        node_id: NodeId,
        buf_size: usize,
        creds: Credentials,
    ) -> VResult<Vec<u8>> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        if !guard.capabilities.implemented(Opcode::Listxattr) {
            return Err(VError::ENOTSUP);
        }
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(
                &self.transport,
                Opcode::Listxattr,
                node_id,
                creds2,
                buf_size as u32,
                false,
            )
        });
        guard = new_guard;
        let mut ticket = match Self::note_optional_reply(&mut guard, Opcode::Listxattr, reply) {
            Ok(t) => t,
            Err(VError::Errno(e)) if e == nix::errno::Errno::ENOENT => {
                drop(guard);
                self.hostvfs.name_cache_purge(vnode);
                return Err(VError::ENOENT);
            }
            Err(e) => return Err(e),
        };
        match ticket.reply().cloned() {
            Some(Reply::Xattr { size, data }) => {
                if buf_size == 0 {
                    return Ok(vec![0u8; size as usize]);
                }
                match data {
                    Some(bytes) if bytes.len() <= buf_size => Ok(bytes),
                    _ => {
                        ticket.mark_killed();
                        Err(VError::ERANGE)
                    }
                }
            }
            _ => Err(VError::EIO),
        }
    }

    pub fn setxattr(
        &self,
        vnode: &H::Vnode,
        node_id: NodeId,
        name: &OsStr,
        value: Vec<u8>,
        creds: Credentials,
    ) -> VResult<()> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        self.xattr_name_allowed(&guard, name)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }
        if !guard.capabilities.implemented(Opcode::Setxattr) {
            return Err(VError::ENOTSUP);
        }
        let name_owned = name.to_os_string();
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(
                &self.transport,
                Opcode::Setxattr,
                node_id,
                creds2,
                (name_owned, value),
                false,
            )
        });
        guard = new_guard;
        match Self::note_optional_reply(&mut guard, Opcode::Setxattr, reply) {
            Ok(_) => Ok(()),
            Err(VError::Errno(e)) if e == nix::errno::Errno::ENOENT => {
                drop(guard);
                self.hostvfs.name_cache_purge(vnode);
                Err(VError::ENOENT)
            }
            Err(e) => Err(e),
        }
    }

    pub fn removexattr(
        &self,
        vnode: &H::Vnode,
        node_id: NodeId,
        name: &OsStr,
        creds: Credentials,
    ) -> VResult<()> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        self.xattr_name_allowed(&guard, name)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }
        if !guard.capabilities.implemented(Opcode::Removexattr) {
            return Err(VError::ENOTSUP);
        }
        let name_owned = name.to_os_string();
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(
                &self.transport,
                Opcode::Removexattr,
                node_id,
                creds2,
                name_owned,
                false,
            )
        });
        guard = new_guard;
        match Self::note_optional_reply(&mut guard, Opcode::Removexattr, reply) {
            Ok(_) => Ok(()),
            Err(VError::Errno(e)) if e == nix::errno::Errno::ENOENT => {
                drop(guard);
                self.hostvfs.name_cache_purge(vnode);
                Err(VError::ENOENT)
            }
            Err(e) => Err(e),
        }
    }

    // ---------------------------------------------------------------
    // mutating name ops: mkdir, mknod, symlink, link, rmdir, remove,
    // rename
    // ---------------------------------------------------------------

    pub fn mkdir(&self, dvp_id: NodeId, name: &OsStr, mode_bits: u16, creds: Credentials) -> VResult<(NodeId, Attr)> {
        self.create_like(Opcode::Mkdir, dvp_id, name, mode_bits, creds)
    }

    pub fn mknod(&self, dvp_id: NodeId, name: &OsStr, mode_bits: u16, rdev: u32, creds: Credentials) -> VResult<(NodeId, Attr)> {
        let mut guard = self.lock();
        self.prologue(&guard, dvp_id, creds)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }
        let name_owned = name.to_os_string();
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(
                &self.transport,
                Opcode::Mknod,
                dvp_id,
                creds2,
                (name_owned, mode_bits, rdev),
                false,
            )
        });
        guard = new_guard;
        let reply = reply?;
        match reply.into_reply() {
            Some(Reply::Entry { node, attr, attr_valid, .. }) => {
                let now = std::time::Instant::now();
                let entry = guard
                    .nodes
                    .entry(node)
                    .or_insert_with(|| Node::new(node, dvp_id));
                entry.record_lookup_reply();
                entry.cached_attr = Some(attr_cache::cache(attr, attr_valid, now));
                Ok((node, attr))
            }
            _ => Err(VError::EIO),
        }
    }

    fn create_like(
        &self,
        op: Opcode,
        dvp_id: NodeId,
        name: &OsStr,
        mode_bits: u16,
        creds: Credentials,
    ) -> VResult<(NodeId, Attr)> {
        let mut guard = self.lock();
        self.prologue(&guard, dvp_id, creds)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }
        let name_owned = name.to_os_string();
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(&self.transport, op, dvp_id, creds2, (name_owned, mode_bits), false)
        });
        guard = new_guard;
        let reply = reply?;
        match reply.into_reply() {
            Some(Reply::Entry { node, attr, attr_valid, .. }) => {
                let now = std::time::Instant::now();
                let entry = guard
                    .nodes
                    .entry(node)
                    .or_insert_with(|| Node::new(node, dvp_id));
                entry.record_lookup_reply();
                entry.cached_attr = Some(attr_cache::cache(attr, attr_valid, now));
                Ok((node, attr))
            }
            _ => Err(VError::EIO),
        }
    }

    pub fn symlink(&self, dvp_id: NodeId, name: &OsStr, target: &OsStr, creds: Credentials) -> VResult<(NodeId, Attr)> {
        let mut guard = self.lock();
        self.prologue(&guard, dvp_id, creds)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }
        let name_owned = name.to_os_string();
        let target_owned = target.to_os_string();
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(
                &self.transport,
                Opcode::Symlink,
                dvp_id,
                creds2,
                (name_owned, target_owned),
                false,
            )
        });
        guard = new_guard;
        let reply = reply?;
        match reply.into_reply() {
            Some(Reply::Entry { node, attr, attr_valid, .. }) => {
                let now = std::time::Instant::now();
                let entry = guard
                    .nodes
                    .entry(node)
                    .or_insert_with(|| Node::new(node, dvp_id));
                entry.record_lookup_reply();
                entry.cached_attr = Some(attr_cache::cache(attr, attr_valid, now));
                Ok((node, attr))
            }
            _ => Err(VError::EIO),
        }
    }

    pub fn readlink(&self, node_id: NodeId, creds: Credentials) -> VResult<OsString> {
        let guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        let creds2 = creds;
        let (_guard, reply) = self.suspend(guard, || {
            ticket::simple_put_get(&self.transport, Opcode::Readlink, node_id, creds2)
        });
        match reply?.into_reply() {
            Some(Reply::Data { bytes }) => {
                Ok(std::ffi::OsString::from(String::from_utf8_lossy(&bytes).into_owned()))
            }
            _ => Err(VError::EIO),
        }
    }

    pub fn link(&self, node_id: NodeId, new_dvp_id: NodeId, new_name: &OsStr, creds: Credentials) -> VResult<Attr> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }
        let name_owned = new_name.to_os_string();
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(
                &self.transport,
                Opcode::Link,
                node_id,
                creds2,
                (new_dvp_id, name_owned),
                false,
            )
        });
        guard = new_guard;
        let reply = reply?;
        match reply.into_reply() {
            Some(Reply::Entry { attr, attr_valid, .. }) => {
                let now = std::time::Instant::now();
                if let Some(n) = guard.nodes.get_mut(&node_id) {
                    attr_cache::invalidate(&mut n.cached_attr);
                    n.cached_attr = Some(attr_cache::cache(attr, attr_valid, now));
                }
                Ok(attr)
            }
            _ => Err(VError::EIO),
        }
    }

    pub fn rmdir(&self, dvp_id: NodeId, name: &OsStr, target_vnode: Option<&H::Vnode>, creds: Credentials) -> VResult<()> {
        self.remove_like(Opcode::Rmdir, dvp_id, name, target_vnode, creds)
    }

    pub fn remove(&self, dvp_id: NodeId, name: &OsStr, target_vnode: Option<&H::Vnode>, creds: Credentials) -> VResult<()> {
        self.remove_like(Opcode::Unlink, dvp_id, name, target_vnode, creds)
    }

    fn remove_like(
        &self,
        op: Opcode,
        dvp_id: NodeId,
        name: &OsStr,
        target_vnode: Option<&H::Vnode>,
        creds: Credentials,
    ) -> VResult<()> {
        let mut guard = self.lock();
        self.prologue(&guard, dvp_id, creds)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }
        let name_owned = name.to_os_string();
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(&self.transport, op, dvp_id, creds2, name_owned, false)
        });
        guard = new_guard;
        reply?;
        if let Some(parent) = guard.nodes.get_mut(&dvp_id) {
            attr_cache::invalidate(&mut parent.cached_attr);
        }
        drop(guard);
        if let Some(v) = target_vnode {
            self.hostvfs.name_cache_purge(v);
        }
        Ok(())
    }

    pub fn rename(
        &self,
        old_dvp_id: NodeId,
        old_name: &OsStr,
        old_vnode: &H::Vnode,
        new_dvp_id: NodeId,
        new_name: &OsStr,
        existing_target: Option<&H::Vnode>,
        creds: Credentials,
    ) -> VResult<()> {
        let mut guard = self.lock();
        self.prologue(&guard, old_dvp_id, creds)?;
        if guard.config.read_only {
            return Err(VError::EROFS);
        }
        // DESIGN NOTES §9(b): reject if *either* name matches the
        // Apple-Double convention, when the mount opts in.
        if guard.config.hide_apple_double
            && (name_cache::is_apple_double(old_name) || name_cache::is_apple_double(new_name))
        {
            return Err(VError::EINVAL);
        }
        drop(guard);
        self.hostvfs.name_cache_purge(old_vnode);

        let old_name_owned = old_name.to_os_string();
        let new_name_owned = new_name.to_os_string();
        ticket::dispatch_and_wait(
            &self.transport,
            Opcode::Rename,
            old_dvp_id,
            creds,
            (old_name_owned, new_dvp_id, new_name_owned),
            false,
        )?;

        let mut guard = self.lock();

        if let Some(n) = guard.nodes.get_mut(&old_dvp_id) {
            attr_cache::invalidate(&mut n.cached_attr);
        }
        if let Some(n) = guard.nodes.get_mut(&new_dvp_id) {
            attr_cache::invalidate(&mut n.cached_attr);
        }
        drop(guard);
        if let Some(target) = existing_target {
            self.hostvfs.name_cache_purge(target);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // readdir
    // ---------------------------------------------------------------

    pub fn readdir(&self, node_id: NodeId, offset: i64, creds: Credentials) -> VResult<(Vec<crate::protocol::DirEntry>, bool)> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        let (new_guard, handle) =
            self.acquire_handle(guard, node_id, Mode::Read, Opcode::Opendir, creds);
        guard = new_guard;
        let handle = handle?;
        let creds2 = creds;
        let (_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(
                &self.transport,
                Opcode::Readdir,
                node_id,
                creds2,
                (handle.daemon_handle, offset),
                false,
            )
        });
        match reply?.into_reply() {
            Some(Reply::Readdir { entries, eof }) => Ok((entries, eof)),
            _ => Err(VError::EIO),
        }
    }

    // ---------------------------------------------------------------
    // strategy / select
    // ---------------------------------------------------------------

    pub fn strategy(&self, vnode: &H::Vnode, node_id: NodeId, uio: &mut H::Uio, creds: Credentials) -> VResult<()> {
        let guard = self.lock();
        if guard.is_dead() {
            drop(guard);
            self.hostvfs.strategy_error_buffer(uio);
            return Err(VError::ENXIO);
        }
        self.prologue(&guard, node_id, creds)?;
        drop(guard);
        self.hostvfs.strategy_dispatch(vnode, uio)
    }

    /// Always reports ready (spec §4.6 "select").
    pub fn select(&self) -> i32 {
        1
    }

    // ---------------------------------------------------------------
    // mmap / mnomap
    // ---------------------------------------------------------------

    pub fn mmap(&self, node_id: NodeId, prot: i32, creds: Credentials) -> VResult<()> {
        let guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        let mode = handle_table::mode_from_mmap_prot(prot);
        handle_table::preflight_ok(prot & libc::PROT_READ != 0, prot & libc::PROT_WRITE != 0, mode)?;
        let (_guard, result) = self.acquire_handle(guard, node_id, mode, Opcode::Open, creds);
        result.map(|_| ())
    }

    pub fn mnomap(&self, node_id: NodeId, prot: i32, creds: Credentials) -> VResult<()> {
        let guard = self.lock();
        if guard.is_dead() {
            return Ok(());
        }
        self.prologue(&guard, node_id, creds)?;
        let mode = handle_table::mode_from_mmap_prot(prot);
        let (_guard, result) = self.release_handle(guard, node_id, mode, Opcode::Release, creds);
        result
    }

    // ---------------------------------------------------------------
    // blktooff / offtoblk / blockmap
    // ---------------------------------------------------------------

    pub fn blktooff(&self, blkno: i64) -> i64 {
        let guard = self.lock();
        blkno * guard.block_size as i64
    }

    pub fn offtoblk(&self, offset: i64) -> i64 {
        let guard = self.lock();
        offset / guard.block_size as i64
    }

    pub fn blockmap(&self, node_id: NodeId, offset: i64, creds: Credentials) -> VResult<i64> {
        let guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        Ok(offset / guard.block_size as i64)
    }

    // ---------------------------------------------------------------
    // ioctl
    // ---------------------------------------------------------------

    pub fn ioctl(&self, node_id: NodeId, cmd: u32, direction_bits: u32, creds: Credentials) -> VResult<()> {
        let mut guard = self.lock();
        self.prologue(&guard, node_id, creds)?;
        if !guard.capabilities.implemented(Opcode::Ioctl) {
            return Err(VError::ENOTSUP);
        }
        // DESIGN NOTES §9(a): test direction bits with AND, not OR.
        const IOC_IN: u32 = 1 << 0;
        const IOC_OUT: u32 = 1 << 1;
        let has_in = direction_bits & IOC_IN != 0;
        let has_out = direction_bits & IOC_OUT != 0;
        debug!("ioctl: cmd={cmd:#x} in={has_in} out={has_out}");
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(&self.transport, Opcode::Ioctl, node_id, creds2, cmd, false)
        });
        guard = new_guard;
        Self::note_optional_reply(&mut guard, Opcode::Ioctl, reply).map(|_| ())
    }

    // ---------------------------------------------------------------
    // exchange
    // ---------------------------------------------------------------

    pub fn exchange(&self, v1_id: NodeId, name1: &OsStr, v2_id: NodeId, name2: &OsStr, creds: Credentials) -> VResult<()> {
        let mut guard = self.lock();
        self.prologue(&guard, v1_id, creds)?;
        if !guard.capabilities.implemented(Opcode::Exchange) {
            return Err(VError::ENOTSUP);
        }
        // DESIGN NOTES §9(b): reject if *either* name matches.
        if name_cache::is_apple_double(name1) || name_cache::is_apple_double(name2) {
            return Err(VError::EINVAL);
        }
        let creds2 = creds;
        let (new_guard, reply) = self.suspend(guard, || {
            ticket::dispatch_and_wait(&self.transport, Opcode::Exchange, v1_id, creds2, v2_id, false)
        });
        guard = new_guard;
        Self::note_optional_reply(&mut guard, Opcode::Exchange, reply).map(|_| ())
    }

    // ---------------------------------------------------------------
    // pathconf / statvfs
    // ---------------------------------------------------------------

    pub fn pathconf(&self) -> PathconfAnswer {
        let guard = self.lock();
        PathconfAnswer::for_protocol_name_max(guard.protocol_name_max)
    }

    /// There is no STATFS opcode (spec §6 "Downward"): synthesized from the
    /// mount's own negotiated block/io sizes rather than a daemon round
    /// trip (SPEC_FULL §4.7).
    pub fn statvfs(&self, creds: Credentials) -> VResult<StatfsAnswer> {
        let guard = self.lock();
        self.prologue(&guard, ROOT_NODE_ID, creds)?;
        Ok(StatfsAnswer {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: guard.nodes.len() as u64,
            ffree: 0,
            bsize: guard.block_size,
            frsize: guard.block_size,
            namelen: guard.protocol_name_max,
        })
    }

    // ---------------------------------------------------------------
    // allocate (stub) / revoke (host default)
    // ---------------------------------------------------------------

    /// Spec §6 "defaults: allocate -> stub": the daemon protocol has no
    /// preallocation opcode, so this always reports unsupported rather
    /// than round-tripping.
    pub fn allocate(&self) -> VResult<()> {
        Err(VError::ENOTSUP)
    }
}

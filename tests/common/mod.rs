//! Fake `Transport`/`HostVfs` doubles shared by the integration tests
//! (spec §8: "a fake channel that a test drives explicitly", matching the
//! teacher's own `tests/integration_tests.rs` style).

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::{OsStr, OsString};
use std::time::{Duration, Instant};

use vnodebridge::{
    AccessFlags, Credentials, HostVfs, NameCacheAnswer, NodeId, Opcode, Reply, Request, Transport,
    TransportResult, VError, VResult, VnodeType,
};

/// A vnode in the fake host: just the node identifier. Upgrade is always
/// possible, unlike a real weak reference, except when explicitly dropped
/// via [`FakeHostVfs::simulate_reclaim`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FakeVnode(pub NodeId);

/// Direction data flows relative to the kernel-side buffer, mirroring a
/// real `uio`'s `UIO_READ`/`UIO_WRITE` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Data flows into the uio (a VFS `read`).
    IntoUio,
    /// Data flows out of the uio (a VFS `write`).
    OutOfUio,
}

/// A scatter/gather descriptor standing in for the host's `uio_t`.
pub struct FakeUio {
    pub dir: Direction,
    pub offset: u64,
    pub buf: Vec<u8>,
    pub cursor: usize,
}

impl FakeUio {
    pub fn for_read(offset: u64, want: usize) -> Self {
        FakeUio {
            dir: Direction::IntoUio,
            offset,
            buf: vec![0u8; want],
            cursor: 0,
        }
    }

    pub fn for_write(offset: u64, data: Vec<u8>) -> Self {
        FakeUio {
            dir: Direction::OutOfUio,
            offset,
            buf: data,
            cursor: 0,
        }
    }

    pub fn written(&self) -> &[u8] {
        &self.buf[..self.cursor]
    }
}

#[derive(Default)]
struct HostState {
    positive: HashMap<(NodeId, OsString), (FakeVnode, Instant)>,
    negative: HashMap<(NodeId, OsString), Instant>,
    purged: Vec<NodeId>,
    ubc_invalidated: Vec<NodeId>,
    ubc_sizes: Vec<(NodeId, u64)>,
    authorize_allows: bool,
    cached_kind: HashMap<NodeId, VnodeType>,
    reclaimed: HashSet<NodeId>,
}

/// Fake host VFS collaborator. Every vnode is just its node identifier;
/// the name cache and UBC calls are recorded for assertions instead of
/// doing anything real.
pub struct FakeHostVfs {
    state: RefCell<HostState>,
}

impl FakeHostVfs {
    pub fn new() -> Self {
        FakeHostVfs {
            state: RefCell::new(HostState {
                authorize_allows: true,
                ..Default::default()
            }),
        }
    }

    pub fn deny_access(&self) {
        self.state.borrow_mut().authorize_allows = false;
    }

    pub fn set_cached_kind(&self, node: NodeId, kind: VnodeType) {
        self.state.borrow_mut().cached_kind.insert(node, kind);
    }

    pub fn purged_nodes(&self) -> Vec<NodeId> {
        self.state.borrow().purged.clone()
    }

    pub fn ubc_invalidated(&self) -> Vec<NodeId> {
        self.state.borrow().ubc_invalidated.clone()
    }

    pub fn ubc_sizes(&self) -> Vec<(NodeId, u64)> {
        self.state.borrow().ubc_sizes.clone()
    }

    /// Simulates the parent vnode having been reclaimed, so `..` lookups
    /// must fall back to a GETATTR on the stored parent identifier.
    pub fn simulate_reclaim(&self, node: NodeId) {
        self.state.borrow_mut().reclaimed.insert(node);
    }
}

impl HostVfs for FakeHostVfs {
    type Vnode = FakeVnode;
    type WeakVnode = FakeVnode;
    type Uio = FakeUio;

    fn downgrade(&self, v: &FakeVnode) -> FakeVnode {
        *v
    }

    fn upgrade(&self, w: &FakeVnode) -> Option<FakeVnode> {
        if self.state.borrow().reclaimed.contains(&w.0) {
            None
        } else {
            Some(*w)
        }
    }

    fn root_vnode(&self) -> FakeVnode {
        FakeVnode(vnodebridge::ROOT_NODE_ID)
    }

    fn vnode_for(&self, node: NodeId, _parent: &FakeVnode, _kind: VnodeType) -> FakeVnode {
        FakeVnode(node)
    }

    fn cached_vnode_type(&self, v: &FakeVnode) -> VnodeType {
        self.state
            .borrow()
            .cached_kind
            .get(&v.0)
            .copied()
            .unwrap_or(VnodeType::RegularFile)
    }

    fn name_cache_lookup(&self, parent: &FakeVnode, name: &OsStr) -> NameCacheAnswer<FakeVnode> {
        let mut state = self.state.borrow_mut();
        let key = (parent.0, name.to_os_string());
        let now = Instant::now();
        if let Some((v, expires_at)) = state.positive.get(&key).copied() {
            if now < expires_at {
                return NameCacheAnswer::Hit(v);
            }
            state.positive.remove(&key);
        }
        if let Some(expires_at) = state.negative.get(&key).copied() {
            if now < expires_at {
                return NameCacheAnswer::NegativeHit;
            }
            state.negative.remove(&key);
        }
        NameCacheAnswer::Miss
    }

    fn name_cache_enter_positive(&self, parent: &FakeVnode, name: &OsStr, child: &FakeVnode, ttl: Duration) {
        let mut state = self.state.borrow_mut();
        let key = (parent.0, name.to_os_string());
        state.negative.remove(&key);
        state.positive.insert(key, (*child, Instant::now() + ttl));
    }

    fn name_cache_enter_negative(&self, parent: &FakeVnode, name: &OsStr, ttl: Duration) {
        let mut state = self.state.borrow_mut();
        let key = (parent.0, name.to_os_string());
        state.positive.remove(&key);
        state.negative.insert(key, Instant::now() + ttl);
    }

    fn name_cache_purge(&self, vnode: &FakeVnode) {
        let mut state = self.state.borrow_mut();
        state.purged.push(vnode.0);
        state.positive.retain(|_, (v, _)| v.0 != vnode.0);
    }

    fn authorize(&self, _vnode: &FakeVnode, _creds: Credentials, _access: AccessFlags) -> bool {
        self.state.borrow().authorize_allows
    }

    fn uio_resid(&self, uio: &FakeUio) -> usize {
        uio.buf.len() - uio.cursor
    }

    fn uio_offset(&self, uio: &FakeUio) -> u64 {
        uio.offset
    }

    fn uio_set_offset(&self, uio: &mut FakeUio, offset: u64) {
        uio.offset = offset;
    }

    fn uiomove(&self, buf: &mut [u8], uio: &mut FakeUio) -> VResult<usize> {
        let n = buf.len().min(uio.buf.len() - uio.cursor);
        match uio.dir {
            Direction::IntoUio => {
                uio.buf[uio.cursor..uio.cursor + n].copy_from_slice(&buf[..n]);
            }
            Direction::OutOfUio => {
                buf[..n].copy_from_slice(&uio.buf[uio.cursor..uio.cursor + n]);
            }
        }
        uio.cursor += n;
        uio.offset += n as u64;
        Ok(n)
    }

    fn cluster_read(&self, _vnode: &FakeVnode, uio: &mut FakeUio, file_size: u64) -> VResult<usize> {
        let avail = file_size.saturating_sub(uio.offset) as usize;
        let n = avail.min(uio.buf.len() - uio.cursor);
        uio.cursor += n;
        uio.offset += n as u64;
        Ok(n)
    }

    fn cluster_write(&self, _vnode: &FakeVnode, uio: &mut FakeUio, _file_size: u64) -> VResult<usize> {
        let n = uio.buf.len() - uio.cursor;
        uio.cursor += n;
        uio.offset += n as u64;
        Ok(n)
    }

    fn cluster_pagein(&self, _vnode: &FakeVnode, _file_size: u64) -> VResult<()> {
        Ok(())
    }

    fn cluster_pageout(&self, _vnode: &FakeVnode, _file_size: u64) -> VResult<()> {
        Ok(())
    }

    fn ubc_invalidate(&self, vnode: &FakeVnode) {
        self.state.borrow_mut().ubc_invalidated.push(vnode.0);
    }

    fn ubc_set_size(&self, vnode: &FakeVnode, size: u64) {
        self.state.borrow_mut().ubc_sizes.push((vnode.0, size));
    }

    fn strategy_error_buffer(&self, _uio: &mut FakeUio) {}

    fn strategy_dispatch(&self, _vnode: &FakeVnode, _uio: &mut FakeUio) -> VResult<()> {
        Ok(())
    }
}

/// A single scripted exchange: the opcode the test expects the dispatcher
/// to send next, and the reply (or failure) to hand back.
pub struct Exchange {
    pub opcode: Opcode,
    pub reply: VResult<Reply>,
}

pub fn exchange(opcode: Opcode, reply: VResult<Reply>) -> Exchange {
    Exchange { opcode, reply }
}

/// A transport whose replies are scripted in advance and whose sent
/// opcodes are recorded for the handle/forget-accounting properties.
pub struct ScriptedTransport {
    script: RefCell<VecDeque<Exchange>>,
    sent: RefCell<Vec<Opcode>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Exchange>) -> Self {
        ScriptedTransport {
            script: RefCell::new(script.into_iter().collect()),
            sent: RefCell::new(Vec::new()),
        }
    }

    pub fn sent_opcodes(&self) -> Vec<Opcode> {
        self.sent.borrow().clone()
    }

    pub fn sent_count(&self, op: Opcode) -> usize {
        self.sent.borrow().iter().filter(|o| **o == op).count()
    }

    pub fn is_exhausted(&self) -> bool {
        self.script.borrow().is_empty()
    }
}

impl Transport for ScriptedTransport {
    fn dispatch_and_wait<P>(&self, req: Request<P>, _discard_reply: bool) -> TransportResult<Reply> {
        self.sent.borrow_mut().push(req.opcode);
        let next = self
            .script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("transport script exhausted, got {:?}", req.opcode));
        assert_eq!(
            next.opcode, req.opcode,
            "dispatcher sent {:?}, script expected {:?}",
            req.opcode, next.opcode
        );
        next.reply
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

pub fn creds() -> Credentials {
    Credentials {
        uid: 501,
        gid: 20,
        pid: 4242,
    }
}

pub fn daemon_creds() -> Credentials {
    Credentials {
        uid: 0,
        gid: 0,
        pid: 1,
    }
}

pub fn sample_attr(kind: VnodeType, size: u64) -> vnodebridge::Attr {
    vnodebridge::Attr {
        size,
        blocks: size.div_ceil(512),
        atime: std::time::SystemTime::UNIX_EPOCH,
        mtime: std::time::SystemTime::UNIX_EPOCH,
        ctime: std::time::SystemTime::UNIX_EPOCH,
        kind,
        perm: 0o644,
        nlink: 1,
        uid: 501,
        gid: 20,
        rdev: 0,
    }
}

pub fn enosys() -> VError {
    VError::Errno(nix::errno::Errno::ENOSYS)
}

/// Builds a mount and immediately drives the INIT handshake, prepending
/// the INIT exchange to `rest` so call sites only script what comes after.
pub fn new_mount(
    mut rest: Vec<Exchange>,
) -> vnodebridge::Mount<FakeHostVfs, ScriptedTransport> {
    let mut script = vec![exchange(
        Opcode::Init,
        Ok(Reply::Init {
            block_size: 4096,
            io_size: 65536,
            max_write: 65536,
        }),
    )];
    script.append(&mut rest);
    let transport = ScriptedTransport::new(script);
    let hostvfs = FakeHostVfs::new();
    let mount = vnodebridge::Mount::new(MountConfig::default(), daemon_creds(), transport, hostvfs);
    mount.init(daemon_creds()).expect("init handshake");
    mount
}

//! Vnode-operation layer for a userspace-filesystem bridge.
//!
//! This crate is the in-kernel-resident shim between a host VFS and an
//! out-of-kernel filesystem daemon: it turns VFS upcalls (lookup, getattr,
//! read, write, ...) into daemon requests and the daemon's replies back
//! into VFS results. The wire byte layout, the device-node driver that
//! carries those bytes, mount-option parsing, the daemon process itself,
//! record locking, quotas, and NFS export are all out of scope (see
//! `DESIGN.md`) — this crate owns the dispatch and bookkeeping in between.
//!
//! [`Mount`] owns the big per-mount lock and the node tree; its methods in
//! [`dispatcher`] are the vnode-op entry points. [`HostVfs`] and
//! [`Transport`] are the two collaborator boundaries a concrete embedding
//! implements.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![allow(clippy::too_many_arguments)]

mod access_flags;
mod attr_cache;
mod capability;
mod dispatcher;
mod errno;
mod handle_table;
mod hostvfs;
mod mount;
mod name_cache;
mod node;
mod opcode;
mod open_flags;
mod protocol;
mod ticket;
mod transport;

pub use crate::access_flags::AccessFlags;
pub use crate::capability::CapabilityTable;
pub use crate::dispatcher::{LookupOutcome, SetattrChanges};
pub use crate::errno::{VError, VResult};
pub use crate::handle_table::{HandleTable, Mode as HandleMode, OpenReply};
pub use crate::hostvfs::{HostVfs, NameCacheAnswer};
pub use crate::mount::{Lifecycle, Mount, MountConfig, MountState};
pub use crate::name_cache::Intent as LookupIntent;
pub use crate::node::{Attr, Node, NodeFlags, NodeId, VnodeType, ROOT_NODE_ID};
pub use crate::opcode::Opcode;
pub use crate::open_flags::{OpenAccMode, OpenFlags};
pub use crate::protocol::{DirEntry, OpenHandle, PathconfAnswer, Reply, StatfsAnswer};
pub use crate::ticket::Ticket;
pub use crate::transport::{Credentials, Request, Transport, TransportResult};

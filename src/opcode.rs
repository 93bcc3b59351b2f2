//! RPC opcodes sent across the transport to the daemon.
//!
//! Payload layout is the transport's concern (out of scope here); this
//! module only names which opcode a handler sends and lets the capability
//! table (`crate::capability`) key its bitset off the optional ones.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// One opcode per downward RPC, per spec §6 "Downward (to transport/daemon)".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum Opcode {
    Lookup = 1,
    Forget,
    Getattr,
    Setattr,
    Readlink,
    Symlink,
    Mknod,
    Mkdir,
    Unlink,
    Rmdir,
    Rename,
    Link,
    Open,
    Read,
    Write,
    Release,
    Fsync,
    Flush,
    Init,
    Opendir,
    Readdir,
    Releasedir,
    Fsyncdir,
    Getxattr,
    Setxattr,
    Listxattr,
    Removexattr,
    Create,
    Ioctl,
    Exchange,
}

/// Ops whose capability is tracked per mount (spec §4.4): a daemon reply of
/// `ENOSYS` clears the bit and all further calls short-circuit locally.
/// Every other opcode is mandatory and is always sent.
pub const OPTIONAL_OPS: &[Opcode] = &[
    Opcode::Flush,
    Opcode::Fsync,
    Opcode::Fsyncdir,
    Opcode::Create,
    Opcode::Exchange,
    Opcode::Getxattr,
    Opcode::Setxattr,
    Opcode::Listxattr,
    Opcode::Removexattr,
    Opcode::Ioctl,
];

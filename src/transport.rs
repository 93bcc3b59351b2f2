//! The transport/daemon collaborator boundary (spec §1 "Transport",
//! "Daemon"). Wire byte layout is explicitly out of scope (spec §1
//! Non-goals, §6 "Downward"); this module only fixes the shape of a
//! request/reply pair well enough for the ticket helper and dispatcher to
//! be written and tested against a fake.

use std::time::Duration;

use crate::errno::VError;
use crate::node::NodeId;
use crate::opcode::Opcode;
use crate::protocol::Reply;

/// Credentials of the calling thread, handed to every RPC (spec §3 "Node",
/// §4.6 prologue "blanket denial").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// Everything a handler needs to build a request: the node addressed and
/// an opaque payload the transport serializes. Payload contents are not
/// this crate's concern; handlers build whatever the opcode needs and pass
/// it through unopened.
#[derive(Debug, Clone)]
pub struct Request<P> {
    pub opcode: Opcode,
    pub node: NodeId,
    pub creds: Credentials,
    pub payload: P,
}

/// A reply as the ticket helper sees it: either the daemon answered with a
/// typed body, or the transport surfaces one of the failure kinds spec §7
/// names (`EIO` protocol violation, `ENOTCONN`, or a concrete daemon
/// errno).
pub type TransportResult<R> = Result<R, VError>;

/// The collaborator contract for "enqueue a request for the daemon, block
/// until a reply or failure, expose the reply". Concrete wire encoding,
/// queueing, and the daemon process itself are out of scope (spec §1); an
/// implementation of this trait is supplied by the platform glue that
/// owns the actual character-device transport.
///
/// Implementations must honor: reply delivery is matched to the correct
/// waiter but reply *ordering* across tickets is not guaranteed (spec §5).
pub trait Transport {
    /// Send `req` and block the calling thread until a reply arrives or a
    /// transport-level failure occurs. `discard_reply` is set by the
    /// ticket helper when the caller already knows it will not read the
    /// reply body (spec §4.1 "killed"); implementations should free the
    /// reply promptly without copying it to the caller in that case.
    fn dispatch_and_wait<P>(&self, req: Request<P>, discard_reply: bool) -> TransportResult<Reply>;

    /// How long the mount will wait for the daemon before surfacing
    /// `ENOTCONN` (spec §5 "Timeouts are not imposed by the core").
    fn response_timeout(&self) -> Duration;
}

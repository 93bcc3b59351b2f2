//! Scoped RPC ticket (spec §4.1).
//!
//! A single abstraction that builds a request, awaits the reply, and
//! releases it exactly once — the design notes call out the C source's
//! ad-hoc release-at-every-return-site as the most fragile part of the
//! original; this type exists to make that impossible to get wrong.

use crate::errno::VResult;
use crate::node::NodeId;
use crate::opcode::Opcode;
use crate::protocol::Reply;
use crate::transport::{Credentials, Request, Transport};

/// A ticket owns (at most) one reply. Dropping it is always safe,
/// including after a failed wait, because a failed wait never produces a
/// `Ticket` at all — see [`dispatch_and_wait`].
pub struct Ticket {
    reply: Option<Reply>,
    killed: bool,
}

impl Ticket {
    fn new() -> Self {
        Ticket {
            reply: None,
            killed: false,
        }
    }

    /// Marks the ticket `killed`: the reply body is discarded promptly
    /// without being copied out to the caller (spec §4.1, used for
    /// oversized-and-unwanted replies such as an xattr probe that
    /// overflowed the caller's buffer).
    pub fn mark_killed(&mut self) {
        self.killed = true;
        self.reply = None;
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Borrow the reply this ticket holds, or `None` if it was killed.
    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }

    /// Consumes the ticket, taking ownership of the reply if any.
    pub fn into_reply(mut self) -> Option<Reply> {
        self.reply.take()
    }

    fn store(&mut self, reply: Reply) {
        if self.killed {
            drop(reply);
        } else {
            self.reply = Some(reply);
        }
    }
}

/// `init` + `dispatch-and-wait`: builds the request, blocks until a reply
/// or failure, and returns a ticket borrowing the reply. `killed` may be
/// set up front when the caller already knows any reply body would be
/// unwanted.
pub fn dispatch_and_wait<T, P>(
    transport: &T,
    opcode: Opcode,
    node: NodeId,
    creds: Credentials,
    payload: P,
    killed: bool,
) -> VResult<Ticket>
where
    T: Transport,
{
    let mut ticket = Ticket::new();
    if killed {
        ticket.mark_killed();
    }
    let req = Request {
        opcode,
        node,
        creds,
        payload,
    };
    let reply = transport.dispatch_and_wait(req, killed)?;
    ticket.store(reply);
    Ok(ticket)
}

/// `simple-put-get`: a request with no payload.
pub fn simple_put_get<T>(
    transport: &T,
    opcode: Opcode,
    node: NodeId,
    creds: Credentials,
) -> VResult<Ticket>
where
    T: Transport,
{
    dispatch_and_wait(transport, opcode, node, creds, (), false)
}

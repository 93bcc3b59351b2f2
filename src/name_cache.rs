//! Name-lookup bridge policy (spec §4.5).
//!
//! These are the pure decision rules the `lookup` vnode-op handler
//! (`crate::dispatcher`) applies around its name-cache consult and LOOKUP
//! RPC. Kept free of `Mount`/`HostVfs` generics so each rule is directly
//! unit-testable.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

use crate::node::NodeId;

/// Why a lookup is being performed (spec §4.5 "dvp + name + intent").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Lookup,
    Create,
    Delete,
    Rename,
}

/// Which of the special path components `name` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Dot,
    DotDot,
    Named,
}

/// Classifies `name` as `.`, `..`, or an ordinary component.
pub fn classify(name: &OsStr) -> Component {
    match name.as_bytes() {
        b"." => Component::Dot,
        b".." => Component::DotDot,
        _ => Component::Named,
    }
}

/// Step 1: reject names longer than the protocol maximum.
pub fn is_name_too_long(name: &OsStr, protocol_name_max: u32) -> bool {
    name.as_bytes().len() > protocol_name_max as usize
}

/// Step 2: the "._" Apple-Double convention, only rejected when the mount
/// opts in.
pub fn is_apple_double(name: &OsStr) -> bool {
    name.as_bytes().starts_with(b"._")
}

/// Step 7: read-only mount with a mutating intent at the last component.
pub fn rejects_for_read_only(read_only: bool, intent: Intent, last_component: bool) -> bool {
    read_only && last_component && matches!(intent, Intent::Create | Intent::Rename | Intent::Delete)
}

/// How to interpret a LOOKUP reply's node identifier (spec §4.5 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// Node identifier zero: the name does not exist.
    Negative,
    /// The daemon answered with the reserved root identifier, which is
    /// never legal as a lookup result — a protocol violation.
    ProtocolErrorRoot,
    /// A concrete, ordinary node.
    Found(NodeId),
}

/// Interprets a LOOKUP reply's node identifier against the reserved zero
/// and root identifiers.
pub fn classify_lookup_reply(node: NodeId, root: NodeId) -> ReplyClass {
    if node.0 == 0 {
        ReplyClass::Negative
    } else if node == root {
        ReplyClass::ProtocolErrorRoot
    } else {
        ReplyClass::Found(node)
    }
}

/// Step 6: how a negative result at the last component interacts with
/// intent. Returns `Some(true)` for "just-return" (name absent, parent
/// usable), `Some(false)` for a plain ENOENT, and `None` when the negative
/// result doesn't apply (not the last component, or a plain lookup which
/// always just fails).
pub fn negative_last_component_outcome(intent: Intent, last_component: bool) -> Option<bool> {
    if !last_component {
        return None;
    }
    match intent {
        Intent::Create | Intent::Rename => Some(true),
        Intent::Lookup | Intent::Delete => Some(false),
    }
}

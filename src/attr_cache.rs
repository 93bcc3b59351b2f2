//! Per-vnode attribute cache (spec §4.3).

use std::time::{Duration, Instant};

use crate::node::Attr;

/// A cached stat plus its monotonic expiry deadline. Fresh iff
/// `now <= deadline` (spec §3 "Attribute-cache entry").
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub attr: Attr,
    deadline: Instant,
}

impl Entry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now <= self.deadline
    }
}

/// Stores fresh attributes and sets the deadline to `now + valid_interval`
/// (spec §4.3 `cache`).
pub fn cache(attr: Attr, valid_interval: Duration, now: Instant) -> Entry {
    Entry {
        attr,
        deadline: now + valid_interval,
    }
}

/// `load`: returns the cached attributes iff the entry is still fresh.
pub fn load(entry: Option<&Entry>, now: Instant) -> Option<Attr> {
    entry.filter(|e| e.is_fresh(now)).map(|e| e.attr)
}

/// `invalidate`: the caller stores `None` in place of zeroing a deadline,
/// since an absent entry and a zero-deadline entry are observationally
/// identical to `load`. Kept as a free function so call sites read like
/// the spec's verb.
pub fn invalidate(slot: &mut Option<Entry>) {
    *slot = None;
}

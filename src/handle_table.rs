//! Per-vnode file-handle table (spec §4.2).
//!
//! Three slots, one per access mode. A slot is *valid* iff its open-count
//! is nonzero, and corresponds to exactly one outstanding OPEN/OPENDIR at
//! the daemon (spec §3 "File handle").

use log::debug;

use crate::errno::{VError, VResult};
use crate::opcode::Opcode;

/// Access mode a handle was opened under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Read,
    Write,
    ReadWrite,
}

const MODES: [Mode; 3] = [Mode::Read, Mode::Write, Mode::ReadWrite];

fn slot_index(mode: Mode) -> usize {
    match mode {
        Mode::Read => 0,
        Mode::Write => 1,
        Mode::ReadWrite => 2,
    }
}

/// One table entry: `Empty` or `Open(count)`, per the state machine in
/// spec §4.6 "State machine — file handle slot".
#[derive(Debug, Clone, Copy, Default)]
enum Slot {
    #[default]
    Empty,
    Open {
        daemon_handle: u64,
        open_flags: u32,
        count: u32,
    },
}

/// The per-vnode three-slot table.
#[derive(Debug, Default)]
pub struct HandleTable {
    slots: [Slot; 3],
}

/// What the daemon returned for a successful OPEN/OPENDIR, handed to
/// [`HandleTable::get`]'s caller-supplied opener closure.
#[derive(Debug, Clone, Copy)]
pub struct OpenReply {
    pub daemon_handle: u64,
    pub open_flags: u32,
}

/// A reference to a valid slot's contents, returned by `get`.
#[derive(Debug, Clone, Copy)]
pub struct Handle {
    pub daemon_handle: u64,
    pub open_flags: u32,
}

impl HandleTable {
    /// Increments an already-valid slot's open count and returns its
    /// handle. Callers must check `handle(mode)` is `Some` first — this
    /// never sends OPEN, so it never needs the big lock released.
    pub fn bump(&mut self, mode: Mode) -> Handle {
        let idx = slot_index(mode);
        match &mut self.slots[idx] {
            Slot::Open {
                daemon_handle,
                open_flags,
                count,
            } => {
                *count += 1;
                Handle {
                    daemon_handle: *daemon_handle,
                    open_flags: *open_flags,
                }
            }
            Slot::Empty => unreachable!("bump called on an empty slot"),
        }
    }

    /// Installs a freshly-opened handle with count 1, used by `create`'s
    /// fast path (spec §4.6 "create": "install the returned handle in the
    /// read-write slot ... to be claimed by the impending OPEN").
    pub fn install(&mut self, mode: Mode, reply: OpenReply) {
        let idx = slot_index(mode);
        self.slots[idx] = Slot::Open {
            daemon_handle: reply.daemon_handle,
            open_flags: reply.open_flags,
            count: 1,
        };
    }

    /// Installs a freshly-opened handle, or — if another caller raced
    /// ahead and populated the slot while the big lock was released for
    /// the OPEN RPC (spec §5) — folds into that slot instead and bumps
    /// its count, so the losing OPEN doesn't leak a daemon handle.
    pub fn install_or_bump(&mut self, mode: Mode, reply: OpenReply) -> Handle {
        let idx = slot_index(mode);
        if let Slot::Open {
            daemon_handle,
            open_flags,
            count,
        } = &mut self.slots[idx]
        {
            *count += 1;
            return Handle {
                daemon_handle: *daemon_handle,
                open_flags: *open_flags,
            };
        }
        self.slots[idx] = Slot::Open {
            daemon_handle: reply.daemon_handle,
            open_flags: reply.open_flags,
            count: 1,
        };
        Handle {
            daemon_handle: reply.daemon_handle,
            open_flags: reply.open_flags,
        }
    }

    /// Spec §4.2 `put`: decrements the slot; returns the daemon handle to
    /// release if the count reached zero, clearing the slot immediately
    /// so a racing `get` doesn't see a handle that's about to be released.
    /// `None` means either the slot is still held by another opener or was
    /// already empty — either way there's nothing to release.
    pub fn begin_put(&mut self, mode: Mode) -> Option<u64> {
        let idx = slot_index(mode);
        match &mut self.slots[idx] {
            Slot::Empty => None,
            Slot::Open {
                daemon_handle,
                count,
                ..
            } => {
                *count -= 1;
                if *count == 0 {
                    let dh = *daemon_handle;
                    self.slots[idx] = Slot::Empty;
                    Some(dh)
                } else {
                    None
                }
            }
        }
    }

    /// True iff the slot for `mode` currently holds a valid handle.
    pub fn is_valid(&self, mode: Mode) -> bool {
        matches!(self.slots[slot_index(mode)], Slot::Open { .. })
    }

    pub fn handle(&self, mode: Mode) -> Option<Handle> {
        match self.slots[slot_index(mode)] {
            Slot::Open {
                daemon_handle,
                open_flags,
                ..
            } => Some(Handle {
                daemon_handle,
                open_flags,
            }),
            Slot::Empty => None,
        }
    }

    /// Every currently-valid handle, for fsync/reclaim which iterate all
    /// modes (spec §4.6 "fsync", "reclaim").
    pub fn valid_handles(&self) -> impl Iterator<Item = (Mode, Handle)> + '_ {
        MODES.iter().filter_map(move |&m| self.handle(m).map(|h| (m, h)))
    }

    /// Clears every valid slot and returns what it held, for reclaim
    /// (spec §4.2 invariant) to release with the big lock dropped. The
    /// slots are empty the instant this returns, before any RELEASE RPC
    /// is even sent (spec §7 "Reclaim is best-effort").
    pub fn take_all(&mut self) -> Vec<(Mode, u64)> {
        let mut out = Vec::new();
        for &mode in &MODES {
            let idx = slot_index(mode);
            if let Slot::Open { daemon_handle, .. } = self.slots[idx] {
                out.push((mode, daemon_handle));
                self.slots[idx] = Slot::Empty;
            }
        }
        out
    }
}

/// Spec §4.2 `xlate-from-fflags`: maps host open-flags to a table mode.
/// Zero fflags map to read-only per the documented fallback.
pub fn mode_from_fflags(fflags: i32) -> Mode {
    use crate::open_flags::{OpenAccMode, OpenFlags};
    match OpenFlags(fflags).acc_mode() {
        OpenAccMode::O_WRONLY => Mode::Write,
        OpenAccMode::O_RDWR => Mode::ReadWrite,
        OpenAccMode::O_RDONLY => Mode::Read,
    }
}

/// Spec §4.2 `xlate-from-mmap-prot`: maps mmap protection bits to a mode.
pub fn mode_from_mmap_prot(prot: i32) -> Mode {
    let readable = prot & libc::PROT_READ != 0;
    let writable = prot & libc::PROT_WRITE != 0;
    match (readable, writable) {
        (true, true) => Mode::ReadWrite,
        (false, true) => Mode::Write,
        _ => Mode::Read,
    }
}

/// Maps a table mode to the opcode used to open it, for logging/tests.
pub fn open_opcode_for(is_dir: bool) -> Opcode {
    if is_dir {
        Opcode::Opendir
    } else {
        Opcode::Open
    }
}

/// Maps a table mode to the opcode used to release it.
pub fn release_opcode_for(is_dir: bool) -> Opcode {
    if is_dir {
        Opcode::Releasedir
    } else {
        Opcode::Release
    }
}

pub(crate) fn debug_released(mode: Mode, daemon_handle: u64) {
    debug!("handle_table: released {mode:?} handle {daemon_handle:#x}");
}

/// Authorization check performed before `get`, so a caller (e.g. mmap) can
/// avoid an OPEN it would immediately have to undo (spec §4.2 `preflight`).
pub fn preflight_ok(readable: bool, writable: bool, mode: Mode) -> VResult<()> {
    let ok = match mode {
        Mode::Read => readable,
        Mode::Write => writable,
        Mode::ReadWrite => readable && writable,
    };
    if ok {
        Ok(())
    } else {
        Err(VError::EACCES)
    }
}

//! Per-mount capability table (spec §4.4).
//!
//! A bitset of optional daemon operations. `ENOSYS` on any of them clears
//! the bit permanently (monotonic within a mount lifetime, never set back
//! once cleared — spec §4.4, testable property §8.3).

use log::debug;

use crate::opcode::{Opcode, OPTIONAL_OPS};

fn bit_index(op: Opcode) -> usize {
    OPTIONAL_OPS
        .iter()
        .position(|&o| o == op)
        .expect("op passed to CapabilityTable must be one of OPTIONAL_OPS")
}

/// Per-mount bitset, one bit per entry in [`OPTIONAL_OPS`].
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    implemented: Vec<bool>,
}

impl Default for CapabilityTable {
    fn default() -> Self {
        // Optimistic until proven otherwise: every optional op starts
        // implemented, matching the teacher's initial-capability-bitset
        // convention of assuming the daemon supports everything until an
        // ENOSYS says otherwise.
        CapabilityTable {
            implemented: vec![true; OPTIONAL_OPS.len()],
        }
    }
}

impl CapabilityTable {
    /// `implemented(op)`: true unless the bit has been cleared.
    pub fn implemented(&self, op: Opcode) -> bool {
        self.implemented[bit_index(op)]
    }

    /// Clears the bit for `op`. Idempotent; never sets a bit back on.
    pub fn clear(&mut self, op: Opcode) {
        let idx = bit_index(op);
        if self.implemented[idx] {
            debug!("capability: {op:?} downgraded to unimplemented for this mount");
        }
        self.implemented[idx] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_implemented_and_is_monotonic() {
        let mut caps = CapabilityTable::default();
        assert!(caps.implemented(Opcode::Create));
        caps.clear(Opcode::Create);
        assert!(!caps.implemented(Opcode::Create));
        // Clearing again, or querying again, never sets it back.
        caps.clear(Opcode::Create);
        assert!(!caps.implemented(Opcode::Create));
    }

    #[test]
    fn bits_are_independent() {
        let mut caps = CapabilityTable::default();
        caps.clear(Opcode::Fsync);
        assert!(!caps.implemented(Opcode::Fsync));
        assert!(caps.implemented(Opcode::Flush));
    }
}

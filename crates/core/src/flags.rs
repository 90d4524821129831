//! Story feature flags.
//!
//! An integer bitmask passed to `load`. Several bit positions are reserved
//! for compatibility with older embedders; unknown bits are ignored.

/// Feature bitmask for story loading and execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(pub u32);

impl Flags {
    pub const RESERVED_1: Flags = Flags(1 << 0);
    pub const RESERVED_2: Flags = Flags(1 << 1);
    pub const RESERVED_3: Flags = Flags(1 << 2);
    /// Cache compiled stories between loads.
    pub const CACHING: Flags = Flags(1 << 3);
    /// Render dumps and diagnostics with ANSI colors.
    pub const COLOR: Flags = Flags(1 << 4);
    /// Print the syntax tree after parsing.
    pub const DUMP_AST: Flags = Flags(1 << 5);
    /// Print the intermediate representation after lowering.
    pub const DUMP_IR: Flags = Flags(1 << 6);
    /// Print a bytecode disassembly after code generation.
    pub const DUMP_CODE: Flags = Flags(1 << 7);
    /// Enable the garbage collector.
    pub const GC_ENABLE: Flags = Flags(1 << 8);
    /// Collect on every allocation.
    pub const GC_STRESS: Flags = Flags(1 << 9);
    /// Trace collector activity.
    pub const GC_TRACING: Flags = Flags(1 << 10);
    /// Trace instruction execution.
    pub const VM_TRACING: Flags = Flags(1 << 11);

    pub const fn empty() -> Flags {
        Flags(0)
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl From<u32> for Flags {
    fn from(bits: u32) -> Flags {
        Flags(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_checks_all_requested_bits() {
        let flags = Flags::COLOR | Flags::GC_ENABLE;
        assert!(flags.contains(Flags::COLOR));
        assert!(flags.contains(Flags::GC_ENABLE));
        assert!(!flags.contains(Flags::GC_STRESS));
        assert!(!flags.contains(Flags::COLOR | Flags::GC_STRESS));
    }

    #[test]
    fn unknown_bits_are_preserved_but_harmless() {
        let flags = Flags(0xffff_0000) | Flags::VM_TRACING;
        assert!(flags.contains(Flags::VM_TRACING));
    }
}

use std::fmt;

use crate::Uxlen;

pub const REGISTER_COUNT: usize = 32;

/// Index of the stack pointer.
pub const SP: usize = 2;

/// Calling convention names of `x0`..`x31`.
pub const ABI_NAMES: [&str; REGISTER_COUNT] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// The 32 integer registers of a hart.
///
/// x0 is always zero
/// x1 is usually the return address
/// x2 is usually the stack pointer
#[derive(Clone)]
pub struct RegisterFile {
    /// # INVARIANT
    /// regs[0] is always zero!
    regs: [Uxlen; REGISTER_COUNT],
}

impl RegisterFile {
    /// All registers zero, except the stack pointer which starts at `stack_top`.
    pub fn new(stack_top: Uxlen) -> Self {
        let mut regs = [0; REGISTER_COUNT];
        regs[SP] = stack_top;
        RegisterFile { regs }
    }

    #[inline]
    pub fn read(&self, idx: usize) -> Uxlen {
        self.regs[idx]
    }

    /// Writes to x0 are discarded.
    #[inline]
    pub fn write(&mut self, idx: usize, value: Uxlen) {
        if idx != 0 {
            self.regs[idx] = value;
        }
    }

    pub fn abi_name(idx: usize) -> &'static str {
        ABI_NAMES[idx]
    }

    /// Resolves `a0`, `fp` or `x10` style names to a register index.
    pub fn index_of(name: &str) -> Option<usize> {
        if name == "fp" {
            return Some(8);
        }
        if let Some(idx) = ABI_NAMES.iter().position(|&abi| abi == name) {
            return Some(idx);
        }
        let idx: usize = name.strip_prefix('x')?.parse().ok()?;
        (idx < REGISTER_COUNT && !name[1..].starts_with('+')).then_some(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Uxlen)> + '_ {
        self.regs.iter().copied().enumerate()
    }
}

impl fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(idx, value)| (ABI_NAMES[idx], value)))
            .finish()
    }
}

/// Four registers per line, `x10( a0 ) = 0x000000000000002a`.
impl fmt::Display for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in (0..REGISTER_COUNT).step_by(4) {
            for idx in row..row + 4 {
                if idx != row {
                    f.write_str("   ")?;
                }
                let name = format!("x{idx}");
                write!(
                    f,
                    "{name:<3}({:^4}) = {:#018x}",
                    ABI_NAMES[idx], self.regs[idx]
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

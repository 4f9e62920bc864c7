use num_enum::TryFromPrimitive;

use crate::Uxlen;

use self::exception::Exception;

pub mod exception {
    use thiserror::Error;

    use crate::Uxlen;

    /// Everything that can stop an instruction from retiring.
    ///
    /// None of these are delivered to the guest as a trap, the hart stops and
    /// the driver decides what to do with it.
    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum Exception {
        #[error("load access fault at {0:#x}")]
        LoadAccessFault(Uxlen),
        #[error("store access fault at {0:#x}")]
        StoreAccessFault(Uxlen),
        #[error("instruction access fault at {0:#x}")]
        InstructionAccessFault(Uxlen),
        #[error("unsupported access size of {0} bytes")]
        InvalidAccessSize(u64),
        #[error("illegal instruction {0:#010x}")]
        IllegalInstruction(u32),
        #[error("CSR address {0:#x} is outside of the CSR bank")]
        CsrOutOfRange(u16),
        #[error("program image of {len} bytes does not fit into {capacity} bytes of DRAM")]
        ImageTooLarge { len: usize, capacity: usize },
    }

    // Synchronous exception codes of `mcause`/`scause`
    pub const CAUSE_INSTRUCTION_ACCESS_FAULT: u32 = 1;
    pub const CAUSE_ILLEGAL_INSTRUCTION: u32 = 2;
    pub const CAUSE_BREAKPOINT: u32 = 3;
    pub const CAUSE_LOAD_ACCESS_FAULT: u32 = 5;
    pub const CAUSE_STORE_ACCESS_FAULT: u32 = 7;
    pub const CAUSE_ECALL_FROM_U: u32 = 8;
    pub const CAUSE_ECALL_FROM_S: u32 = 9;
    pub const CAUSE_ECALL_FROM_M: u32 = 11;

    /// How bad an [`Exception`] is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ExceptionClass {
        /// The guest did something invalid with memory. The run stops, but
        /// the emulator itself is consistent.
        Access,
        /// Malformed or unimplemented encoding. Never retried.
        Fatal,
    }

    impl Exception {
        pub fn class(&self) -> ExceptionClass {
            match self {
                Exception::LoadAccessFault(_)
                | Exception::StoreAccessFault(_)
                | Exception::InstructionAccessFault(_)
                | Exception::InvalidAccessSize(_)
                | Exception::ImageTooLarge { .. } => ExceptionClass::Access,
                Exception::IllegalInstruction(_) | Exception::CsrOutOfRange(_) => {
                    ExceptionClass::Fatal
                }
            }
        }

        pub fn is_fatal(&self) -> bool {
            self.class() == ExceptionClass::Fatal
        }

        /// The `mcause` code this exception would trap with.
        ///
        /// `None` for errors the guest can't cause through an instruction.
        pub fn cause(&self) -> Option<u32> {
            match self {
                Exception::InstructionAccessFault(_) => Some(CAUSE_INSTRUCTION_ACCESS_FAULT),
                Exception::IllegalInstruction(_) | Exception::CsrOutOfRange(_) => {
                    Some(CAUSE_ILLEGAL_INSTRUCTION)
                }
                Exception::LoadAccessFault(_) => Some(CAUSE_LOAD_ACCESS_FAULT),
                Exception::StoreAccessFault(_) => Some(CAUSE_STORE_ACCESS_FAULT),
                Exception::InvalidAccessSize(_) | Exception::ImageTooLarge { .. } => None,
            }
        }
    }
}

/// Start of main memory.
pub const DRAM_BASE: Uxlen = 0x8000_0000;
/// 128 MiB of main memory.
pub const DRAM_SIZE: usize = 128 * 1024 * 1024;

/// Layout and limits of an emulated machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub dram_base: Uxlen,
    pub dram_size: usize,
    /// Stop `run` after this many retired instructions.
    pub step_limit: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dram_base: DRAM_BASE,
            dram_size: DRAM_SIZE,
            step_limit: None,
        }
    }
}

/// Width of a single load or store.
///
/// Defines byte (1B), halfword (2B), word (4B) or doubleword (8B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AccessSize {
    Byte = 1,
    HalfWord = 2,
    Word = 4,
    DoubleWord = 8,
}

impl AccessSize {
    pub fn from_bytes(size: u64) -> Result<Self, Exception> {
        u8::try_from(size)
            .ok()
            .and_then(|size| AccessSize::try_from(size).ok())
            .ok_or(Exception::InvalidAccessSize(size))
    }

    #[inline]
    pub fn bytes(self) -> usize {
        self as usize
    }
}

/// Byte addressable main memory, indexed from 0.
pub struct Dram {
    cells: Vec<u8>,
}

impl Dram {
    /// All zero memory of `size` bytes.
    pub fn new(size: usize) -> Self {
        Dram {
            cells: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn range(&self, offset: usize, size: AccessSize) -> Option<std::ops::Range<usize>> {
        let end = offset.checked_add(size.bytes())?;
        (end <= self.cells.len()).then_some(offset..end)
    }

    /// Little endian read, zero extended. `None` if any byte is out of range.
    pub fn read(&self, offset: usize, size: AccessSize) -> Option<Uxlen> {
        let range = self.range(offset, size)?;
        let mut bytes = [0u8; 8];
        bytes[..size.bytes()].copy_from_slice(&self.cells[range]);
        Some(Uxlen::from_le_bytes(bytes))
    }

    /// Little endian write of the low `size` bytes of `value`.
    /// Returns `false` without touching memory if any byte is out of range.
    pub fn write(&mut self, offset: usize, size: AccessSize, value: Uxlen) -> bool {
        match self.range(offset, size) {
            Some(range) => {
                self.cells[range].copy_from_slice(&value.to_le_bytes()[..size.bytes()]);
                true
            }
            None => false,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }
}

/// 64 bit address space with a single window of main memory.
///
/// Everything outside of `[base, base + capacity)` is vacant and accesses to
/// it fault. Little endian, such that instruction fetches (always LE) and
/// word loads see the same bytes.
///
/// Alignment is not enforced; a misaligned access is logged and performed.
pub struct MemoryBus {
    base: Uxlen,
    dram: Dram,
    /// Address right after the last byte of the loaded program.
    program_end: Uxlen,
}

impl MemoryBus {
    pub fn new(config: &Config) -> Self {
        MemoryBus {
            base: config.dram_base,
            dram: Dram::new(config.dram_size),
            program_end: config.dram_base,
        }
    }

    pub fn base(&self) -> Uxlen {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.dram.len()
    }

    /// First address after the loaded program image.
    pub fn program_end(&self) -> Uxlen {
        self.program_end
    }

    /// One past the last valid address, saturating at the top of the address space.
    pub fn end(&self) -> Uxlen {
        self.base.saturating_add(self.dram.len() as Uxlen)
    }

    /// Whether every byte of an access falls inside main memory.
    pub fn contains(&self, addr: Uxlen, size: AccessSize) -> bool {
        self.offset(addr, size).is_some()
    }

    fn offset(&self, addr: Uxlen, size: AccessSize) -> Option<usize> {
        let offset = usize::try_from(addr.checked_sub(self.base)?).ok()?;
        let end = offset.checked_add(size.bytes())?;
        (end <= self.dram.len()).then_some(offset)
    }

    fn check_alignment(addr: Uxlen, size: AccessSize) {
        if addr % size.bytes() as Uxlen != 0 {
            log::warn!("Misaligned {}-byte access at {addr:#x}", size.bytes());
        }
    }

    /// Copies `image` to the start of main memory and marks its end as the
    /// end of the program.
    ///
    /// The image has to end below the top of the address space, so with a
    /// base close to `Uxlen::MAX` less than the whole DRAM is usable.
    pub fn load_program_image(&mut self, image: &[u8]) -> Result<(), Exception> {
        let capacity = (self.end() - self.base) as usize;
        if image.len() > capacity {
            return Err(Exception::ImageTooLarge {
                len: image.len(),
                capacity,
            });
        }
        self.dram.cells[..image.len()].copy_from_slice(image);
        self.program_end = self.base + image.len() as Uxlen;
        log::debug!(
            "Loaded {} byte image at {:#x}..{:#x}",
            image.len(),
            self.base,
            self.program_end
        );
        Ok(())
    }

    /// Load of `size` bytes, `size` being one of 1, 2, 4 or 8.
    pub fn load(&self, addr: Uxlen, size: u64) -> Result<Uxlen, Exception> {
        self.load_sized(addr, AccessSize::from_bytes(size)?)
    }

    /// Store of the low `size` bytes of `value`, `size` being one of 1, 2, 4 or 8.
    pub fn store(&mut self, addr: Uxlen, size: u64, value: Uxlen) -> Result<(), Exception> {
        self.store_sized(addr, AccessSize::from_bytes(size)?, value)
    }

    pub fn load_sized(&self, addr: Uxlen, size: AccessSize) -> Result<Uxlen, Exception> {
        let offset = self
            .offset(addr, size)
            .ok_or(Exception::LoadAccessFault(addr))?;
        Self::check_alignment(addr, size);
        let value = self
            .dram
            .read(offset, size)
            .ok_or(Exception::LoadAccessFault(addr))?;
        log::trace!("load {}B [{addr:#x}] -> {value:#x}", size.bytes());
        Ok(value)
    }

    pub fn store_sized(
        &mut self,
        addr: Uxlen,
        size: AccessSize,
        value: Uxlen,
    ) -> Result<(), Exception> {
        let offset = self
            .offset(addr, size)
            .ok_or(Exception::StoreAccessFault(addr))?;
        Self::check_alignment(addr, size);
        if !self.dram.write(offset, size, value) {
            return Err(Exception::StoreAccessFault(addr));
        }
        log::trace!("store {}B [{addr:#x}] <- {value:#x}", size.bytes());
        Ok(())
    }

    /// Reads the 32 bit instruction word at `pc`.
    pub fn fetch(&self, pc: Uxlen) -> Result<u32, Exception> {
        let offset = self
            .offset(pc, AccessSize::Word)
            .ok_or(Exception::InstructionAccessFault(pc))?;
        Self::check_alignment(pc, AccessSize::Word);
        self.dram
            .read(offset, AccessSize::Word)
            .map(|word| word as u32)
            .ok_or(Exception::InstructionAccessFault(pc))
    }

    pub fn dram(&self) -> &Dram {
        &self.dram
    }
}

/// RISC-V privilege levels. Encoding 0b10 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive)]
#[repr(u8)]
pub enum PrivilegeMode {
    User = 0b00,
    Supervisor = 0b01,
    Machine = 0b11,
}

impl PrivilegeMode {
    /// Decodes a previous-privilege field (`MPP`/`SPP`).
    ///
    /// The reserved encoding cannot be stored by real hardware; it is taken
    /// as user mode.
    pub fn from_status_field(bits: Uxlen) -> Self {
        PrivilegeMode::try_from((bits & 0b11) as u8).unwrap_or_else(|_| {
            log::warn!("Reserved privilege encoding {bits:#b}, using user mode");
            PrivilegeMode::User
        })
    }

    pub fn bits(self) -> Uxlen {
        self as Uxlen
    }
}

impl std::fmt::Display for PrivilegeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PrivilegeMode::User => "user",
            PrivilegeMode::Supervisor => "supervisor",
            PrivilegeMode::Machine => "machine",
        };
        f.write_str(name)
    }
}

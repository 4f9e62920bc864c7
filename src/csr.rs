//! Control and status registers.
//!
//! The bank is a flat array of 4096 slots addressed by the 12 bit CSR
//! specifier. Supervisor views of machine registers (`sstatus`, `sie`,
//! `sip`) have no storage of their own, they are masked windows onto the
//! machine register.

use std::fmt;

use crate::platform::exception::Exception;
use crate::platform::PrivilegeMode;
use crate::Uxlen;

pub const NUM_CSRS: usize = 4096;

// Machine level CSRs.
/// Hardware thread ID.
pub const MHARTID: u16 = 0xf14;
/// Machine status register.
pub const MSTATUS: u16 = 0x300;
/// Machine exception delegation register.
pub const MEDELEG: u16 = 0x302;
/// Machine interrupt delegation register.
pub const MIDELEG: u16 = 0x303;
/// Machine interrupt-enable register.
pub const MIE: u16 = 0x304;
/// Machine trap-handler base address.
pub const MTVEC: u16 = 0x305;
/// Machine counter enable.
pub const MCOUNTEREN: u16 = 0x306;
/// Scratch register for machine trap handlers.
pub const MSCRATCH: u16 = 0x340;
/// Machine exception program counter.
pub const MEPC: u16 = 0x341;
/// Machine trap cause.
pub const MCAUSE: u16 = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: u16 = 0x343;
/// Machine interrupt pending.
pub const MIP: u16 = 0x344;

// Supervisor level CSRs.
/// Supervisor status register.
pub const SSTATUS: u16 = 0x100;
/// Supervisor interrupt-enable register.
pub const SIE: u16 = 0x104;
/// Supervisor trap handler base address.
pub const STVEC: u16 = 0x105;
/// Scratch register for supervisor trap handlers.
pub const SSCRATCH: u16 = 0x140;
/// Supervisor exception program counter.
pub const SEPC: u16 = 0x141;
/// Supervisor trap cause.
pub const SCAUSE: u16 = 0x142;
/// Supervisor bad address or instruction.
pub const STVAL: u16 = 0x143;
/// Supervisor interrupt pending.
pub const SIP: u16 = 0x144;
/// Supervisor address translation and protection.
pub const SATP: u16 = 0x180;

// mstatus and sstatus fields
pub const MASK_SIE: Uxlen = 1 << 1;
pub const MASK_MIE: Uxlen = 1 << 3;
pub const MASK_SPIE: Uxlen = 1 << 5;
pub const MASK_UBE: Uxlen = 1 << 6;
pub const MASK_MPIE: Uxlen = 1 << 7;
pub const MASK_SPP: Uxlen = 1 << 8;
pub const MASK_VS: Uxlen = 0b11 << 9;
pub const MASK_MPP: Uxlen = 0b11 << 11;
pub const MASK_FS: Uxlen = 0b11 << 13;
pub const MASK_XS: Uxlen = 0b11 << 15;
pub const MASK_MPRV: Uxlen = 1 << 17;
pub const MASK_SUM: Uxlen = 1 << 18;
pub const MASK_MXR: Uxlen = 1 << 19;
pub const MASK_TVM: Uxlen = 1 << 20;
pub const MASK_TW: Uxlen = 1 << 21;
pub const MASK_TSR: Uxlen = 1 << 22;
pub const MASK_UXL: Uxlen = 0b11 << 32;
pub const MASK_SXL: Uxlen = 0b11 << 34;
pub const MASK_SBE: Uxlen = 1 << 36;
pub const MASK_MBE: Uxlen = 1 << 37;
pub const MASK_SD: Uxlen = 1 << 63;
/// Fields of `mstatus` visible through `sstatus`.
pub const MASK_SSTATUS: Uxlen = MASK_SIE
    | MASK_SPIE
    | MASK_UBE
    | MASK_SPP
    | MASK_FS
    | MASK_XS
    | MASK_SUM
    | MASK_MXR
    | MASK_UXL
    | MASK_SD;

pub const MPP_SHIFT: u32 = 11;
pub const SPP_SHIFT: u32 = 8;

/// Names accepted by [`csr_address`].
pub const CSR_NAMES: [(&str, u16); 21] = [
    ("mhartid", MHARTID),
    ("mstatus", MSTATUS),
    ("medeleg", MEDELEG),
    ("mideleg", MIDELEG),
    ("mie", MIE),
    ("mtvec", MTVEC),
    ("mcounteren", MCOUNTEREN),
    ("mscratch", MSCRATCH),
    ("mepc", MEPC),
    ("mcause", MCAUSE),
    ("mtval", MTVAL),
    ("mip", MIP),
    ("sstatus", SSTATUS),
    ("sie", SIE),
    ("stvec", STVEC),
    ("sscratch", SSCRATCH),
    ("sepc", SEPC),
    ("scause", SCAUSE),
    ("stval", STVAL),
    ("sip", SIP),
    ("satp", SATP),
];

pub fn csr_address(name: &str) -> Option<u16> {
    CSR_NAMES
        .iter()
        .find(|(csr, _)| *csr == name)
        .map(|&(_, addr)| addr)
}

#[derive(Clone)]
pub struct CsrBank {
    csrs: Box<[Uxlen]>,
}

impl Default for CsrBank {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrBank {
    /// All registers zero.
    pub fn new() -> Self {
        CsrBank {
            csrs: vec![0; NUM_CSRS].into_boxed_slice(),
        }
    }

    fn slot(&self, addr: u16) -> Result<Uxlen, Exception> {
        self.csrs
            .get(usize::from(addr))
            .copied()
            .ok_or(Exception::CsrOutOfRange(addr))
    }

    fn slot_mut(&mut self, addr: u16) -> Result<&mut Uxlen, Exception> {
        self.csrs
            .get_mut(usize::from(addr))
            .ok_or(Exception::CsrOutOfRange(addr))
    }

    /// Replaces the bits of `target` selected by `mask`.
    fn write_masked(&mut self, target: u16, mask: Uxlen, value: Uxlen) -> Result<(), Exception> {
        let slot = self.slot_mut(target)?;
        *slot = (*slot & !mask) | (value & mask);
        Ok(())
    }

    pub fn read(&self, addr: u16) -> Result<Uxlen, Exception> {
        match addr {
            SIE => Ok(self.slot(MIE)? & self.slot(MIDELEG)?),
            SIP => Ok(self.slot(MIP)? & self.slot(MIDELEG)?),
            SSTATUS => Ok(self.slot(MSTATUS)? & MASK_SSTATUS),
            _ => self.slot(addr),
        }
    }

    pub fn write(&mut self, addr: u16, value: Uxlen) -> Result<(), Exception> {
        match addr {
            SIE => {
                let mideleg = self.slot(MIDELEG)?;
                self.write_masked(MIE, mideleg, value)
            }
            SIP => {
                let mideleg = self.slot(MIDELEG)?;
                self.write_masked(MIP, mideleg, value)
            }
            SSTATUS => self.write_masked(MSTATUS, MASK_SSTATUS, value),
            _ => {
                *self.slot_mut(addr)? = value;
                Ok(())
            }
        }
    }

    /// Whether synchronous exception `cause` is delegated to supervisor mode.
    pub fn is_exception_delegated(&self, cause: u32) -> bool {
        cause < Uxlen::BITS && (self.csrs[usize::from(MEDELEG)] >> cause) & 1 == 1
    }

    /// The mode that handles synchronous exception `cause` raised in `from`.
    ///
    /// Machine mode never delegates its own traps.
    pub fn trap_mode(&self, cause: u32, from: PrivilegeMode) -> PrivilegeMode {
        if from != PrivilegeMode::Machine && self.is_exception_delegated(cause) {
            PrivilegeMode::Supervisor
        } else {
            PrivilegeMode::Machine
        }
    }

    fn get(&self, addr: u16) -> Uxlen {
        self.read(addr).unwrap_or_default()
    }
}

impl fmt::Debug for CsrBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(CSR_NAMES.iter().map(|&(name, addr)| (name, self.get(addr))))
            .finish()
    }
}

impl fmt::Display for CsrBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "mstatus = {:<#18x}  mtvec = {:<#18x}  mepc = {:<#18x}  mcause = {:<#18x}",
            self.get(MSTATUS),
            self.get(MTVEC),
            self.get(MEPC),
            self.get(MCAUSE)
        )?;
        writeln!(
            f,
            "sstatus = {:<#18x}  stvec = {:<#18x}  sepc = {:<#18x}  scause = {:<#18x}",
            self.get(SSTATUS),
            self.get(STVEC),
            self.get(SEPC),
            self.get(SCAUSE)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_registers_pass_through() {
        let mut csrs = CsrBank::new();
        csrs.write(MEPC, 0x8000_0010).unwrap();
        csrs.write(MSCRATCH, Uxlen::MAX).unwrap();
        assert_eq!(csrs.read(MEPC), Ok(0x8000_0010));
        assert_eq!(csrs.read(MSCRATCH), Ok(Uxlen::MAX));
        assert_eq!(csrs.read(0xfff), Ok(0));
    }

    #[test]
    fn out_of_range_address() {
        let mut csrs = CsrBank::new();
        assert_eq!(csrs.read(0x1000), Err(Exception::CsrOutOfRange(0x1000)));
        assert_eq!(csrs.write(0x1000, 1), Err(Exception::CsrOutOfRange(0x1000)));
    }

    #[test]
    fn sie_goes_through_mideleg() {
        let mut csrs = CsrBank::new();
        csrs.write(MIE, 0b1000_1000).unwrap();
        csrs.write(MIDELEG, 0b0010_0010).unwrap();
        csrs.write(SIE, Uxlen::MAX).unwrap();
        assert_eq!(csrs.read(MIE), Ok(0b1010_1010));
        assert_eq!(csrs.read(SIE), Ok(0b0010_0010));

        csrs.write(SIE, 0).unwrap();
        assert_eq!(csrs.read(MIE), Ok(0b1000_1000));
    }

    #[test]
    fn sip_goes_to_mip() {
        let mut csrs = CsrBank::new();
        csrs.write(MIE, 0xff).unwrap();
        csrs.write(MIDELEG, 0b10).unwrap();
        csrs.write(SIP, 0b11).unwrap();
        assert_eq!(csrs.read(MIP), Ok(0b10));
        assert_eq!(csrs.read(MIE), Ok(0xff));
        assert_eq!(csrs.read(SIP), Ok(0b10));
    }

    #[test]
    fn sstatus_is_a_window_on_mstatus() {
        let mut csrs = CsrBank::new();
        csrs.write(MSTATUS, MASK_MPP | MASK_MIE).unwrap();
        csrs.write(SSTATUS, Uxlen::MAX).unwrap();
        assert_eq!(csrs.read(MSTATUS), Ok(MASK_MPP | MASK_MIE | MASK_SSTATUS));
        assert_eq!(csrs.read(SSTATUS), Ok(MASK_SSTATUS));
    }

    #[test]
    fn exception_delegation() {
        let mut csrs = CsrBank::new();
        csrs.write(MEDELEG, 1 << 8).unwrap();
        assert!(csrs.is_exception_delegated(8));
        assert!(!csrs.is_exception_delegated(2));
        assert!(!csrs.is_exception_delegated(64));

        assert_eq!(csrs.trap_mode(8, PrivilegeMode::User), PrivilegeMode::Supervisor);
        assert_eq!(csrs.trap_mode(2, PrivilegeMode::User), PrivilegeMode::Machine);
        assert_eq!(csrs.trap_mode(8, PrivilegeMode::Machine), PrivilegeMode::Machine);
    }

    #[test]
    fn names_resolve() {
        assert_eq!(csr_address("mstatus"), Some(MSTATUS));
        assert_eq!(csr_address("satp"), Some(SATP));
        assert_eq!(csr_address("mhartid"), Some(MHARTID));
        assert_eq!(csr_address("cycle"), None);
    }

    proptest! {
        #[test]
        fn sie_only_touches_delegated_bits(mie in any::<u64>(), mideleg in any::<u64>(), value in any::<u64>()) {
            let mut csrs = CsrBank::new();
            csrs.write(MIE, mie).unwrap();
            csrs.write(MIDELEG, mideleg).unwrap();
            csrs.write(SIE, value).unwrap();
            let after = csrs.read(MIE).unwrap();
            prop_assert_eq!(after & !mideleg, mie & !mideleg);
            prop_assert_eq!(after & mideleg, value & mideleg);
        }

        #[test]
        fn sstatus_only_touches_masked_bits(mstatus in any::<u64>(), value in any::<u64>()) {
            let mut csrs = CsrBank::new();
            csrs.write(MSTATUS, mstatus).unwrap();
            csrs.write(SSTATUS, value).unwrap();
            let after = csrs.read(MSTATUS).unwrap();
            prop_assert_eq!(after & !MASK_SSTATUS, mstatus & !MASK_SSTATUS);
            prop_assert_eq!(after & MASK_SSTATUS, value & MASK_SSTATUS);
        }
    }
}

use crate::bits::extend_sign;
use crate::csr::{
    self, CsrBank, MASK_MIE, MASK_MPIE, MASK_MPP, MASK_MPRV, MASK_SIE, MASK_SPIE, MASK_SPP,
    MEPC, MPP_SHIFT, MSTATUS, SEPC,
};
use crate::decode::{
    self, BranchCond, CsrOp, CsrSource, ImmOp, Instruction, RegOp,
};
use crate::platform::exception::{
    Exception, CAUSE_BREAKPOINT, CAUSE_ECALL_FROM_M, CAUSE_ECALL_FROM_S, CAUSE_ECALL_FROM_U,
};
use crate::platform::{Config, MemoryBus, PrivilegeMode};
use crate::registers::RegisterFile;
use crate::{Ixlen, Uxlen};

/// Size of every instruction, compressed encodings are not supported.
const INSTRUCTION_SIZE: Uxlen = 4;

/// Why [`Hart::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The PC left the loaded program image.
    EndOfProgram,
    /// The configured number of instructions retired.
    StepLimitReached,
    /// `ecall` was executed.
    EnvironmentCall,
    /// `ebreak` was executed.
    Breakpoint,
    /// An instruction could not complete. Nothing of it was committed.
    Fault(Exception),
}

impl StopReason {
    /// The `mcause` code of the trap this stop stands in for, with the hart
    /// in `mode` when it stopped.
    pub fn cause(&self, mode: PrivilegeMode) -> Option<u32> {
        match self {
            StopReason::EndOfProgram | StopReason::StepLimitReached => None,
            StopReason::EnvironmentCall => Some(match mode {
                PrivilegeMode::User => CAUSE_ECALL_FROM_U,
                PrivilegeMode::Supervisor => CAUSE_ECALL_FROM_S,
                PrivilegeMode::Machine => CAUSE_ECALL_FROM_M,
            }),
            StopReason::Breakpoint => Some(CAUSE_BREAKPOINT),
            StopReason::Fault(e) => e.cause(),
        }
    }
}

/// Outcome of a single [`Hart::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Retired(Instruction),
    /// PC is at or past the end of the program, nothing was fetched.
    Finished,
    /// `ecall` at the current PC. The PC is not advanced.
    EnvironmentCall,
    /// `ebreak` at the current PC. The PC is not advanced.
    Breakpoint,
}

/// Values handed from one pipeline stage to the next while a single
/// instruction is in flight. Dropped once the instruction retires.
#[derive(Debug)]
struct Latch {
    pc: Uxlen,
    rs1: Uxlen,
    rs2: Uxlen,
    /// CSR value read before execution. For trap returns the status register.
    csr: Uxlen,
    /// `mepc`/`sepc` for trap returns.
    epc: Uxlen,
    /// Effective address of a load or store.
    address: Uxlen,
    /// Value for `rd`, or the value to store.
    result: Uxlen,
    /// Value to commit to the CSR.
    csr_next: Uxlen,
    write_rd: bool,
    write_csr: bool,
    next_pc: Uxlen,
    mode: Option<PrivilegeMode>,
}

impl Latch {
    fn new(pc: Uxlen) -> Self {
        Latch {
            pc,
            rs1: 0,
            rs2: 0,
            csr: 0,
            epc: 0,
            address: 0,
            result: 0,
            csr_next: 0,
            write_rd: false,
            write_csr: false,
            next_pc: pc.wrapping_add(INSTRUCTION_SIZE),
            mode: None,
        }
    }
}

/// Hardware Thread
///
/// Owns the whole architectural state: registers, CSRs, memory, PC and the
/// current privilege mode.
pub struct Hart {
    bus: MemoryBus,
    csrs: CsrBank,
    regs: RegisterFile,
    reg_pc: Uxlen,
    mode: PrivilegeMode,
    retired: u64,
}

impl Hart {
    /// Loads `image` at the start of DRAM and points the PC at it.
    ///
    /// The hart starts in machine mode with the stack pointer at the top of DRAM.
    pub fn new(config: &Config, image: &[u8]) -> Result<Self, Exception> {
        let mut bus = MemoryBus::new(config);
        bus.load_program_image(image)?;
        Ok(Hart {
            regs: RegisterFile::new(bus.end()),
            csrs: CsrBank::new(),
            reg_pc: bus.base(),
            bus,
            mode: PrivilegeMode::Machine,
            retired: 0,
        })
    }

    /// There is no halt instruction, a program ends when the PC leaves its image.
    pub fn is_finished(&self) -> bool {
        self.reg_pc >= self.bus.program_end()
    }

    /// Fetches, decodes and retires one instruction.
    ///
    /// Each stage runs in a fixed order: register read, CSR read, execute,
    /// memory access, CSR write, register write back. Every stage that can
    /// fail runs before anything is committed, so on `Err` the hart is
    /// exactly as it was before the call.
    pub fn step(&mut self) -> Result<Step, Exception> {
        if self.is_finished() {
            return Ok(Step::Finished);
        }

        let word = self.bus.fetch(self.reg_pc)?;
        let instr = decode::decode(word)?;
        log::trace!("{:#x}: {word:08x} {instr:?}", self.reg_pc);

        match instr {
            Instruction::Ecall => return Ok(Step::EnvironmentCall),
            Instruction::Ebreak => return Ok(Step::Breakpoint),
            _ => {}
        }

        let mut latch = Latch::new(self.reg_pc);
        self.read_registers(&instr, &mut latch);
        self.read_csr(&instr, &mut latch)?;
        execute(&instr, &mut latch);
        self.access_memory(&instr, &mut latch)?;
        self.write_csr(&instr, &latch)?;
        self.write_back(&instr, &latch);

        self.reg_pc = latch.next_pc;
        if let Some(mode) = latch.mode {
            if mode != self.mode {
                log::debug!("Privilege mode {} -> {}", self.mode, mode);
            }
            self.mode = mode;
        }
        self.retired += 1;

        Ok(Step::Retired(instr))
    }

    /// Steps until the program ends, a fault occurs or `step_limit`
    /// instructions have retired.
    pub fn run(&mut self, step_limit: Option<u64>) -> StopReason {
        log::debug!("Running from {:#x}", self.reg_pc);
        let mut steps = 0;
        loop {
            if step_limit.is_some_and(|limit| steps >= limit) && !self.is_finished() {
                log::debug!("Step limit reached at {:#x}", self.reg_pc);
                return StopReason::StepLimitReached;
            }
            match self.step() {
                Ok(Step::Retired(_)) => steps += 1,
                Ok(Step::Finished) => {
                    log::debug!("Program ended after {} instructions", self.retired);
                    return StopReason::EndOfProgram;
                }
                Ok(Step::EnvironmentCall) => return StopReason::EnvironmentCall,
                Ok(Step::Breakpoint) => return StopReason::Breakpoint,
                Err(e) => {
                    log::error!("Stopped at {:#x}: {e}", self.reg_pc);
                    return StopReason::Fault(e);
                }
            }
        }
    }

    fn read_registers(&self, instr: &Instruction, latch: &mut Latch) {
        match *instr {
            Instruction::Op { rs1, rs2, .. }
            | Instruction::Branch { rs1, rs2, .. }
            | Instruction::Store { rs1, rs2, .. } => {
                latch.rs1 = self.regs.read(rs1.into());
                latch.rs2 = self.regs.read(rs2.into());
            }
            Instruction::OpImm { rs1, .. }
            | Instruction::Jalr { rs1, .. }
            | Instruction::Load { rs1, .. }
            | Instruction::Csr {
                src: CsrSource::Register(rs1),
                ..
            } => {
                latch.rs1 = self.regs.read(rs1.into());
            }
            _ => {}
        }
    }

    fn read_csr(&self, instr: &Instruction, latch: &mut Latch) -> Result<(), Exception> {
        match *instr {
            Instruction::Csr { csr, .. } => latch.csr = self.csrs.read(csr)?,
            Instruction::Mret => {
                latch.csr = self.csrs.read(MSTATUS)?;
                latch.epc = self.csrs.read(MEPC)?;
            }
            Instruction::Sret => {
                latch.csr = self.csrs.read(MSTATUS)?;
                latch.epc = self.csrs.read(SEPC)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn access_memory(&mut self, instr: &Instruction, latch: &mut Latch) -> Result<(), Exception> {
        match *instr {
            Instruction::Load { kind, .. } => {
                let size = kind.size();
                let value = self.bus.load_sized(latch.address, size)?;
                latch.result = if kind.is_signed() {
                    extend_sign(value, size.bytes() as u32 * 8 - 1)
                } else {
                    value
                };
            }
            Instruction::Store { size, .. } => {
                self.bus.store_sized(latch.address, size, latch.result)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn write_csr(&mut self, instr: &Instruction, latch: &Latch) -> Result<(), Exception> {
        if !latch.write_csr {
            return Ok(());
        }
        match *instr {
            Instruction::Csr { csr, .. } => self.csrs.write(csr, latch.csr_next),
            Instruction::Mret | Instruction::Sret => self.csrs.write(MSTATUS, latch.csr_next),
            _ => Ok(()),
        }
    }

    fn write_back(&mut self, instr: &Instruction, latch: &Latch) {
        if !latch.write_rd {
            return;
        }
        match *instr {
            Instruction::Op { rd, .. }
            | Instruction::OpImm { rd, .. }
            | Instruction::Lui { rd, .. }
            | Instruction::Auipc { rd, .. }
            | Instruction::Jal { rd, .. }
            | Instruction::Jalr { rd, .. }
            | Instruction::Load { rd, .. }
            | Instruction::Csr { rd, .. } => self.regs.write(rd.into(), latch.result),
            _ => {}
        }
    }

    pub fn pc(&self) -> Uxlen {
        self.reg_pc
    }

    pub fn set_pc(&mut self, pc: Uxlen) {
        self.reg_pc = pc;
    }

    pub fn set_mode(&mut self, mode: PrivilegeMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> PrivilegeMode {
        self.mode
    }

    /// Number of instructions retired so far.
    pub fn retired(&self) -> u64 {
        self.retired
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    pub fn csrs(&self) -> &CsrBank {
        &self.csrs
    }

    pub fn csrs_mut(&mut self) -> &mut CsrBank {
        &mut self.csrs
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut MemoryBus {
        &mut self.bus
    }

    /// Register value by ABI (`a0`) or numeric (`x10`) name.
    pub fn register(&self, name: &str) -> Option<Uxlen> {
        RegisterFile::index_of(name).map(|idx| self.regs.read(idx))
    }

    /// CSR value by name, e.g. `mstatus`.
    pub fn csr(&self, name: &str) -> Option<Uxlen> {
        csr::csr_address(name).and_then(|addr| self.csrs.read(addr).ok())
    }

    /// Looks `name` up as a register, then as a CSR, then as `pc`.
    pub fn value_by_name(&self, name: &str) -> Option<Uxlen> {
        self.register(name)
            .or_else(|| self.csr(name))
            .or_else(|| (name == "pc").then_some(self.reg_pc))
    }
}

/// The execute stage. Only looks at the latch, no architectural state.
fn execute(instr: &Instruction, latch: &mut Latch) {
    let pc = latch.pc;
    match *instr {
        Instruction::Op { op, .. } => {
            latch.result = alu(op, latch.rs1, latch.rs2);
            latch.write_rd = true;
        }
        Instruction::OpImm { op, imm, .. } => {
            latch.result = alu(register_form(op), latch.rs1, imm);
            latch.write_rd = true;
        }
        Instruction::Lui { imm, .. } => {
            latch.result = imm;
            latch.write_rd = true;
        }
        // This instruction depends on the PC, it needs to be set to the AUIPC address.
        Instruction::Auipc { imm, .. } => {
            latch.result = pc.wrapping_add(imm);
            latch.write_rd = true;
        }
        Instruction::Jal { offset, .. } => {
            latch.result = pc.wrapping_add(INSTRUCTION_SIZE);
            latch.next_pc = pc.wrapping_add(offset);
            latch.write_rd = true;
        }
        Instruction::Jalr { offset, .. } => {
            latch.result = pc.wrapping_add(INSTRUCTION_SIZE);
            latch.next_pc = latch.rs1.wrapping_add(offset) & !1;
            latch.write_rd = true;
        }
        Instruction::Branch { cond, offset, .. } => {
            if branch_taken(cond, latch.rs1, latch.rs2) {
                latch.next_pc = pc.wrapping_add(offset);
            }
        }
        Instruction::Load { offset, .. } => {
            latch.address = latch.rs1.wrapping_add(offset);
            latch.write_rd = true;
        }
        Instruction::Store { offset, .. } => {
            latch.address = latch.rs1.wrapping_add(offset);
            latch.result = latch.rs2;
        }
        Instruction::Csr { op, rd, src, .. } => {
            let operand = match src {
                CsrSource::Register(_) => latch.rs1,
                CsrSource::Immediate(imm) => imm.into(),
            };
            latch.result = latch.csr;
            latch.csr_next = match op {
                CsrOp::ReadWrite => operand,
                CsrOp::ReadSet => latch.csr | operand,
                CsrOp::ReadClear => latch.csr & !operand,
            };
            // `csrrw x0, ..` is a pure write, `csrrs rd, csr, x0` a pure read
            latch.write_rd = !(op == CsrOp::ReadWrite && rd == 0);
            latch.write_csr = op == CsrOp::ReadWrite || src.field() != 0;
        }
        Instruction::Mret => {
            let (status, mode) = return_from_machine(latch.csr);
            latch.csr_next = status;
            latch.mode = Some(mode);
            latch.write_csr = true;
            latch.next_pc = latch.epc & !0b11;
        }
        Instruction::Sret => {
            let (status, mode) = return_from_supervisor(latch.csr);
            latch.csr_next = status;
            latch.mode = Some(mode);
            latch.write_csr = true;
            latch.next_pc = latch.epc & !0b11;
        }
        // No TLB and no memory ordering to model.
        Instruction::SfenceVma | Instruction::Fence => {}
        Instruction::Ecall | Instruction::Ebreak => {}
    }
}

/// `mstatus` after `mret` and the mode to return to.
///
/// MIE <- MPIE, MPIE <- 1, MPP <- U, and MPRV is cleared when leaving
/// machine mode.
fn return_from_machine(mstatus: Uxlen) -> (Uxlen, PrivilegeMode) {
    let mode = PrivilegeMode::from_status_field(mstatus >> MPP_SHIFT);
    let mpie = (mstatus & MASK_MPIE) != 0;
    let mut status = mstatus & !MASK_MIE;
    if mpie {
        status |= MASK_MIE;
    }
    status |= MASK_MPIE;
    status &= !MASK_MPP;
    if mode != PrivilegeMode::Machine {
        status &= !MASK_MPRV;
    }
    (status, mode)
}

/// `mstatus` after `sret` and the mode to return to.
///
/// Only the supervisor fields (which `sstatus` shares with `mstatus`) and
/// MPRV change.
fn return_from_supervisor(mstatus: Uxlen) -> (Uxlen, PrivilegeMode) {
    let mode = if mstatus & MASK_SPP != 0 {
        PrivilegeMode::Supervisor
    } else {
        PrivilegeMode::User
    };
    let spie = (mstatus & MASK_SPIE) != 0;
    let mut status = mstatus & !MASK_SIE;
    if spie {
        status |= MASK_SIE;
    }
    status |= MASK_SPIE;
    status &= !MASK_SPP;
    status &= !MASK_MPRV;
    (status, mode)
}

fn branch_taken(cond: BranchCond, lhs: Uxlen, rhs: Uxlen) -> bool {
    match cond {
        BranchCond::Eq => lhs == rhs,
        BranchCond::Ne => lhs != rhs,
        BranchCond::Lt => (lhs as Ixlen) < (rhs as Ixlen),
        BranchCond::Ge => (lhs as Ixlen) >= (rhs as Ixlen),
        BranchCond::Ltu => lhs < rhs,
        BranchCond::Geu => lhs >= rhs,
    }
}

/// The register-register operation an immediate operation performs.
fn register_form(op: ImmOp) -> RegOp {
    match op {
        ImmOp::Addi => RegOp::Add,
        ImmOp::Slti => RegOp::Slt,
        ImmOp::Sltiu => RegOp::Sltu,
        ImmOp::Xori => RegOp::Xor,
        ImmOp::Ori => RegOp::Or,
        ImmOp::Andi => RegOp::And,
        ImmOp::Slli => RegOp::Sll,
        ImmOp::Srli => RegOp::Srl,
        ImmOp::Srai => RegOp::Sra,
        ImmOp::Addiw => RegOp::Addw,
        ImmOp::Slliw => RegOp::Sllw,
        ImmOp::Srliw => RegOp::Srlw,
        ImmOp::Sraiw => RegOp::Sraw,
    }
}

/// Sign extends the low 32 bits.
fn sext_w(value: Uxlen) -> Uxlen {
    extend_sign(value & 0xffff_ffff, 31)
}

fn alu(op: RegOp, lhs: Uxlen, rhs: Uxlen) -> Uxlen {
    let shamt = (rhs & 0b11_1111) as u32;
    let shamt_w = (rhs & 0b1_1111) as u32;
    match op {
        RegOp::Add => lhs.wrapping_add(rhs),
        RegOp::Sub => lhs.wrapping_sub(rhs),
        RegOp::Sll => lhs << shamt,
        RegOp::Slt => Uxlen::from((lhs as Ixlen) < (rhs as Ixlen)),
        RegOp::Sltu => Uxlen::from(lhs < rhs),
        RegOp::Xor => lhs ^ rhs,
        RegOp::Srl => lhs >> shamt,
        RegOp::Sra => ((lhs as Ixlen) >> shamt) as Uxlen,
        RegOp::Or => lhs | rhs,
        RegOp::And => lhs & rhs,
        RegOp::Mul => lhs.wrapping_mul(rhs),
        RegOp::Addw => sext_w(lhs.wrapping_add(rhs)),
        RegOp::Subw => sext_w(lhs.wrapping_sub(rhs)),
        RegOp::Sllw => sext_w(lhs << shamt_w),
        RegOp::Srlw => sext_w(Uxlen::from((lhs as u32) >> shamt_w)),
        RegOp::Sraw => sext_w(((lhs as i32) >> shamt_w) as u32 as Uxlen),
    }
}

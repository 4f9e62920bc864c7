//! Instruction decoding.
//!
//! The raw encoding shapes (R/I/S/B/U/J) only pull fields out of the word;
//! [`decode`] then validates the function codes and produces an
//! [`Instruction`], which carries exactly the operands its execution needs.

use num_enum::TryFromPrimitive;

use crate::bits::{extend_sign, take_bits};
use crate::platform::{exception::Exception, AccessSize};
use crate::Uxlen;

pub(crate) struct RType {
    pub funct3: u8,
    pub funct7: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub rd: u8,
}

impl From<u32> for RType {
    fn from(instr: u32) -> RType {
        RType {
            funct3: take_bits(instr, 12, 14) as u8,
            funct7: take_bits(instr, 25, 31) as u8,
            rs1: take_bits(instr, 15, 19) as u8,
            rs2: take_bits(instr, 20, 24) as u8,
            rd: take_bits(instr, 7, 11) as u8,
        }
    }
}

pub(crate) struct IType {
    pub funct3: u8,
    pub rs1: u8,
    pub rd: u8,
    pub imm: Uxlen,
}

impl From<u32> for IType {
    fn from(instr: u32) -> IType {
        IType {
            funct3: take_bits(instr, 12, 14) as u8,
            rs1: take_bits(instr, 15, 19) as u8,
            rd: take_bits(instr, 7, 11) as u8,
            imm: extend_sign(take_bits(instr, 20, 31).into(), 11),
        }
    }
}

pub(crate) struct SType {
    pub funct3: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub imm: Uxlen,
}

impl From<u32> for SType {
    fn from(instr: u32) -> SType {
        // imm[4:0] sits where rd usually is
        let imm = take_bits(instr, 7, 11) | take_bits(instr, 25, 31) << 5;
        SType {
            funct3: take_bits(instr, 12, 14) as u8,
            rs1: take_bits(instr, 15, 19) as u8,
            rs2: take_bits(instr, 20, 24) as u8,
            imm: extend_sign(imm.into(), 11),
        }
    }
}

pub(crate) struct BType {
    pub funct3: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub imm: Uxlen,
}

impl From<u32> for BType {
    fn from(instr: u32) -> BType {
        // Demangle bits. Bit 0 of the offset is always 0.
        let offset = take_bits(instr, 8, 11) << 1
            | take_bits(instr, 25, 30) << 5
            | take_bits(instr, 7, 7) << 11
            | take_bits(instr, 31, 31) << 12;
        BType {
            funct3: take_bits(instr, 12, 14) as u8,
            rs1: take_bits(instr, 15, 19) as u8,
            rs2: take_bits(instr, 20, 24) as u8,
            imm: extend_sign(offset.into(), 12),
        }
    }
}

pub(crate) struct UType {
    pub rd: u8,
    /// Already placed into bits 12..=31 and sign extended.
    pub imm: Uxlen,
}

impl From<u32> for UType {
    fn from(instr: u32) -> UType {
        UType {
            rd: take_bits(instr, 7, 11) as u8,
            imm: extend_sign(take_bits(instr, 12, 31).into(), 19) << 12,
        }
    }
}

pub(crate) struct JType {
    pub rd: u8,
    pub imm: Uxlen,
}

impl From<u32> for JType {
    fn from(instr: u32) -> JType {
        // Unlike `UType` the bits are somewhat mangled and are not
        // aligned in the upper bits. They are bit 20 to bit 1,
        // with bit 0 being 0.
        let offset = take_bits(instr, 21, 30) << 1
            | take_bits(instr, 20, 20) << 11
            | take_bits(instr, 12, 19) << 12
            | take_bits(instr, 31, 31) << 20;
        JType {
            rd: take_bits(instr, 7, 11) as u8,
            imm: extend_sign(offset.into(), 20),
        }
    }
}

/// Major opcodes of the base integer ISA. From Chapter 24.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Load = 0b00_000_11,
    MiscMem = 0b00_011_11,
    OpImm = 0b00_100_11,
    Auipc = 0b00_101_11,
    OpImm32 = 0b00_110_11,
    Store = 0b01_000_11,
    Op = 0b01_100_11,
    Lui = 0b01_101_11,
    Op32 = 0b01_110_11,
    Branch = 0b11_000_11,
    Jalr = 0b11_001_11,
    Jal = 0b11_011_11,
    System = 0b11_100_11,
}

pub fn get_opcode(instr: u32) -> u8 {
    take_bits(instr, 0, 6) as u8
}

/// Register-register ALU operations. The `W` forms work on the low 32 bits
/// and sign extend the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegOp {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
}

/// Register-immediate ALU operations. For shifts the immediate is the shift amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
    Addiw,
    Slliw,
    Srliw,
    Sraiw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    Eq,
    Ne,
    Lt,
    Ge,
    Ltu,
    Geu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Lb,
    Lh,
    Lw,
    Ld,
    Lbu,
    Lhu,
    Lwu,
}

impl LoadKind {
    pub fn size(self) -> AccessSize {
        match self {
            LoadKind::Lb | LoadKind::Lbu => AccessSize::Byte,
            LoadKind::Lh | LoadKind::Lhu => AccessSize::HalfWord,
            LoadKind::Lw | LoadKind::Lwu => AccessSize::Word,
            LoadKind::Ld => AccessSize::DoubleWord,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, LoadKind::Lb | LoadKind::Lh | LoadKind::Lw)
    }
}

/// Zicsr read-modify-write flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrOp {
    /// csrrw / csrrwi
    ReadWrite,
    /// csrrs / csrrsi
    ReadSet,
    /// csrrc / csrrci
    ReadClear,
}

/// Second operand of a CSR instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrSource {
    /// Value of `rs1`.
    Register(u8),
    /// 5 bit zero extended immediate, encoded in the `rs1` field.
    Immediate(u8),
}

impl CsrSource {
    /// The raw 5 bit `rs1` field.
    pub fn field(self) -> u8 {
        match self {
            CsrSource::Register(reg) => reg,
            CsrSource::Immediate(imm) => imm,
        }
    }
}

/// A fully decoded instruction.
///
/// Register operands are indices, immediates are already sign extended
/// to `Uxlen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Op {
        op: RegOp,
        rd: u8,
        rs1: u8,
        rs2: u8,
    },
    OpImm {
        op: ImmOp,
        rd: u8,
        rs1: u8,
        imm: Uxlen,
    },
    Lui {
        rd: u8,
        imm: Uxlen,
    },
    Auipc {
        rd: u8,
        imm: Uxlen,
    },
    Jal {
        rd: u8,
        offset: Uxlen,
    },
    Jalr {
        rd: u8,
        rs1: u8,
        offset: Uxlen,
    },
    Branch {
        cond: BranchCond,
        rs1: u8,
        rs2: u8,
        offset: Uxlen,
    },
    Load {
        kind: LoadKind,
        rd: u8,
        rs1: u8,
        offset: Uxlen,
    },
    Store {
        size: AccessSize,
        rs1: u8,
        rs2: u8,
        offset: Uxlen,
    },
    Csr {
        op: CsrOp,
        rd: u8,
        src: CsrSource,
        csr: u16,
    },
    Mret,
    Sret,
    SfenceVma,
    /// `fence` and `fence.i`. There is a single hart and no caches.
    Fence,
    Ecall,
    Ebreak,
}

/// Decodes one 32 bit instruction word.
///
/// Anything that is not part of RV64I + Zicsr + the trap returns is an
/// [`Exception::IllegalInstruction`].
pub fn decode(instr: u32) -> Result<Instruction, Exception> {
    let illegal = Exception::IllegalInstruction(instr);

    let Ok(opcode) = Opcode::try_from(get_opcode(instr)) else {
        if ((instr & 0b11) != 0b11) || ((instr & 0b11100) == 0b11100) {
            log::debug!("Non 32 bit instruction encoding not supported!");
        } else {
            log::debug!("Unsupported opcode {:#09b}", get_opcode(instr));
        }
        return Err(illegal);
    };

    let decoded = match opcode {
        Opcode::Lui => {
            let UType { rd, imm } = UType::from(instr);
            Instruction::Lui { rd, imm }
        }
        Opcode::Auipc => {
            let UType { rd, imm } = UType::from(instr);
            Instruction::Auipc { rd, imm }
        }
        Opcode::Jal => {
            let JType { rd, imm } = JType::from(instr);
            Instruction::Jal { rd, offset: imm }
        }
        Opcode::Jalr => {
            let i: IType = instr.into();
            if i.funct3 != 0 {
                return Err(illegal);
            }
            Instruction::Jalr {
                rd: i.rd,
                rs1: i.rs1,
                offset: i.imm,
            }
        }
        Opcode::Branch => {
            let b: BType = instr.into();
            let cond = match b.funct3 {
                0b000 => BranchCond::Eq,
                0b001 => BranchCond::Ne,
                0b100 => BranchCond::Lt,
                0b101 => BranchCond::Ge,
                0b110 => BranchCond::Ltu,
                0b111 => BranchCond::Geu,
                _ => return Err(illegal),
            };
            Instruction::Branch {
                cond,
                rs1: b.rs1,
                rs2: b.rs2,
                offset: b.imm,
            }
        }
        Opcode::Load => {
            let i: IType = instr.into();
            let kind = match i.funct3 {
                0b000 => LoadKind::Lb,
                0b001 => LoadKind::Lh,
                0b010 => LoadKind::Lw,
                0b011 => LoadKind::Ld,
                0b100 => LoadKind::Lbu,
                0b101 => LoadKind::Lhu,
                0b110 => LoadKind::Lwu,
                _ => return Err(illegal),
            };
            Instruction::Load {
                kind,
                rd: i.rd,
                rs1: i.rs1,
                offset: i.imm,
            }
        }
        Opcode::Store => {
            let s: SType = instr.into();
            let size = match s.funct3 {
                0b000 => AccessSize::Byte,
                0b001 => AccessSize::HalfWord,
                0b010 => AccessSize::Word,
                0b011 => AccessSize::DoubleWord,
                _ => return Err(illegal),
            };
            Instruction::Store {
                size,
                rs1: s.rs1,
                rs2: s.rs2,
                offset: s.imm,
            }
        }
        Opcode::OpImm => {
            let i: IType = instr.into();
            // 64 bit shifts use a 6 bit shift amount, leaving imm[11:6] as funct6
            let funct6 = take_bits(instr, 26, 31);
            let shamt = Uxlen::from(take_bits(instr, 20, 25));
            let (op, imm) = match (i.funct3, funct6) {
                (0b000, _) => (ImmOp::Addi, i.imm),
                (0b010, _) => (ImmOp::Slti, i.imm),
                (0b011, _) => (ImmOp::Sltiu, i.imm),
                (0b100, _) => (ImmOp::Xori, i.imm),
                (0b110, _) => (ImmOp::Ori, i.imm),
                (0b111, _) => (ImmOp::Andi, i.imm),
                (0b001, 0b00_0000) => (ImmOp::Slli, shamt),
                (0b101, 0b00_0000) => (ImmOp::Srli, shamt),
                (0b101, 0b01_0000) => (ImmOp::Srai, shamt),
                _ => return Err(illegal),
            };
            Instruction::OpImm {
                op,
                rd: i.rd,
                rs1: i.rs1,
                imm,
            }
        }
        Opcode::OpImm32 => {
            let i: IType = instr.into();
            let funct7 = take_bits(instr, 25, 31);
            let shamt = Uxlen::from(take_bits(instr, 20, 24));
            let (op, imm) = match (i.funct3, funct7) {
                (0b000, _) => (ImmOp::Addiw, i.imm),
                (0b001, 0b000_0000) => (ImmOp::Slliw, shamt),
                (0b101, 0b000_0000) => (ImmOp::Srliw, shamt),
                (0b101, 0b010_0000) => (ImmOp::Sraiw, shamt),
                _ => return Err(illegal),
            };
            Instruction::OpImm {
                op,
                rd: i.rd,
                rs1: i.rs1,
                imm,
            }
        }
        Opcode::Op => {
            let r: RType = instr.into();
            let op = match (r.funct7, r.funct3) {
                (0b000_0000, 0b000) => RegOp::Add,
                (0b010_0000, 0b000) => RegOp::Sub,
                (0b000_0000, 0b001) => RegOp::Sll,
                (0b000_0000, 0b010) => RegOp::Slt,
                (0b000_0000, 0b011) => RegOp::Sltu,
                (0b000_0000, 0b100) => RegOp::Xor,
                (0b000_0000, 0b101) => RegOp::Srl,
                (0b010_0000, 0b101) => RegOp::Sra,
                (0b000_0000, 0b110) => RegOp::Or,
                (0b000_0000, 0b111) => RegOp::And,
                (0b000_0001, 0b000) => RegOp::Mul,
                _ => return Err(illegal),
            };
            Instruction::Op {
                op,
                rd: r.rd,
                rs1: r.rs1,
                rs2: r.rs2,
            }
        }
        Opcode::Op32 => {
            let r: RType = instr.into();
            let op = match (r.funct7, r.funct3) {
                (0b000_0000, 0b000) => RegOp::Addw,
                (0b010_0000, 0b000) => RegOp::Subw,
                (0b000_0000, 0b001) => RegOp::Sllw,
                (0b000_0000, 0b101) => RegOp::Srlw,
                (0b010_0000, 0b101) => RegOp::Sraw,
                _ => return Err(illegal),
            };
            Instruction::Op {
                op,
                rd: r.rd,
                rs1: r.rs1,
                rs2: r.rs2,
            }
        }
        Opcode::MiscMem => match take_bits(instr, 12, 14) {
            0b000 | 0b001 => Instruction::Fence,
            _ => return Err(illegal),
        },
        Opcode::System => decode_system(instr)?,
    };

    Ok(decoded)
}

fn decode_system(instr: u32) -> Result<Instruction, Exception> {
    let i: IType = instr.into();
    // The CSR address space needs the zero extended immediate
    let csr = take_bits(instr, 20, 31) as u16;
    let (op, src) = match i.funct3 {
        0b000 => return decode_privileged(instr),
        0b001 => (CsrOp::ReadWrite, CsrSource::Register(i.rs1)),
        0b010 => (CsrOp::ReadSet, CsrSource::Register(i.rs1)),
        0b011 => (CsrOp::ReadClear, CsrSource::Register(i.rs1)),
        0b101 => (CsrOp::ReadWrite, CsrSource::Immediate(i.rs1)),
        0b110 => (CsrOp::ReadSet, CsrSource::Immediate(i.rs1)),
        0b111 => (CsrOp::ReadClear, CsrSource::Immediate(i.rs1)),
        _ => return Err(Exception::IllegalInstruction(instr)),
    };
    Ok(Instruction::Csr {
        op,
        rd: i.rd,
        src,
        csr,
    })
}

/// SYSTEM instructions with funct3 = 0, selected by funct7 and the rs2 field.
fn decode_privileged(instr: u32) -> Result<Instruction, Exception> {
    let r: RType = instr.into();
    let decoded = match (r.funct7, r.rs2, r.rs1, r.rd) {
        (0b000_0000, 0b00000, 0, 0) => Instruction::Ecall,
        (0b000_0000, 0b00001, 0, 0) => Instruction::Ebreak,
        (0b000_1000, 0b00010, 0, 0) => Instruction::Sret,
        (0b001_1000, 0b00010, 0, 0) => Instruction::Mret,
        (0b000_1001, _, _, 0) => Instruction::SfenceVma,
        _ => return Err(Exception::IllegalInstruction(instr)),
    };
    Ok(decoded)
}

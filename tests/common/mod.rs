//! Tiny RV64I assembler and harness shared by the integration tests.
#![allow(dead_code)]

use rv64emu::{Config, Emulator, StopReason};

pub const ZERO: u32 = 0;
pub const RA: u32 = 1;
pub const SP: u32 = 2;
pub const GP: u32 = 3;
pub const T0: u32 = 5;
pub const T1: u32 = 6;
pub const A0: u32 = 10;
pub const A1: u32 = 11;
pub const A2: u32 = 12;
pub const A3: u32 = 13;
pub const A4: u32 = 14;
pub const X31: u32 = 31;

pub const MSTATUS: u32 = 0x300;
pub const MEPC: u32 = 0x341;
pub const SSTATUS: u32 = 0x100;
pub const SEPC: u32 = 0x141;
pub const SIE: u32 = 0x104;
pub const SIP: u32 = 0x144;
pub const MIDELEG: u32 = 0x303;
pub const MIE: u32 = 0x304;
pub const MIP: u32 = 0x344;

const OP_IMM: u32 = 0b001_0011;
const OP_IMM_32: u32 = 0b001_1011;
const OP: u32 = 0b011_0011;
const OP_32: u32 = 0b011_1011;
const LOAD: u32 = 0b000_0011;
const STORE: u32 = 0b010_0011;
const BRANCH: u32 = 0b110_0011;
const SYSTEM: u32 = 0b111_0011;

fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    funct7 << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

fn i_type(imm: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    ((imm as u32) & 0xfff) << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

fn s_type(imm: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 5) & 0x7f) << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | (imm & 0x1f) << 7 | STORE
}

fn b_type(offset: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    let imm = offset as u32;
    ((imm >> 12) & 1) << 31
        | ((imm >> 5) & 0x3f) << 25
        | rs2 << 20
        | rs1 << 15
        | funct3 << 12
        | ((imm >> 1) & 0xf) << 8
        | ((imm >> 11) & 1) << 7
        | BRANCH
}

pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b000, rd, OP_IMM)
}

pub fn addiw(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b000, rd, OP_IMM_32)
}

pub fn slli(rd: u32, rs1: u32, shamt: u32) -> u32 {
    i_type(shamt as i32, rs1, 0b001, rd, OP_IMM)
}

pub fn slliw(rd: u32, rs1: u32, shamt: u32) -> u32 {
    i_type(shamt as i32, rs1, 0b001, rd, OP_IMM_32)
}

pub fn srliw(rd: u32, rs1: u32, shamt: u32) -> u32 {
    i_type(shamt as i32, rs1, 0b101, rd, OP_IMM_32)
}

pub fn sraiw(rd: u32, rs1: u32, shamt: u32) -> u32 {
    i_type((0b010_0000 << 5 | shamt) as i32, rs1, 0b101, rd, OP_IMM_32)
}

pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 0b000, rd, OP)
}

pub fn sub(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0b010_0000, rs2, rs1, 0b000, rd, OP)
}

pub fn mul(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0b000_0001, rs2, rs1, 0b000, rd, OP)
}

pub fn sllw(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 0b001, rd, OP_32)
}

pub fn srlw(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 0b101, rd, OP_32)
}

pub fn sraw(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0b010_0000, rs2, rs1, 0b101, rd, OP_32)
}

/// `imm` is the 20 bit upper immediate.
pub fn lui(rd: u32, imm: u32) -> u32 {
    (imm & 0xf_ffff) << 12 | rd << 7 | 0b011_0111
}

/// `imm` is the 20 bit upper immediate.
pub fn auipc(rd: u32, imm: u32) -> u32 {
    (imm & 0xf_ffff) << 12 | rd << 7 | 0b001_0111
}

pub fn jal(rd: u32, offset: i32) -> u32 {
    let imm = offset as u32;
    ((imm >> 20) & 1) << 31
        | ((imm >> 1) & 0x3ff) << 21
        | ((imm >> 11) & 1) << 20
        | ((imm >> 12) & 0xff) << 12
        | rd << 7
        | 0b110_1111
}

pub fn jalr(rd: u32, rs1: u32, offset: i32) -> u32 {
    i_type(offset, rs1, 0b000, rd, 0b110_0111)
}

pub fn beq(rs1: u32, rs2: u32, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0b000)
}

pub fn bne(rs1: u32, rs2: u32, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0b001)
}

pub fn blt(rs1: u32, rs2: u32, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0b100)
}

pub fn bge(rs1: u32, rs2: u32, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0b101)
}

pub fn bltu(rs1: u32, rs2: u32, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0b110)
}

pub fn bgeu(rs1: u32, rs2: u32, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0b111)
}

pub fn lb(rd: u32, rs1: u32, offset: i32) -> u32 {
    i_type(offset, rs1, 0b000, rd, LOAD)
}

pub fn lh(rd: u32, rs1: u32, offset: i32) -> u32 {
    i_type(offset, rs1, 0b001, rd, LOAD)
}

pub fn lw(rd: u32, rs1: u32, offset: i32) -> u32 {
    i_type(offset, rs1, 0b010, rd, LOAD)
}

pub fn ld(rd: u32, rs1: u32, offset: i32) -> u32 {
    i_type(offset, rs1, 0b011, rd, LOAD)
}

pub fn lbu(rd: u32, rs1: u32, offset: i32) -> u32 {
    i_type(offset, rs1, 0b100, rd, LOAD)
}

pub fn lhu(rd: u32, rs1: u32, offset: i32) -> u32 {
    i_type(offset, rs1, 0b101, rd, LOAD)
}

pub fn lwu(rd: u32, rs1: u32, offset: i32) -> u32 {
    i_type(offset, rs1, 0b110, rd, LOAD)
}

pub fn sb(rs2: u32, rs1: u32, offset: i32) -> u32 {
    s_type(offset, rs2, rs1, 0b000)
}

pub fn sh(rs2: u32, rs1: u32, offset: i32) -> u32 {
    s_type(offset, rs2, rs1, 0b001)
}

pub fn sw(rs2: u32, rs1: u32, offset: i32) -> u32 {
    s_type(offset, rs2, rs1, 0b010)
}

pub fn sd(rs2: u32, rs1: u32, offset: i32) -> u32 {
    s_type(offset, rs2, rs1, 0b011)
}

pub fn csrrw(rd: u32, csr: u32, rs1: u32) -> u32 {
    i_type(csr as i32, rs1, 0b001, rd, SYSTEM)
}

pub fn csrrs(rd: u32, csr: u32, rs1: u32) -> u32 {
    i_type(csr as i32, rs1, 0b010, rd, SYSTEM)
}

pub fn csrrc(rd: u32, csr: u32, rs1: u32) -> u32 {
    i_type(csr as i32, rs1, 0b011, rd, SYSTEM)
}

pub fn csrrsi(rd: u32, csr: u32, uimm: u32) -> u32 {
    i_type(csr as i32, uimm, 0b110, rd, SYSTEM)
}

pub const MRET: u32 = 0x3020_0073;
pub const SRET: u32 = 0x1020_0073;
pub const ECALL: u32 = 0x0000_0073;
pub const EBREAK: u32 = 0x0010_0073;
pub const FENCE: u32 = 0x0ff0_000f;
/// `sfence.vma x0, x0`
pub const SFENCE_VMA: u32 = 0x1200_0073;

pub fn assemble(program: &[u32]) -> Vec<u8> {
    program.iter().flat_map(|word| word.to_le_bytes()).collect()
}

pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

/// Runs `program` from the default DRAM base.
pub fn run_with(config: Config, program: &[u32]) -> (Emulator, StopReason) {
    init_logging();
    let mut emulator = Emulator::new(config, &assemble(program)).expect("Image does not fit");
    let reason = emulator.run();
    (emulator, reason)
}

pub fn run(program: &[u32]) -> (Emulator, StopReason) {
    run_with(Config::default(), program)
}

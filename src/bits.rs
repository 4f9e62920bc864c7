//! Bit-field helpers shared by every instruction decoder.

use crate::Uxlen;

/// Index of the most significant bit of a register.
const XLEN_MSB: u32 = Uxlen::BITS - 1;

/// Returns bits `begin..=end` of `word`, right aligned.
///
/// # Panics
/// If `end < begin` or `end` is outside of the 32 bit instruction word.
#[inline]
pub fn take_bits(word: u32, begin: u32, end: u32) -> u32 {
    assert!(
        begin <= end && end < u32::BITS,
        "invalid bit range {begin}..={end}"
    );
    let width = end - begin + 1;
    (word >> begin) & (u32::MAX >> (u32::BITS - width))
}

/// Treats bit `sign_bit` of `value` as the sign of a two's complement field
/// and replicates it into all higher bits.
///
/// If the sign bit is clear, or is already the register's top bit, `value`
/// is returned unchanged.
#[inline]
pub fn extend_sign(value: Uxlen, sign_bit: u32) -> Uxlen {
    if sign_bit >= XLEN_MSB || (value >> sign_bit) & 1 == 0 {
        return value;
    }
    value | (Uxlen::MAX << (sign_bit + 1))
}

//! Deep16 arithmetic, shift and flag computation.
//!
//! Results are carried as an unclamped `i64` "raw" value; the stored
//! register value is its low 16 bits and the N/Z/V/C flags are derived
//! from the raw value.

use crate::cpu::decode::{AluOp, ShiftKind};
use crate::cpu::registers::Psw;

/// Outcome of an ALU-class operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluResult {
    /// Unclamped result used for flag computation.
    pub raw: i64,
    /// Carry from the shifter, replacing the raw-derived carry.
    pub carry: Option<bool>,
}

impl AluResult {
    pub fn from_raw(raw: i64) -> Self {
        Self { raw, carry: None }
    }

    /// The 16-bit value written back.
    #[inline]
    pub fn value(&self) -> u16 {
        (self.raw & 0xFFFF) as u16
    }

    /// N, Z, V, C packed as in PSW bits 3-0.
    pub fn flags(&self) -> u16 {
        let mut nzvc = flags_from_raw(self.raw);
        if let Some(c) = self.carry {
            nzvc = (nzvc & !Psw::C) | if c { Psw::C } else { 0 };
        }
        nzvc
    }
}

/// Compute N, Z, V, C from a raw result.
///
/// - Z, N: from the low 16 bits.
/// - C: the raw value left the unsigned 16-bit range.
/// - V: the raw value, read as signed through bit 15, left `i16` range.
pub fn flags_from_raw(raw: i64) -> u16 {
    let low = raw & 0xFFFF;
    let mut nzvc = 0;
    if low == 0 {
        nzvc |= Psw::Z;
    }
    if low & 0x8000 != 0 {
        nzvc |= Psw::N;
    }
    if !(0..=0xFFFF).contains(&raw) {
        nzvc |= Psw::C;
    }
    let signed = if raw & 0x8000 != 0 { raw - 0x10000 } else { raw };
    if signed > i16::MAX as i64 || signed < i16::MIN as i64 {
        nzvc |= Psw::V;
    }
    nzvc
}

/// Two-operand ALU operation on 16-bit values.
///
/// Division by zero yields `0xFFFF`.
pub fn alu(op: AluOp, a: u16, b: u16) -> AluResult {
    let (a64, b64) = (a as i64, b as i64);
    let raw = match op {
        AluOp::Add => a64 + b64,
        AluOp::Sub => a64 - b64,
        AluOp::And => (a & b) as i64,
        AluOp::Or => (a | b) as i64,
        AluOp::Xor => (a ^ b) as i64,
        AluOp::Mul => a64 * b64,
        AluOp::Div => {
            if b == 0 {
                0xFFFF
            } else {
                (a / b) as i64
            }
        }
    };
    AluResult::from_raw(raw)
}

/// 32-bit product of two words as `(high, low)`.
pub fn mul32(a: u16, b: u16) -> (u16, u16) {
    let product = a as u32 * b as u32;
    ((product >> 16) as u16, product as u16)
}

/// Divide the 32-bit pair `high:low` by `divisor`.
///
/// Returns `(quotient, remainder)` with the quotient truncated to 16 bits,
/// or `None` on division by zero.
pub fn div32(high: u16, low: u16, divisor: u16) -> Option<(u32, u16)> {
    if divisor == 0 {
        return None;
    }
    let dividend = (high as u32) << 16 | low as u32;
    Some((dividend / divisor as u32, (dividend % divisor as u32) as u16))
}

/// Run the shifter.
///
/// Carry-producing kinds report the last bit shifted out; ROC rotates
/// through the carry as a 17th bit. A zero count leaves the carry as is.
pub fn shift(kind: ShiftKind, value: u16, count: u8, carry_in: bool) -> AluResult {
    let n = (count & 0xF) as u32;
    let v = value as u32;
    let result: u16;
    let mut carry = carry_in;

    match kind {
        ShiftKind::Sl | ShiftKind::Slc => {
            result = if n >= 16 { 0 } else { (v << n) as u16 };
            if n > 0 {
                carry = n <= 16 && (v >> (16 - n)) & 1 == 1;
            }
        }
        ShiftKind::Sr | ShiftKind::Src => {
            result = if n >= 16 { 0 } else { (v >> n) as u16 };
            if n > 0 {
                carry = n <= 16 && (v >> (n - 1)) & 1 == 1;
            }
        }
        ShiftKind::Sra | ShiftKind::Sac => {
            let shifted = (value as i16) >> n.min(15);
            result = shifted as u16;
            if n > 0 {
                carry = ((value as i16) >> (n - 1).min(15)) & 1 == 1;
            }
        }
        ShiftKind::Ror => result = value.rotate_right(n),
        ShiftKind::Roc => {
            // 17-bit rotate: carry sits above bit 15.
            let mut wide = (carry_in as u32) << 16 | v;
            for _ in 0..n {
                let out = wide & 1;
                wide = (wide >> 1) | (out << 16);
            }
            result = wide as u16;
            carry = (wide >> 16) & 1 == 1;
        }
    }

    AluResult {
        raw: result as i64,
        carry: if kind.uses_carry() { Some(carry) } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_zero_and_negative() {
        assert_eq!(flags_from_raw(0), Psw::Z);
        assert_eq!(flags_from_raw(0xFFFF), Psw::N);
        assert_eq!(flags_from_raw(0x1234), 0);
    }

    #[test]
    fn test_flags_carry_on_add_overflow() {
        let r = alu(AluOp::Add, 0xFFFF, 1);
        assert_eq!(r.value(), 0);
        assert_eq!(r.flags() & (Psw::Z | Psw::C), Psw::Z | Psw::C);
    }

    #[test]
    fn test_flags_borrow_on_sub() {
        let r = alu(AluOp::Sub, 1, 2);
        assert_eq!(r.value(), 0xFFFF);
        assert!(r.flags() & Psw::C != 0);
        assert!(r.flags() & Psw::N != 0);
    }

    #[test]
    fn test_sub_equal_sets_zero() {
        let r = alu(AluOp::Sub, 5, 5);
        assert_eq!(r.flags(), Psw::Z);
    }

    #[test]
    fn test_logic_ops() {
        assert_eq!(alu(AluOp::And, 0xF0F0, 0xFF00).value(), 0xF000);
        assert_eq!(alu(AluOp::Or, 0xF0F0, 0x0F00).value(), 0xFFF0);
        assert_eq!(alu(AluOp::Xor, 0xFFFF, 0x00FF).value(), 0xFF00);
    }

    #[test]
    fn test_div_by_zero() {
        assert_eq!(alu(AluOp::Div, 1234, 0).value(), 0xFFFF);
        assert_eq!(alu(AluOp::Div, 100, 7).value(), 14);
    }

    #[test]
    fn test_mul_raw_sets_carry() {
        let r = alu(AluOp::Mul, 0x100, 0x100);
        assert_eq!(r.value(), 0);
        assert!(r.flags() & Psw::C != 0);
    }

    #[test]
    fn test_mul32_div32() {
        assert_eq!(mul32(0x1234, 0x100), (0x0012, 0x3400));
        assert_eq!(div32(0x0001, 0x0000, 2), Some((0x8000, 0)));
        assert_eq!(div32(0, 7, 2), Some((3, 1)));
        assert_eq!(div32(1, 2, 0), None);
    }

    #[test]
    fn test_shift_left_carry() {
        let r = shift(ShiftKind::Slc, 0x8001, 1, false);
        assert_eq!(r.value(), 0x0002);
        assert_eq!(r.carry, Some(true));

        let plain = shift(ShiftKind::Sl, 0x8001, 1, false);
        assert_eq!(plain.value(), 0x0002);
        assert_eq!(plain.carry, None);
        assert_eq!(plain.flags() & Psw::C, 0);
    }

    #[test]
    fn test_shift_right_variants() {
        assert_eq!(shift(ShiftKind::Sr, 0x8000, 3, false).value(), 0x1000);
        assert_eq!(shift(ShiftKind::Sra, 0x8000, 3, false).value(), 0xF000);
        let r = shift(ShiftKind::Src, 0x0005, 1, false);
        assert_eq!(r.value(), 0x0002);
        assert_eq!(r.carry, Some(true));
        let r = shift(ShiftKind::Sac, 0xFFFE, 1, true);
        assert_eq!(r.value(), 0xFFFF);
        assert_eq!(r.carry, Some(false));
    }

    #[test]
    fn test_rotates() {
        let r = shift(ShiftKind::Ror, 0x0001, 1, true);
        assert_eq!(r.value(), 0x8000);
        assert_eq!(r.carry, None);
        let r = shift(ShiftKind::Roc, 0x0001, 1, false);
        assert_eq!(r.value(), 0x0000);
        assert_eq!(r.carry, Some(true));
        let r = shift(ShiftKind::Roc, 0x0000, 1, true);
        assert_eq!(r.value(), 0x8000);
        assert_eq!(r.carry, Some(false));
    }

    #[test]
    fn test_zero_count_keeps_carry() {
        assert_eq!(shift(ShiftKind::Slc, 0x1234, 0, true).carry, Some(true));
        assert_eq!(shift(ShiftKind::Roc, 0x1234, 0, true).value(), 0x1234);
    }
}

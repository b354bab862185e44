//! Instruction decoder for the Deep16.
//!
//! Every 16-bit word decodes to exactly one [`Instruction`]. Formats are
//! told apart by a prefix of leading bits, checked in this order:
//!
//! ```text
//! 1111111111111111  HALT (sentinel)
//! 0iiiiiiiiiiiiiii  LDI   imm15 -> R0
//! 10dRRRRBBBBooooo  LD/ST Rd, [Rb+off5]
//! 110aaaRRRRwixxxx  ALU2  op Rd, Rs|imm4   (a=7: shift)
//! 1110cccooooooooo  Jcc   off9
//! 11110dssRRRRSSSS  LDS/STS Rd, [Rs]
//! 111110RRRRSSSSii  MOV   Rd, Rs+imm2
//! 1111110RRRRiiiii  LSI   Rd, simm5
//! 11111110ttttXXXX  SOP   Rx
//! 111111110dRRRRss  MVS   Rd <-> seg
//! 1111111110ssRRRR  SMV   Rd <- special
//! 1111111111110ooo  SYS   NOP/HLT/SWI/RETI
//! ```
//!
//! Anything else is an unknown word. The decoder is shared by the
//! execution engine and the disassembler.

use serde::{Serialize, Deserialize};
use crate::cpu::registers::Segment;

/// The halt sentinel, also the reset value of memory.
pub const HALT_WORD: u16 = 0xFFFF;

/// ALU2 operation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Mul,
    Div,
}

impl AluOp {
    pub const ALL: [AluOp; 7] = [
        AluOp::Add, AluOp::Sub, AluOp::And, AluOp::Or,
        AluOp::Xor, AluOp::Mul, AluOp::Div,
    ];

    /// Field value; 7 is reserved for the shift sub-format.
    pub fn bits(self) -> u16 {
        match self {
            AluOp::Add => 0,
            AluOp::Sub => 1,
            AluOp::And => 2,
            AluOp::Or => 3,
            AluOp::Xor => 4,
            AluOp::Mul => 5,
            AluOp::Div => 6,
        }
    }

    fn from_bits(bits: u16) -> Option<Self> {
        AluOp::ALL.get(bits as usize).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "ADD",
            AluOp::Sub => "SUB",
            AluOp::And => "AND",
            AluOp::Or => "OR",
            AluOp::Xor => "XOR",
            AluOp::Mul => "MUL",
            AluOp::Div => "DIV",
        }
    }
}

/// Shift sub-format type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShiftKind {
    /// Shift left.
    Sl,
    /// Shift left, carry out.
    Slc,
    /// Shift right (logical).
    Sr,
    /// Shift right, carry out.
    Src,
    /// Shift right arithmetic.
    Sra,
    /// Shift right arithmetic, carry out.
    Sac,
    /// Rotate right.
    Ror,
    /// Rotate right through carry.
    Roc,
}

impl ShiftKind {
    pub const ALL: [ShiftKind; 8] = [
        ShiftKind::Sl, ShiftKind::Slc, ShiftKind::Sr, ShiftKind::Src,
        ShiftKind::Sra, ShiftKind::Sac, ShiftKind::Ror, ShiftKind::Roc,
    ];

    pub fn bits(self) -> u16 {
        self as u16
    }

    fn from_bits(bits: u16) -> Self {
        ShiftKind::ALL[(bits & 0x7) as usize]
    }

    /// Whether this variant updates C from the bits shifted out.
    pub fn uses_carry(self) -> bool {
        matches!(self, ShiftKind::Slc | ShiftKind::Src | ShiftKind::Sac | ShiftKind::Roc)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            ShiftKind::Sl => "SL",
            ShiftKind::Slc => "SLC",
            ShiftKind::Sr => "SR",
            ShiftKind::Src => "SRC",
            ShiftKind::Sra => "SRA",
            ShiftKind::Sac => "SAC",
            ShiftKind::Ror => "ROR",
            ShiftKind::Roc => "ROC",
        }
    }
}

/// Jump condition field. Each tests one PSW flag with one polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JumpCond {
    Zero,
    NotZero,
    Carry,
    NotCarry,
    Negative,
    NotNegative,
    Overflow,
    NotOverflow,
}

impl JumpCond {
    pub const ALL: [JumpCond; 8] = [
        JumpCond::Zero, JumpCond::NotZero, JumpCond::Carry, JumpCond::NotCarry,
        JumpCond::Negative, JumpCond::NotNegative, JumpCond::Overflow, JumpCond::NotOverflow,
    ];

    pub fn bits(self) -> u16 {
        self as u16
    }

    fn from_bits(bits: u16) -> Self {
        JumpCond::ALL[(bits & 0x7) as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            JumpCond::Zero => "JZ",
            JumpCond::NotZero => "JNZ",
            JumpCond::Carry => "JC",
            JumpCond::NotCarry => "JNC",
            JumpCond::Negative => "JN",
            JumpCond::NotNegative => "JNN",
            JumpCond::Overflow => "JO",
            JumpCond::NotOverflow => "JNO",
        }
    }
}

/// Single-register and PSW operations (SOP type field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SopKind {
    /// Swap bytes.
    Swb,
    /// Bitwise complement.
    Inv,
    /// Two's complement negate.
    Neg,
    /// Far jump through the even/odd pair Rx:Rx+1.
    Jml,
    /// Select single stack register.
    Srs,
    /// Select dual stack register.
    Srd,
    /// Select single extra register.
    Ers,
    /// Select dual extra register.
    Erd,
    /// Set PSW bits 3-0 from a mask.
    Set,
    /// Clear PSW bits 3-0 from a mask.
    Clr,
    /// Set PSW bits 7-4 from a mask.
    Set2,
    /// Clear PSW bits 7-4 from a mask.
    Clr2,
}

impl SopKind {
    pub fn bits(self) -> u16 {
        match self {
            SopKind::Swb => 0,
            SopKind::Inv => 1,
            SopKind::Neg => 2,
            SopKind::Jml => 4,
            SopKind::Srs => 8,
            SopKind::Srd => 9,
            SopKind::Ers => 10,
            SopKind::Erd => 11,
            SopKind::Set => 12,
            SopKind::Clr => 13,
            SopKind::Set2 => 14,
            SopKind::Clr2 => 15,
        }
    }

    fn from_bits(bits: u16) -> Option<Self> {
        Some(match bits & 0xF {
            0 => SopKind::Swb,
            1 => SopKind::Inv,
            2 => SopKind::Neg,
            4 => SopKind::Jml,
            8 => SopKind::Srs,
            9 => SopKind::Srd,
            10 => SopKind::Ers,
            11 => SopKind::Erd,
            12 => SopKind::Set,
            13 => SopKind::Clr,
            14 => SopKind::Set2,
            15 => SopKind::Clr2,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            SopKind::Swb => "SWB",
            SopKind::Inv => "INV",
            SopKind::Neg => "NEG",
            SopKind::Jml => "JML",
            SopKind::Srs => "SRS",
            SopKind::Srd => "SRD",
            SopKind::Ers => "ERS",
            SopKind::Erd => "ERD",
            SopKind::Set => "SET",
            SopKind::Clr => "CLR",
            SopKind::Set2 => "SET2",
            SopKind::Clr2 => "CLR2",
        }
    }

    /// Whether the Rx field is a flag mask rather than a register.
    pub fn takes_mask(self) -> bool {
        matches!(self, SopKind::Set | SopKind::Clr | SopKind::Set2 | SopKind::Clr2)
    }
}

/// Alternate-context registers readable with SMV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialReg {
    Apc,
    Apsw,
    Psw,
    Acs,
}

impl SpecialReg {
    pub const ALL: [SpecialReg; 4] = [SpecialReg::Apc, SpecialReg::Apsw, SpecialReg::Psw, SpecialReg::Acs];

    pub fn bits(self) -> u16 {
        self as u16
    }

    fn from_bits(bits: u16) -> Self {
        SpecialReg::ALL[(bits & 0x3) as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            SpecialReg::Apc => "APC",
            SpecialReg::Apsw => "APSW",
            SpecialReg::Psw => "PSW",
            SpecialReg::Acs => "ACS",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        SpecialReg::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }
}

/// System operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SysOp {
    Nop,
    Hlt,
    Swi,
    Reti,
}

impl SysOp {
    pub fn bits(self) -> u16 {
        self as u16
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            SysOp::Nop => "NOP",
            SysOp::Hlt => "HLT",
            SysOp::Swi => "SWI",
            SysOp::Reti => "RETI",
        }
    }
}

/// Decoded Deep16 instruction.
///
/// Register fields are always in `0..16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Sentinel ====================

    /// `0xFFFF`: stop without taking a pending branch.
    Halt,

    // ==================== Data Transfer ====================

    /// R0 := imm15
    Ldi { imm: u16 },

    /// Rd := [seg:Rb+offset]
    Ld { rd: u8, rb: u8, offset: u8 },

    /// [seg:Rb+offset] := Rd
    St { rd: u8, rb: u8, offset: u8 },

    /// Rd := [Rs] (physical)
    Lds { rd: u8, rs: u8, seg: Segment },

    /// [Rs] := Rd (physical)
    Sts { rd: u8, rs: u8, seg: Segment },

    /// Rd := Rs + imm2
    Mov { rd: u8, rs: u8, imm: u8 },

    /// Rd := sign-extended imm5
    Lsi { rd: u8, imm: i8 },

    /// `to_segment`: seg := Rd, otherwise Rd := seg
    Mvs { to_segment: bool, rd: u8, seg: Segment },

    /// Rd := special
    Smv { src: SpecialReg, rd: u8 },

    // ==================== Arithmetic ====================

    /// Rd op= (Rs | imm4). `write` false discards the result.
    /// MUL/DIV with `imm` set and even Rd are the 32-bit forms.
    Alu { op: AluOp, rd: u8, write: bool, imm: bool, operand: u8 },

    /// Rd := Rd shifted by count
    Shift { rd: u8, kind: ShiftKind, count: u8 },

    /// Single register or PSW operation.
    Sop { kind: SopKind, rx: u8 },

    // ==================== Control Flow ====================

    /// Conditional relative jump, delayed by one slot.
    Jump { cond: JumpCond, offset: i16 },

    /// System operation.
    Sys(SysOp),

    /// No defined meaning. Executes as a no-op.
    Unknown(u16),
}

impl Instruction {
    /// Whether an ALU2 instruction is the 32-bit MUL32/DIV32 form.
    pub fn is_wide(&self) -> bool {
        matches!(
            self,
            Instruction::Alu { op: AluOp::Mul | AluOp::Div, imm: true, rd, .. } if rd % 2 == 0
        )
    }
}

#[inline]
fn field(word: u16, shift: u16, width: u16) -> u16 {
    (word >> shift) & ((1 << width) - 1)
}

#[inline]
fn reg(word: u16, shift: u16) -> u8 {
    field(word, shift, 4) as u8
}

/// Sign-extend the low `bits` bits of `value`.
pub fn sign_extend(value: u16, bits: u32) -> i16 {
    let shift = 16 - bits;
    ((value << shift) as i16) >> shift
}

/// Decode a 16-bit word. Never fails; undefined words are `Unknown`.
pub fn decode(word: u16) -> Instruction {
    if word == HALT_WORD {
        return Instruction::Halt;
    }
    if word & 0x8000 == 0 {
        return Instruction::Ldi { imm: word & 0x7FFF };
    }
    if word >> 14 == 0b10 {
        let rd = reg(word, 9);
        let rb = reg(word, 5);
        let offset = field(word, 0, 5) as u8;
        return if field(word, 13, 1) == 0 {
            Instruction::Ld { rd, rb, offset }
        } else {
            Instruction::St { rd, rb, offset }
        };
    }
    if word >> 13 == 0b110 {
        let rd = reg(word, 6);
        let op_bits = field(word, 10, 3);
        return match AluOp::from_bits(op_bits) {
            Some(op) => Instruction::Alu {
                op,
                rd,
                write: field(word, 5, 1) == 1,
                imm: field(word, 4, 1) == 1,
                operand: field(word, 0, 4) as u8,
            },
            None => Instruction::Shift {
                rd,
                kind: ShiftKind::from_bits(field(word, 3, 3)),
                count: field(word, 0, 3) as u8,
            },
        };
    }

    // Extended space: bits 15-13 are all ones.
    if word >> 12 == 0b1110 {
        return Instruction::Jump {
            cond: JumpCond::from_bits(field(word, 9, 3)),
            offset: sign_extend(word, 9),
        };
    }
    if word >> 11 == 0b11110 {
        let rd = reg(word, 4);
        let rs = reg(word, 0);
        let seg = Segment::from_bits(field(word, 8, 2));
        return if field(word, 10, 1) == 0 {
            Instruction::Lds { rd, rs, seg }
        } else {
            Instruction::Sts { rd, rs, seg }
        };
    }
    if word >> 10 == 0b111110 {
        return Instruction::Mov {
            rd: reg(word, 6),
            rs: reg(word, 2),
            imm: field(word, 0, 2) as u8,
        };
    }
    if word >> 9 == 0b1111110 {
        return Instruction::Lsi {
            rd: reg(word, 5),
            imm: sign_extend(word, 5) as i8,
        };
    }
    if word >> 8 == 0b1111_1110 {
        return match SopKind::from_bits(field(word, 4, 4)) {
            Some(kind) => Instruction::Sop { kind, rx: reg(word, 0) },
            None => Instruction::Unknown(word),
        };
    }
    if word >> 7 == 0b1_1111_1110 {
        return Instruction::Mvs {
            to_segment: field(word, 6, 1) == 1,
            rd: reg(word, 2),
            seg: Segment::from_bits(field(word, 0, 2)),
        };
    }
    if word >> 6 == 0b11_1111_1110 {
        return Instruction::Smv {
            src: SpecialReg::from_bits(field(word, 4, 2)),
            rd: reg(word, 0),
        };
    }
    if word >> 3 == 0b1_1111_1111_1110 {
        return match field(word, 0, 3) {
            0 => Instruction::Sys(SysOp::Nop),
            1 => Instruction::Sys(SysOp::Hlt),
            2 => Instruction::Sys(SysOp::Swi),
            3 => Instruction::Sys(SysOp::Reti),
            _ => Instruction::Unknown(word),
        };
    }
    Instruction::Unknown(word)
}

/// Encode an instruction back to its 16-bit word.
///
/// Fields are masked to their widths, so `decode(encode(i)) == i` for
/// every instruction whose fields are in range.
pub fn encode(instr: &Instruction) -> u16 {
    let r = |x: u8| (x & 0xF) as u16;
    match *instr {
        Instruction::Halt => HALT_WORD,
        Instruction::Ldi { imm } => imm & 0x7FFF,
        Instruction::Ld { rd, rb, offset } => {
            0x8000 | r(rd) << 9 | r(rb) << 5 | (offset & 0x1F) as u16
        }
        Instruction::St { rd, rb, offset } => {
            0xA000 | r(rd) << 9 | r(rb) << 5 | (offset & 0x1F) as u16
        }
        Instruction::Alu { op, rd, write, imm, operand } => {
            0xC000
                | op.bits() << 10
                | r(rd) << 6
                | (write as u16) << 5
                | (imm as u16) << 4
                | r(operand)
        }
        Instruction::Shift { rd, kind, count } => {
            0xDC00 | r(rd) << 6 | kind.bits() << 3 | (count & 0x7) as u16
        }
        Instruction::Jump { cond, offset } => {
            0xE000 | cond.bits() << 9 | (offset as u16 & 0x1FF)
        }
        Instruction::Lds { rd, rs, seg } => 0xF000 | seg.bits() << 8 | r(rd) << 4 | r(rs),
        Instruction::Sts { rd, rs, seg } => 0xF400 | seg.bits() << 8 | r(rd) << 4 | r(rs),
        Instruction::Mov { rd, rs, imm } => 0xF800 | r(rd) << 6 | r(rs) << 2 | (imm & 0x3) as u16,
        Instruction::Lsi { rd, imm } => 0xFC00 | r(rd) << 5 | (imm as u16 & 0x1F),
        Instruction::Sop { kind, rx } => 0xFE00 | kind.bits() << 4 | r(rx),
        Instruction::Mvs { to_segment, rd, seg } => {
            0xFF00 | (to_segment as u16) << 6 | r(rd) << 2 | seg.bits()
        }
        Instruction::Smv { src, rd } => 0xFF80 | src.bits() << 4 | r(rd),
        Instruction::Sys(op) => 0xFFF0 | op.bits(),
        Instruction::Unknown(word) => word,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_halt_sentinel() {
        assert_eq!(decode(0xFFFF), Instruction::Halt);
        assert_eq!(decode(0xFFF1), Instruction::Sys(SysOp::Hlt));
    }

    #[test]
    fn test_decode_ldi() {
        assert_eq!(decode(0x7FFF), Instruction::Ldi { imm: 0x7FFF });
        assert_eq!(decode(0x0000), Instruction::Ldi { imm: 0 });
    }

    #[test]
    fn test_decode_load_store() {
        // LD R1, [R2+5]
        assert_eq!(decode(0x8245), Instruction::Ld { rd: 1, rb: 2, offset: 5 });
        // ST R1, [R0+2]
        assert_eq!(decode(0xA202), Instruction::St { rd: 1, rb: 0, offset: 2 });
    }

    #[test]
    fn test_decode_alu_and_shift() {
        let add = Instruction::Alu { op: AluOp::Add, rd: 3, write: true, imm: false, operand: 1 };
        assert_eq!(decode(encode(&add)), add);
        assert_eq!(encode(&add), 0b110_000_0011_1_0_0001);

        let shift = decode(0b110_111_0010_011_101);
        assert_eq!(shift, Instruction::Shift { rd: 2, kind: ShiftKind::Src, count: 5 });
    }

    #[test]
    fn test_decode_wide_mul() {
        let wide = Instruction::Alu { op: AluOp::Mul, rd: 2, write: true, imm: true, operand: 5 };
        assert!(wide.is_wide());
        let narrow = Instruction::Alu { op: AluOp::Mul, rd: 3, write: true, imm: true, operand: 5 };
        assert!(!narrow.is_wide());
        let reg_form = Instruction::Alu { op: AluOp::Div, rd: 2, write: true, imm: false, operand: 5 };
        assert!(!reg_form.is_wide());
    }

    #[test]
    fn test_decode_jump_offsets() {
        assert_eq!(decode(0xE3FA), Instruction::Jump { cond: JumpCond::NotZero, offset: -6 });
        assert_eq!(decode(0xE0FF), Instruction::Jump { cond: JumpCond::Zero, offset: 255 });
        assert_eq!(decode(0xE100), Instruction::Jump { cond: JumpCond::Zero, offset: -256 });
    }

    #[test]
    fn test_decode_rom_words() {
        assert_eq!(decode(0xFF41), Instruction::Mvs { to_segment: true, rd: 0, seg: Segment::Ds });
        assert_eq!(decode(0xFC21), Instruction::Lsi { rd: 1, imm: 1 });
        assert_eq!(decode(0xFE01), Instruction::Sop { kind: SopKind::Swb, rx: 1 });
        assert_eq!(decode(0xFE40), Instruction::Sop { kind: SopKind::Jml, rx: 0 });
        assert_eq!(decode(0xFFF0), Instruction::Sys(SysOp::Nop));
    }

    #[test]
    fn test_decode_lsi_negative() {
        assert_eq!(decode(0xFC7F), Instruction::Lsi { rd: 3, imm: -1 });
        assert_eq!(decode(0xFC10), Instruction::Lsi { rd: 0, imm: -16 });
    }

    #[test]
    fn test_decode_smv_and_sys() {
        assert_eq!(decode(0xFFA3), Instruction::Smv { src: SpecialReg::Psw, rd: 3 });
        assert_eq!(decode(0xFFF2), Instruction::Sys(SysOp::Swi));
        assert_eq!(decode(0xFFF3), Instruction::Sys(SysOp::Reti));
    }

    #[test]
    fn test_unknown_words() {
        for word in [0xFFC0, 0xFFEF, 0xFFF4, 0xFFF7, 0xFFF8, 0xFFFE, 0xFE30, 0xFE5A, 0xFE7F] {
            assert_eq!(decode(word), Instruction::Unknown(word), "word {:04X}", word);
        }
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x1F, 5), -1);
        assert_eq!(sign_extend(0x0F, 5), 15);
        assert_eq!(sign_extend(0x100, 9), -256);
    }

    proptest! {
        #[test]
        fn prop_encode_inverts_decode(word in any::<u16>()) {
            prop_assert_eq!(encode(&decode(word)), word);
        }
    }
}

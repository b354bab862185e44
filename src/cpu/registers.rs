//! Deep16 register state.
//!
//! The machine has:
//! - 16 general registers R0-R15 (FP=R12, SP=R13, LR=R14, PC=R15)
//! - 4 segment registers: CS, DS, SS, ES
//! - the PSW flags word
//! - shadow slots PSW', PC', CS' for the alternate context

use serde::{Serialize, Deserialize};

/// Number of general registers.
pub const NUM_REGS: usize = 16;

/// Frame pointer alias.
pub const FP: usize = 12;
/// Stack pointer alias.
pub const SP: usize = 13;
/// Link register alias.
pub const LR: usize = 14;
/// Program counter alias.
pub const PC: usize = 15;

/// Initial stack pointer after reset.
pub const RESET_SP: u16 = 0x7FFF;

/// Conventional register name (`R0`..`R11`, `FP`, `SP`, `LR`, `PC`).
pub fn register_name(index: u8) -> &'static str {
    const NAMES: [&str; NUM_REGS] = [
        "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7",
        "R8", "R9", "R10", "R11", "FP", "SP", "LR", "PC",
    ];
    NAMES[(index & 0xF) as usize]
}

/// One of the four segment registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    Cs,
    Ds,
    Ss,
    Es,
}

impl Segment {
    pub const ALL: [Segment; 4] = [Segment::Cs, Segment::Ds, Segment::Ss, Segment::Es];

    /// Decode the 2-bit segment field.
    pub fn from_bits(bits: u16) -> Self {
        match bits & 0x3 {
            0 => Segment::Cs,
            1 => Segment::Ds,
            2 => Segment::Ss,
            _ => Segment::Es,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            Segment::Cs => 0,
            Segment::Ds => 1,
            Segment::Ss => 2,
            Segment::Es => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Segment::Cs => "CS",
            Segment::Ds => "DS",
            Segment::Ss => "SS",
            Segment::Es => "ES",
        }
    }

    /// Parse a segment name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        Segment::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }
}

/// Segment register file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segments {
    pub cs: u16,
    pub ds: u16,
    pub ss: u16,
    pub es: u16,
}

impl Segments {
    pub fn get(&self, seg: Segment) -> u16 {
        match seg {
            Segment::Cs => self.cs,
            Segment::Ds => self.ds,
            Segment::Ss => self.ss,
            Segment::Es => self.es,
        }
    }

    pub fn set(&mut self, seg: Segment, value: u16) {
        match seg {
            Segment::Cs => self.cs = value,
            Segment::Ds => self.ds = value,
            Segment::Ss => self.ss = value,
            Segment::Es => self.es = value,
        }
    }
}

/// Shadow (alternate context) slots.
///
/// Only `psw` is ever written, on software interrupt entry.
/// `pc` and `cs` are readable through SMV but stay at their reset value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shadow {
    pub psw: u16,
    pub pc: u16,
    pub cs: u16,
}

/// The processor status word.
///
/// Bit layout (15..0):
/// `DE | ER(4) | DS | SR(4) | S | I | C | V | Z | N`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Psw(pub u16);

impl Psw {
    pub const N: u16 = 1 << 0;
    pub const Z: u16 = 1 << 1;
    pub const V: u16 = 1 << 2;
    pub const C: u16 = 1 << 3;
    pub const I: u16 = 1 << 4;
    pub const S: u16 = 1 << 5;
    pub const DUAL_STACK: u16 = 1 << 10;
    pub const DUAL_EXTRA: u16 = 1 << 15;

    /// Mask of the arithmetic flags N, Z, V, C.
    pub const ARITH_MASK: u16 = 0x000F;

    const SR_SHIFT: u16 = 6;
    const ER_SHIFT: u16 = 11;

    #[inline]
    pub fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn is_set(self, mask: u16) -> bool {
        self.0 & mask != 0
    }

    #[inline]
    pub fn set(&mut self, mask: u16, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    pub fn negative(self) -> bool {
        self.is_set(Self::N)
    }

    pub fn zero(self) -> bool {
        self.is_set(Self::Z)
    }

    pub fn overflow(self) -> bool {
        self.is_set(Self::V)
    }

    pub fn carry(self) -> bool {
        self.is_set(Self::C)
    }

    pub fn interrupts_enabled(self) -> bool {
        self.is_set(Self::I)
    }

    pub fn shadow_view(self) -> bool {
        self.is_set(Self::S)
    }

    /// Stack register selector (bits 9-6).
    pub fn stack_reg(self) -> u8 {
        ((self.0 >> Self::SR_SHIFT) & 0xF) as u8
    }

    pub fn dual_stack(self) -> bool {
        self.is_set(Self::DUAL_STACK)
    }

    /// Extra register selector (bits 14-11).
    pub fn extra_reg(self) -> u8 {
        ((self.0 >> Self::ER_SHIFT) & 0xF) as u8
    }

    pub fn dual_extra(self) -> bool {
        self.is_set(Self::DUAL_EXTRA)
    }

    /// Select the stack register, optionally as a pair.
    pub fn select_stack(&mut self, reg: u8, dual: bool) {
        self.0 = (self.0 & !(0xF << Self::SR_SHIFT)) | (((reg & 0xF) as u16) << Self::SR_SHIFT);
        self.set(Self::DUAL_STACK, dual);
    }

    /// Select the extra register, optionally as a pair.
    pub fn select_extra(&mut self, reg: u8, dual: bool) {
        self.0 = (self.0 & !(0xF << Self::ER_SHIFT)) | (((reg & 0xF) as u16) << Self::ER_SHIFT);
        self.set(Self::DUAL_EXTRA, dual);
    }

    /// Replace N, Z, V, C with the given low nibble.
    pub fn set_arith(&mut self, nzvc: u16) {
        self.0 = (self.0 & !Self::ARITH_MASK) | (nzvc & Self::ARITH_MASK);
    }
}

/// A register selector matches `rb` directly, or as the upper half of a pair.
/// Selector 0 disables the override.
fn selector_matches(selector: u8, dual: bool, rb: u8) -> bool {
    selector != 0 && (rb == selector || (dual && rb == selector.wrapping_add(1)))
}

/// The complete Deep16 register file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Registers {
    /// R0-R15.
    pub gpr: [u16; NUM_REGS],
    /// Flags.
    pub psw: Psw,
    /// CS, DS, SS, ES.
    pub seg: Segments,
    /// Alternate-context slots.
    pub shadow: Shadow,
}

impl Registers {
    /// Create a register file in its reset state.
    pub fn new() -> Self {
        let mut regs = Self {
            gpr: [0; NUM_REGS],
            psw: Psw::default(),
            seg: Segments::default(),
            shadow: Shadow::default(),
        };
        regs.gpr[SP] = RESET_SP;
        regs
    }

    /// Reset all registers; SP gets its initial value.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn get(&self, index: u8) -> u16 {
        debug_assert!((index as usize) < NUM_REGS, "register index {} out of range", index);
        self.gpr[(index & 0xF) as usize]
    }

    #[inline]
    pub fn set(&mut self, index: u8, value: u16) {
        debug_assert!((index as usize) < NUM_REGS, "register index {} out of range", index);
        self.gpr[(index & 0xF) as usize] = value;
    }

    #[inline]
    pub fn pc(&self) -> u16 {
        self.gpr[PC]
    }

    #[inline]
    pub fn set_pc(&mut self, value: u16) {
        self.gpr[PC] = value;
    }

    /// Increment PC by one word, returning the old value.
    pub fn advance_pc(&mut self) -> u16 {
        let old = self.gpr[PC];
        self.gpr[PC] = old.wrapping_add(1);
        old
    }

    /// Physical address of the next fetch: `(CS << 4) + PC`.
    pub fn fetch_address(&self) -> u32 {
        physical_address(self.seg.cs, self.pc())
    }

    /// Segment used for a data access based on register `rb`.
    ///
    /// SS when `rb` is the selected stack register (or its pair partner in
    /// dual mode), ES likewise for the extra register, DS otherwise.
    pub fn data_segment_for(&self, rb: u8) -> Segment {
        if selector_matches(self.psw.stack_reg(), self.psw.dual_stack(), rb) {
            Segment::Ss
        } else if selector_matches(self.psw.extra_reg(), self.psw.dual_extra(), rb) {
            Segment::Es
        } else {
            Segment::Ds
        }
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

/// Combine a segment and 16-bit offset into a physical address.
///
/// The result may exceed the 20-bit address space; callers treat
/// such addresses as unmapped.
#[inline]
pub fn physical_address(segment: u16, offset: u16) -> u32 {
    ((segment as u32) << 4) + offset as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_state() {
        let regs = Registers::new();
        assert_eq!(regs.gpr[SP], 0x7FFF);
        assert_eq!(regs.pc(), 0);
        assert_eq!(regs.psw.bits(), 0);
        assert_eq!(regs.seg, Segments::default());
    }

    #[test]
    fn test_register_names() {
        assert_eq!(register_name(0), "R0");
        assert_eq!(register_name(11), "R11");
        assert_eq!(register_name(12), "FP");
        assert_eq!(register_name(13), "SP");
        assert_eq!(register_name(14), "LR");
        assert_eq!(register_name(15), "PC");
    }

    #[test]
    fn test_physical_address() {
        assert_eq!(physical_address(0x1000, 0x0015), 0x10015);
        assert_eq!(physical_address(0xFFFF, 0x0000), 0xFFFF0);
        assert_eq!(physical_address(0xFFFF, 0xFFFF), 0x10FFEF);
    }

    #[test]
    fn test_advance_pc_wraps() {
        let mut regs = Registers::new();
        regs.set_pc(0xFFFF);
        assert_eq!(regs.advance_pc(), 0xFFFF);
        assert_eq!(regs.pc(), 0);
    }

    #[test]
    fn test_psw_selectors() {
        let mut psw = Psw::default();
        psw.select_stack(13, true);
        psw.select_extra(9, false);
        assert_eq!(psw.stack_reg(), 13);
        assert!(psw.dual_stack());
        assert_eq!(psw.extra_reg(), 9);
        assert!(!psw.dual_extra());
        assert_eq!(psw.bits(), (13 << 6) | Psw::DUAL_STACK | (9 << 11));

        psw.select_stack(13, false);
        assert!(!psw.dual_stack());
        assert_eq!(psw.stack_reg(), 13);
    }

    #[test]
    fn test_set_arith_keeps_upper_bits() {
        let mut psw = Psw(Psw::I | Psw::S | Psw::C);
        psw.set_arith(Psw::Z | Psw::N);
        assert_eq!(psw.bits(), Psw::I | Psw::S | Psw::Z | Psw::N);
    }

    #[test]
    fn test_data_segment_selection() {
        let mut regs = Registers::new();
        assert_eq!(regs.data_segment_for(13), Segment::Ds);

        regs.psw.select_stack(13, false);
        assert_eq!(regs.data_segment_for(13), Segment::Ss);
        assert_eq!(regs.data_segment_for(14), Segment::Ds);

        regs.psw.select_stack(12, true);
        assert_eq!(regs.data_segment_for(12), Segment::Ss);
        assert_eq!(regs.data_segment_for(13), Segment::Ss);

        regs.psw.select_extra(8, false);
        assert_eq!(regs.data_segment_for(8), Segment::Es);
        assert_eq!(regs.data_segment_for(9), Segment::Ds);
    }

    #[test]
    fn test_zero_selector_disables_override() {
        let regs = Registers::new();
        assert_eq!(regs.data_segment_for(0), Segment::Ds);
    }

    #[test]
    fn test_segment_parse() {
        assert_eq!(Segment::parse("ds"), Some(Segment::Ds));
        assert_eq!(Segment::parse("ES"), Some(Segment::Es));
        assert_eq!(Segment::parse("XS"), None);
        for seg in Segment::ALL {
            assert_eq!(Segment::from_bits(seg.bits()), seg);
        }
    }
}

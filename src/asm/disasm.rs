//! Disassembler for Deep16 programs.
//!
//! Converts 16-bit words back to assembly text. Every word produces some
//! text; words with no defined meaning render as `???(0xHHHH)`. The output
//! syntax is accepted by the assembler and re-assembles to the same word.

use crate::cpu::decode::{decode, AluOp, Instruction, SopKind};
use crate::cpu::registers::{register_name, PC};

/// Disassemble a single word. Jumps show their relative offset.
pub fn disassemble_instruction(word: u16) -> String {
    format_instruction(&decode(word), None)
}

/// Disassemble a word located at `address`. Jumps show the absolute target.
pub fn disassemble_with_address(word: u16, address: u32) -> String {
    format_instruction(&decode(word), Some(address))
}

/// Disassemble a block of words loaded at `origin`.
pub fn disassemble(words: &[u16], origin: u32) -> String {
    let mut output = String::new();
    output.push_str("; Deep16 Disassembly\n");
    output.push_str("; ------------------\n\n");

    for (i, &word) in words.iter().enumerate() {
        let addr = origin + i as u32;
        let line = disassemble_with_address(word, addr);
        output.push_str(&format!("{:05X}: {:04X}  {}\n", addr, word, line));
    }

    output
}

/// Target of a jump at `address` with the given offset. PC arithmetic
/// wraps within the 16-bit code-segment offset; bits above it are kept.
pub fn jump_target(address: u32, offset: i16) -> u32 {
    let pc = (address as u16).wrapping_add(1).wrapping_add(offset as u16);
    (address & !0xFFFF) | pc as u32
}

fn r(index: u8) -> &'static str {
    register_name(index)
}

/// Format a decoded instruction as assembly text.
pub fn format_instruction(instr: &Instruction, address: Option<u32>) -> String {
    match *instr {
        Instruction::Halt => "HALT".to_string(),
        Instruction::Ldi { imm } => format!("LDI 0x{:04X}", imm),

        // Memory
        Instruction::Ld { rd, rb, offset } => format!("LD {}, {}", r(rd), mem_operand(rb, offset)),
        Instruction::St { rd, rb, offset } => format!("ST {}, {}", r(rd), mem_operand(rb, offset)),
        Instruction::Lds { rd, rs, seg } => format!("LDS {}, {}:[{}]", r(rd), seg.name(), r(rs)),
        Instruction::Sts { rd, rs, seg } => format!("STS {}, {}:[{}]", r(rd), seg.name(), r(rs)),

        // Moves
        Instruction::Mov { rd, rs, imm } => {
            if rd as usize == PC && imm == 0 {
                format!("JMP {}", r(rs))
            } else if imm == 0 {
                format!("MOV {}, {}", r(rd), r(rs))
            } else {
                format!("MOV {}, {}+{}", r(rd), r(rs), imm)
            }
        }
        Instruction::Lsi { rd, imm } => format!("LSI {}, {}", r(rd), imm),
        Instruction::Mvs { to_segment: true, rd, seg } => format!("MOV {}, {}", seg.name(), r(rd)),
        Instruction::Mvs { to_segment: false, rd, seg } => format!("MOV {}, {}", r(rd), seg.name()),
        Instruction::Smv { src, rd } => format!("MOV {}, {}", r(rd), src.name()),

        // Arithmetic
        Instruction::Alu { op, rd, write, imm, operand } => {
            if instr.is_wide() {
                let name = if op == AluOp::Mul { "MUL32" } else { "DIV32" };
                let suffix = if write { "" } else { "NW" };
                return format!("{}{} {}, {}", name, suffix, r(rd), r(operand));
            }
            let mnemonic = match (op, write) {
                (op, true) => op.mnemonic().to_string(),
                (AluOp::Sub, false) => "CMP".to_string(),
                (AluOp::And, false) => "TST".to_string(),
                (op, false) => format!("{}NW", op.mnemonic()),
            };
            if imm {
                format!("{} {}, {}", mnemonic, r(rd), operand)
            } else {
                format!("{} {}, {}", mnemonic, r(rd), r(operand))
            }
        }
        Instruction::Shift { rd, kind, count } => format!("{} {}, {}", kind.mnemonic(), r(rd), count),

        Instruction::Sop { kind, rx } => format_sop(kind, rx),

        // Control
        Instruction::Jump { cond, offset } => match address {
            Some(addr) => format!("{} 0x{:04X}", cond.mnemonic(), jump_target(addr, offset)),
            None => format!("{} {:+}", cond.mnemonic(), offset),
        },
        Instruction::Sys(op) => op.mnemonic().to_string(),

        Instruction::Unknown(word) => format!("???(0x{:04X})", word),
    }
}

fn mem_operand(rb: u8, offset: u8) -> String {
    if offset == 0 {
        format!("[{}]", r(rb))
    } else {
        format!("[{}+{}]", r(rb), offset)
    }
}

fn format_sop(kind: SopKind, rx: u8) -> String {
    if kind.takes_mask() {
        if let Some(alias) = flag_alias(kind, rx) {
            return alias.to_string();
        }
        return format!("{} {}", kind.mnemonic(), rx);
    }
    format!("{} {}", kind.mnemonic(), r(rx))
}

/// Single-flag alias for a SET/CLR/SET2/CLR2 mask, if one exists.
pub fn flag_alias(kind: SopKind, mask: u8) -> Option<&'static str> {
    FLAG_ALIASES
        .iter()
        .find(|(_, k, m)| *k == kind && *m == mask)
        .map(|(name, _, _)| *name)
}

/// Flag aliases: mnemonic, underlying operation, mask.
pub const FLAG_ALIASES: [(&str, SopKind, u8); 12] = [
    ("SETN", SopKind::Set, 0b0001),
    ("SETZ", SopKind::Set, 0b0010),
    ("SETV", SopKind::Set, 0b0100),
    ("SETC", SopKind::Set, 0b1000),
    ("CLRN", SopKind::Clr, 0b0001),
    ("CLRZ", SopKind::Clr, 0b0010),
    ("CLRV", SopKind::Clr, 0b0100),
    ("CLRC", SopKind::Clr, 0b1000),
    ("SETI", SopKind::Set2, 0b0001),
    ("SETS", SopKind::Set2, 0b0010),
    ("CLRI", SopKind::Clr2, 0b0001),
    ("CLRS", SopKind::Clr2, 0b0010),
];

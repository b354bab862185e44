//! Two-pass assembler for Deep16 programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//!         .org 0x0100         ; Set origin address
//!         .code               ; Segment markers (.code, .data) are accepted and ignored
//! COUNT:  .equ 10             ; (also: .equ COUNT 10)
//! start:  LSI  R1, 1          ; Label and instruction on one line
//! loop:                       ; Label on its own line
//!         ADD  R0, R1         ; Register operand
//!         SUB  R2, 1          ; 4-bit immediate
//!         LD   R3, [R4+2]     ; Segmented load
//!         JNZ  loop           ; Delayed relative jump
//!         NOP                 ; Delay slot
//!         HALT
//! msg:    .text "Hi"          ; One word per char, NUL terminated
//! table:  .word 1, 2, loop
//! ```
//!
//! Pass 1 assigns an address and a size to every line using the same
//! sizing rules pass 2 emits with, so forward references always resolve
//! to the right place. Errors never stop assembly: each failing line is
//! reported and the remaining lines are still encoded.

use crate::cpu::decode::{encode, AluOp, Instruction, JumpCond, ShiftKind, SopKind, SpecialReg, SysOp};
use crate::cpu::memory::{MemoryWrite, MEMORY_SIZE};
use crate::cpu::registers::{Segment, PC};
use super::disasm::FLAG_ALIASES;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

/// Label name to address.
pub type SymbolTable = BTreeMap<String, u32>;

/// Range of a signed 9-bit jump offset.
const JUMP_RANGE: std::ops::RangeInclusive<i64> = -256..=255;

/// Assemble source text. Always returns a result; check `success`.
pub fn assemble(source: &str) -> Assembly {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// Output of one assembly run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Assembly {
    /// True when `errors` is empty.
    pub success: bool,
    /// Errors in source order.
    pub errors: Vec<AsmError>,
    /// Labels defined by the program.
    pub symbols: SymbolTable,
    /// One entry per source line.
    pub listing: Vec<ListingEntry>,
    /// Words to store, in emission order.
    pub memory_changes: Vec<MemoryWrite>,
}

impl Assembly {
    /// Errors formatted as `Line N: message`.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }

    /// Number of words emitted.
    pub fn word_count(&self) -> usize {
        self.memory_changes.len()
    }
}

/// Listing record for one source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingEntry {
    /// 1-based source line.
    pub line: usize,
    /// Address of the line, absent for blank, comment and `.equ` lines.
    pub address: Option<u32>,
    pub words: Vec<u16>,
    pub error: Option<String>,
    pub source: String,
}

/// An assembly error tied to a source line.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Line {line}: {kind}")]
pub struct AsmError {
    pub line: usize,
    pub kind: AsmErrorKind,
}

/// What went wrong on a line.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum AsmErrorKind {
    #[error("unknown mnemonic: {0}")]
    UnknownMnemonic(String),

    #[error("unknown directive: {0}")]
    UnknownDirective(String),

    #[error("invalid register: {0}")]
    InvalidRegister(String),

    #[error("invalid segment register: {0}")]
    InvalidSegment(String),

    #[error("invalid special register: {0}")]
    InvalidSpecial(String),

    #[error("{mnemonic} expects {expected} operand(s), found {found}")]
    OperandCount { mnemonic: String, expected: usize, found: usize },

    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("{}", format_range(.what, .value, .min, .max))]
    OutOfRange { what: &'static str, value: i64, min: i64, max: i64 },

    #[error("undefined label: {0}")]
    UnknownLabel(String),

    #[error("jump target 0x{target:X} too far (offset {offset}, range -256 to 255)")]
    JumpTooFar { target: i64, offset: i64 },

    #[error("{mnemonic} requires an {parity} register")]
    RegisterParity { mnemonic: String, parity: &'static str },

    #[error("duplicate symbol: {0}")]
    DuplicateLabel(String),

    #[error("invalid symbol name: {0}")]
    InvalidLabel(String),

    #[error("invalid string literal: {0}")]
    InvalidString(String),

    #[error("address 0x{0:X} outside the 20-bit address space")]
    AddressOutOfRange(u64),
}

fn format_range(what: &str, value: &i64, min: &i64, max: &i64) -> String {
    if *min < 0 {
        format!("{} {} out of range {} to {}", what, value, min, max)
    } else {
        format!("{} {} out of range {}-{}", what, value, min, max)
    }
}

fn check_range(what: &'static str, value: i64, min: i64, max: i64) -> Result<i64, AsmErrorKind> {
    if value < min || value > max {
        Err(AsmErrorKind::OutOfRange { what, value, min, max })
    } else {
        Ok(value)
    }
}

/// A mnemonic or directive with its comma-separated operands.
#[derive(Debug, Clone)]
struct Statement<'a> {
    /// Uppercased mnemonic or directive name.
    op: String,
    args: Vec<&'a str>,
}

impl<'a> Statement<'a> {
    fn parse(text: &'a str) -> Self {
        let (head, rest) = match text.find(char::is_whitespace) {
            Some(i) => (&text[..i], text[i..].trim()),
            None => (text, ""),
        };
        Self {
            op: head.to_ascii_uppercase(),
            args: split_operands(rest),
        }
    }

    fn is_directive(&self) -> bool {
        self.op.starts_with('.')
    }

    fn expect_operands(&self, count: usize) -> Result<(), AsmErrorKind> {
        if self.args.len() == count {
            Ok(())
        } else {
            Err(AsmErrorKind::OperandCount {
                mnemonic: self.op.clone(),
                expected: count,
                found: self.args.len(),
            })
        }
    }
}

/// How a line moves the address cursor.
enum Advance {
    /// Emit this many words at the cursor.
    Words(u32),
    /// `.org`: move the cursor.
    Origin(u32),
    /// `.equ`: no address.
    Define,
}

/// Pass-1 record of a source line.
struct LineInfo<'a> {
    number: usize,
    source: &'a str,
    address: Option<u32>,
    size: u32,
    statement: Option<Statement<'a>>,
    error: Option<AsmErrorKind>,
}

/// The assembler state.
struct Assembler {
    /// Labels (exported).
    symbols: SymbolTable,
    /// `.equ` constants.
    constants: HashMap<String, i64>,
    /// `.equ` register aliases, keyed uppercase.
    reg_aliases: HashMap<String, u8>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: SymbolTable::new(),
            constants: HashMap::new(),
            reg_aliases: HashMap::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Assembly {
        let lines = self.pass1(source);
        let out = self.pass2(lines);
        debug!(
            symbols = out.symbols.len(),
            words = out.memory_changes.len(),
            errors = out.errors.len(),
            "assembly finished"
        );
        out
    }

    // ==================== Pass 1 ====================

    fn pass1<'a>(&mut self, source: &'a str) -> Vec<LineInfo<'a>> {
        let mut cursor: u32 = 0;
        let mut lines = Vec::new();

        for (idx, text) in source.lines().enumerate() {
            let mut info = LineInfo {
                number: idx + 1,
                source: text,
                address: None,
                size: 0,
                statement: None,
                error: None,
            };

            let code = strip_comment(text).trim();
            if code.is_empty() {
                lines.push(info);
                continue;
            }

            let (mut label, rest) = split_label(code);
            let mut stmt = (!rest.is_empty()).then(|| Statement::parse(rest));
            // `NAME: .equ value` names the constant, not an address.
            if let (Some(name), Some(stmt)) = (label, stmt.as_mut()) {
                if stmt.op == ".EQU" {
                    stmt.args.insert(0, name);
                    label = None;
                }
            }

            info.address = Some(cursor);
            if let Some(label) = label {
                if let Err(kind) = self.define_label(label, cursor) {
                    info.error = Some(kind);
                }
            }

            if let Some(stmt) = stmt {
                match self.line_size(&stmt) {
                    Ok(Advance::Words(n)) => info.size = n,
                    Ok(Advance::Origin(addr)) => {
                        cursor = addr;
                        info.address = Some(addr);
                    }
                    Ok(Advance::Define) => {
                        if label.is_none() {
                            info.address = None;
                        }
                    }
                    Err(kind) => {
                        info.error.get_or_insert(kind);
                    }
                }
                info.statement = Some(stmt);
            }

            let end = cursor as u64 + info.size as u64;
            if end > MEMORY_SIZE as u64 {
                info.error.get_or_insert(AsmErrorKind::AddressOutOfRange(end - 1));
            }
            cursor = cursor.saturating_add(info.size);
            lines.push(info);
        }

        debug!(lines = lines.len(), symbols = self.symbols.len(), "pass 1 complete");
        lines
    }

    fn define_label(&mut self, name: &str, address: u32) -> Result<(), AsmErrorKind> {
        if self.symbols.contains_key(name) || self.constants.contains_key(name) {
            return Err(AsmErrorKind::DuplicateLabel(name.to_string()));
        }
        self.symbols.insert(name.to_string(), address);
        Ok(())
    }

    /// Number of words a statement occupies. Shared by both passes.
    fn line_size(&mut self, stmt: &Statement) -> Result<Advance, AsmErrorKind> {
        if !stmt.is_directive() {
            return Ok(Advance::Words(1));
        }
        match stmt.op.as_str() {
            ".ORG" => {
                stmt.expect_operands(1)?;
                let addr = check_range("origin", self.value(stmt.args[0])?, 0, MEMORY_SIZE as i64 - 1)?;
                Ok(Advance::Origin(addr as u32))
            }
            ".EQU" => {
                self.define_constant(stmt)?;
                Ok(Advance::Define)
            }
            ".CODE" | ".DATA" => {
                stmt.expect_operands(0)?;
                Ok(Advance::Words(0))
            }
            ".WORD" => {
                if stmt.args.is_empty() {
                    return Err(AsmErrorKind::OperandCount {
                        mnemonic: stmt.op.clone(),
                        expected: 1,
                        found: 0,
                    });
                }
                Ok(Advance::Words(stmt.args.len() as u32))
            }
            ".TEXT" => {
                stmt.expect_operands(1)?;
                Ok(Advance::Words(parse_string_literal(stmt.args[0])?.len() as u32 + 1))
            }
            ".STRING" => {
                stmt.expect_operands(1)?;
                let len = parse_string_literal(stmt.args[0])?.len() as u32;
                Ok(Advance::Words((len + 1) / 2 + 1))
            }
            other => Err(AsmErrorKind::UnknownDirective(other.to_string())),
        }
    }

    /// `.equ NAME value`, `.equ NAME, value`, or `NAME: .equ value`.
    fn define_constant(&mut self, stmt: &Statement) -> Result<(), AsmErrorKind> {
        let (name, value) = match stmt.args.as_slice() {
            [name, value] => (name.trim(), value.trim()),
            [single] => single
                .trim()
                .split_once(char::is_whitespace)
                .map(|(n, v)| (n.trim(), v.trim()))
                .ok_or_else(|| AsmErrorKind::InvalidOperand(single.to_string()))?,
            _ => {
                return Err(AsmErrorKind::OperandCount {
                    mnemonic: stmt.op.clone(),
                    expected: 2,
                    found: stmt.args.len(),
                })
            }
        };
        if !is_identifier(name) {
            return Err(AsmErrorKind::InvalidLabel(name.to_string()));
        }
        if self.symbols.contains_key(name)
            || self.constants.contains_key(name)
            || self.reg_aliases.contains_key(&name.to_ascii_uppercase())
        {
            return Err(AsmErrorKind::DuplicateLabel(name.to_string()));
        }
        if let Ok(reg) = self.register(value) {
            self.reg_aliases.insert(name.to_ascii_uppercase(), reg);
        } else {
            let v = self.value(value)?;
            self.constants.insert(name.to_string(), v);
        }
        Ok(())
    }

    // ==================== Pass 2 ====================

    fn pass2(&mut self, lines: Vec<LineInfo>) -> Assembly {
        let mut out = Assembly {
            symbols: self.symbols.clone(),
            ..Assembly::default()
        };

        for info in lines {
            let mut words = Vec::new();
            let mut error = info.error;

            if error.is_none() {
                if let (Some(stmt), Some(addr)) = (&info.statement, info.address) {
                    match self.encode_statement(stmt, addr) {
                        Ok(encoded) => {
                            debug_assert_eq!(encoded.len() as u32, info.size, "pass size mismatch");
                            words = encoded;
                        }
                        Err(kind) => error = Some(kind),
                    }
                }
            }

            if let Some(addr) = info.address {
                out.memory_changes.extend(words.iter().enumerate().map(|(i, &value)| MemoryWrite {
                    address: addr + i as u32,
                    value,
                }));
            }

            let message = error.as_ref().map(|k| k.to_string());
            if let Some(kind) = error {
                out.errors.push(AsmError { line: info.number, kind });
            }
            out.listing.push(ListingEntry {
                line: info.number,
                address: info.address,
                words,
                error: message,
                source: info.source.to_string(),
            });
        }

        out.success = out.errors.is_empty();
        out
    }

    fn encode_statement(&self, stmt: &Statement, addr: u32) -> Result<Vec<u16>, AsmErrorKind> {
        match stmt.op.as_str() {
            ".ORG" | ".EQU" | ".CODE" | ".DATA" => Ok(Vec::new()),
            ".WORD" => stmt
                .args
                .iter()
                .map(|arg| {
                    let v = check_range("word", self.value(arg)?, i16::MIN as i64, u16::MAX as i64)?;
                    Ok(v as u16)
                })
                .collect(),
            ".TEXT" => {
                let mut words = Vec::new();
                for c in parse_string_literal(stmt.args[0])? {
                    words.push(check_range("character", c as i64, 0, u16::MAX as i64)? as u16);
                }
                words.push(0);
                Ok(words)
            }
            ".STRING" => {
                let chars = parse_string_literal(stmt.args[0])?;
                let mut bytes = Vec::with_capacity(chars.len());
                for c in chars {
                    bytes.push(check_range("character", c as i64, 0, 0xFF)? as u16);
                }
                let mut words: Vec<u16> = bytes
                    .chunks(2)
                    .map(|pair| pair[0] << 8 | pair.get(1).copied().unwrap_or(0))
                    .collect();
                words.push(0);
                Ok(words)
            }
            _ => {
                let instr = self.encode_instruction(stmt, addr)?;
                Ok(vec![encode(&instr)])
            }
        }
    }

    // ==================== Instructions ====================

    fn encode_instruction(&self, stmt: &Statement, addr: u32) -> Result<Instruction, AsmErrorKind> {
        let op = stmt.op.as_str();
        let args = &stmt.args;

        let instr = match op {
            "HALT" => {
                stmt.expect_operands(0)?;
                Instruction::Halt
            }
            "NOP" | "HLT" | "SWI" | "RETI" => {
                stmt.expect_operands(0)?;
                Instruction::Sys(match op {
                    "NOP" => SysOp::Nop,
                    "HLT" => SysOp::Hlt,
                    "SWI" => SysOp::Swi,
                    _ => SysOp::Reti,
                })
            }
            "LDI" => {
                stmt.expect_operands(1)?;
                let imm = check_range("immediate", self.value(args[0])?, 0, 0x7FFF)?;
                Instruction::Ldi { imm: imm as u16 }
            }
            "LSI" => {
                stmt.expect_operands(2)?;
                let rd = self.register(args[0])?;
                let imm = check_range("immediate", self.value(args[1])?, -16, 15)?;
                Instruction::Lsi { rd, imm: imm as i8 }
            }
            "MOV" => self.encode_mov(stmt)?,
            "MVS" => {
                stmt.expect_operands(2)?;
                match Segment::parse(args[0].trim()) {
                    Some(seg) => Instruction::Mvs { to_segment: true, rd: self.register(args[1])?, seg },
                    None => Instruction::Mvs {
                        to_segment: false,
                        rd: self.register(args[0])?,
                        seg: self.segment(args[1])?,
                    },
                }
            }
            "SMV" => {
                stmt.expect_operands(2)?;
                let rd = self.register(args[0])?;
                let src = SpecialReg::parse(args[1].trim())
                    .ok_or_else(|| AsmErrorKind::InvalidSpecial(args[1].to_string()))?;
                Instruction::Smv { src, rd }
            }
            "JMP" => {
                stmt.expect_operands(1)?;
                Instruction::Mov { rd: PC as u8, rs: self.register(args[0])?, imm: 0 }
            }
            "LNK" => {
                stmt.expect_operands(1)?;
                Instruction::Mov { rd: self.register(args[0])?, rs: PC as u8, imm: 2 }
            }
            "LD" | "ST" => self.encode_memory(stmt)?,
            "LDS" | "STS" => self.encode_physical(stmt)?,
            "CMP" => self.encode_alu(stmt, AluOp::Sub, false)?,
            "TST" => self.encode_alu(stmt, AluOp::And, false)?,
            "MUL32" | "MUL32NW" => self.encode_wide(stmt, AluOp::Mul, op == "MUL32")?,
            "DIV32" | "DIV32NW" => self.encode_wide(stmt, AluOp::Div, op == "DIV32")?,
            _ => {
                if let Some((alu, write)) = alu_mnemonic(op) {
                    self.encode_alu(stmt, alu, write)?
                } else if let Some(kind) = ShiftKind::ALL.into_iter().find(|k| k.mnemonic() == op) {
                    self.encode_shift(stmt, kind)?
                } else if let Some(cond) = JumpCond::ALL.into_iter().find(|c| c.mnemonic() == op) {
                    self.encode_jump(stmt, cond, addr)?
                } else if let Some(kind) = sop_mnemonic(op) {
                    self.encode_sop(stmt, kind)?
                } else if let Some(&(_, kind, mask)) = FLAG_ALIASES.iter().find(|(name, _, _)| *name == op) {
                    stmt.expect_operands(0)?;
                    Instruction::Sop { kind, rx: mask }
                } else {
                    return Err(AsmErrorKind::UnknownMnemonic(op.to_string()));
                }
            }
        };
        Ok(instr)
    }

    fn encode_mov(&self, stmt: &Statement) -> Result<Instruction, AsmErrorKind> {
        let args = &stmt.args;
        if args.len() == 3 {
            let rd = self.register(args[0])?;
            let rs = self.register(args[1])?;
            let imm = check_range("move offset", self.value(args[2])?, 0, 3)?;
            return Ok(Instruction::Mov { rd, rs, imm: imm as u8 });
        }
        stmt.expect_operands(2)?;

        if let Some(seg) = Segment::parse(args[0].trim()) {
            return Ok(Instruction::Mvs { to_segment: true, rd: self.register(args[1])?, seg });
        }
        let rd = self.register(args[0])?;
        let src = args[1].trim();
        if let Some(seg) = Segment::parse(src) {
            return Ok(Instruction::Mvs { to_segment: false, rd, seg });
        }
        if let Some(special) = SpecialReg::parse(src) {
            return Ok(Instruction::Smv { src: special, rd });
        }
        match src.split_once('+') {
            Some((rs, imm)) => {
                let rs = self.register(rs)?;
                let imm = check_range("move offset", self.value(imm)?, 0, 3)?;
                Ok(Instruction::Mov { rd, rs, imm: imm as u8 })
            }
            None => Ok(Instruction::Mov { rd, rs: self.register(src)?, imm: 0 }),
        }
    }

    fn encode_alu(&self, stmt: &Statement, op: AluOp, write: bool) -> Result<Instruction, AsmErrorKind> {
        stmt.expect_operands(2)?;
        let rd = self.register(stmt.args[0])?;
        if let Ok(rs) = self.register(stmt.args[1]) {
            return Ok(Instruction::Alu { op, rd, write, imm: false, operand: rs });
        }
        let imm = check_range("immediate", self.value(stmt.args[1])?, 0, 15)?;
        // Even Rd with an immediate is the 32-bit form.
        if matches!(op, AluOp::Mul | AluOp::Div) && rd % 2 == 0 {
            return Err(AsmErrorKind::RegisterParity { mnemonic: stmt.op.clone(), parity: "odd" });
        }
        Ok(Instruction::Alu { op, rd, write, imm: true, operand: imm as u8 })
    }

    fn encode_wide(&self, stmt: &Statement, op: AluOp, write: bool) -> Result<Instruction, AsmErrorKind> {
        stmt.expect_operands(2)?;
        let rd = self.register(stmt.args[0])?;
        if rd % 2 != 0 {
            return Err(AsmErrorKind::RegisterParity { mnemonic: stmt.op.clone(), parity: "even" });
        }
        let rs = self.register(stmt.args[1])?;
        Ok(Instruction::Alu { op, rd, write, imm: true, operand: rs })
    }

    fn encode_shift(&self, stmt: &Statement, kind: ShiftKind) -> Result<Instruction, AsmErrorKind> {
        let count = match stmt.args.len() {
            1 => 1,
            2 => check_range("shift count", self.value(stmt.args[1])?, 0, 7)?,
            found => {
                return Err(AsmErrorKind::OperandCount { mnemonic: stmt.op.clone(), expected: 2, found })
            }
        };
        let rd = self.register(stmt.args[0])?;
        Ok(Instruction::Shift { rd, kind, count: count as u8 })
    }

    fn encode_jump(&self, stmt: &Statement, cond: JumpCond, addr: u32) -> Result<Instruction, AsmErrorKind> {
        stmt.expect_operands(1)?;
        let arg = stmt.args[0].trim();
        let next = addr as i64 + 1;
        let offset = if arg.starts_with('+') || arg.starts_with('-') {
            parse_number(arg).ok_or_else(|| AsmErrorKind::InvalidNumber(arg.to_string()))?
        } else {
            self.value(arg)? - next
        };
        if !JUMP_RANGE.contains(&offset) {
            return Err(AsmErrorKind::JumpTooFar { target: next + offset, offset });
        }
        Ok(Instruction::Jump { cond, offset: offset as i16 })
    }

    fn encode_sop(&self, stmt: &Statement, kind: SopKind) -> Result<Instruction, AsmErrorKind> {
        stmt.expect_operands(1)?;
        let rx = if kind.takes_mask() {
            check_range("flag mask", self.value(stmt.args[0])?, 0, 15)? as u8
        } else {
            self.register(stmt.args[0])?
        };
        if kind == SopKind::Jml && rx % 2 != 0 {
            return Err(AsmErrorKind::RegisterParity { mnemonic: stmt.op.clone(), parity: "even" });
        }
        Ok(Instruction::Sop { kind, rx })
    }

    /// `LD Rd, [Rb+off]`, `LD Rd, [Rb]` or `LD Rd, Rb, off`.
    fn encode_memory(&self, stmt: &Statement) -> Result<Instruction, AsmErrorKind> {
        let args = &stmt.args;
        let (rd, rb, offset) = match args.len() {
            2 => {
                let inner = strip_brackets(args[1])
                    .ok_or_else(|| AsmErrorKind::InvalidOperand(args[1].to_string()))?;
                let (base, off) = match inner.split_once('+') {
                    Some((base, off)) => (base, self.value(off)?),
                    None => (inner, 0),
                };
                (self.register(args[0])?, self.register(base)?, off)
            }
            3 => (self.register(args[0])?, self.register(args[1])?, self.value(args[2])?),
            found => {
                return Err(AsmErrorKind::OperandCount { mnemonic: stmt.op.clone(), expected: 2, found })
            }
        };
        let offset = check_range("offset", offset, 0, 31)? as u8;
        Ok(if stmt.op == "LD" {
            Instruction::Ld { rd, rb, offset }
        } else {
            Instruction::St { rd, rb, offset }
        })
    }

    /// `LDS Rd, SEG:[Rs]`, `LDS Rd, [Rs]` or `LDS Rd, Rs`. The segment defaults to DS.
    fn encode_physical(&self, stmt: &Statement) -> Result<Instruction, AsmErrorKind> {
        stmt.expect_operands(2)?;
        let rd = self.register(stmt.args[0])?;
        let operand = stmt.args[1].trim();
        let (seg, addr) = match operand.split_once(':') {
            Some((seg, rest)) => (self.segment(seg)?, rest.trim()),
            None => (Segment::Ds, operand),
        };
        let rs = self.register(strip_brackets(addr).unwrap_or(addr))?;
        Ok(if stmt.op == "LDS" {
            Instruction::Lds { rd, rs, seg }
        } else {
            Instruction::Sts { rd, rs, seg }
        })
    }

    // ==================== Operands ====================

    /// Register name, alias, or `.equ` register alias.
    fn register(&self, text: &str) -> Result<u8, AsmErrorKind> {
        let text = text.trim();
        if let Some(reg) = parse_register(text) {
            return Ok(reg);
        }
        self.reg_aliases
            .get(&text.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| AsmErrorKind::InvalidRegister(text.to_string()))
    }

    fn segment(&self, text: &str) -> Result<Segment, AsmErrorKind> {
        Segment::parse(text.trim()).ok_or_else(|| AsmErrorKind::InvalidSegment(text.trim().to_string()))
    }

    /// Number, character literal, symbol, or `symbol±number`.
    fn value(&self, text: &str) -> Result<i64, AsmErrorKind> {
        let text = text.trim();
        let text = text.strip_prefix('#').unwrap_or(text).trim();
        if text.is_empty() {
            return Err(AsmErrorKind::InvalidOperand(text.to_string()));
        }
        if let Some(n) = parse_number(text) {
            return Ok(n);
        }
        if !text.starts_with('\'') {
            let split = text
                .char_indices()
                .skip(1)
                .filter(|&(_, c)| c == '+' || c == '-')
                .last()
                .map(|(i, _)| i);
            if let Some(idx) = split {
                let (left, right) = text.split_at(idx);
                let base = self.value(left)?;
                let delta = parse_number(right.trim())
                    .ok_or_else(|| AsmErrorKind::InvalidNumber(right.trim().to_string()))?;
                return Ok(base + delta);
            }
        }
        if is_identifier(text) {
            if parse_register(text).is_some() || self.reg_aliases.contains_key(&text.to_ascii_uppercase()) {
                return Err(AsmErrorKind::InvalidOperand(text.to_string()));
            }
            if let Some(&addr) = self.symbols.get(text) {
                return Ok(addr as i64);
            }
            if let Some(&v) = self.constants.get(text) {
                return Ok(v);
            }
            return Err(AsmErrorKind::UnknownLabel(text.to_string()));
        }
        Err(AsmErrorKind::InvalidNumber(text.to_string()))
    }
}

fn alu_mnemonic(op: &str) -> Option<(AluOp, bool)> {
    AluOp::ALL.into_iter().find_map(|alu| {
        let name = alu.mnemonic();
        if op == name {
            Some((alu, true))
        } else if op.strip_suffix("NW") == Some(name) {
            Some((alu, false))
        } else {
            None
        }
    })
}

fn sop_mnemonic(op: &str) -> Option<SopKind> {
    const KINDS: [SopKind; 12] = [
        SopKind::Swb, SopKind::Inv, SopKind::Neg, SopKind::Jml,
        SopKind::Srs, SopKind::Srd, SopKind::Ers, SopKind::Erd,
        SopKind::Set, SopKind::Clr, SopKind::Set2, SopKind::Clr2,
    ];
    KINDS.into_iter().find(|k| k.mnemonic() == op)
}

/// `R0`-`R15`, `FP`, `SP`, `LR`, `PC`, case-insensitively.
pub fn parse_register(text: &str) -> Option<u8> {
    let upper = text.trim().to_ascii_uppercase();
    match upper.as_str() {
        "FP" => Some(12),
        "SP" => Some(13),
        "LR" => Some(14),
        "PC" => Some(15),
        _ => {
            let digits = upper.strip_prefix('R')?;
            if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse::<u8>().ok().filter(|&n| n < 16)
        }
    }
}

/// Decimal, `0x`/`$` hex, `0b` binary, or a character literal.
/// A leading `+`/`-` sign is accepted.
pub fn parse_number(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(c) = parse_char_literal(text) {
        return Some(c as i64);
    }
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (digits, radix) = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(hex) = body.strip_prefix('$') {
        (hex, 16)
    } else if let Some(bin) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        (bin, 2)
    } else {
        (body, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let value = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -value } else { value })
}

fn parse_escape(c: char) -> Option<char> {
    Some(match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        '\\' => '\\',
        '"' => '"',
        '\'' => '\'',
        _ => return None,
    })
}

fn parse_char_literal(text: &str) -> Option<char> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut chars = inner.chars();
    let c = match chars.next()? {
        '\\' => parse_escape(chars.next()?)?,
        c => c,
    };
    if chars.next().is_some() {
        return None;
    }
    Some(c)
}

/// Contents of a double-quoted literal with escapes applied.
fn parse_string_literal(text: &str) -> Result<Vec<char>, AsmErrorKind> {
    let text = text.trim();
    let invalid = || AsmErrorKind::InvalidString(text.to_string());
    let inner = text
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(invalid)?;
    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next().and_then(parse_escape).ok_or_else(invalid)?);
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Drop a `;` comment, ignoring `;` inside quotes.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, ';') => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Split a leading `label:` off a line.
fn split_label(code: &str) -> (Option<&str>, &str) {
    if let Some(idx) = code.find(':') {
        let candidate = code[..idx].trim();
        if is_identifier(candidate) {
            return (Some(candidate), code[idx + 1..].trim());
        }
    }
    (None, code)
}

/// Split operands on commas outside brackets and quotes.
fn split_operands(text: &str) -> Vec<&str> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts
}

fn strip_brackets(text: &str) -> Option<&str> {
    text.trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .map(str::trim)
}

//! Assembler and disassembler for Deep16 programs.
//!
//! This module provides:
//! - A two-pass assembler (text → address/word pairs, symbols, listing)
//! - A disassembler (words → readable text)

pub mod assembler;
pub mod disasm;

pub use assembler::{assemble, AsmError, AsmErrorKind, Assembly, ListingEntry, SymbolTable};
pub use disasm::{disassemble, disassemble_instruction, disassemble_with_address};

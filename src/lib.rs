//! # Deep16 Simulator
//!
//! An instruction-set simulator, assembler and disassembler for the Deep16,
//! a 16-bit word-addressed CPU with segmented 20-bit physical memory, a
//! one-slot branch delay and a shadow register context for interrupts.
//!
//! ```
//! use deep16::{assemble, Cpu};
//!
//! let asm = assemble("LSI R1, 5\nADD R1, 2\nHALT");
//! assert!(asm.success);
//!
//! let mut cpu = Cpu::new();
//! cpu.load_program(&asm.memory_changes).unwrap();
//! cpu.run(100);
//! assert_eq!(cpu.regs.get(1), 7);
//! ```

pub mod cpu;
pub mod asm;
pub mod config;

#[cfg(feature = "tui")]
pub mod tui;

// Re-export commonly used types
pub use cpu::{Cpu, CpuState, CpuSnapshot, Instruction, Memory, MemoryError, MemoryWrite, Registers};
pub use asm::{assemble, disassemble, AsmError, AsmErrorKind, Assembly};
pub use config::{Config, ConfigError};

#[cfg(feature = "tui")]
pub use tui::run_debugger;

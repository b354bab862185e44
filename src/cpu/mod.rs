//! CPU emulation for the Deep16.
//!
//! This module implements the segmented delay-slot machine:
//! - 16 sixteen-bit registers plus CS/DS/SS/ES and the PSW
//! - 2^20 words of physical memory with the autoload ROM at 0xFFFF0
//! - a prefix-coded instruction set decoded by [`decode::decode`]

pub mod memory;
pub mod registers;
pub mod decode;
pub mod alu;
pub mod execute;

pub use memory::{Memory, MemoryError, MemoryWrite, is_screen_address};
pub use registers::{Registers, Segment, Psw};
pub use decode::{Instruction, decode, encode};
pub use execute::{Cpu, CpuState, CpuSnapshot, MemoryCell, MemoryObserver};

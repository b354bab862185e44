//! TUI debugger for the Deep16 simulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - Disassembly around CS:PC with breakpoints
//! - Register, flag, segment and shadow panels
//! - Recent-access and scrollable memory views
//! - A screen-write counter fed by the memory observer

mod app;
mod ui;

pub use app::{DebuggerApp, DisasmLine, run_debugger};

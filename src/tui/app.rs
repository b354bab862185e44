//! Debugger application state and logic.

use crate::asm::disasm::disassemble_with_address;
use crate::config::Config;
use crate::cpu::registers::physical_address;
use crate::cpu::{is_screen_address, Cpu, MemoryWrite};
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver};

/// Instructions executed per UI frame while running.
const STEPS_PER_TICK: u64 = 2_000;

/// One line of the disassembly panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisasmLine {
    pub cs: u16,
    pub offset: u16,
    pub physical: u32,
    pub word: u16,
    pub text: String,
    pub is_current: bool,
}

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Program image, reloaded on reset.
    pub program: Vec<MemoryWrite>,
    pub config: Config,
    /// Breakpoints (by physical address).
    pub breakpoints: HashSet<u32>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// First address of the memory panel.
    pub mem_scroll: u32,
    /// Stores into the screen region since the last reset.
    pub screen_writes: u64,
    pub last_screen_write: Option<(u32, u16)>,
    screen_rx: Receiver<(u32, u16)>,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program.
    pub fn new(program: Vec<MemoryWrite>, config: Config) -> Self {
        let (tx, screen_rx) = mpsc::channel();
        let mut cpu = Cpu::new();
        cpu.set_memory_observer(move |addr, value| {
            if is_screen_address(addr) {
                let _ = tx.send((addr, value));
            }
        });

        let mut app = Self {
            cpu,
            program,
            config,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: String::new(),
            mem_scroll: 0,
            screen_writes: 0,
            last_screen_write: None,
            screen_rx,
        };
        app.reload();
        app.status = "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into();
        app
    }

    fn reload(&mut self) {
        if let Err(e) = self.cpu.load_program(&self.program) {
            self.status = format!("Load error: {}", e);
        }
        self.config.apply(&mut self.cpu);
        self.drain_screen_writes();
        self.screen_writes = 0;
        self.last_screen_write = None;
        self.running = false;
    }

    /// Pull observer notifications into the counters.
    pub fn drain_screen_writes(&mut self) {
        for write in self.screen_rx.try_iter() {
            self.screen_writes += 1;
            self.last_screen_write = Some(write);
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU halted: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        let cs = self.cpu.regs.seg.cs;
        let pc = self.cpu.regs.pc();
        let word = self.cpu.mem.read(self.cpu.regs.fetch_address()).unwrap_or(0xFFFF);
        self.cpu.step();
        self.drain_screen_writes();
        self.status = format!("{:04X}:{:04X}  {}", cs, pc, disassemble_with_address(word, pc as u32));
        if !self.cpu.is_running() {
            self.status.push_str("  (halted)");
        }
    }

    /// Run until halt or breakpoint.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    pub fn pause(&mut self) {
        self.running = false;
        self.status = format!("Paused after {} cycles", self.cpu.cycles);
    }

    /// Run one batch of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Halted after {} cycles", self.cpu.cycles);
            return;
        }

        // The instruction under a breakpoint runs when resuming from it.
        let breakpoints = &self.breakpoints;
        let mut first = true;
        let mut hit = None;
        self.cpu.run_until(STEPS_PER_TICK, |cpu| {
            let addr = cpu.regs.fetch_address();
            let stop = !first && breakpoints.contains(&addr);
            first = false;
            if stop {
                hit = Some(addr);
            }
            stop
        });
        self.drain_screen_writes();

        if let Some(addr) = hit {
            self.running = false;
            self.status = format!("Breakpoint at {:05X}", addr);
        } else if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Halted after {} cycles", self.cpu.cycles);
        }
    }

    /// Toggle breakpoint at the current fetch address.
    pub fn toggle_breakpoint(&mut self) {
        let addr = self.cpu.regs.fetch_address();
        if self.breakpoints.remove(&addr) {
            self.status = format!("Removed breakpoint at {:05X}", addr);
        } else {
            self.breakpoints.insert(addr);
            self.status = format!("Set breakpoint at {:05X}", addr);
        }
    }

    /// Reload the program and restart.
    pub fn reset(&mut self) {
        self.reload();
        self.status = "Reset. Ready.".into();
    }

    /// Move the memory panel to the last data access.
    pub fn follow_access(&mut self) {
        match self.cpu.last_access() {
            Some(access) => {
                self.mem_scroll = access.address;
                self.status = format!("Memory view at {:05X}", access.address);
            }
            None => self.status = "No memory access yet".into(),
        }
    }

    pub fn scroll_memory(&mut self, delta: i64) {
        let max = crate::cpu::memory::MAX_ADDRESS as i64;
        self.mem_scroll = (self.mem_scroll as i64 + delta).clamp(0, max) as u32;
    }

    /// Disassembly of `lines` words around CS:PC.
    pub fn get_disassembly(&self, lines: usize) -> Vec<DisasmLine> {
        let cs = self.cpu.regs.seg.cs;
        let pc = self.cpu.regs.pc();
        let start = pc.saturating_sub((lines / 2) as u16);

        (0..lines as u32)
            .filter_map(|i| {
                let offset = start.checked_add(i as u16)?;
                let physical = physical_address(cs, offset);
                let word = self.cpu.mem.read(physical)?;
                Some(DisasmLine {
                    cs,
                    offset,
                    physical,
                    word,
                    text: disassemble_with_address(word, offset as u32),
                    is_current: offset == pc,
                })
            })
            .collect()
    }
}

/// Run the debugger with a program.
pub fn run_debugger(program: Vec<MemoryWrite>, config: Config) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(program, config);

    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        if event::poll(Duration::from_millis(30))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => app.pause(),
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Char('a') => app.follow_access(),
                        KeyCode::Up => app.scroll_memory(-1),
                        KeyCode::Down => app.scroll_memory(1),
                        KeyCode::PageUp => app.scroll_memory(-0x100),
                        KeyCode::PageDown => app.scroll_memory(0x100),
                        _ => {}
                    }
                }
            }
        }

        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;

    fn app_for(source: &str) -> DebuggerApp {
        let asm = assemble(source);
        assert!(asm.success, "{:?}", asm.error_messages());
        DebuggerApp::new(asm.memory_changes, Config::default())
    }

    #[test]
    fn test_step_updates_status() {
        let mut app = app_for("LSI R1, 3\nHALT");
        app.step();
        assert_eq!(app.cpu.regs.get(1), 3);
        assert!(app.status.contains("LSI R1, 3"), "{}", app.status);
    }

    #[test]
    fn test_breakpoint_stops_run() {
        let mut app = app_for("LSI R1, 1\nLSI R2, 2\nLSI R3, 3\nHALT");
        app.cpu.regs.set_pc(2);
        app.toggle_breakpoint();
        app.cpu.regs.set_pc(0);
        app.run();
        app.tick();
        assert!(!app.running);
        assert_eq!(app.cpu.regs.pc(), 2);
        assert_eq!(app.cpu.regs.get(3), 0);
        assert!(app.status.contains("Breakpoint"));

        // Resuming runs past the breakpoint.
        app.run();
        app.tick();
        assert!(app.cpu.is_halted());
        assert_eq!(app.cpu.regs.get(3), 3);
    }

    #[test]
    fn test_screen_writes_counted() {
        let source = "\
            LDI 0xF100
            MOV DS, R0
            LSI R1, 0
            LDI 0x41
            ST R0, [R1]
            ST R0, [R1+1]
            HALT";
        let mut app = app_for(source);
        app.run();
        app.tick();
        assert_eq!(app.screen_writes, 2);
        assert_eq!(app.last_screen_write, Some((0xF1001, 0x41)));

        app.reset();
        assert_eq!(app.screen_writes, 0);
        assert_eq!(app.cpu.regs.pc(), 0);
    }

    #[test]
    fn test_disassembly_marks_current() {
        let app = app_for("NOP\nNOP\nHALT");
        let lines = app.get_disassembly(4);
        assert_eq!(lines[0].offset, 0);
        assert!(lines[0].is_current);
        assert_eq!(lines[0].text, "NOP");
        assert_eq!(lines[2].text, "HALT");
    }
}

//! CPU execution engine for the Deep16.
//!
//! Implements the fetch-decode-execute cycle, the one-slot branch delay,
//! segment translation and the shadow-context interrupt mechanism.

use crate::cpu::alu::{self, AluResult};
use crate::cpu::decode::{self, AluOp, Instruction, JumpCond, SopKind, SpecialReg, SysOp};
use crate::cpu::memory::{Memory, MemoryError, MemoryWrite};
use crate::cpu::registers::{physical_address, Psw, Registers, Segment, Segments, Shadow, PC};
use serde::{Serialize, Deserialize};
use tracing::{debug, trace};

/// Default software interrupt vector (PC loaded by SWI, with CS = 0).
pub const DEFAULT_SWI_VECTOR: u16 = 4;

/// Number of words returned by [`Cpu::recent_memory_view`].
pub const RECENT_VIEW_LEN: usize = 8;

/// Callback invoked synchronously for every data store: `(physical address, value)`.
pub type MemoryObserver = Box<dyn FnMut(u32, u16) + Send>;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (HALT sentinel, HLT, or fetch outside memory).
    Halted,
}

/// A control transfer waiting for its delay slot to retire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBranch {
    pub pc: u16,
    /// New code segment for far jumps.
    pub cs: Option<u16>,
}

/// Kind of data access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKind {
    Load,
    Store,
}

/// The most recent data memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryAccess {
    pub address: u32,
    pub kind: AccessKind,
    /// Segment used, or `None` for the physical LDS/STS forms.
    pub segment: Option<Segment>,
    pub base: u16,
    pub offset: u16,
}

/// One word of the recent-access window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCell {
    pub address: u32,
    pub value: u16,
    pub is_current: bool,
}

/// Decoded view of the PSW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagView {
    pub n: bool,
    pub z: bool,
    pub v: bool,
    pub c: bool,
    pub i: bool,
    pub s: bool,
    pub stack_reg: u8,
    pub dual_stack: bool,
    pub extra_reg: u8,
    pub dual_extra: bool,
}

impl From<Psw> for FlagView {
    fn from(psw: Psw) -> Self {
        Self {
            n: psw.negative(),
            z: psw.zero(),
            v: psw.overflow(),
            c: psw.carry(),
            i: psw.interrupts_enabled(),
            s: psw.shadow_view(),
            stack_reg: psw.stack_reg(),
            dual_stack: psw.dual_stack(),
            extra_reg: psw.extra_reg(),
            dual_extra: psw.dual_extra(),
        }
    }
}

/// Serializable snapshot of the visible machine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub registers: [u16; 16],
    pub psw: u16,
    pub flags: FlagView,
    pub segments: Segments,
    pub shadow: Shadow,
    pub running: bool,
    pub cycles: u64,
    pub pending_branch: Option<PendingBranch>,
    pub recent_memory: Vec<MemoryCell>,
}

/// The Deep16 CPU.
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Instructions executed since the last reset.
    pub cycles: u64,
    /// Branch set by the previous instruction; commits after the next one.
    pending: Option<PendingBranch>,
    /// Branch committing at the end of the current instruction.
    in_slot: Option<PendingBranch>,
    last_access: Option<MemoryAccess>,
    last_instr: Option<Instruction>,
    swi_vector: u16,
    observer: Option<MemoryObserver>,
}

impl Cpu {
    /// Create a CPU in its reset state.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: CpuState::Running,
            cycles: 0,
            pending: None,
            in_slot: None,
            last_access: None,
            last_instr: None,
            swi_vector: DEFAULT_SWI_VECTOR,
            observer: None,
        }
    }

    /// Reset registers and memory. The observer and SWI vector are kept.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.reset();
        self.reset_execution();
    }

    fn reset_execution(&mut self) {
        self.state = CpuState::Running;
        self.cycles = 0;
        self.pending = None;
        self.in_slot = None;
        self.last_access = None;
        self.last_instr = None;
    }

    /// Reset, apply sparse program writes, then re-install the ROM.
    pub fn load_program(&mut self, writes: &[MemoryWrite]) -> Result<(), MemoryError> {
        self.regs.reset();
        self.mem.reset();
        self.mem.apply_writes(writes)?;
        self.mem.install_rom();
        self.reset_execution();
        debug!(words = writes.len(), "program loaded");
        Ok(())
    }

    /// Start execution at the autoload ROM (CS = 0xFFFF, PC = 0).
    pub fn boot_rom(&mut self) {
        self.regs.seg.cs = 0xFFFF;
        self.regs.set_pc(0);
        self.pending = None;
        self.state = CpuState::Running;
    }

    /// Register a callback for data stores.
    pub fn set_memory_observer<F>(&mut self, observer: F)
    where
        F: FnMut(u32, u16) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn clear_memory_observer(&mut self) {
        self.observer = None;
    }

    /// PC loaded by SWI.
    pub fn set_swi_vector(&mut self, vector: u16) {
        self.swi_vector = vector;
    }

    pub fn swi_vector(&self) -> u16 {
        self.swi_vector
    }

    /// Execute a single instruction.
    ///
    /// Returns whether execution may continue. Never fails: bad addresses
    /// and unknown words have defined fallbacks.
    pub fn step(&mut self) -> bool {
        if self.state != CpuState::Running {
            return false;
        }

        // Fetch
        let fetch_addr = self.regs.fetch_address();
        let word = match self.mem.read(fetch_addr) {
            Some(w) => w,
            None => {
                debug!(address = fetch_addr, "fetch outside memory, halting");
                self.state = CpuState::Halted;
                return false;
            }
        };
        if word == decode::HALT_WORD {
            debug!(address = fetch_addr, cycles = self.cycles, "halt");
            self.state = CpuState::Halted;
            return false;
        }

        self.regs.advance_pc();
        self.in_slot = self.pending.take();

        let instr = decode::decode(word);
        trace!(address = fetch_addr, word, instr = ?instr, "execute");
        self.execute(instr);

        if let Some(branch) = self.in_slot.take() {
            if let Some(cs) = branch.cs {
                self.regs.seg.cs = cs;
            }
            self.regs.set_pc(branch.pc);
            debug!(cs = self.regs.seg.cs, pc = branch.pc, "branch committed");
        }

        self.cycles += 1;
        self.last_instr = Some(instr);
        self.is_running()
    }

    /// Step until halt or `max_steps` instructions. Returns steps executed.
    pub fn run(&mut self, max_steps: u64) -> u64 {
        self.run_until(max_steps, |_| false)
    }

    /// Like [`run`](Self::run), but checks `should_stop` before every step.
    pub fn run_until<F>(&mut self, max_steps: u64, mut should_stop: F) -> u64
    where
        F: FnMut(&Cpu) -> bool,
    {
        let start = self.cycles;
        let mut steps = 0;
        while steps < max_steps && !should_stop(self) {
            if !self.step() {
                break;
            }
            steps += 1;
        }
        self.cycles - start
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction) {
        match instr {
            // ==================== Data Transfer ====================

            Instruction::Halt => {
                self.state = CpuState::Halted;
            }

            Instruction::Ldi { imm } => {
                self.regs.set(0, imm);
                self.update_flags(AluResult::from_raw(imm as i64));
            }

            Instruction::Ld { rd, rb, offset } => {
                if let Some(addr) = self.segmented_access(rb, offset, AccessKind::Load) {
                    if let Some(value) = self.mem.read(addr) {
                        self.regs.set(rd, value);
                    }
                }
            }

            Instruction::St { rd, rb, offset } => {
                if let Some(addr) = self.segmented_access(rb, offset, AccessKind::Store) {
                    self.store(addr, self.regs.get(rd));
                }
            }

            Instruction::Lds { rd, rs, .. } => {
                let addr = self.physical_access(rs, AccessKind::Load);
                if let Some(value) = self.mem.read(addr) {
                    self.regs.set(rd, value);
                }
            }

            Instruction::Sts { rd, rs, .. } => {
                let addr = self.physical_access(rs, AccessKind::Store);
                self.store(addr, self.regs.get(rd));
            }

            Instruction::Mov { rd, rs, imm } => {
                let raw = self.regs.get(rs) as i64 + imm as i64;
                let result = AluResult::from_raw(raw);
                if rd as usize == PC {
                    self.set_branch(result.value(), None);
                } else {
                    self.regs.set(rd, result.value());
                }
                self.update_flags(result);
            }

            Instruction::Lsi { rd, imm } => {
                let value = imm as i16 as u16;
                self.regs.set(rd, value);
                self.update_flags(AluResult::from_raw(value as i64));
            }

            Instruction::Mvs { to_segment, rd, seg } => {
                if to_segment {
                    self.regs.seg.set(seg, self.regs.get(rd));
                } else {
                    self.regs.set(rd, self.regs.seg.get(seg));
                }
            }

            Instruction::Smv { src, rd } => {
                let value = self.read_special(src);
                self.regs.set(rd, value);
            }

            // ==================== Arithmetic ====================

            Instruction::Alu { op, rd, write, imm, operand } => {
                if instr.is_wide() {
                    self.execute_wide(op, rd, write, operand);
                } else {
                    let b = if imm { operand as u16 } else { self.regs.get(operand) };
                    let result = alu::alu(op, self.regs.get(rd), b);
                    if write {
                        self.regs.set(rd, result.value());
                    }
                    self.update_flags(result);
                }
            }

            Instruction::Shift { rd, kind, count } => {
                let result = alu::shift(kind, self.regs.get(rd), count, self.regs.psw.carry());
                self.regs.set(rd, result.value());
                self.update_flags(result);
            }

            Instruction::Sop { kind, rx } => self.execute_sop(kind, rx),

            // ==================== Control Flow ====================

            Instruction::Jump { cond, offset } => {
                if self.condition_holds(cond) {
                    let target = self.regs.pc().wrapping_add(offset as u16);
                    self.set_branch(target, None);
                }
            }

            Instruction::Sys(op) => self.execute_sys(op),

            Instruction::Unknown(word) => {
                debug!(word, "unknown opcode ignored");
            }
        }
    }

    /// MUL32 / DIV32 on the pair Rd:Rd+1.
    fn execute_wide(&mut self, op: AluOp, rd: u8, write: bool, rs: u8) {
        let divisor_or_factor = self.regs.get(rs);
        match op {
            AluOp::Mul => {
                let (high, low) = alu::mul32(self.regs.get(rd), divisor_or_factor);
                if write {
                    self.regs.set(rd, high);
                    self.regs.set(rd + 1, low);
                }
                let raw = (high as i64) << 16 | low as i64;
                self.update_flags(AluResult::from_raw(raw));
            }
            _ => {
                let high = self.regs.get(rd);
                let low = self.regs.get(rd + 1);
                match alu::div32(high, low, divisor_or_factor) {
                    Some((quotient, remainder)) => {
                        if write {
                            self.regs.set(rd, quotient as u16);
                            self.regs.set(rd + 1, remainder);
                        }
                        self.update_flags(AluResult::from_raw(quotient as i64));
                    }
                    None => {
                        if write {
                            self.regs.set(rd, 0xFFFF);
                        }
                        self.update_flags(AluResult::from_raw(0xFFFF));
                    }
                }
            }
        }
    }

    fn execute_sop(&mut self, kind: SopKind, rx: u8) {
        let value = self.regs.get(rx);
        match kind {
            SopKind::Swb => {
                let result = value.swap_bytes();
                self.regs.set(rx, result);
                self.update_flags(AluResult::from_raw(result as i64));
            }
            SopKind::Inv => {
                let result = !value;
                self.regs.set(rx, result);
                self.update_flags(AluResult::from_raw(result as i64));
            }
            SopKind::Neg => {
                let result = AluResult::from_raw(-(value as i64));
                self.regs.set(rx, result.value());
                self.update_flags(result);
            }
            SopKind::Jml => {
                if rx % 2 == 0 {
                    let pc = self.regs.get(rx + 1);
                    self.set_branch(pc, Some(value));
                } else {
                    debug!(rx, "JML with odd register ignored");
                }
            }
            SopKind::Srs => self.regs.psw.select_stack(rx, false),
            SopKind::Srd => self.regs.psw.select_stack(rx, true),
            SopKind::Ers => self.regs.psw.select_extra(rx, false),
            SopKind::Erd => self.regs.psw.select_extra(rx, true),
            SopKind::Set => self.regs.psw.set((rx & 0xF) as u16, true),
            SopKind::Clr => self.regs.psw.set((rx & 0xF) as u16, false),
            SopKind::Set2 => self.regs.psw.set(((rx & 0xF) as u16) << 4, true),
            SopKind::Clr2 => self.regs.psw.set(((rx & 0xF) as u16) << 4, false),
        }
    }

    fn execute_sys(&mut self, op: SysOp) {
        match op {
            SysOp::Nop => {}
            SysOp::Hlt => {
                debug!(cycles = self.cycles, "HLT");
                self.state = CpuState::Halted;
            }
            SysOp::Swi => {
                let psw = self.regs.psw;
                if psw.interrupts_enabled() && !psw.shadow_view() {
                    self.regs.shadow.psw = psw.bits();
                    self.regs.psw.set(Psw::I, false);
                    self.regs.psw.set(Psw::S, true);
                    self.regs.seg.cs = 0;
                    self.regs.set_pc(self.swi_vector);
                    // Entry is immediate and discards any branch in flight.
                    self.pending = None;
                    self.in_slot = None;
                    debug!(vector = self.swi_vector, "software interrupt");
                } else {
                    debug!(psw = psw.bits(), "SWI ignored");
                }
            }
            SysOp::Reti => {
                self.regs.psw.set(Psw::S, false);
            }
        }
    }

    /// SMV source, multiplexed by PSW.S.
    fn read_special(&self, src: SpecialReg) -> u16 {
        let shadow_view = self.regs.psw.shadow_view();
        let shadow = &self.regs.shadow;
        match (src, shadow_view) {
            (SpecialReg::Apc, false) => shadow.pc,
            (SpecialReg::Apsw, false) => shadow.psw,
            (SpecialReg::Acs, false) => shadow.cs,
            (SpecialReg::Psw, false) => self.regs.psw.bits(),
            (SpecialReg::Apc, true) => self.regs.pc(),
            (SpecialReg::Apsw, true) => self.regs.psw.bits(),
            (SpecialReg::Acs, true) => self.regs.seg.cs,
            (SpecialReg::Psw, true) => shadow.psw,
        }
    }

    fn condition_holds(&self, cond: JumpCond) -> bool {
        let psw = self.regs.psw;
        match cond {
            JumpCond::Zero => psw.zero(),
            JumpCond::NotZero => !psw.zero(),
            JumpCond::Carry => psw.carry(),
            JumpCond::NotCarry => !psw.carry(),
            JumpCond::Negative => psw.negative(),
            JumpCond::NotNegative => !psw.negative(),
            JumpCond::Overflow => psw.overflow(),
            JumpCond::NotOverflow => !psw.overflow(),
        }
    }

    fn set_branch(&mut self, pc: u16, cs: Option<u16>) {
        self.pending = Some(PendingBranch { pc, cs });
    }

    fn update_flags(&mut self, result: AluResult) {
        self.regs.psw.set_arith(result.flags());
    }

    /// Resolve and record a segmented LD/ST access.
    /// Returns `None` when the address is outside memory.
    fn segmented_access(&mut self, rb: u8, offset: u8, kind: AccessKind) -> Option<u32> {
        let segment = self.regs.data_segment_for(rb);
        let base = self.regs.get(rb);
        let effective = base.wrapping_add(offset as u16);
        let address = physical_address(self.regs.seg.get(segment), effective);
        self.last_access = Some(MemoryAccess {
            address,
            kind,
            segment: Some(segment),
            base,
            offset: offset as u16,
        });
        if address as usize >= crate::cpu::memory::MEMORY_SIZE {
            debug!(address, "data access outside memory ignored");
            return None;
        }
        Some(address)
    }

    /// Record an LDS/STS access; the register holds the physical address.
    fn physical_access(&mut self, rs: u8, kind: AccessKind) -> u32 {
        let base = self.regs.get(rs);
        let address = base as u32;
        self.last_access = Some(MemoryAccess {
            address,
            kind,
            segment: None,
            base,
            offset: 0,
        });
        address
    }

    fn store(&mut self, addr: u32, value: u16) {
        if self.mem.write(addr, value) {
            if let Some(observer) = self.observer.as_mut() {
                observer(addr, value);
            }
        }
    }

    /// Up to 8 words starting at the last data access.
    pub fn recent_memory_view(&self) -> Vec<MemoryCell> {
        let Some(access) = self.last_access else {
            return Vec::new();
        };
        self.mem
            .dump(access.address, RECENT_VIEW_LEN)
            .into_iter()
            .map(|(address, value)| MemoryCell {
                address,
                value,
                is_current: address == access.address,
            })
            .collect()
    }

    /// Snapshot of registers, flags, segments, shadow slots and the recent view.
    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            registers: self.regs.gpr,
            psw: self.regs.psw.bits(),
            flags: FlagView::from(self.regs.psw),
            segments: self.regs.seg,
            shadow: self.regs.shadow,
            running: self.is_running(),
            cycles: self.cycles,
            pending_branch: self.pending,
            recent_memory: self.recent_memory_view(),
        }
    }

    /// The last data access, if any.
    pub fn last_access(&self) -> Option<MemoryAccess> {
        self.last_access
    }

    /// The branch waiting for its delay slot.
    pub fn pending_branch(&self) -> Option<PendingBranch> {
        self.pending
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .field("pending", &self.pending)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::{encode, ShiftKind};
    use crate::cpu::memory::{AUTOLOAD_ROM, ROM_BASE};
    use std::sync::{Arc, Mutex};

    fn make_program(instructions: &[Instruction]) -> Vec<MemoryWrite> {
        instructions
            .iter()
            .enumerate()
            .map(|(i, instr)| MemoryWrite { address: i as u32, value: encode(instr) })
            .collect()
    }

    fn cpu_with(instructions: &[Instruction]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(instructions)).unwrap();
        cpu
    }

    fn alu(op: AluOp, rd: u8, operand: u8, imm: bool) -> Instruction {
        Instruction::Alu { op, rd, write: true, imm, operand }
    }

    #[test]
    fn test_cpu_halt_sentinel() {
        let mut cpu = cpu_with(&[Instruction::Halt]);
        assert!(!cpu.step());
        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.pc(), 0);
        assert_eq!(cpu.cycles, 0);
    }

    #[test]
    fn test_empty_memory_halts() {
        let mut cpu = Cpu::new();
        assert_eq!(cpu.run(100), 0);
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_hlt_instruction() {
        let mut cpu = cpu_with(&[Instruction::Sys(SysOp::Nop), Instruction::Sys(SysOp::Hlt)]);
        assert_eq!(cpu.run(10), 2);
        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.pc(), 2);
    }

    #[test]
    fn test_ldi_and_lsi_flags() {
        let mut cpu = cpu_with(&[
            Instruction::Ldi { imm: 0x7FFF },
            Instruction::Lsi { rd: 3, imm: -1 },
        ]);
        cpu.step();
        assert_eq!(cpu.regs.get(0), 0x7FFF);
        cpu.step();
        assert_eq!(cpu.regs.get(3), 0xFFFF);
        assert!(cpu.regs.psw.negative());
        assert!(!cpu.regs.psw.zero());
    }

    #[test]
    fn test_alu_register_and_immediate() {
        let mut cpu = cpu_with(&[
            Instruction::Lsi { rd: 1, imm: 7 },
            Instruction::Lsi { rd: 2, imm: 5 },
            alu(AluOp::Add, 1, 2, false),
            alu(AluOp::Sub, 1, 12, true),
        ]);
        cpu.run(4);
        assert_eq!(cpu.regs.get(1), 0);
        assert!(cpu.regs.psw.zero());
    }

    #[test]
    fn test_compare_discards_result() {
        let mut cpu = cpu_with(&[
            Instruction::Lsi { rd: 1, imm: 3 },
            Instruction::Alu { op: AluOp::Sub, rd: 1, write: false, imm: true, operand: 3 },
        ]);
        cpu.run(2);
        assert_eq!(cpu.regs.get(1), 3);
        assert!(cpu.regs.psw.zero());
    }

    #[test]
    fn test_mul_div_16() {
        let mut cpu = cpu_with(&[
            Instruction::Lsi { rd: 1, imm: 12 },
            alu(AluOp::Mul, 1, 10, true),
            Instruction::Lsi { rd: 3, imm: 15 },
            alu(AluOp::Div, 3, 4, true),
            Instruction::Lsi { rd: 5, imm: 9 },
            alu(AluOp::Div, 5, 0, true),
        ]);
        cpu.run(6);
        assert_eq!(cpu.regs.get(1), 120);
        assert_eq!(cpu.regs.get(3), 3);
        assert_eq!(cpu.regs.get(5), 0xFFFF);
    }

    #[test]
    fn test_mul32_div32() {
        let mut cpu = Cpu::new();
        cpu.regs.set(2, 0x1234);
        cpu.regs.set(6, 0x100);
        cpu.regs.set(4, 0x0001);
        cpu.regs.set(5, 0x0003);
        cpu.regs.set(7, 2);
        let program = make_program(&[
            alu(AluOp::Mul, 2, 6, true),
            alu(AluOp::Div, 4, 7, true),
        ]);
        cpu.mem.apply_writes(&program).unwrap();
        cpu.run(2);
        assert_eq!(cpu.regs.get(2), 0x0012);
        assert_eq!(cpu.regs.get(3), 0x3400);
        // 0x00010003 / 2 = 0x8001 rem 1
        assert_eq!(cpu.regs.get(4), 0x8001);
        assert_eq!(cpu.regs.get(5), 1);
    }

    #[test]
    fn test_div32_by_zero() {
        let mut cpu = Cpu::new();
        cpu.regs.set(4, 0x1111);
        cpu.regs.set(5, 0x2222);
        cpu.mem.apply_writes(&make_program(&[alu(AluOp::Div, 4, 8, true)])).unwrap();
        cpu.step();
        assert_eq!(cpu.regs.get(4), 0xFFFF);
        assert_eq!(cpu.regs.get(5), 0x2222);
    }

    #[test]
    fn test_shift_updates_carry() {
        let mut cpu = Cpu::new();
        cpu.regs.set(1, 0x8000);
        cpu.mem
            .apply_writes(&make_program(&[Instruction::Shift { rd: 1, kind: ShiftKind::Slc, count: 1 }]))
            .unwrap();
        cpu.step();
        assert_eq!(cpu.regs.get(1), 0);
        assert!(cpu.regs.psw.carry());
        assert!(cpu.regs.psw.zero());
    }

    #[test]
    fn test_delay_slot_executes_once() {
        // 0: JZ +2 -> target 3
        // 1: LSI R1, 1   (delay slot)
        // 2: LSI R2, 1   (skipped)
        // 3: HLT
        let mut cpu = cpu_with(&[
            Instruction::Jump { cond: JumpCond::Zero, offset: 2 },
            Instruction::Lsi { rd: 1, imm: 1 },
            Instruction::Lsi { rd: 2, imm: 1 },
            Instruction::Sys(SysOp::Hlt),
        ]);
        cpu.regs.psw.set(Psw::Z, true);

        cpu.step();
        assert_eq!(cpu.regs.pc(), 1);
        assert_eq!(cpu.pending_branch(), Some(PendingBranch { pc: 3, cs: None }));

        cpu.step();
        assert_eq!(cpu.regs.get(1), 1);
        assert_eq!(cpu.regs.pc(), 3);
        assert_eq!(cpu.pending_branch(), None);

        cpu.run(10);
        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.get(2), 0);
    }

    #[test]
    fn test_branch_not_taken() {
        let mut cpu = cpu_with(&[
            Instruction::Jump { cond: JumpCond::Zero, offset: 5 },
            Instruction::Sys(SysOp::Nop),
        ]);
        cpu.step();
        assert_eq!(cpu.pending_branch(), None);
        cpu.step();
        assert_eq!(cpu.regs.pc(), 2);
    }

    #[test]
    fn test_jump_conditions() {
        let table = [
            (JumpCond::Zero, Psw::Z, true),
            (JumpCond::NotZero, Psw::Z, false),
            (JumpCond::Carry, Psw::C, true),
            (JumpCond::NotCarry, Psw::C, false),
            (JumpCond::Negative, Psw::N, true),
            (JumpCond::NotNegative, Psw::N, false),
            (JumpCond::Overflow, Psw::V, true),
            (JumpCond::NotOverflow, Psw::V, false),
        ];
        for (cond, flag, taken_when_set) in table {
            for set in [true, false] {
                let mut cpu = cpu_with(&[Instruction::Jump { cond, offset: 5 }]);
                // Every other flag is raised so only `flag` decides.
                cpu.regs.psw.set_arith(Psw::ARITH_MASK);
                cpu.regs.psw.set(flag, set);
                cpu.step();
                let expected = (set == taken_when_set).then_some(PendingBranch { pc: 6, cs: None });
                assert_eq!(cpu.pending_branch(), expected, "{:?} with flag set={}", cond, set);
            }
        }
    }

    #[test]
    fn test_halt_in_delay_slot_keeps_branch_pending() {
        let mut cpu = cpu_with(&[
            Instruction::Jump { cond: JumpCond::NotZero, offset: 4 },
            Instruction::Halt,
        ]);
        cpu.step();
        assert!(!cpu.step());
        assert_eq!(cpu.regs.pc(), 1);
        assert!(cpu.pending_branch().is_some());
    }

    #[test]
    fn test_mov_to_pc_is_delayed() {
        let mut cpu = cpu_with(&[
            Instruction::Mov { rd: 15, rs: 3, imm: 0 },
            Instruction::Lsi { rd: 1, imm: 1 },
        ]);
        cpu.regs.set(3, 0x40);
        cpu.step();
        assert_eq!(cpu.regs.pc(), 1);
        cpu.step();
        assert_eq!(cpu.regs.get(1), 1);
        assert_eq!(cpu.regs.pc(), 0x40);
    }

    #[test]
    fn test_jml_far_jump() {
        let mut cpu = cpu_with(&[
            Instruction::Sop { kind: SopKind::Jml, rx: 4 },
            Instruction::Sys(SysOp::Nop),
        ]);
        cpu.regs.set(4, 0x0020);
        cpu.regs.set(5, 0x0003);
        cpu.run(2);
        assert_eq!(cpu.regs.seg.cs, 0x0020);
        assert_eq!(cpu.regs.pc(), 0x0003);
        assert_eq!(cpu.regs.fetch_address(), 0x203);
    }

    #[test]
    fn test_jml_odd_register_ignored() {
        let mut cpu = cpu_with(&[Instruction::Sop { kind: SopKind::Jml, rx: 3 }]);
        cpu.step();
        assert_eq!(cpu.pending_branch(), None);
    }

    #[test]
    fn test_segmented_load() {
        let mut cpu = cpu_with(&[Instruction::Ld { rd: 1, rb: 0, offset: 5 }]);
        cpu.regs.seg.ds = 0x1000;
        cpu.regs.set(0, 0x0010);
        cpu.mem.write(0x10015, 0xBEEF);
        cpu.step();
        assert_eq!(cpu.regs.get(1), 0xBEEF);
        assert_eq!(cpu.last_access().map(|a| a.address), Some(0x10015));
        assert_eq!(cpu.last_access().and_then(|a| a.segment), Some(Segment::Ds));
    }

    #[test]
    fn test_stack_segment_selected() {
        let mut cpu = cpu_with(&[
            Instruction::Sop { kind: SopKind::Srs, rx: 13 },
            Instruction::St { rd: 1, rb: 13, offset: 0 },
        ]);
        cpu.regs.seg.ss = 0x2000;
        cpu.regs.set(13, 0x10);
        cpu.regs.set(1, 0x55);
        cpu.run(2);
        assert_eq!(cpu.mem.read(0x20010), Some(0x55));
    }

    #[test]
    fn test_extra_segment_pair_selected() {
        let mut cpu = cpu_with(&[
            Instruction::Sop { kind: SopKind::Erd, rx: 8 },
            Instruction::Ld { rd: 1, rb: 8, offset: 0 },
            Instruction::Ld { rd: 2, rb: 9, offset: 1 },
            Instruction::Ld { rd: 3, rb: 10, offset: 0 },
            Instruction::Sop { kind: SopKind::Ers, rx: 8 },
            Instruction::Ld { rd: 4, rb: 9, offset: 1 },
        ]);
        cpu.regs.seg.es = 0x3000;
        cpu.regs.seg.ds = 0x1000;
        cpu.regs.set(8, 0x10);
        cpu.regs.set(9, 0x20);
        cpu.regs.set(10, 0x30);
        cpu.mem.write(0x30010, 0xAAAA);
        cpu.mem.write(0x30021, 0xBBBB);
        cpu.mem.write(0x10030, 0xCCCC);
        cpu.mem.write(0x10021, 0xDDDD);

        cpu.run(2);
        assert_eq!(cpu.regs.get(1), 0xAAAA);
        assert_eq!(cpu.last_access().and_then(|a| a.segment), Some(Segment::Es));
        cpu.step();
        assert_eq!(cpu.regs.get(2), 0xBBBB);
        assert_eq!(cpu.last_access().map(|a| a.address), Some(0x30021));
        cpu.step();
        assert_eq!(cpu.regs.get(3), 0xCCCC);
        assert_eq!(cpu.last_access().and_then(|a| a.segment), Some(Segment::Ds));

        // Single mode drops the partner register back to DS.
        cpu.run(2);
        assert_eq!(cpu.regs.get(4), 0xDDDD);
    }

    #[test]
    fn test_out_of_range_store_ignored() {
        let mut cpu = cpu_with(&[Instruction::St { rd: 1, rb: 0, offset: 0 }]);
        cpu.regs.seg.ds = 0xFFFF;
        cpu.regs.set(0, 0xFFFF);
        assert!(cpu.step());
        assert_eq!(cpu.regs.pc(), 1);
    }

    #[test]
    fn test_lds_sts_physical() {
        let mut cpu = cpu_with(&[
            Instruction::Sts { rd: 1, rs: 2, seg: Segment::Es },
            Instruction::Lds { rd: 3, rs: 2, seg: Segment::Ds },
        ]);
        cpu.regs.seg.ds = 0x100;
        cpu.regs.seg.es = 0x200;
        cpu.regs.set(1, 0xCAFE);
        cpu.regs.set(2, 0x0400);
        cpu.run(2);
        assert_eq!(cpu.mem.read(0x400), Some(0xCAFE));
        assert_eq!(cpu.regs.get(3), 0xCAFE);
    }

    #[test]
    fn test_memory_observer_fires_on_store() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut cpu = cpu_with(&[
            Instruction::St { rd: 1, rb: 0, offset: 0 },
            Instruction::Ld { rd: 2, rb: 0, offset: 0 },
        ]);
        cpu.set_memory_observer(move |addr, value| sink.lock().unwrap().push((addr, value)));
        cpu.regs.seg.ds = 0xF100;
        cpu.regs.set(1, 0x41);
        cpu.run(2);
        assert_eq!(*seen.lock().unwrap(), vec![(0xF1000, 0x41)]);
    }

    #[test]
    fn test_swi_and_reti() {
        let mut cpu = cpu_with(&[Instruction::Sys(SysOp::Swi)]);
        cpu.regs.psw.set(Psw::I, true);
        cpu.regs.seg.cs = 0;
        let old_psw = cpu.regs.psw.bits();
        cpu.step();
        assert!(cpu.regs.psw.shadow_view());
        assert!(!cpu.regs.psw.interrupts_enabled());
        assert_eq!(cpu.regs.seg.cs, 0);
        assert_eq!(cpu.regs.pc(), DEFAULT_SWI_VECTOR);
        assert_eq!(cpu.regs.shadow.psw, old_psw);
    }

    #[test]
    fn test_swi_ignored_without_interrupts() {
        let mut cpu = cpu_with(&[Instruction::Sys(SysOp::Swi)]);
        cpu.step();
        assert_eq!(cpu.regs.pc(), 1);
        assert!(!cpu.regs.psw.shadow_view());
    }

    #[test]
    fn test_smv_views() {
        let mut cpu = cpu_with(&[
            Instruction::Smv { src: SpecialReg::Psw, rd: 1 },
            Instruction::Smv { src: SpecialReg::Apsw, rd: 2 },
            Instruction::Smv { src: SpecialReg::Apc, rd: 3 },
        ]);
        cpu.regs.psw = Psw(Psw::C);
        cpu.regs.shadow.psw = 0x0011;
        cpu.run(3);
        assert_eq!(cpu.regs.get(1), Psw::C);
        assert_eq!(cpu.regs.get(2), 0x0011);
        assert_eq!(cpu.regs.get(3), 0);

        let mut shadowed = cpu_with(&[
            Instruction::Smv { src: SpecialReg::Psw, rd: 1 },
            Instruction::Smv { src: SpecialReg::Apc, rd: 2 },
        ]);
        shadowed.regs.psw = Psw(Psw::S);
        shadowed.regs.shadow.psw = 0x0011;
        shadowed.run(2);
        assert_eq!(shadowed.regs.get(1), 0x0011);
        // PC has already advanced past the second SMV.
        assert_eq!(shadowed.regs.get(2), 2);
    }

    #[test]
    fn test_sop_register_ops() {
        let mut cpu = cpu_with(&[
            Instruction::Sop { kind: SopKind::Swb, rx: 1 },
            Instruction::Sop { kind: SopKind::Inv, rx: 2 },
            Instruction::Sop { kind: SopKind::Neg, rx: 3 },
        ]);
        cpu.regs.set(1, 0x1234);
        cpu.regs.set(2, 0x00FF);
        cpu.regs.set(3, 1);
        cpu.run(3);
        assert_eq!(cpu.regs.get(1), 0x3412);
        assert_eq!(cpu.regs.get(2), 0xFF00);
        assert_eq!(cpu.regs.get(3), 0xFFFF);
        assert!(cpu.regs.psw.negative());
    }

    #[test]
    fn test_set_clr_masks() {
        let mut cpu = cpu_with(&[
            Instruction::Sop { kind: SopKind::Set, rx: 0b1010 },
            Instruction::Sop { kind: SopKind::Set2, rx: 0b0011 },
            Instruction::Sop { kind: SopKind::Clr, rx: 0b0010 },
            Instruction::Sop { kind: SopKind::Clr2, rx: 0b0010 },
        ]);
        cpu.step();
        assert_eq!(cpu.regs.psw.bits(), Psw::C | Psw::Z);
        cpu.step();
        assert_eq!(cpu.regs.psw.bits(), Psw::C | Psw::Z | Psw::I | Psw::S);
        cpu.run(2);
        assert_eq!(cpu.regs.psw.bits(), Psw::C | Psw::I);
    }

    #[test]
    fn test_mvs_moves() {
        let mut cpu = cpu_with(&[
            Instruction::Mvs { to_segment: true, rd: 1, seg: Segment::Es },
            Instruction::Mvs { to_segment: false, rd: 2, seg: Segment::Es },
        ]);
        cpu.regs.set(1, 0xABCD);
        cpu.run(2);
        assert_eq!(cpu.regs.seg.es, 0xABCD);
        assert_eq!(cpu.regs.get(2), 0xABCD);
    }

    #[test]
    fn test_unknown_is_noop() {
        let mut cpu = Cpu::new();
        cpu.mem.write(0, 0xFFC5);
        assert!(cpu.step());
        assert_eq!(cpu.regs.pc(), 1);
    }

    #[test]
    fn test_boot_rom() {
        let mut cpu = Cpu::new();
        cpu.boot_rom();
        assert_eq!(cpu.regs.fetch_address(), ROM_BASE);
        cpu.run(AUTOLOAD_ROM.len() as u64);
        assert_eq!(cpu.regs.seg.cs, 0);
        assert_eq!(cpu.regs.seg.ds, 0);
        assert_eq!(cpu.regs.pc(), 0x0100);
        assert_eq!(cpu.mem.read(0), Some(0x0100));
        assert_eq!(cpu.mem.read(2), Some(0x0100));
        assert_eq!(cpu.cycles, 10);
    }

    #[test]
    fn test_recent_memory_view() {
        let mut cpu = cpu_with(&[Instruction::St { rd: 1, rb: 0, offset: 3 }]);
        assert!(cpu.recent_memory_view().is_empty());
        cpu.regs.set(0, 0x100);
        cpu.regs.set(1, 7);
        cpu.step();
        let view = cpu.recent_memory_view();
        assert_eq!(view.len(), RECENT_VIEW_LEN);
        assert_eq!(view[0], MemoryCell { address: 0x103, value: 7, is_current: true });
        assert!(!view[1].is_current);
    }

    #[test]
    fn test_run_until_stops_cooperatively() {
        let mut cpu = cpu_with(&[Instruction::Sys(SysOp::Nop); 8]);
        let executed = cpu.run_until(100, |c| c.regs.pc() == 3);
        assert_eq!(executed, 3);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_snapshot_serializes() {
        let cpu = cpu_with(&[Instruction::Sys(SysOp::Nop)]);
        let snap = cpu.snapshot();
        assert!(snap.running);
        assert_eq!(snap.registers[13], 0x7FFF);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"running\":true"));
    }

    #[test]
    fn test_load_program_reinstalls_rom() {
        let mut cpu = Cpu::new();
        let writes = [MemoryWrite { address: ROM_BASE, value: 0 }];
        cpu.load_program(&writes).unwrap();
        assert_eq!(cpu.mem.read(ROM_BASE), Some(AUTOLOAD_ROM[0]));
    }
}

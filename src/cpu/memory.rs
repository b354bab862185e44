//! Deep16 memory subsystem.
//!
//! One flat array of 2^20 sixteen-bit words, addressed physically.
//! Every word resets to `0xFFFF`, which decodes as HALT, and the
//! 16-word autoload ROM is always mapped at the top of the space.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Number of addressable words (20-bit physical addresses).
pub const MEMORY_SIZE: usize = 1 << 20;

/// Highest valid physical address.
pub const MAX_ADDRESS: u32 = (MEMORY_SIZE - 1) as u32;

/// Reset value of every memory word.
pub const FILL_WORD: u16 = 0xFFFF;

/// Physical address of the autoload ROM.
pub const ROM_BASE: u32 = 0xFFFF0;

/// The autoload ROM.
///
/// Clears DS and SS, seeds R1 with 0x0100 (1 with its bytes swapped),
/// stores R1 to DS:0..2 and far-jumps through the R0:R1 pair.
pub const AUTOLOAD_ROM: [u16; 16] = [
    0x0000, // LDI 0
    0xFF41, // MVS DS, R0
    0xFF42, // MVS SS, R0
    0xFC21, // LSI R1, 1
    0xFE01, // SWB R1
    0xA200, // ST R1, [R0+0]
    0xA201, // ST R1, [R0+1]
    0xA202, // ST R1, [R0+2]
    0xFE40, // JML R0
    0xFFF0, // NOP (delay slot)
    0xFFF1, 0xFFF1, 0xFFF1, 0xFFF1, 0xFFF1, 0xFFF1,
];

/// First word of the memory-mapped screen.
pub const SCREEN_START: u32 = 0xF1000;
/// Last word of the memory-mapped screen (80 x 25 cells).
pub const SCREEN_END: u32 = 0xF17CF;

/// Whether a physical address lies in the screen window.
#[inline]
pub fn is_screen_address(addr: u32) -> bool {
    (SCREEN_START..=SCREEN_END).contains(&addr)
}

/// A single `(address, value)` store, as produced by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryWrite {
    pub address: u32,
    pub value: u16,
}

/// Deep16 physical memory.
#[derive(Clone)]
pub struct Memory {
    words: Vec<u16>,
}

impl Memory {
    /// Create memory in its reset state (all `0xFFFF`, ROM mapped).
    pub fn new() -> Self {
        let mut mem = Self {
            words: vec![FILL_WORD; MEMORY_SIZE],
        };
        mem.install_rom();
        mem
    }

    /// Read a word. Returns `None` outside the 20-bit space.
    #[inline]
    pub fn read(&self, addr: u32) -> Option<u16> {
        self.words.get(addr as usize).copied()
    }

    /// Write a word. Writes outside the 20-bit space are dropped and
    /// reported as `false`.
    #[inline]
    pub fn write(&mut self, addr: u32, value: u16) -> bool {
        match self.words.get_mut(addr as usize) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// Refill with `0xFFFF` and re-install the ROM.
    pub fn reset(&mut self) {
        self.words.fill(FILL_WORD);
        self.install_rom();
    }

    /// Copy the autoload ROM to `ROM_BASE`.
    pub fn install_rom(&mut self) {
        let base = ROM_BASE as usize;
        self.words[base..base + AUTOLOAD_ROM.len()].copy_from_slice(&AUTOLOAD_ROM);
    }

    /// Apply a set of sparse writes, failing on the first unmapped address.
    pub fn apply_writes(&mut self, writes: &[MemoryWrite]) -> Result<(), MemoryError> {
        for w in writes {
            if !self.write(w.address, w.value) {
                return Err(MemoryError::AddressOutOfRange(w.address));
            }
        }
        Ok(())
    }

    /// Load contiguous words starting at `start`.
    pub fn load_words(&mut self, start: u32, program: &[u16]) -> Result<(), MemoryError> {
        let start_idx = start as usize;
        if start_idx + program.len() > MEMORY_SIZE {
            return Err(MemoryError::ProgramTooLarge {
                size: program.len(),
                available: MEMORY_SIZE.saturating_sub(start_idx),
            });
        }
        self.words[start_idx..start_idx + program.len()].copy_from_slice(program);
        Ok(())
    }

    /// Dump `count` words from `start`, clipped to the address space.
    pub fn dump(&self, start: u32, count: usize) -> Vec<(u32, u16)> {
        let end = (start as usize).saturating_add(count).min(MEMORY_SIZE);
        (start as usize..end)
            .map(|i| (i as u32, self.words[i]))
            .collect()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self.words.iter().filter(|&&w| w != FILL_WORD).count();
        f.debug_struct("Memory")
            .field("used_words", &used)
            .field("total_words", &MEMORY_SIZE)
            .finish()
    }
}

/// Errors from host-side program loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("physical address 0x{0:05X} out of range (0x00000-0xFFFFF)")]
    AddressOutOfRange(u32),

    #[error("program size {size} exceeds available space {available}")]
    ProgramTooLarge { size: usize, available: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_fill_and_rom() {
        let mem = Memory::new();
        assert_eq!(mem.read(0), Some(0xFFFF));
        assert_eq!(mem.read(0x12345), Some(0xFFFF));
        for (i, &word) in AUTOLOAD_ROM.iter().enumerate() {
            assert_eq!(mem.read(ROM_BASE + i as u32), Some(word));
        }
    }

    #[test]
    fn test_read_write() {
        let mut mem = Memory::new();
        assert!(mem.write(0x10015, 0x1234));
        assert_eq!(mem.read(0x10015), Some(0x1234));
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut mem = Memory::new();
        assert_eq!(mem.read(0x100000), None);
        assert!(!mem.write(0x100000, 1));
    }

    #[test]
    fn test_reset_restores_rom() {
        let mut mem = Memory::new();
        mem.write(ROM_BASE, 0x1234);
        mem.write(5, 0);
        mem.reset();
        assert_eq!(mem.read(ROM_BASE), Some(AUTOLOAD_ROM[0]));
        assert_eq!(mem.read(5), Some(FILL_WORD));
    }

    #[test]
    fn test_apply_writes() {
        let mut mem = Memory::new();
        let writes = [
            MemoryWrite { address: 0, value: 1 },
            MemoryWrite { address: 0x200, value: 2 },
        ];
        mem.apply_writes(&writes).unwrap();
        assert_eq!(mem.read(0), Some(1));
        assert_eq!(mem.read(0x200), Some(2));

        let bad = [MemoryWrite { address: 0x100000, value: 0 }];
        assert_eq!(mem.apply_writes(&bad), Err(MemoryError::AddressOutOfRange(0x100000)));
    }

    #[test]
    fn test_load_words_bounds() {
        let mut mem = Memory::new();
        mem.load_words(0x10, &[1, 2, 3]).unwrap();
        assert_eq!(mem.dump(0x10, 3), vec![(0x10, 1), (0x11, 2), (0x12, 3)]);
        assert!(mem.load_words(MAX_ADDRESS, &[1, 2]).is_err());
    }

    #[test]
    fn test_screen_window() {
        assert!(is_screen_address(0xF1000));
        assert!(is_screen_address(0xF17CF));
        assert!(!is_screen_address(0xF17D0));
        assert!(!is_screen_address(0xF0FFF));
    }
}

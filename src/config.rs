//! Simulator configuration file.
//!
//! ```toml
//! [engine]
//! start = "program"   # or "rom"
//! entry = 0x0000
//! swi_vector = 4
//!
//! [run]
//! max_steps = 100000
//! trace = false
//! ```
//!
//! Every field is optional. Command-line flags override file values.

use crate::cpu::execute::DEFAULT_SWI_VECTOR;
use crate::cpu::Cpu;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default step cap for `run`.
pub const DEFAULT_MAX_STEPS: u64 = 100_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path} ({source})")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where execution begins after loading a program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    /// CS = 0, PC = `entry`.
    #[default]
    Program,
    /// The autoload ROM at CS = 0xFFFF.
    Rom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub start: StartMode,
    pub entry: u16,
    pub swi_vector: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start: StartMode::Program,
            entry: 0,
            swi_vector: DEFAULT_SWI_VECTOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub max_steps: u64,
    pub trace: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            trace: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub engine: EngineConfig,
    pub run: RunConfig,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Apply engine settings to a CPU with its program already loaded.
    pub fn apply(&self, cpu: &mut Cpu) {
        cpu.set_swi_vector(self.engine.swi_vector);
        match self.engine.start {
            StartMode::Program => cpu.regs.set_pc(self.engine.entry),
            StartMode::Rom => cpu.boot_rom(),
        }
    }
}

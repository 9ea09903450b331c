use std::fmt;
use std::str::FromStr;
use std::thread;

use crate::error::{Result, VzipError};
use crate::format::DEFAULT_BLOCK_SIZE;

/// Direction of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Compress,
    Decompress,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Compress => "compress",
            Mode::Decompress => "decompress",
        })
    }
}

impl FromStr for Mode {
    type Err = VzipError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "compress" | "c" => Ok(Mode::Compress),
            "decompress" | "d" => Ok(Mode::Decompress),
            other => Err(VzipError::config(format!(
                "unknown mode '{other}'. Valid options: compress, decompress"
            ))),
        }
    }
}

/// Two workers per available core.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
}

/// Tuning knobs for one pipeline run.
///
/// `max_in_flight` has no default: it bounds peak memory at roughly
/// `max_in_flight × block_size` and only the caller knows the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Raw bytes per source block (the last block may be shorter).
    pub block_size: usize,
    /// Number of transform worker threads.
    pub workers: usize,
    /// Blocks that may be read but not yet written at any time.
    pub max_in_flight: usize,
}

impl PipelineConfig {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            workers: default_workers(),
            max_in_flight,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(VzipError::config("block_size must be positive"));
        }
        if self.block_size > i32::MAX as usize {
            return Err(VzipError::config(format!(
                "block_size {} exceeds the format limit of {} bytes",
                self.block_size,
                i32::MAX
            )));
        }
        if self.workers == 0 {
            return Err(VzipError::config("workers must be positive"));
        }
        if self.max_in_flight == 0 {
            return Err(VzipError::config("max_in_flight must be positive"));
        }
        Ok(())
    }
}

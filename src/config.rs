//! This module implements the runtime configuration for the kernel core.
//!
//! Values here are the ones the original source hardcodes as preprocessor constants;
//! exposing them through a `Config` struct loaded from an optional `kernel.toml` lets
//! tests exercise extreme settings (tiny process tables, tiny slack) without recompiling.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Frame replacement policy for the coremap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    /// Scan frames in address order.
    Sequential,
    /// Pick a uniformly random candidate frame.
    Random,
}

/// TLB slot selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlbSlotPolicy {
    /// Round-robin through the per-CPU slot table.
    Sequential,
    /// Pick a uniformly random slot.
    Random,
}

/// The kernel-wide configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Size of the process table; also bounds `PID_MAX` indirectly.
    pub procs_max: usize,
    /// Page size in bytes.
    pub page_size: usize,
    /// Number of non-kernel frames that must remain free before a kernel
    /// allocation is admitted.
    pub min_slack: usize,
    /// Minimum ratio of swap file size to physical memory size.
    pub swap_ratio: usize,
    /// Frame replacement policy.
    pub replacement_policy: ReplacementPolicy,
    /// TLB slot selection policy.
    pub tlb_slot_policy: TlbSlotPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            procs_max: 128,
            page_size: 4096,
            min_slack: 8,
            swap_ratio: 20,
            replacement_policy: ReplacementPolicy::Sequential,
            tlb_slot_policy: TlbSlotPolicy::Sequential,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults for any field
    /// the file omits. Returns the default configuration if `path` does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(ConfigError::Read)?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }
}

/// An error produced while loading [`Config`].
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    Read(std::io::Error),
    /// The configuration file could not be parsed as TOML.
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(e) => write!(f, "failed to read configuration: {e}"),
            ConfigError::Parse(e) => write!(f, "failed to parse configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.procs_max, 128);
        assert_eq!(cfg.page_size, 4096);
        assert_eq!(cfg.min_slack, 8);
        assert_eq!(cfg.swap_ratio, 20);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = Config::load("/nonexistent/kernel.toml").unwrap();
        assert_eq!(cfg.procs_max, Config::default().procs_max);
    }
}

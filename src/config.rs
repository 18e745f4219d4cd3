//! Configuration management for fabric-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (FABRIC_EMU_MEM_LATENCY, etc.)
//! 2. Project-local config file (`./fabric-emu.toml`)
//! 3. User config file (`~/.config/fabric-emu/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # fabric-emu.toml
//!
//! # Data widths in bytes
//! wide_width = 8
//! narrow_width = 4
//!
//! # Memory-domain timing
//! mem_latency = 4
//! mem_clock_ratio = 2
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

use crate::bus::spec;
use crate::fabric::ConfigError;

/// Global cached configuration.
static CONFIG: OnceLock<FabricConfig> = OnceLock::new();

/// Fabric topology and timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Data width of the initiator and memory legs, in bytes.
    pub wide_width: usize,

    /// Data width of the storage peripheral, in bytes.
    pub narrow_width: usize,

    /// Longest burst (in beats) initiators are elaborated for.
    pub max_burst: u16,

    /// AW/AR/B sub-channel depth.
    pub addr_depth: usize,

    /// W/R sub-channel depth.
    pub data_depth: usize,

    /// Elastic buffer depth per crossed sub-channel.
    pub cdc_depth: usize,

    /// Clock-domain bridge synchronizer latency, sink cycles.
    pub cdc_sync_latency: u64,

    /// Memory-target service latency, memory-domain cycles.
    pub mem_latency: u64,

    /// Core-domain cycles per memory-domain cycle.
    pub mem_clock_ratio: u32,

    /// Peripheral-target service latency, bus cycles.
    pub periph_latency: u64,

    /// DRAM region base address.
    pub dram_base: u64,

    /// DRAM region size in bytes.
    pub dram_size: u64,

    /// Storage peripheral window base address.
    pub storage_base: u64,

    /// Storage peripheral window size in bytes.
    pub storage_size: u64,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            wide_width: spec::DEFAULT_WIDE_WIDTH,
            narrow_width: spec::DEFAULT_NARROW_WIDTH,
            max_burst: spec::DEFAULT_MAX_BURST,
            addr_depth: spec::DEFAULT_ADDR_DEPTH,
            data_depth: spec::DEFAULT_DATA_DEPTH,
            cdc_depth: spec::CDC_DEFAULT_DEPTH,
            cdc_sync_latency: spec::CDC_SYNC_LATENCY,
            mem_latency: spec::DEFAULT_MEM_LATENCY,
            mem_clock_ratio: spec::DEFAULT_MEM_CLOCK_RATIO,
            periph_latency: spec::DEFAULT_PERIPH_LATENCY,
            dram_base: spec::DEFAULT_DRAM_BASE,
            dram_size: spec::DEFAULT_DRAM_SIZE,
            storage_base: spec::DEFAULT_STORAGE_BASE,
            storage_size: spec::DEFAULT_STORAGE_SIZE,
        }
    }
}

impl FabricConfig {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `fabric-emu.toml`
    /// 3. User config `~/.config/fabric-emu/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config = user_config;
        }
        if let Some(local_config) = Self::load_local_config() {
            config = local_config;
        }
        config.apply_env_overrides();
        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static FabricConfig {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Load user configuration from ~/.config/fabric-emu/config.toml
    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("fabric-emu").join("config.toml");
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./fabric-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("fabric-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("fabric-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }
        None
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        fn parse_env<T: std::str::FromStr>(name: &str, slot: &mut T) {
            if let Ok(raw) = std::env::var(name) {
                match raw.parse() {
                    Ok(value) => {
                        log::info!("Using {} from environment: {}", name, raw);
                        *slot = value;
                    }
                    Err(_) => log::warn!("Ignoring unparseable {}={}", name, raw),
                }
            }
        }
        parse_env("FABRIC_EMU_MEM_LATENCY", &mut self.mem_latency);
        parse_env("FABRIC_EMU_MEM_CLOCK_RATIO", &mut self.mem_clock_ratio);
        parse_env("FABRIC_EMU_CDC_LATENCY", &mut self.cdc_sync_latency);
        parse_env("FABRIC_EMU_MAX_BURST", &mut self.max_burst);
    }

    /// Sanity-check the topology before elaboration.
    ///
    /// The checks the fabric components repeat at construction live
    /// there; this catches the purely numeric mistakes early with a
    /// config-level error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wide_width == 0 || !self.wide_width.is_power_of_two() {
            return Err(ConfigError::InvalidWidth(self.wide_width));
        }
        if self.narrow_width == 0
            || !self.narrow_width.is_power_of_two()
            || self.narrow_width > self.wide_width
        {
            return Err(ConfigError::InvalidWidth(self.narrow_width));
        }
        if self.wide_width % self.narrow_width != 0 {
            return Err(ConfigError::WidthNotDivisible {
                wide: self.wide_width,
                narrow: self.narrow_width,
            });
        }
        let ratio = self.wide_width / self.narrow_width;
        if self.max_burst as u32 * ratio as u32 > spec::MAX_BURST_BEATS as u32 {
            return Err(ConfigError::BurstExceedsTarget {
                beats: self.max_burst,
                ratio,
                limit: spec::MAX_BURST_BEATS,
            });
        }
        Ok(())
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# fabric-emu configuration
# Place this file at ~/.config/fabric-emu/config.toml or ./fabric-emu.toml

# Data widths in bytes (wide: initiators and memory leg, narrow: storage)
wide_width = 8
narrow_width = 4

# Longest burst initiators may issue, in beats
max_burst = 16

# Sub-channel FIFO depths
addr_depth = 4
data_depth = 16

# Clock-domain bridge: elastic depth and synchronizer latency
cdc_depth = 8
cdc_sync_latency = 2

# Memory domain: service latency (memory cycles) and clock ratio
# (core cycles per memory cycle)
mem_latency = 4
mem_clock_ratio = 2

# Storage peripheral service latency (bus cycles)
periph_latency = 1

# Address map
dram_base = 0x00000000
dram_size = 0x80000000
storage_base = 0xA0000000
storage_size = 0x10000
"#
        .to_string()
    }
}

/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    config.rs

    Bus interface configuration, read from TOML.
*/

use std::path::{Path, PathBuf};

use serde_derive::Deserialize;

use crate::{
    biu::{queue::QUEUE_MAX, timing::TimingTable},
    cpu_common::CpuGeneration,
    error::ConfigError,
};

pub const MAX_CORES: usize = 8;
pub const DEFAULT_DRAM_REFRESH_PERIOD: u32 = 72;
pub const DEFAULT_DRAM_REFRESH_TICKS: u32 = 4;

const fn _default_true() -> bool {
    true
}
const fn _default_cores() -> usize {
    1
}
const fn _default_refresh_period() -> u32 {
    DEFAULT_DRAM_REFRESH_PERIOD
}
const fn _default_refresh_ticks() -> u32 {
    DEFAULT_DRAM_REFRESH_TICKS
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TimingOverrides {
    #[serde(default)]
    pub mem_waitstates: Option<u32>,
    #[serde(default)]
    pub io_waitstates: Option<u32>,
    #[serde(default)]
    pub narrow_waitstates: Option<u32>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
pub struct DramRefreshConfig {
    #[serde(default = "_default_refresh_period")]
    pub period: u32,
    #[serde(default = "_default_refresh_ticks")]
    pub transfer_ticks: u32,
}

impl Default for DramRefreshConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_DRAM_REFRESH_PERIOD,
            transfer_ticks: DEFAULT_DRAM_REFRESH_TICKS,
        }
    }
}

/// A periodic external wait, such as the CGA's video memory wait.
#[derive(Copy, Clone, Debug, Deserialize)]
pub struct ExternalWaitConfig {
    pub period: u32,
    pub cycles: u32,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TraceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Trace to this file. Without a file, trace lines go to the console.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BiuConfig {
    #[serde(default)]
    pub generation: CpuGeneration,
    #[serde(default = "_default_cores")]
    pub cores: usize,
    #[serde(default)]
    pub legacy_chipset: bool,
    #[serde(default = "_default_true")]
    pub enable_wait_states: bool,
    #[serde(default)]
    pub queue_size: Option<usize>,
    #[serde(default)]
    pub timing: TimingOverrides,
    #[serde(default)]
    pub dram_refresh: Option<DramRefreshConfig>,
    #[serde(default)]
    pub external_wait: Option<ExternalWaitConfig>,
    #[serde(default)]
    pub trace: TraceConfig,
}

impl Default for BiuConfig {
    fn default() -> Self {
        Self {
            generation: CpuGeneration::default(),
            cores: 1,
            legacy_chipset: false,
            enable_wait_states: true,
            queue_size: None,
            timing: TimingOverrides::default(),
            dram_refresh: None,
            external_wait: None,
            trace: TraceConfig::default(),
        }
    }
}

impl BiuConfig {
    pub fn new(generation: CpuGeneration) -> Self {
        Self {
            generation,
            ..Default::default()
        }
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: BiuConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_str = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Read BIU configuration from {}", path.as_ref().display());
        Self::from_toml_str(&toml_str)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cores == 0 || self.cores > MAX_CORES {
            return Err(ConfigError::CoreCount {
                count: self.cores,
                max: MAX_CORES,
            });
        }
        if let Some(size) = self.queue_size {
            if size > QUEUE_MAX {
                return Err(ConfigError::QueueSize(size));
            }
        }
        if let Some(refresh) = &self.dram_refresh {
            if refresh.period == 0 {
                return Err(ConfigError::ZeroPeriod("dram_refresh"));
            }
        }
        if let Some(wait) = &self.external_wait {
            if wait.period == 0 {
                return Err(ConfigError::ZeroPeriod("external_wait"));
            }
        }
        Ok(())
    }

    /// The timing table for the configured generation with any overrides applied.
    pub fn timing_table(&self) -> TimingTable {
        TimingTable::for_generation(self.generation).with_overrides(self.queue_size, &self.timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config = BiuConfig::from_toml_str(
            r#"
            generation = "intel80286"
            cores = 2
            queue_size = 4

            [timing]
            mem_waitstates = 2

            [dram_refresh]
            period = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.generation, CpuGeneration::Intel80286);
        assert_eq!(config.cores, 2);
        assert!(config.enable_wait_states);
        let refresh = config.dram_refresh.unwrap();
        assert_eq!(refresh.period, 100);
        assert_eq!(refresh.transfer_ticks, DEFAULT_DRAM_REFRESH_TICKS);

        let table = config.timing_table();
        assert_eq!(table.queue_size, 4);
        assert_eq!(table.mem_waitstates, 2);
        assert_eq!(table.io_waitstates, 1);
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = BiuConfig::from_toml_str("").unwrap();
        assert_eq!(config.generation, CpuGeneration::Intel8088);
        assert_eq!(config.cores, 1);
        assert!(config.dram_refresh.is_none());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            BiuConfig::from_toml_str("cores = 0"),
            Err(ConfigError::CoreCount { count: 0, .. })
        ));
        assert!(matches!(
            BiuConfig::from_toml_str("queue_size = 64"),
            Err(ConfigError::QueueSize(64))
        ));
        assert!(matches!(
            BiuConfig::from_toml_str("generation = \"z80\""),
            Err(ConfigError::Parse(_))
        ));
    }
}

//! Benchmark configuration, resolved from command line strings, environment and config files

use std::path::PathBuf;

use nanoserde::DeJson;

use crate::{
    backend::{DeviceConfig, DeviceMode},
    dtype::DType,
    error::RooflineError,
};

/// Default problem size, 2^27 elements
pub const DEFAULT_ENTRIES: usize = 134_217_728;

/// Debug bitmask read from `ROOFLINE_DEBUG`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugMask(u32);

impl DebugMask {
    /// Reads `ROOFLINE_DEBUG`, unset or unparsable value means no debug output
    #[must_use]
    pub fn from_env() -> DebugMask {
        std::env::var("ROOFLINE_DEBUG").ok().and_then(|x| x.parse::<u32>().ok()).map_or(DebugMask(0), DebugMask)
    }

    /// Device and config file information
    #[must_use]
    pub const fn debug_dev(&self) -> bool {
        self.0 % 2 == 1
    }

    /// Raw timing of every sweep point
    #[must_use]
    pub const fn debug_perf(&self) -> bool {
        (self.0 >> 1) % 2 == 1
    }

    /// Kernel sources and build options
    #[must_use]
    pub const fn debug_asm(&self) -> bool {
        (self.0 >> 2) % 2 == 1
    }
}

impl From<u32> for DebugMask {
    fn from(value: u32) -> Self {
        DebugMask(value)
    }
}

/// Resolved and validated benchmark settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchConfig {
    pub mode: DeviceMode,
    /// Number of elements N in each of the two buffers
    pub entries: usize,
    pub dtype: DType,
}

impl BenchConfig {
    /// Resolves command line values, any unknown name or out of range size is an error
    pub fn new(device: &str, entries: usize, dtype: &str) -> Result<BenchConfig, RooflineError> {
        let mode: DeviceMode = device.parse()?;
        let dtype: DType = dtype.parse()?;
        // Kernels index with 32 bit ints
        if entries == 0 || entries > i32::MAX as usize {
            return Err(RooflineError::config_error(
                format!("Entries {entries} out of range, expected 1..={}", i32::MAX).into(),
            ));
        }
        Ok(BenchConfig { mode, entries, dtype })
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig { mode: DeviceMode::Serial, entries: DEFAULT_ENTRIES, dtype: DType::F64 }
    }
}

/// Searches XDG config directories for `roofline/device_config.json`.
/// Missing or invalid file falls back to defaults.
#[must_use]
pub fn load_device_config(debug_dev: bool) -> DeviceConfig {
    xdg::BaseDirectories::new()
        .map_err(|e| {
            if debug_dev {
                eprintln!("Failed to find config directories for device_config.json, {e}");
            }
        })
        .ok()
        .map(|bd| {
            let mut dirs = bd.get_config_dirs();
            dirs.push(bd.get_config_home());
            dirs
        })
        .and_then(|paths| find_config_file(paths, debug_dev))
        .and_then(|file| parse_device_config(&file, debug_dev))
        .inspect(|_| {
            if debug_dev {
                eprintln!("Device config successfully read and parsed.");
            }
        })
        .unwrap_or_else(|| {
            if debug_dev {
                eprintln!("Using default device config.");
            }
            DeviceConfig::default()
        })
}

fn find_config_file(paths: Vec<PathBuf>, debug_dev: bool) -> Option<String> {
    paths.into_iter().find_map(|mut path| {
        path.push("roofline/device_config.json");
        let file = std::fs::read_to_string(&path).ok()?;
        if debug_dev {
            eprintln!("Found device config at {}", path.display());
        }
        Some(file)
    })
}

/// Parses device config JSON, fields that are not present keep their defaults
#[must_use]
pub fn parse_device_config(file: &str, debug_dev: bool) -> Option<DeviceConfig> {
    DeviceConfig::deserialize_json(file)
        .map_err(|e| {
            if debug_dev {
                eprintln!("Failed to parse device_config.json, {e}");
            }
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_defaults() -> Result<(), RooflineError> {
        let config = BenchConfig::new("Serial", DEFAULT_ENTRIES, "fp64")?;
        assert_eq!(config, BenchConfig::default());
        assert_eq!(config.entries, 134_217_728);
        let config = BenchConfig::new("HIP", 1024, "fp32")?;
        assert_eq!(config.mode, DeviceMode::HIP);
        assert_eq!(config.dtype, DType::F32);
        assert_eq!(config.entries, 1024);
        Ok(())
    }

    #[test]
    fn reject_invalid_values() {
        assert!(matches!(BenchConfig::new("TPU", 1024, "fp64"), Err(RooflineError::ConfigError(_))));
        assert!(matches!(BenchConfig::new("Serial", 1024, "fp16"), Err(RooflineError::ConfigError(_))));
        assert!(matches!(BenchConfig::new("Serial", 0, "fp64"), Err(RooflineError::ConfigError(_))));
        assert!(matches!(
            BenchConfig::new("Serial", i32::MAX as usize + 1, "fp64"),
            Err(RooflineError::ConfigError(_))
        ));
        assert!(BenchConfig::new("Serial", i32::MAX as usize, "fp64").is_ok());
    }

    #[test]
    fn debug_mask_bits() {
        let mask = DebugMask::from(5);
        assert!(mask.debug_dev());
        assert!(!mask.debug_perf());
        assert!(mask.debug_asm());
        let mask = DebugMask::from(2);
        assert!(!mask.debug_dev());
        assert!(mask.debug_perf());
        assert_eq!(DebugMask::default(), DebugMask::from(0));
    }

    #[test]
    fn device_config_fallback() {
        assert!(parse_device_config("{not json", false).is_none());
        let Some(config) = parse_device_config(r#"{"dummy": {"arch": "gfx942"}}"#, false) else {
            panic!("valid device config failed to parse");
        };
        assert_eq!(config.dummy.arch.as_deref(), Some("gfx942"));
        assert_eq!(config.opencl.platform_id(), 0);
    }
}

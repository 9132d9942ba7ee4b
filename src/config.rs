//! Startup configuration.
//!
//! Everything the core used to read from hidden system parameters is an
//! explicit field here. Loaded once and handed to [`CoreContext`].
//!
//! [`CoreContext`]: crate::core::context::CoreContext

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::core::buffer::types::{SURFACE_DEFAULT_QUEUE_SIZE, SURFACE_MAX_QUEUE_SIZE};
use crate::core::screen::types::Orientation;
use crate::util::logging::CONFIG;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "DISPLAYCORE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Queue size for newly created non-shared queues
    pub default_queue_size: u32,
    pub default_width: i32,
    pub default_height: i32,
    pub default_usage: u64,
    /// Raw dumps of flushed buffers land here; disabled when `None`
    pub dump_dir: Option<PathBuf>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            default_queue_size: SURFACE_DEFAULT_QUEUE_SIZE,
            default_width: 0,
            default_height: 0,
            default_usage: 0,
            dump_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// First screen group is created as EXPAND instead of MIRROR
    pub expand_combination: bool,
    /// Orientation applied to the built-in screen when it connects
    pub build_in_default_orientation: Orientation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub waterfall_compression_enabled: bool,
    /// Compressed edge size in virtual pixels, per side
    pub waterfall_compression_size_vp: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub buffer: BufferConfig,
    pub screen: ScreenConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

impl CoreConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config =
            Self::from_json(&text).with_context(|| format!("parsing config {}", path.display()))?;
        crate::dlog!(CONFIG, "loaded {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: CoreConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `DISPLAYCORE_CONFIG`, or fall back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => {
                tracing::debug!("{} not set, using default config", CONFIG_ENV);
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let size = self.buffer.default_queue_size;
        if size == 0 || size > SURFACE_MAX_QUEUE_SIZE {
            bail!("buffer.default_queue_size must be in [1, {}], got {}", SURFACE_MAX_QUEUE_SIZE, size);
        }
        if self.buffer.default_width < 0 || self.buffer.default_height < 0 {
            bail!("buffer default size must not be negative");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.buffer.default_queue_size, 3);
        assert!(!config.screen.expand_combination);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = CoreConfig::from_json(
            r#"{ "screen": { "expand_combination": true }, "display": { "waterfall_compression_enabled": true, "waterfall_compression_size_vp": 8 } }"#,
        )
        .unwrap();
        assert!(config.screen.expand_combination);
        assert_eq!(config.display.waterfall_compression_size_vp, 8);
        assert_eq!(config.buffer.default_queue_size, 3);
    }

    #[test]
    fn test_rejects_bad_queue_size() {
        assert!(CoreConfig::from_json(r#"{ "buffer": { "default_queue_size": 0 } }"#).is_err());
        assert!(CoreConfig::from_json(r#"{ "buffer": { "default_queue_size": 33 } }"#).is_err());
    }
}

//! Startup configuration: a TOML document read once before any kernel
//! device is touched.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/rvc/config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeapPreference {
    Mmap,
    DmaHeap,
    Ion,
}

impl Default for HeapPreference {
    fn default() -> Self {
        HeapPreference::Mmap
    }
}

fn default_card_index() -> u32 {
    0
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_refresh() -> u32 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_card_index")]
    pub card_index: u32,
    /// Connector id to drive; `None` selects the first connected connector.
    #[serde(default)]
    pub connector_id: Option<u32>,
    #[serde(default)]
    pub camera_id: i32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_refresh")]
    pub refresh_hz: u32,
    #[serde(default)]
    pub heap: HeapPreference,
    /// Overrides `RUST_LOG` when present.
    #[serde(default)]
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            card_index: default_card_index(),
            connector_id: None,
            camera_id: 0,
            width: default_width(),
            height: default_height(),
            refresh_hz: default_refresh(),
            heap: HeapPreference::default(),
            log_filter: None,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(
                "width and height must be non-zero".into(),
            ));
        }
        if self.camera_id < 0 {
            return Err(ConfigError::Invalid("camera_id must be >= 0".into()));
        }
        if self.refresh_hz == 0 {
            return Err(ConfigError::Invalid("refresh_hz must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_width_is_rejected() {
        let mut config = Config::default();
        config.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_camera_id_is_rejected() {
        let mut config = Config::default();
        config.camera_id = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_document() {
        let config: Config = toml::from_str("camera_id = 1\nwidth = 640\nheight = 480\n").unwrap();
        assert_eq!(config.camera_id, 1);
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 480);
        assert_eq!(config.heap, HeapPreference::Mmap);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let result: Result<Config, _> = toml::from_str("bogus_key = 1\n");
        assert!(result.is_err());
    }
}

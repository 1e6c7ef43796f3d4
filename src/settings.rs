use std::fs;
use std::io;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tunables of a draw context, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawContextSettings {
    /// Capacity of the instancing buffer in transforms.
    #[serde(default = "DrawContextSettings::default_max_instances")]
    pub max_instances: u32,
    #[serde(default = "DrawContextSettings::default_page_size")]
    pub instance_page_size: usize,
    #[serde(default = "DrawContextSettings::default_opaque_capacity")]
    pub initial_opaque_capacity: usize,
    /// Allows hardware instancing when the device supports it.
    #[serde(default = "enabled")]
    pub hw_instancing_enabled: bool,
    #[serde(default)]
    pub collect_statistics: bool,
    #[serde(default = "enabled")]
    pub auto_reset_statistics: bool,
    #[serde(default = "enabled")]
    pub sort_opaque: bool,
    #[serde(default = "enabled")]
    pub sort_transparent: bool,
    #[serde(default = "enabled")]
    pub render_opaque: bool,
    #[serde(default = "enabled")]
    pub render_transparent: bool,
    #[serde(default = "enabled")]
    pub render_shimmer: bool,
}

const fn enabled() -> bool {
    true
}

impl Default for DrawContextSettings {
    fn default() -> Self {
        Self {
            max_instances: Self::default_max_instances(),
            instance_page_size: Self::default_page_size(),
            initial_opaque_capacity: Self::default_opaque_capacity(),
            hw_instancing_enabled: true,
            collect_statistics: false,
            auto_reset_statistics: true,
            sort_opaque: true,
            sort_transparent: true,
            render_opaque: true,
            render_transparent: true,
            render_shimmer: true,
        }
    }
}

/// Why a settings file could not be used.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file")]
    Read(#[from] io::Error),
    #[error("malformed settings file")]
    Parse(#[from] serde_json::Error),
}

impl DrawContextSettings {
    pub fn load() -> Self {
        Self::load_from_path("draw_context.json")
    }

    /// Like [`read_from_path`](Self::read_from_path), but never fails: a
    /// missing or broken file yields the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::read_from_path(path) {
            Ok(settings) => {
                info!("Loaded draw context settings from {:?}", path);
                settings
            }
            Err(SettingsError::Read(err)) if err.kind() == io::ErrorKind::NotFound => {
                info!("No draw context settings at {:?}, using defaults", path);
                Self::default()
            }
            Err(SettingsError::Read(err)) => {
                warn!("Failed to read {:?} ({}), using defaults", path, err);
                Self::default()
            }
            Err(SettingsError::Parse(err)) => {
                warn!("Failed to parse {:?} ({}), using defaults", path, err);
                Self::default()
            }
        }
    }

    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&contents)?;
        Ok(settings.validate())
    }

    pub fn validate(mut self) -> Self {
        if self.max_instances == 0 {
            warn!("Instancing buffer capacity must be greater than zero. Using default value.");
            self.max_instances = Self::default_max_instances();
        }
        if self.instance_page_size == 0 {
            warn!("Instance page size must be greater than zero. Using default value.");
            self.instance_page_size = Self::default_page_size();
        }

        self
    }

    const fn default_max_instances() -> u32 {
        4096
    }

    const fn default_page_size() -> usize {
        4096
    }

    const fn default_opaque_capacity() -> usize {
        1024
    }
}

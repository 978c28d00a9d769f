//! Configuration for studioanim worlds
//!
//! Tunables live in a TOML file that is created with defaults on first load:
//! - bone cache pool budget
//! - ragdoll cap, fade speed and unragdoll blend time
//! - event replay limit for long advances
//! - interpolation delay for networked entities
//! - bone access enforcement and the frame budget warning
//!
//! # Example
//!
//! ```ignore
//! use studioanim_core::config::{config_path, AnimConfig};
//!
//! let config = AnimConfig::load_from(&config_path()?)?;
//! let world = World::new(config, Box::new(NullShadowManager), Box::new(NullRagdollPhysics));
//! ```

mod loader;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use loader::{config_path, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Could not determine where the config file lives
    #[error("Config directory not available - could not resolve working directory")]
    NoConfigDirectory,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// World configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    /// Byte budget of the shared bone cache pool
    pub bone_cache_budget_bytes: usize,

    /// Ragdoll cap used while the server has not set one
    pub max_ragdoll_count: usize,

    /// Player ragdolls kept regardless of the cap
    pub max_important_ragdolls: usize,

    /// Alpha units per second a fading ragdoll loses
    pub ragdoll_fade_speed: f32,

    /// Seconds an entity blends out of its ragdoll pose
    pub unragdoll_blend_time: f32,

    /// Seconds a transferred dissolve runs before the ragdoll fades
    pub dissolve_time: f32,

    /// Full loops whose events are replayed for one long advance
    pub max_event_wraps_per_advance: u32,

    /// Seconds networked entities render behind the latest sample
    pub interpolation_amount: f32,

    /// Deny bone reads the permission stack disallows
    pub enforce_bone_access: bool,

    /// Warn when a frame's animation work takes longer than this
    pub frame_budget_ms: f32,
}

impl Default for AnimConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            bone_cache_budget_bytes: 16 * 1024,
            max_ragdoll_count: 32,
            max_important_ragdolls: 2,
            ragdoll_fade_speed: 600.0,
            unragdoll_blend_time: 0.2,
            dissolve_time: 2.0,
            max_event_wraps_per_advance: 4,
            interpolation_amount: 0.1,
            enforce_bone_access: true,
            frame_budget_ms: 2.0,
        }
    }
}

impl AnimConfig {
    /// Load config from `path`, creating a default file if missing.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save_to(path)?;
            tracing::info!("Created default config at {:?}", path);
            Ok(default)
        }
    }

    /// Load from the resolved default location
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&config_path()?)
    }

    /// Save config to `path`.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reload config from `path`.
    ///
    /// Updates self with the current file contents.
    pub fn reload_from(&mut self, path: &Path) -> ConfigResult<()> {
        let content = std::fs::read_to_string(path)?;
        *self = toml::from_str(&content)?;
        tracing::debug!("Reloaded config from {:?}", path);
        Ok(())
    }
}

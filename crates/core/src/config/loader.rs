//! Config path resolution
//!
//! The config file is `$STUDIOANIM_CONFIG` when set, otherwise
//! `studioanim.toml` in the working directory.

use std::path::PathBuf;

use super::{ConfigError, ConfigResult};

/// Environment variable overriding the config location
pub const CONFIG_ENV_VAR: &str = "STUDIOANIM_CONFIG";

/// File name used when no override is set
pub const DEFAULT_CONFIG_FILE: &str = "studioanim.toml";

/// Returns the config file path.
pub fn config_path() -> ConfigResult<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    let cwd = std::env::current_dir().map_err(|_| ConfigError::NoConfigDirectory)?;
    Ok(cwd.join(DEFAULT_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_format() {
        // the override is only read when set, so either form is valid here
        let path = config_path().unwrap();
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(v) if !v.is_empty() => assert_eq!(path, PathBuf::from(v)),
            _ => assert!(path.ends_with(DEFAULT_CONFIG_FILE)),
        }
    }
}

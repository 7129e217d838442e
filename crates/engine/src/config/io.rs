//! Configuration IO helpers.

use std::fs;
use std::fs::{create_dir_all, write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use ratewatch_util::resolve_config_file;

use crate::config::{RatewatchConfig, interpolate_config, validate_config};

/// Environment variable overriding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "RATEWATCH_CONFIG_PATH";

/// Returns the default path for the configuration file.
pub fn default_config_path() -> PathBuf {
    resolve_config_file(CONFIG_PATH_ENV, "config.json")
}

/// Loads and parses configuration from the default path.
pub fn load_config() -> anyhow::Result<RatewatchConfig> {
    let path = default_config_path();
    load_config_from_path(&path)
}

/// Loads and parses configuration from a specific path.
///
/// A missing file yields the built-in catalog.
pub fn load_config_from_path(path: &Path) -> anyhow::Result<RatewatchConfig> {
    if !path.exists() {
        return Ok(RatewatchConfig::default());
    }

    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut config: RatewatchConfig = serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    interpolate_config(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

/// Saves configuration to a specific path.
pub fn save_config_to_path(config: &RatewatchConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent_directory) = path.parent() {
        create_dir_all(parent_directory)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewatch_util::expand_tilde;

    #[test]
    fn default_path_honors_environment_override() {
        let override_path = "~/custom/ratewatch/config.json";
        temp_env::with_var(CONFIG_PATH_ENV, Some(override_path), || {
            let path = default_config_path();
            let expected = expand_tilde(override_path);
            assert_eq!(path, expected);
        });
    }

    #[test]
    fn missing_file_yields_builtin_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.instruments.len(), 3);
    }

    #[test]
    fn saved_config_loads_back_and_invalid_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = RatewatchConfig::default();
        config.retry.delay_ms = 250;
        save_config_to_path(&config, &path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.retry.delay_ms, 250);

        fs::write(&path, r#"{"retry": {"attempts": 0, "delayMs": 10}}"#).unwrap();
        assert!(load_config_from_path(&path).is_err());
    }
}

//! Loading and saving config.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::HangarConfig;
use super::paths::config_path_in;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store at `<config dir>/hangar/config.toml`.
    pub fn from_default_location() -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("hangar");
        Ok(Self::from_dir(&config_dir))
    }

    pub fn from_dir(config_dir: &Path) -> Self {
        Self {
            config_path: config_path_in(config_dir),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> anyhow::Result<HangarConfig> {
        if !self.config_path.exists() {
            return Ok(HangarConfig::new());
        }
        let content = std::fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;
        toml::from_str(&content).with_context(|| {
            format!("Failed to parse config file: {}", self.config_path.display())
        })
    }

    pub fn save(&self, config: &HangarConfig) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_defaults() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let store = ConfigStore::from_dir(tmp.path());
        assert_eq!(store.load().expect("load should succeed"), HangarConfig::new());
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let store = ConfigStore::from_dir(&tmp.path().join("nested"));
        let config = HangarConfig {
            system_dir: Some(PathBuf::from("/srv/hangar")),
            user_dir: None,
        };
        store.save(&config).expect("save should succeed");
        assert_eq!(store.load().expect("load should succeed"), config);
    }

    #[test]
    fn test_parse_errors_name_the_file() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let store = ConfigStore::from_dir(tmp.path());
        std::fs::write(store.config_path(), "system_dir = [").expect("write should succeed");
        let err = store.load().unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"), "{err:#}");
    }
}

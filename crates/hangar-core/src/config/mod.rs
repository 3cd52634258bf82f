//! Client configuration: where the system and user installations live.
//!
//! Loaded from `<config dir>/hangar/config.toml`; every field is optional and
//! the `HANGAR_SYSTEM_DIR` / `HANGAR_USER_DIR` environment variables win over
//! the file.

pub mod paths;
pub mod store;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use paths::{SYSTEM_DIR_ENV, USER_DIR_ENV, default_system_dir, default_user_dir};
pub use store::ConfigStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangarConfig {
    /// Root of the system-wide installation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_dir: Option<PathBuf>,
    /// Root of the per-user installation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_dir: Option<PathBuf>,
}

impl HangarConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system_dir(&self) -> PathBuf {
        self.system_dir_with(|key| std::env::var_os(key))
    }

    pub fn user_dir(&self) -> anyhow::Result<PathBuf> {
        self.user_dir_with(|key| std::env::var_os(key))
    }

    fn system_dir_with(&self, env: impl Fn(&str) -> Option<std::ffi::OsString>) -> PathBuf {
        env(SYSTEM_DIR_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.system_dir.clone())
            .unwrap_or_else(default_system_dir)
    }

    fn user_dir_with(
        &self,
        env: impl Fn(&str) -> Option<std::ffi::OsString>,
    ) -> anyhow::Result<PathBuf> {
        if let Some(dir) = env(USER_DIR_ENV).filter(|value| !value.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        match &self.user_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_user_dir(),
        }
    }
}

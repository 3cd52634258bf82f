//! Default locations.

use std::path::{Path, PathBuf};

pub const SYSTEM_DIR_ENV: &str = "HANGAR_SYSTEM_DIR";
pub const USER_DIR_ENV: &str = "HANGAR_USER_DIR";

const CONFIG_FILE: &str = "config.toml";

pub fn default_system_dir() -> PathBuf {
    PathBuf::from("/var/lib/hangar")
}

pub fn default_user_dir() -> anyhow::Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(data_dir.join("hangar"))
}

pub fn config_path_in(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE)
}

//! Remote configuration persisted as `repo/remotes.toml`.
//!
//! ```toml
//! [[remote]]
//! name = "flathub"
//! url = "https://example.org/repo"
//! priority = 1
//! ```
//!
//! Array order is registration order; it breaks priority ties.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::repo::write_atomic;

pub const DEFAULT_PRIORITY: i32 = 1;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub name: String,
    /// Repository location; `file://`, a bare path, or `http(s)://`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Hidden from browsing UIs; set on remotes created for bundle origins.
    #[serde(default)]
    pub noenumerate: bool,
    /// Key material that bundle signatures for this remote must verify against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

impl RemoteConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            title: None,
            priority: DEFAULT_PRIORITY,
            noenumerate: false,
            signing_key: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = Some(key.into());
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RemotesFile {
    #[serde(default, rename = "remote")]
    remotes: Vec<RemoteConfig>,
}

/// Load/modify/save access to `remotes.toml`.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    path: PathBuf,
}

impl RemoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remotes in registration order.
    pub fn load(&self) -> anyhow::Result<Vec<RemoteConfig>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read remotes: {}", self.path.display()))?;
        let file: RemotesFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse remotes: {}", self.path.display()))?;
        Ok(file.remotes)
    }

    /// Remotes by descending priority, ties in registration order.
    pub fn ordered(&self) -> anyhow::Result<Vec<RemoteConfig>> {
        let mut remotes = self.load()?;
        // sort_by_key is stable, which keeps registration order within a priority.
        remotes.sort_by_key(|remote| std::cmp::Reverse(remote.priority));
        Ok(remotes)
    }

    pub fn get(&self, name: &str) -> anyhow::Result<Option<RemoteConfig>> {
        Ok(self.load()?.into_iter().find(|remote| remote.name == name))
    }

    pub fn add(&self, remote: RemoteConfig) -> anyhow::Result<()> {
        validate_remote_name(&remote.name)?;
        let mut remotes = self.load()?;
        if remotes.iter().any(|existing| existing.name == remote.name) {
            anyhow::bail!("Remote '{}' already exists", remote.name);
        }
        remotes.push(remote);
        self.save(remotes)
    }

    /// Remove a remote, returning whether it existed.
    pub fn remove(&self, name: &str) -> anyhow::Result<bool> {
        let mut remotes = self.load()?;
        let before = remotes.len();
        remotes.retain(|remote| remote.name != name);
        if remotes.len() == before {
            return Ok(false);
        }
        self.save(remotes)?;
        Ok(true)
    }

    /// First free name of the form `<hint>-origin`, `<hint>-origin-1`, ...
    pub fn unique_origin_name(&self, hint: &str) -> anyhow::Result<String> {
        let remotes = self.load()?;
        let taken = |candidate: &str| remotes.iter().any(|remote| remote.name == candidate);

        let base = format!("{hint}-origin");
        if !taken(&base) {
            return Ok(base);
        }
        (1..=u16::MAX)
            .map(|counter| format!("{base}-{counter}"))
            .find(|candidate| !taken(candidate))
            .ok_or_else(|| anyhow::anyhow!("No free remote name for '{hint}'"))
    }

    fn save(&self, remotes: Vec<RemoteConfig>) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(&RemotesFile { remotes })
            .context("Failed to serialize remotes")?;
        write_atomic(&self.path, content.as_bytes())
    }
}

/// Remote names end up in paths, so keep them to a conservative charset.
pub fn validate_remote_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        anyhow::bail!("Remote name can't be empty");
    }
    if name.starts_with('.') || name.starts_with('-') {
        anyhow::bail!("Remote name '{name}' can't start with '{}'", &name[..1]);
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        anyhow::bail!("Remote name '{name}' can't contain '{bad}'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, RemoteStore) {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let store = RemoteStore::new(tmp.path().join("remotes.toml"));
        (tmp, store)
    }

    #[test]
    fn test_missing_file_means_no_remotes() {
        let (_tmp, store) = store();
        assert!(store.load().expect("load should succeed").is_empty());
    }

    #[test]
    fn test_order_is_priority_then_registration() {
        let (_tmp, store) = store();
        store
            .add(RemoteConfig::new("low", "file:///low").with_priority(0))
            .expect("add should succeed");
        store
            .add(RemoteConfig::new("first", "file:///a"))
            .expect("add should succeed");
        store
            .add(RemoteConfig::new("high", "file:///high").with_priority(10))
            .expect("add should succeed");
        store
            .add(RemoteConfig::new("second", "file:///b"))
            .expect("add should succeed");

        let names: Vec<String> = store
            .ordered()
            .expect("ordered should succeed")
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["high", "first", "second", "low"]);
    }

    #[test]
    fn test_add_rejects_duplicates_and_bad_names() {
        let (_tmp, store) = store();
        store
            .add(RemoteConfig::new("test", "file:///a"))
            .expect("add should succeed");
        assert!(store.add(RemoteConfig::new("test", "file:///b")).is_err());
        assert!(store.add(RemoteConfig::new("a/b", "file:///b")).is_err());
        assert!(store.add(RemoteConfig::new("", "file:///b")).is_err());
    }

    #[test]
    fn test_remove_reports_existence() {
        let (_tmp, store) = store();
        store
            .add(RemoteConfig::new("test", "file:///a"))
            .expect("add should succeed");
        assert!(store.remove("test").expect("remove should succeed"));
        assert!(!store.remove("test").expect("remove should succeed"));
    }

    #[test]
    fn test_unique_origin_names() {
        let (_tmp, store) = store();
        assert_eq!(
            store.unique_origin_name("org.example.Foo").expect("name should resolve"),
            "org.example.Foo-origin"
        );
        store
            .add(RemoteConfig::new("org.example.Foo-origin", "file:///a"))
            .expect("add should succeed");
        assert_eq!(
            store.unique_origin_name("org.example.Foo").expect("name should resolve"),
            "org.example.Foo-origin-1"
        );
    }

    #[test]
    fn test_round_trip_keeps_optional_fields() {
        let (_tmp, store) = store();
        let remote = RemoteConfig::new("signed", "https://example.org/repo")
            .with_title("Example")
            .with_signing_key("secret");
        store.add(remote.clone()).expect("add should succeed");
        let loaded = store
            .get("signed")
            .expect("get should succeed")
            .expect("remote should exist");
        assert_eq!(loaded, remote);
    }
}

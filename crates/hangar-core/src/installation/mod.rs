//! Installation handle and its read-only queries.
//!
//! Mutating lifecycle operations (install, update, uninstall, ...) live in
//! [`crate::orchestration`] as further `impl` blocks on [`Installation`].

mod resolver;

pub use resolver::InstalledRef;
pub(crate) use resolver::resolve;

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::error::{Error, Result};
use crate::monitor::ChangeMonitor;
use crate::refs::{Ref, RefKind, default_arch};
use crate::store::{LocalStore, RemoteConfig, Store};

/// A configured remote, as listed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub priority: i32,
    /// Hidden from browsing; set on remotes created for bundle origins.
    pub noenumerate: bool,
    pub signed: bool,
}

impl From<RemoteConfig> for Remote {
    fn from(config: RemoteConfig) -> Self {
        Self {
            signed: config.signing_key.is_some(),
            name: config.name,
            url: config.url,
            title: config.title,
            priority: config.priority,
            noenumerate: config.noenumerate,
        }
    }
}

/// A ref advertised by a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub reference: Ref,
    pub commit: String,
    pub remote: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSize {
    pub download_size: u64,
    pub installed_size: u64,
}

/// Handle on one installation root.
///
/// Cheap to hold for a whole session. Mutating operations never change the
/// handle itself; each one works on its own clone of the store.
#[derive(Debug, Clone)]
pub struct Installation<S: Store = LocalStore> {
    pub(crate) store: S,
}

impl Installation<LocalStore> {
    /// The system-wide installation from `config.toml` or its default.
    pub fn new_system() -> Result<Self> {
        let config = ConfigStore::from_default_location()
            .and_then(|store| store.load())
            .map_err(Error::store)?;
        Ok(Self::new_for_path(config.system_dir(), false))
    }

    /// The per-user installation from `config.toml` or its default.
    pub fn new_user() -> Result<Self> {
        let config = ConfigStore::from_default_location()
            .and_then(|store| store.load())
            .map_err(Error::store)?;
        let dir = config.user_dir().map_err(Error::store)?;
        Ok(Self::new_for_path(dir, true))
    }

    pub fn new_for_path(path: impl Into<PathBuf>, user: bool) -> Self {
        Self::from_store(LocalStore::new(path, user))
    }
}

impl<S: Store> Installation<S> {
    pub fn from_store(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_user(&self) -> bool {
        self.store.is_user()
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn default_arch() -> &'static str {
        default_arch()
    }

    pub fn get_installed_ref(
        &self,
        kind: RefKind,
        name: &str,
        arch: Option<&str>,
        branch: Option<&str>,
    ) -> Result<InstalledRef> {
        let r = Ref::compose(kind, name, branch, arch)?;
        resolve(&self.store, &r)
    }

    /// The app's current ref; `NotInstalled` when there is none or its
    /// deployment has gone.
    pub fn get_current_installed_app(&self, name: &str) -> Result<InstalledRef> {
        crate::refs::validate_name(name)?;
        let current = self
            .store
            .current_ref(name)?
            .ok_or_else(|| Error::not_installed(name, "current"))?;
        let r = Ref::decompose(&current)?;
        resolve(&self.store, &r)
    }

    pub fn list_installed_refs(&self) -> Result<Vec<InstalledRef>> {
        let mut refs = Vec::new();
        for kind in RefKind::ALL {
            refs.extend(self.list_installed_refs_by_kind(kind)?);
        }
        Ok(refs)
    }

    pub fn list_installed_refs_by_kind(&self, kind: RefKind) -> Result<Vec<InstalledRef>> {
        let mut refs = Vec::new();
        for full in self.store.list_refs(kind)? {
            let r = Ref::decompose(&full)?;
            match resolve(&self.store, &r) {
                Ok(installed) => refs.push(installed),
                // Uninstalled while we were listing.
                Err(Error::NotInstalled { .. }) => {
                    tracing::debug!(ref_name = %r, "ref vanished during listing");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(refs)
    }

    /// Remotes in descending priority, ties in registration order.
    pub fn list_remotes(&self) -> Result<Vec<Remote>> {
        let mut remotes = Vec::new();
        for name in self.store.list_remotes()? {
            if let Some(config) = self.store.remote(&name)? {
                remotes.push(Remote::from(config));
            }
        }
        Ok(remotes)
    }

    pub fn get_remote_by_name(&self, name: &str) -> Result<Remote> {
        self.store
            .remote(name)?
            .map(Remote::from)
            .ok_or_else(|| Error::not_found(format!("Remote '{name}' not found")))
    }

    pub fn list_remote_refs(&self, remote: &str, cancel: &CancellationToken) -> Result<Vec<RemoteRef>> {
        let refs = self.store.list_remote_refs(remote, cancel)?;
        Ok(refs
            .into_iter()
            .filter_map(|(full, commit)| match Ref::decompose(&full) {
                Ok(reference) => Some(RemoteRef {
                    reference,
                    commit,
                    remote: remote.to_string(),
                }),
                Err(err) => {
                    tracing::debug!(remote, "skipping remote entry {full}: {err}");
                    None
                }
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn fetch_remote_ref(
        &self,
        remote: &str,
        kind: RefKind,
        name: &str,
        arch: Option<&str>,
        branch: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RemoteRef> {
        let r = Ref::compose(kind, name, branch, arch)?;
        let refs = self.store.list_remote_refs(remote, cancel)?;
        let commit = refs
            .get(&r.to_string())
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{r} not found in remote '{remote}'")))?;
        Ok(RemoteRef {
            reference: r,
            commit,
            remote: remote.to_string(),
        })
    }

    pub fn fetch_remote_size(
        &self,
        remote: &str,
        r: &Ref,
        cancel: &CancellationToken,
    ) -> Result<RemoteSize> {
        let info = self.store.fetch_ref_cache(remote, r, cancel)?;
        Ok(RemoteSize {
            download_size: info.download_size,
            installed_size: info.installed_size,
        })
    }

    pub fn fetch_remote_metadata(
        &self,
        remote: &str,
        r: &Ref,
        cancel: &CancellationToken,
    ) -> Result<String> {
        Ok(self.store.fetch_ref_cache(remote, r, cancel)?.metadata)
    }

    pub fn load_app_overrides(&self, app_id: &str) -> Result<String> {
        self.store
            .load_override(app_id)?
            .ok_or_else(|| Error::not_found(format!("No overrides found for {app_id}")))
    }

    pub fn create_monitor(&self) -> Result<ChangeMonitor> {
        ChangeMonitor::new(self.store.changed_path()).map_err(Error::store)
    }
}

//! Store facade: object storage, remotes and deployments behind one trait.
//!
//! The lifecycle code in [`crate::installation`] only talks to [`Store`].
//! [`LocalStore`] is the filesystem-backed implementation; see its module for
//! the on-disk layout.

pub mod bundle;
mod deploy;
mod local;
pub mod lock;
mod pull;
pub mod remotes;
pub mod repo;
pub mod source;

pub use bundle::{BundleHeader, BundleReader, BundleWriter, load_bundle};
pub use local::LocalStore;
pub use lock::StoreLock;
pub use remotes::{DEFAULT_PRIORITY, RemoteConfig, RemoteStore};
pub use repo::{CommitManifest, FileEntry, ObjectRepo, Summary};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::progress::ProgressReporter;
use crate::refs::{Ref, RefKind};

/// What a deployment records about itself in `deploy.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployData {
    /// Remote the commit was pulled from; later updates come from here too.
    pub origin: String,
    pub commit: String,
    #[serde(default)]
    pub subpaths: Vec<String>,
    pub installed_size: u64,
    pub deployed_at: DateTime<Utc>,
}

/// Size and metadata of a remote ref, fetched without installing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCacheInfo {
    pub download_size: u64,
    pub installed_size: u64,
    pub metadata: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub commits_removed: usize,
    pub objects_removed: usize,
    pub bytes_freed: u64,
}

/// Everything the lifecycle orchestrator needs from storage.
///
/// `clone()` produces the per-operation working copy: a fresh handle onto the
/// same root that shares no mutable in-process state with the original.
/// None of the mutating methods are safe to run concurrently on one handle.
pub trait Store: Clone + Send + Sync + 'static {
    fn path(&self) -> &Path;
    fn is_user(&self) -> bool;
    /// Create the repository skeleton if it doesn't exist yet.
    fn ensure_repo(&self) -> Result<()>;

    // Remotes

    /// Remote names in descending priority, ties in registration order.
    fn list_remotes(&self) -> Result<Vec<String>>;
    fn remote(&self, name: &str) -> Result<Option<RemoteConfig>>;
    fn add_remote(&self, remote: RemoteConfig) -> Result<()>;
    /// Fails with `NotFound` when no such remote exists.
    fn delete_remote(&self, name: &str) -> Result<()>;
    /// Register a non-enumerated remote for a bundle's origin, returning its
    /// generated name.
    fn create_origin_remote(
        &self,
        url: Option<&str>,
        name_hint: &str,
        title: Option<&str>,
        signing_key: Option<&str>,
    ) -> Result<String>;

    // Refs and deployments

    /// Canonical strings of every deployed ref of `kind`.
    fn list_refs(&self, kind: RefKind) -> Result<Vec<String>>;
    /// Refs advertised by a remote, mapped to their head commits.
    fn list_remote_refs(
        &self,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>>;
    fn deploy_data(&self, r: &Ref) -> Result<Option<DeployData>>;
    fn deploy_dir(&self, r: &Ref) -> PathBuf;
    fn current_ref(&self, name: &str) -> Result<Option<String>>;
    fn make_current_ref(&self, r: &Ref) -> Result<()>;
    fn drop_current_ref(&self, name: &str) -> Result<()>;
    /// Newest commit of `r` pulled from `remote`, if any.
    fn read_latest(&self, remote: &str, r: &Ref) -> Result<Option<String>>;

    /// Pull `r` from `remote` and deploy it. Fails `AlreadyInstalled` if a
    /// deployment appears in the meantime.
    fn install(
        &self,
        r: &Ref,
        remote: &str,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()>;
    /// Pull and redeploy an installed ref. Returns whether a new commit was
    /// deployed.
    #[allow(clippy::too_many_arguments)]
    fn update(
        &self,
        r: &Ref,
        remote: &str,
        subpaths: &[String],
        skip_pull: bool,
        skip_deploy: bool,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<bool>;
    /// Deploy the already-pulled head of `r` from `remote`.
    fn deploy_install(&self, r: &Ref, remote: &str, subpaths: &[String]) -> Result<()>;
    /// Point the active marker at `commit`, or clear it.
    fn set_active(&self, r: &Ref, commit: Option<&str>) -> Result<()>;
    /// Remove every deployed commit of `r`, returning whether there was any.
    fn undeploy_all(&self, r: &Ref, force: bool) -> Result<bool>;
    /// Forget the tracking ref of `r` for `remote`.
    fn remove_ref(&self, remote: &str, r: &Ref) -> Result<()>;
    fn prune(&self) -> Result<PruneStats>;
    fn cleanup_removed(&self) -> Result<()>;
    fn update_exports(&self, name: &str) -> Result<()>;
    fn mark_changed(&self) -> Result<()>;
    fn changed_path(&self) -> PathBuf;
    fn lock(&self) -> Result<StoreLock>;

    fn fetch_ref_cache(
        &self,
        remote: &str,
        r: &Ref,
        cancel: &CancellationToken,
    ) -> Result<RefCacheInfo>;

    fn load_bundle(&self, path: &Path) -> Result<BundleHeader>;
    /// Import a bundle's commit and objects as the head of `r` at `remote`.
    fn pull_from_bundle(
        &self,
        file: &Path,
        remote: &str,
        r: &Ref,
        require_signature: bool,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Refresh the appstream checkout of `remote` for `arch`; returns whether
    /// anything changed.
    fn update_appstream(
        &self,
        remote: &str,
        arch: &str,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    fn load_override(&self, app_id: &str) -> Result<Option<String>>;
}

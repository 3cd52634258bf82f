//! Filesystem-backed [`Store`].
//!
//! ```text
//! <root>/repo/                          object repository
//! <root>/repo/remotes.toml              remote configuration
//! <root>/repo/refs/remotes/<remote>/..  tracking refs, one commit id per file
//! <root>/<kind>/<name>/<arch>/<branch>/ deploy dir; exists iff installed
//!     <commit>/{metadata,files/,deploy.json}
//!     active                            commit the ref runs from
//! <root>/current/<name>                 "<arch>/<branch>" of the current app
//! <root>/exports/<name>/                files/export of the current app
//! <root>/appstream/<remote>/<arch>/     appstream checkout
//! <root>/overrides/<app id>             per-app override text
//! <root>/.staging/                      deployments being assembled
//! <root>/.removed/                      undeployed commits awaiting cleanup
//! <root>/.changed                       touched on every visible change
//! <root>/lock                           advisory lock file
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::bundle::{BundleHeader, load_bundle};
use super::lock::StoreLock;
use super::remotes::{DEFAULT_PRIORITY, RemoteConfig, RemoteStore};
use super::repo::{FILES_DIR, ObjectRepo, write_atomic};
use super::source::RemoteSource;
use super::{DeployData, PruneStats, RefCacheInfo, Store};
use crate::error::{Error, Result, check_cancelled};
use crate::progress::ProgressReporter;
use crate::refs::{Ref, RefKind, validate_name};

const REPO_DIR: &str = "repo";
const REMOTES_FILE: &str = "remotes.toml";
const TRACKING_DIR: &str = "refs/remotes";
pub(super) const ACTIVE_FILE: &str = "active";
pub(super) const DEPLOY_FILE: &str = "deploy.json";
const CURRENT_DIR: &str = "current";
const EXPORT_DIR: &str = "export";
pub(super) const STAGING_DIR: &str = ".staging";
pub(super) const REMOVED_DIR: &str = ".removed";
const CHANGED_FILE: &str = ".changed";
const LOCK_FILE: &str = "lock";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    user: bool,
    pub(super) repo: ObjectRepo,
    remotes: RemoteStore,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, user: bool) -> Self {
        let root = root.into();
        let repo_dir = root.join(REPO_DIR);
        Self {
            repo: ObjectRepo::new(&repo_dir),
            remotes: RemoteStore::new(repo_dir.join(REMOTES_FILE)),
            root,
            user,
        }
    }

    pub fn repo(&self) -> &ObjectRepo {
        &self.repo
    }

    pub(super) fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub(super) fn removed_dir(&self) -> PathBuf {
        self.root.join(REMOVED_DIR)
    }

    fn current_path(&self, name: &str) -> PathBuf {
        self.root.join(CURRENT_DIR).join(name)
    }

    fn exports_dir(&self, name: &str) -> PathBuf {
        self.root.join("exports").join(name)
    }

    pub(super) fn appstream_dir(&self, remote: &str, arch: &str) -> PathBuf {
        self.root.join("appstream").join(remote).join(arch)
    }

    /// Tracking ref file for `key` (a ref string or `appstream/<arch>`).
    pub(super) fn tracking_path(&self, remote: &str, key: &str) -> PathBuf {
        let mut path = self.repo.root().join(TRACKING_DIR).join(remote);
        for part in key.split('/') {
            path.push(part);
        }
        path
    }

    pub(super) fn read_tracking(&self, remote: &str, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.tracking_path(remote, key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to read tracking ref: {}", path.display()))
            }
        }
    }

    pub(super) fn write_tracking(&self, remote: &str, key: &str, commit: &str) -> anyhow::Result<()> {
        write_atomic(&self.tracking_path(remote, key), format!("{commit}\n").as_bytes())
    }

    /// Every commit named by a tracking ref, for pruning.
    pub(super) fn tracked_commits(&self) -> anyhow::Result<Vec<String>> {
        let mut commits = Vec::new();
        collect_files(&self.repo.root().join(TRACKING_DIR), &mut |path| {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read tracking ref: {}", path.display()))?;
            commits.push(content.trim().to_string());
            Ok(())
        })?;
        Ok(commits)
    }

    pub(super) fn remote_source(&self, remote: &str) -> Result<RemoteSource> {
        let config = self
            .remotes
            .get(remote)
            .map_err(Error::store)?
            .ok_or_else(|| Error::not_found(format!("Remote '{remote}' not found")))?;
        let url = config.url.ok_or_else(|| {
            Error::transfer(anyhow::anyhow!("Remote '{remote}' has no URL to fetch from"))
        })?;
        RemoteSource::open(&url).map_err(Error::transfer)
    }

    /// Ref names one level below `<root>/<kind>/`, each of which is a
    /// `<name>/<arch>/<branch>` tree of directories.
    fn walk_deploy_dirs(&self, kind: RefKind) -> anyhow::Result<Vec<String>> {
        let mut refs = Vec::new();
        let kind_dir = self.root.join(kind.as_str());
        for name in subdirs(&kind_dir)? {
            for arch in subdirs(&kind_dir.join(&name))? {
                for branch in subdirs(&kind_dir.join(&name).join(&arch))? {
                    let full = format!("{kind}/{name}/{arch}/{branch}");
                    match Ref::decompose(&full) {
                        Ok(_) => refs.push(full),
                        Err(err) => tracing::debug!("skipping unexpected deploy dir {full}: {err}"),
                    }
                }
            }
        }
        refs.sort();
        Ok(refs)
    }

    /// Commit ids deployed anywhere in the installation.
    pub(super) fn deployed_commits(&self) -> anyhow::Result<Vec<String>> {
        let mut commits = Vec::new();
        for kind in RefKind::ALL {
            for full in self.walk_deploy_dirs(kind)? {
                let r = Ref::decompose(&full)?;
                commits.extend(super::deploy::commit_dirs(&self.deploy_dir(&r))?);
            }
        }
        Ok(commits)
    }

    fn copy_exports(&self, name: &str) -> anyhow::Result<()> {
        let dest = self.exports_dir(name);
        if dest.exists() {
            fs::remove_dir_all(&dest)
                .with_context(|| format!("Failed to clear exports: {}", dest.display()))?;
        }

        let Some(current) = self.read_current(name)? else {
            return Ok(());
        };
        let r = Ref::decompose(&current)?;
        let Some(data) = self.load_deploy_data(&r)? else {
            return Ok(());
        };
        let export = self
            .deploy_dir(&r)
            .join(&data.commit)
            .join(FILES_DIR)
            .join(EXPORT_DIR);
        if export.is_dir() {
            copy_tree(&export, &dest)?;
            tracing::debug!(app = name, "updated exports from {}", data.commit);
        }
        Ok(())
    }

    /// Refresh exports for a deployed app and notify watchers.
    fn publish_deploy(&self, r: &Ref) -> Result<()> {
        if r.is_app() {
            self.copy_exports(r.name()).map_err(Error::store)?;
        }
        self.mark_changed()
    }

    /// Point the app's current ref at `r` unless it already names a deployed
    /// branch.
    fn claim_current(&self, r: &Ref) -> Result<()> {
        let current = self.read_current(r.name()).map_err(Error::store)?;
        let current_deployed = match current {
            Some(current) => Ref::decompose(&current)
                .map(|current| self.deploy_dir(&current).exists())
                .unwrap_or(false),
            None => false,
        };
        if !current_deployed {
            self.make_current_ref(r)?;
        }
        Ok(())
    }

    fn read_current(&self, name: &str) -> anyhow::Result<Option<String>> {
        let path = self.current_path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read current ref: {}", path.display()));
            }
        };
        let Some((arch, branch)) = content.trim().split_once('/') else {
            anyhow::bail!("Malformed current ref in {}", path.display());
        };
        Ok(Some(format!("{}/{name}/{arch}/{branch}", RefKind::App)))
    }
}

impl Store for LocalStore {
    fn path(&self) -> &Path {
        &self.root
    }

    fn is_user(&self) -> bool {
        self.user
    }

    fn ensure_repo(&self) -> Result<()> {
        self.repo.ensure().map_err(Error::store)
    }

    fn list_remotes(&self) -> Result<Vec<String>> {
        let remotes = self.remotes.ordered().map_err(Error::store)?;
        Ok(remotes.into_iter().map(|remote| remote.name).collect())
    }

    fn remote(&self, name: &str) -> Result<Option<RemoteConfig>> {
        self.remotes.get(name).map_err(Error::store)
    }

    fn add_remote(&self, remote: RemoteConfig) -> Result<()> {
        if let Some(url) = &remote.url {
            RemoteSource::validate_location(url)
                .map_err(|err| Error::invalid(format!("{err:#}")))?;
        }
        self.remotes.add(remote).map_err(Error::store)
    }

    fn delete_remote(&self, name: &str) -> Result<()> {
        if !self.remotes.remove(name).map_err(Error::store)? {
            return Err(Error::not_found(format!("Remote '{name}' not found")));
        }
        let tracking = self.repo.root().join(TRACKING_DIR).join(name);
        if tracking.exists()
            && let Err(err) = fs::remove_dir_all(&tracking)
        {
            tracing::warn!(remote = name, "failed to remove tracking refs: {err}");
        }
        Ok(())
    }

    fn create_origin_remote(
        &self,
        url: Option<&str>,
        name_hint: &str,
        title: Option<&str>,
        signing_key: Option<&str>,
    ) -> Result<String> {
        let name = self
            .remotes
            .unique_origin_name(name_hint)
            .map_err(Error::store)?;
        let remote = RemoteConfig {
            name: name.clone(),
            url: url.map(str::to_string),
            title: title.map(str::to_string),
            priority: DEFAULT_PRIORITY,
            noenumerate: true,
            signing_key: signing_key.map(str::to_string),
        };
        self.remotes.add(remote).map_err(Error::store)?;
        tracing::debug!(remote = %name, "created origin remote");
        Ok(name)
    }

    fn list_refs(&self, kind: RefKind) -> Result<Vec<String>> {
        self.walk_deploy_dirs(kind).map_err(Error::store)
    }

    fn list_remote_refs(
        &self,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        check_cancelled(cancel)?;
        let source = self.remote_source(remote)?;
        let summary = source.summary().map_err(Error::transfer)?;
        Ok(summary.refs)
    }

    fn deploy_data(&self, r: &Ref) -> Result<Option<DeployData>> {
        self.load_deploy_data(r).map_err(Error::store)
    }

    fn deploy_dir(&self, r: &Ref) -> PathBuf {
        self.root.join(r.relative_path())
    }

    fn current_ref(&self, name: &str) -> Result<Option<String>> {
        self.read_current(name).map_err(Error::store)
    }

    fn make_current_ref(&self, r: &Ref) -> Result<()> {
        if !r.is_app() {
            return Err(Error::invalid(format!("Only apps can be made current, not {r}")));
        }
        let content = format!("{}/{}\n", r.arch(), r.branch());
        write_atomic(&self.current_path(r.name()), content.as_bytes()).map_err(Error::store)
    }

    fn drop_current_ref(&self, name: &str) -> Result<()> {
        let path = self.current_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::store(
                anyhow::Error::new(err)
                    .context(format!("Failed to remove current ref: {}", path.display())),
            )),
        }
    }

    fn read_latest(&self, remote: &str, r: &Ref) -> Result<Option<String>> {
        self.read_tracking(remote, &r.to_string())
            .map_err(Error::store)
    }

    fn install(
        &self,
        r: &Ref,
        remote: &str,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.deploy_dir(r).exists() {
            return Err(Error::already_installed(r.name(), r.branch()));
        }
        self.pull(r, remote, &[], progress, cancel)?;
        check_cancelled(cancel)?;
        self.deploy_install(r, remote, &[])
    }

    fn update(
        &self,
        r: &Ref,
        remote: &str,
        subpaths: &[String],
        skip_pull: bool,
        skip_deploy: bool,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let commit = if skip_pull {
            self.read_tracking(remote, &r.to_string())
                .map_err(Error::store)?
                .ok_or_else(|| Error::not_found(format!("No pulled commit of {r} from '{remote}'")))?
        } else {
            self.pull(r, remote, subpaths, progress, cancel)?
        };
        if skip_deploy {
            return Ok(false);
        }
        check_cancelled(cancel)?;
        progress.status("Deploying");
        let changed = self.deploy_update(r, remote, &commit, subpaths)?;
        if changed {
            self.publish_deploy(r)?;
        }
        Ok(changed)
    }

    fn deploy_install(&self, r: &Ref, remote: &str, subpaths: &[String]) -> Result<()> {
        let commit = self
            .read_tracking(remote, &r.to_string())
            .map_err(Error::store)?
            .ok_or_else(|| Error::not_found(format!("No pulled commit of {r} from '{remote}'")))?;
        self.deploy_new(r, remote, &commit, subpaths)?;

        // The deployment is visible from here on, so failures below only
        // leave a stale pointer or stale exports behind.
        if r.is_app()
            && let Err(err) = self.claim_current(r)
        {
            tracing::warn!(ref_name = %r, "failed to update current ref: {err}");
        }
        if let Err(err) = self.publish_deploy(r) {
            tracing::warn!(ref_name = %r, "failed to publish deployment: {err}");
        }
        Ok(())
    }

    fn set_active(&self, r: &Ref, commit: Option<&str>) -> Result<()> {
        self.write_active(r, commit).map_err(Error::store)
    }

    fn undeploy_all(&self, r: &Ref, force: bool) -> Result<bool> {
        self.undeploy(r, force).map_err(Error::store)
    }

    fn remove_ref(&self, remote: &str, r: &Ref) -> Result<()> {
        let path = self.tracking_path(remote, &r.to_string());
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::store(
                anyhow::Error::new(err)
                    .context(format!("Failed to remove tracking ref: {}", path.display())),
            )),
        }
    }

    fn prune(&self) -> Result<PruneStats> {
        self.prune_repo().map_err(Error::store)
    }

    fn cleanup_removed(&self) -> Result<()> {
        let removed = self.removed_dir();
        if !removed.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&removed)
            .with_context(|| format!("Failed to clean up {}", removed.display()))
            .map_err(Error::store)
    }

    fn update_exports(&self, name: &str) -> Result<()> {
        self.copy_exports(name).map_err(Error::store)
    }

    fn mark_changed(&self) -> Result<()> {
        let stamp = format!("{}\n", Utc::now().to_rfc3339());
        write_atomic(&self.changed_path(), stamp.as_bytes()).map_err(Error::store)
    }

    fn changed_path(&self) -> PathBuf {
        self.root.join(CHANGED_FILE)
    }

    fn lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(&self.root.join(LOCK_FILE)).map_err(Error::store)
    }

    fn fetch_ref_cache(
        &self,
        remote: &str,
        r: &Ref,
        cancel: &CancellationToken,
    ) -> Result<RefCacheInfo> {
        self.ref_cache(remote, r, cancel)
    }

    fn load_bundle(&self, path: &Path) -> Result<BundleHeader> {
        load_bundle(path).map_err(Error::store)
    }

    fn pull_from_bundle(
        &self,
        file: &Path,
        remote: &str,
        r: &Ref,
        require_signature: bool,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.import_bundle(file, remote, r, require_signature, progress, cancel)
    }

    fn update_appstream(
        &self,
        remote: &str,
        arch: &str,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.pull_appstream(remote, arch, progress, cancel)
    }

    fn load_override(&self, app_id: &str) -> Result<Option<String>> {
        validate_name(app_id)?;
        let path = self.root.join("overrides").join(app_id);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::store(
                anyhow::Error::new(err)
                    .context(format!("Failed to read overrides: {}", path.display())),
            )),
        }
    }
}

fn subdirs(dir: &Path) -> anyhow::Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn collect_files(
    dir: &Path,
    visit: &mut dyn FnMut(&Path) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, visit)?;
        } else {
            visit(&path)?;
        }
    }
    Ok(())
}

pub(super) fn copy_tree(src: &Path, dest: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;
    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(())
}

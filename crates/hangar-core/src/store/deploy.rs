//! Deploying commits into the installation and taking them out again.
//!
//! New deployments are assembled under `.staging` and renamed into place,
//! so a deploy dir is either absent or complete. Undeploy renames the whole
//! deploy dir into `.removed` before anything is deleted.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;

use super::local::{ACTIVE_FILE, DEPLOY_FILE, LocalStore};
use super::repo::{validate_digest, write_atomic};
use super::{DeployData, PruneStats, Store};
use crate::error::{Error, Result};
use crate::refs::Ref;

/// Commit directories inside a deploy dir.
pub(super) fn commit_dirs(deploy_dir: &Path) -> anyhow::Result<Vec<String>> {
    if !deploy_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut commits = Vec::new();
    for entry in fs::read_dir(deploy_dir)
        .with_context(|| format!("Failed to read deploy dir: {}", deploy_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_dir() && validate_digest(&name).is_ok() {
            commits.push(name);
        }
    }
    commits.sort();
    Ok(commits)
}

impl LocalStore {
    /// Deploy data of the active commit, falling back to the most recently
    /// deployed commit when no active marker is set.
    pub(super) fn load_deploy_data(&self, r: &Ref) -> anyhow::Result<Option<DeployData>> {
        let dir = self.deploy_dir(r);
        if !dir.is_dir() {
            return Ok(None);
        }

        if let Some(active) = read_active(&dir)? {
            let path = dir.join(&active).join(DEPLOY_FILE);
            if path.is_file() {
                return read_deploy_file(&path).map(Some);
            }
        }

        let mut newest: Option<DeployData> = None;
        for commit in commit_dirs(&dir)? {
            let path = dir.join(&commit).join(DEPLOY_FILE);
            if !path.is_file() {
                continue;
            }
            let data = read_deploy_file(&path)?;
            if newest
                .as_ref()
                .is_none_or(|current| data.deployed_at > current.deployed_at)
            {
                newest = Some(data);
            }
        }
        Ok(newest)
    }

    pub(super) fn write_active(&self, r: &Ref, commit: Option<&str>) -> anyhow::Result<()> {
        let path = self.deploy_dir(r).join(ACTIVE_FILE);
        match commit {
            Some(commit) => {
                validate_digest(commit)?;
                write_atomic(&path, format!("{commit}\n").as_bytes())
            }
            None => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err)
                    .with_context(|| format!("Failed to clear active marker: {}", path.display())),
            },
        }
    }

    /// Deploy `commit` for a ref that has no deploy dir yet.
    pub(super) fn deploy_new(
        &self,
        r: &Ref,
        origin: &str,
        commit: &str,
        subpaths: &[String],
    ) -> Result<()> {
        let dir = self.deploy_dir(r);
        if dir.exists() {
            return Err(Error::already_installed(r.name(), r.branch()));
        }

        let stage = self.stage_path(r).map_err(Error::store)?;
        let staged = self
            .stage_commit(&stage.join(commit), origin, commit, subpaths)
            .and_then(|_| write_atomic(&stage.join(ACTIVE_FILE), format!("{commit}\n").as_bytes()))
            .and_then(|_| {
                let parent = dir
                    .parent()
                    .ok_or_else(|| anyhow::anyhow!("Deploy dir has no parent: {}", dir.display()))?;
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))
            });
        if let Err(err) = staged {
            discard(&stage);
            return Err(Error::store(err));
        }

        if let Err(err) = fs::rename(&stage, &dir) {
            discard(&stage);
            // Lost a race against another installer.
            if dir.exists() {
                return Err(Error::already_installed(r.name(), r.branch()));
            }
            return Err(Error::store(
                anyhow::Error::new(err).context(format!("Failed to deploy {r}")),
            ));
        }
        tracing::info!(ref_name = %r, commit, "deployed");
        Ok(())
    }

    /// Deploy `commit` next to the existing deployment of `r` and make it
    /// active. Returns false when it already was the active commit with the
    /// same subpaths.
    pub(super) fn deploy_update(
        &self,
        r: &Ref,
        origin: &str,
        commit: &str,
        subpaths: &[String],
    ) -> Result<bool> {
        let dir = self.deploy_dir(r);
        let previous = self
            .load_deploy_data(r)
            .map_err(Error::store)?
            .ok_or_else(|| Error::not_installed(r.name(), r.branch()))?;
        if previous.commit == commit && previous.subpaths == subpaths {
            return Ok(false);
        }

        let target = dir.join(commit);
        let stage = self.stage_path(r).map_err(Error::store)?;
        // Redeploying the active commit with new subpaths replaces it in place.
        let displaced = if target.exists() {
            Some(self.removed_path(r, commit).map_err(Error::store)?)
        } else {
            None
        };

        if let Err(err) = self.stage_commit(&stage, origin, commit, subpaths) {
            discard(&stage);
            return Err(Error::store(err));
        }
        if let Some(displaced) = &displaced
            && let Err(err) = fs::rename(&target, displaced)
        {
            discard(&stage);
            return Err(Error::store(
                anyhow::Error::new(err).context(format!("Failed to move aside {}", target.display())),
            ));
        }
        if let Err(err) = fs::rename(&stage, &target) {
            discard(&stage);
            return Err(Error::store(
                anyhow::Error::new(err).context(format!("Failed to deploy {r}")),
            ));
        }
        self.write_active(r, Some(commit)).map_err(Error::store)?;

        if previous.commit != commit {
            let old = dir.join(&previous.commit);
            if old.exists() {
                let removed = self.removed_path(r, &previous.commit).map_err(Error::store)?;
                if let Err(err) = fs::rename(&old, &removed) {
                    tracing::warn!(ref_name = %r, "failed to retire commit {}: {err}", previous.commit);
                }
            }
        }
        tracing::info!(ref_name = %r, from = %previous.commit, to = commit, "updated deployment");
        Ok(true)
    }

    /// Move every commit of `r` out of sight, returning whether any existed.
    pub(super) fn undeploy(&self, r: &Ref, force: bool) -> anyhow::Result<bool> {
        let dir = self.deploy_dir(r);
        if !dir.is_dir() {
            return Ok(false);
        }
        let was_deployed = !commit_dirs(&dir)?.is_empty();

        let removed = self.removed_path(r, "all")?;
        fs::rename(&dir, &removed)
            .with_context(|| format!("Failed to undeploy {}", dir.display()))?;
        if force {
            fs::remove_dir_all(&removed)
                .with_context(|| format!("Failed to delete {}", removed.display()))?;
        }

        // Empty <arch> and <name> levels go too; anything else stays.
        let mut parent = dir.parent();
        for _ in 0..2 {
            let Some(level) = parent else { break };
            if fs::remove_dir(level).is_err() {
                break;
            }
            parent = level.parent();
        }

        tracing::debug!(ref_name = %r, was_deployed, "undeployed");
        Ok(was_deployed)
    }

    pub(super) fn prune_repo(&self) -> anyhow::Result<PruneStats> {
        let mut keep: BTreeSet<String> = self.tracked_commits()?.into_iter().collect();
        keep.extend(self.deployed_commits()?);

        let mut stats = PruneStats::default();
        let mut live_objects = BTreeSet::new();
        for commit in self.repo.list_commits()? {
            if keep.contains(&commit) {
                let manifest = self.repo.load_commit(&commit)?;
                live_objects.extend(manifest.files.into_iter().map(|f| f.object));
            } else if self.repo.remove_commit(&commit)? {
                stats.commits_removed += 1;
            }
        }
        for object in self.repo.list_objects()? {
            if !live_objects.contains(&object) {
                stats.bytes_freed += self.repo.remove_object(&object)?;
                stats.objects_removed += 1;
            }
        }
        tracing::debug!(?stats, "pruned repository");
        Ok(stats)
    }

    fn stage_commit(
        &self,
        dest: &Path,
        origin: &str,
        commit: &str,
        subpaths: &[String],
    ) -> anyhow::Result<()> {
        let manifest = self.repo.load_commit(commit)?;
        let installed_size = self.repo.checkout(&manifest, dest, subpaths)?;
        let data = DeployData {
            origin: origin.to_string(),
            commit: commit.to_string(),
            subpaths: subpaths.to_vec(),
            installed_size,
            deployed_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&data).context("Failed to serialize deploy data")?;
        write_atomic(&dest.join(DEPLOY_FILE), &bytes)
    }

    fn stage_path(&self, r: &Ref) -> anyhow::Result<PathBuf> {
        unique_child(&self.staging_dir(), r.name())
    }

    fn removed_path(&self, r: &Ref, what: &str) -> anyhow::Result<PathBuf> {
        let short = &what[..what.len().min(12)];
        unique_child(&self.removed_dir(), &format!("{}-{short}", r.name()))
    }
}

fn read_active(deploy_dir: &Path) -> anyhow::Result<Option<String>> {
    let path = deploy_dir.join(ACTIVE_FILE);
    match fs::read_to_string(&path) {
        Ok(content) => {
            let commit = content.trim().to_string();
            validate_digest(&commit)?;
            Ok(Some(commit))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn read_deploy_file(path: &Path) -> anyhow::Result<DeployData> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

/// A not-yet-existing path below `parent`, with `parent` created.
fn unique_child(parent: &Path, stem: &str) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    let base = format!(
        "{stem}.{}.{}",
        std::process::id(),
        Utc::now().timestamp_micros()
    );
    let mut candidate = parent.join(&base);
    let mut counter = 0u32;
    while candidate.exists() {
        counter += 1;
        candidate = parent.join(format!("{base}-{counter}"));
    }
    Ok(candidate)
}

fn discard(path: &Path) {
    if path.exists()
        && let Err(err) = fs::remove_dir_all(path)
    {
        tracing::warn!("failed to remove {}: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with_commit(tmp: &TempDir, r: &Ref) -> (LocalStore, String) {
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("export/share")).expect("create_dir_all should succeed");
        fs::write(src.join("export/share/foo.desktop"), "[Desktop Entry]\n")
            .expect("write should succeed");
        fs::write(src.join("app.bin"), "binary").expect("write should succeed");

        let store = LocalStore::new(tmp.path().join("root"), true);
        let commit = store
            .repo
            .commit_tree(&src, &r.to_string(), "[Application]\n", None)
            .expect("commit should succeed");
        (store, commit)
    }

    #[test]
    fn test_deploy_new_is_all_or_nothing() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let r = Ref::app("org.example.Foo", None, Some("x86_64")).expect("ref should compose");
        let (store, commit) = store_with_commit(&tmp, &r);

        store
            .deploy_new(&r, "test", &commit, &[])
            .expect("deploy should succeed");
        let data = store
            .load_deploy_data(&r)
            .expect("load should succeed")
            .expect("deploy data should exist");
        assert_eq!(data.commit, commit);
        assert_eq!(data.origin, "test");
        assert!(store.deploy_dir(&r).join(&commit).join("files/app.bin").is_file());
        assert!(
            fs::read_dir(store.staging_dir())
                .expect("staging dir should exist")
                .next()
                .is_none()
        );

        let err = store.deploy_new(&r, "test", &commit, &[]).unwrap_err();
        assert!(matches!(err, Error::AlreadyInstalled { .. }), "{err}");
    }

    #[test]
    fn test_failed_deploy_leaves_nothing_visible() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let r = Ref::app("org.example.Foo", None, Some("x86_64")).expect("ref should compose");
        let (store, commit) = store_with_commit(&tmp, &r);

        let manifest = store.repo.load_commit(&commit).expect("load should succeed");
        fs::remove_file(store.repo.object_path(&manifest.files[0].object))
            .expect("remove should succeed");

        assert!(store.deploy_new(&r, "test", &commit, &[]).is_err());
        assert!(!store.deploy_dir(&r).exists());
    }

    #[test]
    fn test_undeploy_reports_whether_anything_was_deployed() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let r = Ref::app("org.example.Foo", None, Some("x86_64")).expect("ref should compose");
        let (store, commit) = store_with_commit(&tmp, &r);
        store
            .deploy_new(&r, "test", &commit, &[])
            .expect("deploy should succeed");

        assert!(store.undeploy(&r, false).expect("undeploy should succeed"));
        assert!(!store.deploy_dir(&r).exists());
        assert!(store.removed_dir().exists());
        assert!(!store.undeploy(&r, true).expect("undeploy should succeed"));
    }

    #[test]
    fn test_prune_keeps_deployed_commits_only() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let r = Ref::app("org.example.Foo", None, Some("x86_64")).expect("ref should compose");
        let (store, commit) = store_with_commit(&tmp, &r);
        store
            .deploy_new(&r, "test", &commit, &[])
            .expect("deploy should succeed");

        let stats = store.prune_repo().expect("prune should succeed");
        assert_eq!(stats.commits_removed, 0);
        assert!(store.repo.has_commit(&commit));

        store.undeploy(&r, true).expect("undeploy should succeed");
        let stats = store.prune_repo().expect("prune should succeed");
        assert_eq!(stats.commits_removed, 1);
        assert_eq!(stats.objects_removed, 2);
        assert!(store.repo.list_objects().expect("list should succeed").is_empty());
    }
}

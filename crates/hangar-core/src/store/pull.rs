//! Moving commits and objects into the local repository.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use super::bundle::{BundleReader, verify_commit};
use super::local::LocalStore;
use super::repo::{CommitManifest, digest};
use super::{RefCacheInfo, Store};
use crate::error::{Error, Result, check_cancelled};
use crate::progress::{ProgressReporter, TransferProgress};
use crate::refs::Ref;

impl LocalStore {
    /// Pull the head of `r` advertised by `remote`, returning its commit id.
    pub(super) fn pull(
        &self,
        r: &Ref,
        remote: &str,
        subpaths: &[String],
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<String> {
        check_cancelled(cancel)?;
        let source = self.remote_source(remote)?;
        let summary = source.summary().map_err(Error::transfer)?;
        let key = r.to_string();
        let commit = summary
            .refs
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{r} not found in remote '{remote}'")))?;

        self.pull_commit(&commit, subpaths, progress, cancel, |id| source.object(id), || {
            source.commit_bytes(&commit)
        })?;
        self.write_tracking(remote, &key, &commit)
            .map_err(Error::store)?;
        tracing::debug!(ref_name = %r, remote, commit = %commit, "pulled");
        Ok(commit)
    }

    pub(super) fn ref_cache(
        &self,
        remote: &str,
        r: &Ref,
        cancel: &CancellationToken,
    ) -> Result<RefCacheInfo> {
        check_cancelled(cancel)?;
        let source = self.remote_source(remote)?;
        let summary = source.summary().map_err(Error::transfer)?;
        let commit = summary
            .refs
            .get(&r.to_string())
            .ok_or_else(|| Error::not_found(format!("{r} not found in remote '{remote}'")))?;
        let manifest = if self.repo.has_commit(commit) {
            self.repo.load_commit(commit).map_err(Error::store)?
        } else {
            let bytes = source.commit_bytes(commit).map_err(Error::transfer)?;
            parse_verified_commit(commit, &bytes)?
        };

        let download_size = unique_objects(&manifest, &[])
            .into_iter()
            .filter(|(id, _)| !self.repo.has_object(id))
            .map(|(_, size)| size)
            .sum();
        Ok(RefCacheInfo {
            download_size,
            installed_size: manifest.installed_size(),
            metadata: manifest.metadata,
        })
    }

    pub(super) fn import_bundle(
        &self,
        file: &Path,
        remote: &str,
        r: &Ref,
        require_signature: bool,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        let mut reader = BundleReader::open(file).map_err(Error::transfer)?;
        let header = reader.header().map_err(Error::transfer)?;
        if header.ref_name != r.to_string() {
            return Err(Error::transfer(anyhow::anyhow!(
                "Bundle carries {} rather than {r}",
                header.ref_name
            )));
        }
        let commit_bytes = reader.commit_bytes().map_err(Error::transfer)?;

        if require_signature {
            let key = self
                .remote(remote)?
                .and_then(|config| config.signing_key)
                .or(header.signing_key.clone())
                .ok_or_else(|| {
                    Error::transfer(anyhow::anyhow!("No signing key configured for '{remote}'"))
                })?;
            let signature = reader.signature().map_err(Error::transfer)?;
            let valid = signature.is_some_and(|sig| verify_commit(&key, &commit_bytes, &sig));
            if !valid {
                return Err(Error::transfer(anyhow::anyhow!(
                    "Bundle signature verification failed for {r}"
                )));
            }
        }

        // Zip reads need `&mut`.
        let reader = std::cell::RefCell::new(reader);
        self.pull_commit(
            &header.commit,
            &[],
            progress,
            cancel,
            |id| reader.borrow_mut().object(id),
            || Ok(commit_bytes.clone()),
        )?;
        self.write_tracking(remote, &header.ref_name, &header.commit)
            .map_err(Error::store)?;
        tracing::debug!(ref_name = %r, remote, commit = %header.commit, "imported bundle");
        Ok(())
    }

    pub(super) fn pull_appstream(
        &self,
        remote: &str,
        arch: &str,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        check_cancelled(cancel)?;
        let source = self.remote_source(remote)?;
        let summary = source.summary().map_err(Error::transfer)?;
        let commit = summary.appstream.get(arch).cloned().ok_or_else(|| {
            Error::not_found(format!("No appstream data for {arch} in remote '{remote}'"))
        })?;

        let key = format!("appstream/{arch}");
        let dest = self.appstream_dir(remote, arch);
        let tracked = self.read_tracking(remote, &key).map_err(Error::store)?;
        if tracked.as_deref() == Some(commit.as_str()) && dest.is_dir() {
            return Ok(false);
        }

        let manifest = self.pull_commit(&commit, &[], progress, cancel, |id| source.object(id), || {
            source.commit_bytes(&commit)
        })?;
        check_cancelled(cancel)?;
        self.replace_checkout(&manifest, &dest)
            .map_err(Error::store)?;
        self.write_tracking(remote, &key, &commit)
            .map_err(Error::store)?;
        tracing::info!(remote, arch, commit = %commit, "updated appstream");
        Ok(true)
    }

    /// Fetch a commit manifest and the objects it needs for `subpaths`.
    ///
    /// Objects already present are skipped. Cancellation is checked between
    /// objects; everything written up to that point stays in the repository
    /// for the next attempt.
    fn pull_commit(
        &self,
        commit: &str,
        subpaths: &[String],
        progress: &ProgressReporter,
        cancel: &CancellationToken,
        mut fetch_object: impl FnMut(&str) -> anyhow::Result<Vec<u8>>,
        fetch_commit: impl FnOnce() -> anyhow::Result<Vec<u8>>,
    ) -> Result<CommitManifest> {
        self.repo.ensure().map_err(Error::store)?;

        let mut tick = TransferProgress {
            outstanding_fetches: 1,
            outstanding_metadata_fetches: 1,
            ..TransferProgress::default()
        };
        progress.report(tick.clone());

        let manifest = if self.repo.has_commit(commit) {
            self.repo.load_commit(commit).map_err(Error::store)?
        } else {
            let bytes = fetch_commit().map_err(Error::transfer)?;
            let manifest = parse_verified_commit(commit, &bytes)?;
            self.repo
                .write_commit_bytes(commit, &bytes)
                .map_err(Error::store)?;
            manifest
        };
        tick.outstanding_metadata_fetches = 0;
        tick.metadata_fetched = 1;
        tick.scanned_metadata = 1;

        let wanted: Vec<(String, u64)> = unique_objects(&manifest, subpaths)
            .into_iter()
            .filter(|(id, _)| !self.repo.has_object(id))
            .collect();
        tick.requested = wanted.len() as u32;
        tick.outstanding_fetches = wanted.len() as u32;
        progress.report(tick.clone());

        for (id, _) in &wanted {
            check_cancelled(cancel)?;
            let bytes = fetch_object(id).map_err(Error::transfer)?;
            let actual = digest(&bytes);
            if &actual != id {
                return Err(Error::transfer(anyhow::anyhow!(
                    "Object checksum mismatch: expected {id}, got {actual}"
                )));
            }
            // The object stays outstanding until it is written.
            tick.fetched += 1;
            tick.bytes_transferred += bytes.len() as u64;
            progress.report(tick.clone());

            self.repo.write_object(id, &bytes).map_err(Error::store)?;
            tick.outstanding_fetches -= 1;
        }
        progress.report(tick.clone());
        check_cancelled(cancel)?;
        Ok(manifest)
    }

    fn replace_checkout(&self, manifest: &CommitManifest, dest: &Path) -> anyhow::Result<()> {
        let stage = self.staging_dir().join(format!(
            "appstream.{}.{}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        let result = self.repo.checkout(manifest, &stage, &[]).and_then(|_| {
            let parent = dest
                .parent()
                .ok_or_else(|| anyhow::anyhow!("No parent for {}", dest.display()))?;
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            if dest.exists() {
                fs::remove_dir_all(dest)
                    .with_context(|| format!("Failed to remove {}", dest.display()))?;
            }
            fs::rename(&stage, dest)
                .with_context(|| format!("Failed to move appstream into {}", dest.display()))
        });
        if result.is_err() && stage.exists() {
            let _ = fs::remove_dir_all(&stage);
        }
        result
    }
}

fn parse_verified_commit(id: &str, bytes: &[u8]) -> Result<CommitManifest> {
    let actual = digest(bytes);
    if actual != id {
        return Err(Error::transfer(anyhow::anyhow!(
            "Commit checksum mismatch: expected {id}, got {actual}"
        )));
    }
    serde_json::from_slice(bytes)
        .with_context(|| format!("Commit {id} is not a valid manifest"))
        .map_err(Error::transfer)
}

/// Objects needed for `subpaths`, deduplicated, with their sizes.
fn unique_objects(manifest: &CommitManifest, subpaths: &[String]) -> Vec<(String, u64)> {
    let mut objects = BTreeMap::new();
    for entry in manifest.entries_for(subpaths) {
        objects.entry(entry.object.clone()).or_insert(entry.size);
    }
    objects.into_iter().collect()
}

//! Content-addressed object repository.
//!
//! The same layout is used for the local repository inside an installation
//! and for remotes served from disk or over HTTP:
//!
//! ```text
//! objects/<2 hex>/<62 hex>   file contents, addressed by blake3 digest
//! commits/<digest>.json      commit manifests, addressed by their own bytes
//! summary.json               refs advertised by a remote
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::refs::Ref;

const OBJECTS_DIR: &str = "objects";
const COMMITS_DIR: &str = "commits";
const SUMMARY_FILE: &str = "summary.json";

/// Directory inside a checkout holding the ref's payload.
pub const FILES_DIR: &str = "files";
/// File inside a checkout holding the ref's metadata text.
pub const METADATA_FILE: &str = "metadata";

/// Hex blake3 digest of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Check that `id` looks like a digest before it is turned into a path.
pub fn validate_digest(id: &str) -> anyhow::Result<()> {
    if id.len() != 64 || !id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        anyhow::bail!("Invalid object id: {id}");
    }
    Ok(())
}

/// One file recorded in a commit, relative to the `files/` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub object: String,
    pub size: u64,
    #[serde(default)]
    pub executable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitManifest {
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl CommitManifest {
    /// Size on disk of a full checkout.
    pub fn installed_size(&self) -> u64 {
        self.metadata.len() as u64 + self.files.iter().map(|f| f.size).sum::<u64>()
    }

    /// Entries inside the given subpaths; everything when `subpaths` is empty.
    pub fn entries_for<'a>(&'a self, subpaths: &'a [String]) -> impl Iterator<Item = &'a FileEntry> {
        self.files
            .iter()
            .filter(move |entry| in_subpaths(&entry.path, subpaths))
    }
}

fn in_subpaths(path: &str, subpaths: &[String]) -> bool {
    if subpaths.is_empty() {
        return true;
    }
    subpaths.iter().any(|subpath| {
        let prefix = subpath.trim_matches('/');
        prefix.is_empty()
            || path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Refs advertised by a remote repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub refs: BTreeMap<String, String>,
    /// Appstream commit per arch.
    #[serde(default)]
    pub appstream: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ObjectRepo {
    root: PathBuf,
}

impl ObjectRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure(&self) -> anyhow::Result<()> {
        for dir in [OBJECTS_DIR, COMMITS_DIR] {
            let path = self.root.join(dir);
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create repository directory: {}", path.display()))?;
        }
        Ok(())
    }

    pub fn object_path(&self, id: &str) -> PathBuf {
        let (prefix, rest) = id.split_at(2.min(id.len()));
        self.root.join(OBJECTS_DIR).join(prefix).join(rest)
    }

    pub fn has_object(&self, id: &str) -> bool {
        validate_digest(id).is_ok() && self.object_path(id).is_file()
    }

    pub fn read_object(&self, id: &str) -> anyhow::Result<Vec<u8>> {
        validate_digest(id)?;
        let path = self.object_path(id);
        fs::read(&path).with_context(|| format!("Failed to read object: {}", path.display()))
    }

    /// Store `bytes` under `id`, refusing content that doesn't hash to it.
    pub fn write_object(&self, id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        validate_digest(id)?;
        let actual = digest(bytes);
        if actual != id {
            anyhow::bail!("Object checksum mismatch: expected {id}, got {actual}");
        }
        let path = self.object_path(id);
        if path.is_file() {
            return Ok(());
        }
        write_atomic(&path, bytes)
    }

    pub fn store_object(&self, bytes: &[u8]) -> anyhow::Result<String> {
        let id = digest(bytes);
        self.write_object(&id, bytes)?;
        Ok(id)
    }

    pub fn commit_path(&self, id: &str) -> PathBuf {
        self.root.join(COMMITS_DIR).join(format!("{id}.json"))
    }

    pub fn has_commit(&self, id: &str) -> bool {
        validate_digest(id).is_ok() && self.commit_path(id).is_file()
    }

    pub fn read_commit_bytes(&self, id: &str) -> anyhow::Result<Vec<u8>> {
        validate_digest(id)?;
        let path = self.commit_path(id);
        fs::read(&path).with_context(|| format!("Failed to read commit: {}", path.display()))
    }

    pub fn write_commit_bytes(&self, id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        validate_digest(id)?;
        let actual = digest(bytes);
        if actual != id {
            anyhow::bail!("Commit checksum mismatch: expected {id}, got {actual}");
        }
        parse_commit(bytes).with_context(|| format!("Commit {id} is not a valid manifest"))?;
        let path = self.commit_path(id);
        if path.is_file() {
            return Ok(());
        }
        write_atomic(&path, bytes)
    }

    pub fn load_commit(&self, id: &str) -> anyhow::Result<CommitManifest> {
        let bytes = self.read_commit_bytes(id)?;
        parse_commit(&bytes).with_context(|| format!("Failed to parse commit {id}"))
    }

    pub fn store_commit(&self, manifest: &CommitManifest) -> anyhow::Result<String> {
        let bytes = serde_json::to_vec_pretty(manifest).context("Failed to serialize commit")?;
        let id = digest(&bytes);
        self.write_commit_bytes(&id, &bytes)?;
        Ok(id)
    }

    pub fn list_commits(&self) -> anyhow::Result<Vec<String>> {
        let dir = self.root.join(COMMITS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json")
                && validate_digest(id).is_ok()
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn list_objects(&self) -> anyhow::Result<Vec<String>> {
        let dir = self.root.join(OBJECTS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for prefix in fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        {
            let prefix = prefix?;
            if !prefix.file_type()?.is_dir() {
                continue;
            }
            let prefix_name = prefix.file_name().to_string_lossy().to_string();
            for object in fs::read_dir(prefix.path())? {
                let object = object?;
                let id = format!("{}{}", prefix_name, object.file_name().to_string_lossy());
                if validate_digest(&id).is_ok() {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove a commit manifest, returning whether it existed.
    pub fn remove_commit(&self, id: &str) -> anyhow::Result<bool> {
        validate_digest(id)?;
        remove_file_if_exists(&self.commit_path(id)).map(|freed| freed.is_some())
    }

    /// Remove an object, returning the number of bytes freed.
    pub fn remove_object(&self, id: &str) -> anyhow::Result<u64> {
        validate_digest(id)?;
        remove_file_if_exists(&self.object_path(id)).map(|freed| freed.unwrap_or(0))
    }

    pub fn load_summary(&self) -> anyhow::Result<Summary> {
        let path = self.root.join(SUMMARY_FILE);
        if !path.exists() {
            return Ok(Summary::default());
        }
        let bytes = fs::read(&path)
            .with_context(|| format!("Failed to read summary: {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse summary: {}", path.display()))
    }

    pub fn save_summary(&self, summary: &Summary) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(summary).context("Failed to serialize summary")?;
        write_atomic(&self.root.join(SUMMARY_FILE), &bytes)
    }

    /// Record the contents of `src` as a new commit for `ref_name`.
    ///
    /// Regular files become objects; empty directories are not recorded.
    pub fn commit_tree(
        &self,
        src: &Path,
        ref_name: &str,
        metadata: &str,
        parent: Option<String>,
    ) -> anyhow::Result<String> {
        self.ensure()?;
        let mut files = Vec::new();
        self.collect_tree(src, "", &mut files)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let manifest = CommitManifest {
            ref_name: ref_name.to_string(),
            parent,
            timestamp: Utc::now(),
            metadata: metadata.to_string(),
            files,
        };
        self.store_commit(&manifest)
    }

    fn collect_tree(&self, dir: &Path, base: &str, out: &mut Vec<FileEntry>) -> anyhow::Result<()> {
        let mut entries: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read directory entries: {}", dir.display()))?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            let rel_path = if base.is_empty() {
                name
            } else {
                format!("{base}/{name}")
            };
            let ty = entry
                .file_type()
                .with_context(|| format!("Failed to stat file: {}", entry.path().display()))?;

            if ty.is_dir() {
                self.collect_tree(&entry.path(), &rel_path, out)?;
            } else if ty.is_file() {
                let content = fs::read(entry.path())
                    .with_context(|| format!("Failed to read file: {}", entry.path().display()))?;
                let object = self.store_object(&content)?;
                out.push(FileEntry {
                    path: rel_path,
                    object,
                    size: content.len() as u64,
                    executable: is_executable(&entry.path()),
                });
            } else {
                anyhow::bail!(
                    "Unsupported filesystem entry type: {}",
                    entry.path().display()
                );
            }
        }
        Ok(())
    }

    /// Commit `src` for `r` and advertise it in the summary.
    pub fn publish(&self, src: &Path, r: &Ref, metadata: &str) -> anyhow::Result<String> {
        let mut summary = self.load_summary()?;
        let key = r.to_string();
        let parent = summary.refs.get(&key).cloned();
        let commit = self.commit_tree(src, &key, metadata, parent)?;
        summary.refs.insert(key, commit.clone());
        self.save_summary(&summary)?;
        Ok(commit)
    }

    /// Commit `src` as the appstream data for `arch` and advertise it.
    pub fn publish_appstream(&self, src: &Path, arch: &str) -> anyhow::Result<String> {
        let mut summary = self.load_summary()?;
        let parent = summary.appstream.get(arch).cloned();
        let commit = self.commit_tree(src, &format!("appstream/{arch}"), "", parent)?;
        summary.appstream.insert(arch.to_string(), commit.clone());
        self.save_summary(&summary)?;
        Ok(commit)
    }

    /// Materialize `manifest` into `dest`, returning the bytes written.
    ///
    /// `dest` receives the metadata file and a `files/` tree restricted to
    /// `subpaths`. Every object must already be present.
    pub fn checkout(
        &self,
        manifest: &CommitManifest,
        dest: &Path,
        subpaths: &[String],
    ) -> anyhow::Result<u64> {
        let files_root = dest.join(FILES_DIR);
        fs::create_dir_all(&files_root)
            .with_context(|| format!("Failed to create directory: {}", files_root.display()))?;
        fs::write(dest.join(METADATA_FILE), &manifest.metadata)
            .with_context(|| format!("Failed to write metadata in {}", dest.display()))?;

        let mut written = manifest.metadata.len() as u64;
        for entry in manifest.entries_for(subpaths) {
            let rel = safe_relative_path(&entry.path)?;
            let target = files_root.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create parent directory: {}", parent.display())
                })?;
            }
            let content = self.read_object(&entry.object)?;
            fs::write(&target, &content)
                .with_context(|| format!("Failed to write file: {}", target.display()))?;
            if entry.executable {
                set_executable(&target)?;
            }
            written += content.len() as u64;
        }
        Ok(written)
    }
}

fn parse_commit(bytes: &[u8]) -> anyhow::Result<CommitManifest> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Reject absolute paths and parent traversal in manifest paths.
pub fn safe_relative_path(path: &str) -> anyhow::Result<PathBuf> {
    let candidate = Path::new(path);
    if path.is_empty() {
        anyhow::bail!("Empty path in commit manifest");
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => {}
            Component::ParentDir => {
                anyhow::bail!("Path traversal is not allowed in commits: {path}");
            }
            Component::Prefix(_) | Component::RootDir => {
                anyhow::bail!("Absolute paths are not allowed in commits: {path}");
            }
        }
    }
    Ok(candidate.to_path_buf())
}

/// Write via a sibling temp file and rename so readers never see a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(
        ".{}.{}.{:?}.tmp",
        file_name,
        std::process::id(),
        std::thread::current().id()
    ));
    fs::write(&tmp_path, bytes)
        .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("Failed to rename into place: {}", path.display()));
    }
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> anyhow::Result<Option<u64>> {
    match fs::metadata(path) {
        Ok(meta) => {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove file: {}", path.display()))?;
            Ok(Some(meta.len()))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Failed to stat file: {}", path.display())),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

#[cfg(unix)]
fn set_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to set permissions: {}", path.display()))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

//! Single-file bundles for offline installs.
//!
//! A bundle is a zip archive holding everything needed to deploy one commit:
//!
//! ```text
//! bundle.json        header: ref, commit, origin URL, title, signing key
//! commit.json        the commit manifest, byte-for-byte
//! commit.sig         optional keyed blake3 over commit.json
//! objects/<digest>   one entry per object referenced by the manifest
//! ```

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::repo::{ObjectRepo, validate_digest};

const HEADER_ENTRY: &str = "bundle.json";
const COMMIT_ENTRY: &str = "commit.json";
const SIGNATURE_ENTRY: &str = "commit.sig";
const OBJECTS_PREFIX: &str = "objects/";
const SIGNATURE_CONTEXT: &str = "hangar bundle signature v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleHeader {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub commit: String,
    /// Repository to pull later updates from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Signature data; when present the commit must carry a valid signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

/// Keyed digest of a commit manifest.
pub fn sign_commit(key: &str, commit_bytes: &[u8]) -> String {
    let derived = blake3::derive_key(SIGNATURE_CONTEXT, key.as_bytes());
    blake3::keyed_hash(&derived, commit_bytes).to_hex().to_string()
}

pub fn verify_commit(key: &str, commit_bytes: &[u8], signature: &str) -> bool {
    sign_commit(key, commit_bytes) == signature.trim()
}

/// Parse just the header of a bundle file.
pub fn load_bundle(path: &Path) -> anyhow::Result<BundleHeader> {
    BundleReader::open(path)?.header()
}

#[derive(Debug)]
pub struct BundleReader {
    path: PathBuf,
    archive: zip::ZipArchive<File>,
}

impl BundleReader {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open bundle: {}", path.display()))?;
        let archive = zip::ZipArchive::new(file)
            .with_context(|| format!("Failed to read bundle as zip archive: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    pub fn header(&mut self) -> anyhow::Result<BundleHeader> {
        let bytes = self.require(HEADER_ENTRY)?;
        let header: BundleHeader = serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid bundle header in {}", self.path.display()))?;
        validate_digest(&header.commit)?;
        Ok(header)
    }

    pub fn commit_bytes(&mut self) -> anyhow::Result<Vec<u8>> {
        self.require(COMMIT_ENTRY)
    }

    pub fn signature(&mut self) -> anyhow::Result<Option<String>> {
        Ok(self
            .entry(SIGNATURE_ENTRY)?
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()))
    }

    pub fn object(&mut self, id: &str) -> anyhow::Result<Vec<u8>> {
        validate_digest(id)?;
        self.require(&format!("{OBJECTS_PREFIX}{id}"))
    }

    fn require(&mut self, name: &str) -> anyhow::Result<Vec<u8>> {
        self.entry(name)?.ok_or_else(|| {
            anyhow::anyhow!("Invalid bundle: missing {} in {}", name, self.path.display())
        })
    }

    fn entry(&mut self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read bundle entry {name}"));
            }
        };
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read bundle entry {name}"))?;
        Ok(Some(buffer))
    }
}

/// Packs a repository commit into a bundle file.
#[derive(Debug, Clone, Default)]
pub struct BundleWriter {
    origin: Option<String>,
    title: Option<String>,
    signing_key: Option<String>,
}

impl BundleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = Some(key.into());
        self
    }

    pub fn write(&self, repo: &ObjectRepo, commit: &str, dest: &Path) -> anyhow::Result<BundleHeader> {
        let commit_bytes = repo.read_commit_bytes(commit)?;
        let manifest = repo.load_commit(commit)?;
        let header = BundleHeader {
            ref_name: manifest.ref_name.clone(),
            commit: commit.to_string(),
            origin: self.origin.clone(),
            title: self.title.clone(),
            signing_key: self.signing_key.clone(),
        };

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let file = File::create(dest)
            .with_context(|| format!("Failed to create bundle: {}", dest.display()))?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        let header_bytes =
            serde_json::to_vec_pretty(&header).context("Failed to serialize bundle header")?;
        zip.start_file(HEADER_ENTRY, options)?;
        zip.write_all(&header_bytes)?;

        zip.start_file(COMMIT_ENTRY, options)?;
        zip.write_all(&commit_bytes)?;

        if let Some(key) = &self.signing_key {
            zip.start_file(SIGNATURE_ENTRY, options)?;
            zip.write_all(sign_commit(key, &commit_bytes).as_bytes())?;
        }

        let objects: BTreeSet<&str> = manifest.files.iter().map(|f| f.object.as_str()).collect();
        for id in objects {
            let content = repo.read_object(id)?;
            zip.start_file(format!("{OBJECTS_PREFIX}{id}"), options)?;
            zip.write_all(&content)?;
        }

        zip.finish()
            .with_context(|| format!("Failed to finalize bundle: {}", dest.display()))?;
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn published_repo(tmp: &TempDir) -> (ObjectRepo, String) {
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("bin")).expect("create_dir_all should succeed");
        std::fs::write(src.join("bin/app"), "binary").expect("write should succeed");
        let repo = ObjectRepo::new(tmp.path().join("repo"));
        let commit = repo
            .commit_tree(&src, "app/org.example.Foo/x86_64/master", "[Application]\n", None)
            .expect("commit should succeed");
        (repo, commit)
    }

    #[test]
    fn test_written_bundle_reads_back() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (repo, commit) = published_repo(&tmp);
        let path = tmp.path().join("foo.bundle");

        BundleWriter::new()
            .with_origin("https://example.org/repo")
            .write(&repo, &commit, &path)
            .expect("write should succeed");

        let header = load_bundle(&path).expect("header should load");
        assert_eq!(header.ref_name, "app/org.example.Foo/x86_64/master");
        assert_eq!(header.commit, commit);
        assert_eq!(header.origin.as_deref(), Some("https://example.org/repo"));
        assert!(header.signing_key.is_none());

        let mut reader = BundleReader::open(&path).expect("open should succeed");
        assert_eq!(
            reader.commit_bytes().expect("commit should read"),
            repo.read_commit_bytes(&commit).expect("commit should exist")
        );
        assert!(reader.signature().expect("signature lookup should succeed").is_none());
    }

    #[test]
    fn test_signed_bundle_verifies() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (repo, commit) = published_repo(&tmp);
        let path = tmp.path().join("signed.bundle");

        BundleWriter::new()
            .with_signing_key("key material")
            .write(&repo, &commit, &path)
            .expect("write should succeed");

        let mut reader = BundleReader::open(&path).expect("open should succeed");
        let bytes = reader.commit_bytes().expect("commit should read");
        let signature = reader
            .signature()
            .expect("signature lookup should succeed")
            .expect("signature should exist");
        assert!(verify_commit("key material", &bytes, &signature));
        assert!(!verify_commit("other key", &bytes, &signature));
    }

    #[test]
    fn test_non_zip_is_rejected() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let path = tmp.path().join("junk.bundle");
        std::fs::write(&path, "not a zip").expect("write should succeed");
        assert!(load_bundle(&path).is_err());
    }
}

//! Read access to a remote repository, on disk or over HTTP.

use std::path::PathBuf;

use anyhow::Context;
use url::Url;

use super::repo::{ObjectRepo, Summary, validate_digest};

/// Where a remote's objects come from.
#[derive(Debug)]
pub enum RemoteSource {
    Local(ObjectRepo),
    Http {
        base: Url,
        client: reqwest::blocking::Client,
    },
}

impl RemoteSource {
    /// Open the repository behind a remote URL.
    ///
    /// Accepts `file://` URLs, `http(s)://` URLs, and plain filesystem paths.
    pub fn open(location: &str) -> anyhow::Result<Self> {
        match Url::parse(location) {
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| anyhow::anyhow!("Invalid file URL: {location}"))?;
                Ok(Self::local(path))
            }
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let mut base = url;
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                let client = reqwest::blocking::Client::builder()
                    .user_agent(concat!("hangar/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .context("Failed to build HTTP client")?;
                Ok(Self::Http { base, client })
            }
            Ok(url) => anyhow::bail!("Unsupported remote URL scheme '{}'", url.scheme()),
            Err(_) => Ok(Self::local(PathBuf::from(location))),
        }
    }

    /// Check a location without opening it.
    pub fn validate_location(location: &str) -> anyhow::Result<()> {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "file" | "http" | "https") => Ok(()),
            Ok(url) => anyhow::bail!("Unsupported remote URL scheme '{}'", url.scheme()),
            Err(_) if location.is_empty() => anyhow::bail!("Remote URL can't be empty"),
            Err(_) => Ok(()),
        }
    }

    fn local(path: PathBuf) -> Self {
        Self::Local(ObjectRepo::new(path))
    }

    pub fn summary(&self) -> anyhow::Result<Summary> {
        match self {
            Self::Local(repo) => {
                if !repo.root().is_dir() {
                    anyhow::bail!("Remote repository not found: {}", repo.root().display());
                }
                repo.load_summary()
            }
            Self::Http { .. } => {
                let bytes = self.http_get("summary.json")?;
                serde_json::from_slice(&bytes).context("Failed to parse remote summary")
            }
        }
    }

    pub fn commit_bytes(&self, id: &str) -> anyhow::Result<Vec<u8>> {
        validate_digest(id)?;
        match self {
            Self::Local(repo) => repo.read_commit_bytes(id),
            Self::Http { .. } => self.http_get(&format!("commits/{id}.json")),
        }
    }

    pub fn object(&self, id: &str) -> anyhow::Result<Vec<u8>> {
        validate_digest(id)?;
        match self {
            Self::Local(repo) => repo.read_object(id),
            Self::Http { .. } => self.http_get(&format!("objects/{}/{}", &id[..2], &id[2..])),
        }
    }

    fn http_get(&self, relative: &str) -> anyhow::Result<Vec<u8>> {
        let Self::Http { base, client } = self else {
            anyhow::bail!("Not an HTTP remote");
        };
        let url = base
            .join(relative)
            .with_context(|| format!("Invalid remote path: {relative}"))?;
        let response = client
            .get(url.clone())
            .send()
            .with_context(|| format!("Failed to fetch {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("Failed to fetch {}: HTTP {}", url, response.status());
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read response body from {url}"))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_distinguishes_schemes() {
        assert!(matches!(
            RemoteSource::open("file:///srv/repo").expect("file url should open"),
            RemoteSource::Local(_)
        ));
        assert!(matches!(
            RemoteSource::open("/srv/repo").expect("plain path should open"),
            RemoteSource::Local(_)
        ));
        match RemoteSource::open("https://example.org/repo").expect("http url should open") {
            RemoteSource::Http { base, .. } => assert_eq!(base.as_str(), "https://example.org/repo/"),
            other => panic!("expected http source, got {other:?}"),
        }
        assert!(RemoteSource::open("ftp://example.org/repo").is_err());
        assert!(RemoteSource::validate_location("ftp://example.org/repo").is_err());
        assert!(RemoteSource::validate_location("").is_err());
        assert!(RemoteSource::validate_location("https://example.org/repo").is_ok());
    }

    #[test]
    fn test_missing_local_repo_fails_summary() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let source = RemoteSource::open(&tmp.path().join("missing").to_string_lossy())
            .expect("open should succeed");
        assert!(source.summary().is_err());
    }
}

//! Assembling [`InstalledRef`] snapshots from deployment state.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::refs::Ref;
use crate::store::Store;

/// Snapshot of one installed ref; rebuilt on every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRef {
    pub reference: Ref,
    /// Commit the deployment runs from.
    pub commit: String,
    /// Newest commit known from `origin`; absent when it couldn't be read.
    pub latest_commit: Option<String>,
    pub origin: String,
    pub subpaths: Vec<String>,
    pub deploy_path: PathBuf,
    pub installed_size: u64,
    /// The app-wide current pointer names this ref. Always false for runtimes.
    pub is_current: bool,
}

impl InstalledRef {
    pub fn name(&self) -> &str {
        self.reference.name()
    }

    pub fn branch(&self) -> &str {
        self.reference.branch()
    }

    /// A newer commit than the deployed one has been pulled.
    pub fn has_pending_update(&self) -> bool {
        self.latest_commit
            .as_deref()
            .is_some_and(|latest| latest != self.commit)
    }
}

pub(crate) fn resolve<S: Store>(store: &S, r: &Ref) -> Result<InstalledRef> {
    let data = store
        .deploy_data(r)?
        .ok_or_else(|| Error::not_installed(r.name(), r.branch()))?;
    let deploy_path = store.deploy_dir(r).join(&data.commit);

    let is_current = r.is_app()
        && store
            .current_ref(r.name())?
            .is_some_and(|current| current == r.to_string());

    let latest_commit = match store.read_latest(&data.origin, r) {
        Ok(latest) => latest,
        Err(err) => {
            tracing::warn!(ref_name = %r, origin = %data.origin, "failed to read latest commit: {err}");
            None
        }
    };

    Ok(InstalledRef {
        reference: r.clone(),
        commit: data.commit,
        latest_commit,
        origin: data.origin,
        subpaths: data.subpaths,
        deploy_path,
        installed_size: data.installed_size,
        is_current,
    })
}

//! Updating installed refs and finding which ones have updates.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use super::context::OperationContext;
use crate::error::{Error, Result, check_cancelled};
use crate::installation::{Installation, InstalledRef, resolve};
use crate::progress::ProgressSink;
use crate::refs::{Ref, RefKind};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateFlags {
    /// Deploy what was pulled earlier instead of contacting the remote.
    pub no_pull: bool,
    /// Pull only; leave the deployment alone.
    pub no_deploy: bool,
}

impl<S: Store> Installation<S> {
    /// Bring an installed ref up to date with its origin.
    ///
    /// Returns the unchanged ref when there is nothing new.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        flags: UpdateFlags,
        kind: RefKind,
        name: &str,
        arch: Option<&str>,
        branch: Option<&str>,
        progress: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<InstalledRef> {
        let r = Ref::compose(kind, name, branch, arch)?;
        if !self.store.deploy_dir(&r).exists() {
            return Err(Error::not_installed(r.name(), r.branch()));
        }
        let data = self
            .store
            .deploy_data(&r)?
            .ok_or_else(|| Error::not_installed(r.name(), r.branch()))?;

        let ctx = OperationContext::new(&self.store)?;
        let target = r.clone();
        let origin = data.origin.clone();
        let subpaths = data.subpaths.clone();
        let changed = ctx.transfer(progress, cancel, move |store, reporter, cancel| {
            store.update(
                &target,
                &origin,
                &subpaths,
                flags.no_pull,
                flags.no_deploy,
                &reporter,
                &cancel,
            )
        })?;

        if changed {
            tracing::info!(ref_name = %r, origin = %data.origin, "updated");
        } else {
            tracing::debug!(ref_name = %r, "already up to date");
        }
        resolve(ctx.store(), &r)
    }

    /// Installed refs whose origin advertises a commit other than the newest
    /// one pulled from it.
    ///
    /// A remote that can't be listed is skipped, so refs from unreachable
    /// origins never show up here.
    pub fn list_installed_refs_for_update(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<InstalledRef>> {
        let mut heads: HashMap<(String, String), String> = HashMap::new();
        for remote in self.store.list_remotes()? {
            check_cancelled(cancel)?;
            match self.store.list_remote_refs(&remote, cancel) {
                Ok(refs) => {
                    for (full_ref, commit) in refs {
                        heads.insert((remote.clone(), full_ref), commit);
                    }
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::warn!(remote = %remote, "skipping remote while checking for updates: {err}");
                }
            }
        }

        let installed = self.list_installed_refs()?;
        Ok(installed
            .into_iter()
            .filter(|installed| {
                let key = (installed.origin.clone(), installed.reference.to_string());
                heads
                    .get(&key)
                    .is_some_and(|head| installed.latest_commit.as_deref() != Some(head.as_str()))
            })
            .collect())
    }
}

//! Installing from a remote or from a bundle file.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use super::context::OperationContext;
use crate::error::{Error, Result, check_cancelled};
use crate::installation::{Installation, InstalledRef, resolve};
use crate::progress::ProgressSink;
use crate::refs::{Ref, RefKind};
use crate::store::Store;

impl<S: Store> Installation<S> {
    /// Pull `kind/name/arch/branch` from `remote` and deploy it.
    ///
    /// Never overwrites: an existing deployment fails with `AlreadyInstalled`.
    #[allow(clippy::too_many_arguments)]
    pub fn install(
        &self,
        remote: &str,
        kind: RefKind,
        name: &str,
        arch: Option<&str>,
        branch: Option<&str>,
        progress: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<InstalledRef> {
        let r = Ref::compose(kind, name, branch, arch)?;
        if self.store.deploy_dir(&r).exists() {
            return Err(Error::already_installed(r.name(), r.branch()));
        }

        let ctx = OperationContext::new(&self.store)?;
        let target = r.clone();
        let remote_name = remote.to_string();
        ctx.transfer(progress, cancel, move |store, reporter, cancel| {
            store.install(&target, &remote_name, &reporter, &cancel)
        })?;

        tracing::info!(ref_name = %r, remote, "installed");
        resolve(ctx.store(), &r)
    }

    /// Install the ref carried by a bundle file.
    ///
    /// A hidden remote pointing at the bundle's origin is created for later
    /// updates; it is removed again if anything after its creation fails.
    pub fn install_bundle(
        &self,
        file: &Path,
        progress: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<InstalledRef> {
        let header = self.store.load_bundle(file)?;
        let r = Ref::decompose(&header.ref_name)?;
        if self.store.deploy_dir(&r).exists() {
            return Err(Error::already_installed(r.name(), r.branch()));
        }

        let remote = self.store.create_origin_remote(
            header.origin.as_deref(),
            r.name(),
            header.title.as_deref(),
            header.signing_key.as_deref(),
        )?;
        let guard = OriginRemoteGuard::new(&self.store, &remote);

        let ctx = OperationContext::new(&self.store)?;
        let target = r.clone();
        let remote_name = remote.clone();
        let bundle = file.to_path_buf();
        let require_signature = header.signing_key.is_some();
        ctx.transfer(progress, cancel, move |store, reporter, cancel| {
            store.ensure_repo()?;
            store.pull_from_bundle(
                &bundle,
                &remote_name,
                &target,
                require_signature,
                &reporter,
                &cancel,
            )?;
            check_cancelled(&cancel)?;
            reporter.status("Deploying");
            store.deploy_install(&target, &remote_name, &[])
        })?;
        guard.disarm();

        tracing::info!(ref_name = %r, remote = %remote, "installed bundle");
        resolve(ctx.store(), &r)
    }
}

/// Deletes a freshly created origin remote unless disarmed.
struct OriginRemoteGuard<'a, S: Store> {
    store: &'a S,
    remote: Option<String>,
}

impl<'a, S: Store> OriginRemoteGuard<'a, S> {
    fn new(store: &'a S, remote: &str) -> Self {
        Self {
            store,
            remote: Some(remote.to_string()),
        }
    }

    fn disarm(mut self) {
        self.remote = None;
    }
}

impl<S: Store> Drop for OriginRemoteGuard<'_, S> {
    fn drop(&mut self) {
        let Some(remote) = self.remote.take() else {
            return;
        };
        tracing::debug!(remote = %remote, "removing origin remote of failed bundle install");
        if let Err(err) = self.store.delete_remote(&remote) {
            tracing::warn!(remote = %remote, "failed to remove origin remote: {err}");
        }
    }
}

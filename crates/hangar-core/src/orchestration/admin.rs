//! Remote management, the current-app switch and appstream refresh.

use tokio_util::sync::CancellationToken;

use super::context::OperationContext;
use crate::error::{Error, Result};
use crate::installation::Installation;
use crate::refs::{Ref, default_arch};
use crate::store::{RemoteConfig, Store};

impl<S: Store> Installation<S> {
    pub fn add_remote(&self, remote: RemoteConfig) -> Result<()> {
        let name = remote.name.clone();
        self.store.add_remote(remote)?;
        self.store.mark_changed()?;
        tracing::info!(remote = %name, "added remote");
        Ok(())
    }

    /// Delete a remote. Refuses while installed refs still come from it
    /// unless `force` is set.
    pub fn remove_remote(&self, name: &str, force: bool) -> Result<()> {
        if self.store.remote(name)?.is_none() {
            return Err(Error::not_found(format!("Remote '{name}' not found")));
        }
        if !force {
            let users: Vec<String> = self
                .list_installed_refs()?
                .into_iter()
                .filter(|installed| installed.origin == name)
                .map(|installed| installed.reference.to_string())
                .collect();
            if !users.is_empty() {
                return Err(Error::store(anyhow::anyhow!(
                    "Remote '{name}' is in use by: {}",
                    users.join(", ")
                )));
            }
        }
        self.store.delete_remote(name)?;
        self.store.mark_changed()?;
        tracing::info!(remote = name, "removed remote");
        Ok(())
    }

    /// Make an installed branch the one that runs by default.
    pub fn make_current_app(
        &self,
        name: &str,
        arch: Option<&str>,
        branch: Option<&str>,
    ) -> Result<()> {
        let r = Ref::app(name, branch, arch)?;
        if !self.store.deploy_dir(&r).exists() {
            return Err(Error::not_installed(r.name(), r.branch()));
        }
        let store = self.store.clone();
        store.make_current_ref(&r)?;
        store.update_exports(r.name())?;
        store.mark_changed()?;
        tracing::info!(ref_name = %r, "made current");
        Ok(())
    }

    /// Refresh appstream data from `remote` for `arch` (host arch by
    /// default). Returns whether anything changed.
    pub fn update_appstream(
        &self,
        remote: &str,
        arch: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let arch = arch.unwrap_or_else(|| default_arch()).to_string();
        crate::refs::validate_arch(&arch)?;

        let ctx = OperationContext::new(&self.store)?;
        let remote_name = remote.to_string();
        let changed = ctx.transfer(None, cancel, move |store, reporter, cancel| {
            store.update_appstream(&remote_name, &arch, &reporter, &cancel)
        })?;
        if changed {
            ctx.store().mark_changed()?;
        }
        Ok(changed)
    }
}

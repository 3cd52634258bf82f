//! Removing an installed ref.

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, check_cancelled};
use crate::installation::Installation;
use crate::progress::ProgressSink;
use crate::refs::{Ref, RefKind};
use crate::store::Store;

impl<S: Store> Installation<S> {
    /// Undeploy every commit of a ref and forget where it came from.
    ///
    /// The index changes (active marker, current pointer, deployment, tracking
    /// ref) happen under the installation lock. Garbage collection and the
    /// export refresh run after it is released.
    pub fn uninstall(
        &self,
        kind: RefKind,
        name: &str,
        arch: Option<&str>,
        branch: Option<&str>,
        mut progress: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let r = Ref::compose(kind, name, branch, arch)?;
        check_cancelled(cancel)?;
        let store = self.store.clone();

        let lock = store.lock()?;
        if !store.deploy_dir(&r).exists() {
            return Err(Error::not_installed(r.name(), r.branch()));
        }
        report(&mut progress, "Removing deployment", 0);
        let origin = store
            .deploy_data(&r)?
            .ok_or_else(|| Error::not_installed(r.name(), r.branch()))?
            .origin;
        check_cancelled(cancel)?;

        tracing::debug!(ref_name = %r, "dropping active ref");
        store.set_active(&r, None)?;

        if r.is_app() && store.current_ref(r.name())?.as_deref() == Some(r.to_string().as_str()) {
            tracing::debug!(ref_name = %r, "dropping current ref");
            store.drop_current_ref(r.name())?;
        }

        let was_deployed = store.undeploy_all(&r, false)?;
        store.remove_ref(&origin, &r)?;
        drop(lock);

        report(&mut progress, "Cleaning up", 50);
        if let Err(err) = store.prune() {
            tracing::warn!("failed to prune repository: {err}");
        }
        if let Err(err) = store.cleanup_removed() {
            tracing::debug!("failed to clean up removed deployments: {err}");
        }
        if r.is_app() {
            store.update_exports(r.name())?;
        }
        store.mark_changed()?;

        if !was_deployed {
            return Err(Error::not_installed(r.name(), r.branch()));
        }
        report(&mut progress, "Uninstalled", 100);
        tracing::info!(ref_name = %r, origin = %origin, "uninstalled");
        Ok(())
    }
}

fn report(sink: &mut Option<&mut dyn ProgressSink>, status: &str, percent: u32) {
    if let Some(sink) = sink.as_deref_mut() {
        sink.on_progress(status, percent, false);
    }
}

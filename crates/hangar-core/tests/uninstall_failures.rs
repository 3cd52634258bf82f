mod support;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use hangar_core::prelude::*;
use hangar_core::progress::ProgressReporter;
use hangar_core::store::{BundleHeader, DeployData, PruneStats, RefCacheInfo, StoreLock};
use support::{ARCH, FOO, Fixture, app, default_files};

#[derive(Debug, Clone, Copy)]
enum Undeploy {
    ReportsNothing,
    Fails,
}

/// A [`LocalStore`] whose `undeploy_all` misbehaves.
#[derive(Debug, Clone)]
struct FaultyStore {
    inner: LocalStore,
    undeploy: Undeploy,
}

impl Store for FaultyStore {
    fn path(&self) -> &Path {
        self.inner.path()
    }
    fn is_user(&self) -> bool {
        self.inner.is_user()
    }
    fn ensure_repo(&self) -> Result<()> {
        self.inner.ensure_repo()
    }
    fn list_remotes(&self) -> Result<Vec<String>> {
        self.inner.list_remotes()
    }
    fn remote(&self, name: &str) -> Result<Option<RemoteConfig>> {
        self.inner.remote(name)
    }
    fn add_remote(&self, remote: RemoteConfig) -> Result<()> {
        self.inner.add_remote(remote)
    }
    fn delete_remote(&self, name: &str) -> Result<()> {
        self.inner.delete_remote(name)
    }
    fn create_origin_remote(
        &self,
        url: Option<&str>,
        name_hint: &str,
        title: Option<&str>,
        signing_key: Option<&str>,
    ) -> Result<String> {
        self.inner.create_origin_remote(url, name_hint, title, signing_key)
    }
    fn list_refs(&self, kind: RefKind) -> Result<Vec<String>> {
        self.inner.list_refs(kind)
    }
    fn list_remote_refs(
        &self,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        self.inner.list_remote_refs(remote, cancel)
    }
    fn deploy_data(&self, r: &Ref) -> Result<Option<DeployData>> {
        self.inner.deploy_data(r)
    }
    fn deploy_dir(&self, r: &Ref) -> PathBuf {
        self.inner.deploy_dir(r)
    }
    fn current_ref(&self, name: &str) -> Result<Option<String>> {
        self.inner.current_ref(name)
    }
    fn make_current_ref(&self, r: &Ref) -> Result<()> {
        self.inner.make_current_ref(r)
    }
    fn drop_current_ref(&self, name: &str) -> Result<()> {
        self.inner.drop_current_ref(name)
    }
    fn read_latest(&self, remote: &str, r: &Ref) -> Result<Option<String>> {
        self.inner.read_latest(remote, r)
    }
    fn install(
        &self,
        r: &Ref,
        remote: &str,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inner.install(r, remote, progress, cancel)
    }
    fn update(
        &self,
        r: &Ref,
        remote: &str,
        subpaths: &[String],
        skip_pull: bool,
        skip_deploy: bool,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.inner
            .update(r, remote, subpaths, skip_pull, skip_deploy, progress, cancel)
    }
    fn deploy_install(&self, r: &Ref, remote: &str, subpaths: &[String]) -> Result<()> {
        self.inner.deploy_install(r, remote, subpaths)
    }
    fn set_active(&self, r: &Ref, commit: Option<&str>) -> Result<()> {
        self.inner.set_active(r, commit)
    }
    fn undeploy_all(&self, _r: &Ref, _force: bool) -> Result<bool> {
        match self.undeploy {
            Undeploy::ReportsNothing => Ok(false),
            Undeploy::Fails => Err(Error::store(anyhow::anyhow!("disk on fire"))),
        }
    }
    fn remove_ref(&self, remote: &str, r: &Ref) -> Result<()> {
        self.inner.remove_ref(remote, r)
    }
    fn prune(&self) -> Result<PruneStats> {
        self.inner.prune()
    }
    fn cleanup_removed(&self) -> Result<()> {
        self.inner.cleanup_removed()
    }
    fn update_exports(&self, name: &str) -> Result<()> {
        self.inner.update_exports(name)
    }
    fn mark_changed(&self) -> Result<()> {
        self.inner.mark_changed()
    }
    fn changed_path(&self) -> PathBuf {
        self.inner.changed_path()
    }
    fn lock(&self) -> Result<StoreLock> {
        self.inner.lock()
    }
    fn fetch_ref_cache(
        &self,
        remote: &str,
        r: &Ref,
        cancel: &CancellationToken,
    ) -> Result<RefCacheInfo> {
        self.inner.fetch_ref_cache(remote, r, cancel)
    }
    fn load_bundle(&self, path: &Path) -> Result<BundleHeader> {
        self.inner.load_bundle(path)
    }
    fn pull_from_bundle(
        &self,
        file: &Path,
        remote: &str,
        r: &Ref,
        require_signature: bool,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inner
            .pull_from_bundle(file, remote, r, require_signature, progress, cancel)
    }
    fn update_appstream(
        &self,
        remote: &str,
        arch: &str,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.inner.update_appstream(remote, arch, progress, cancel)
    }
    fn load_override(&self, app_id: &str) -> Result<Option<String>> {
        self.inner.load_override(app_id)
    }
}

fn installed_fixture() -> Fixture {
    let fx = Fixture::new();
    fx.add_remote("origin");
    fx.publish("origin", &app(FOO, "stable"), &default_files());
    fx.install_app("origin", FOO, "stable");
    fx
}

fn faulty(fx: &Fixture, undeploy: Undeploy) -> Installation<FaultyStore> {
    Installation::from_store(FaultyStore {
        inner: fx.installation.store().clone(),
        undeploy,
    })
}

fn uninstall_foo<S: Store>(
    installation: &Installation<S>,
    progress: Option<&mut dyn ProgressSink>,
) -> Result<()> {
    installation.uninstall(
        RefKind::App,
        FOO,
        Some(ARCH),
        Some("stable"),
        progress,
        &CancellationToken::new(),
    )
}

/// Whether another thread can take the installation lock within a few seconds.
fn lock_is_free(store: &LocalStore) -> bool {
    let store = store.clone();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let acquired = store.lock().is_ok();
        let _ = tx.send(acquired);
    });
    rx.recv_timeout(Duration::from_secs(5)).unwrap_or(false)
}

#[test]
fn uninstall_reports_not_installed_when_nothing_was_undeployed() {
    let fx = installed_fixture();
    let installation = faulty(&fx, Undeploy::ReportsNothing);

    let err = uninstall_foo(&installation, None).expect_err("uninstall should fail");
    assert!(matches!(err, Error::NotInstalled { .. }));
    assert!(lock_is_free(fx.installation.store()));
}

#[test]
fn uninstall_releases_lock_when_undeploy_fails() {
    let fx = installed_fixture();
    let installation = faulty(&fx, Undeploy::Fails);

    let err = uninstall_foo(&installation, None).expect_err("uninstall should fail");
    assert!(matches!(err, Error::StoreFailure(_)));
    assert!(lock_is_free(fx.installation.store()));

    // The real store can still finish the job.
    uninstall_foo(&fx.installation, None).expect("uninstall should succeed");
}

#[test]
fn uninstall_of_missing_ref_reports_no_progress() {
    let fx = Fixture::new();
    let mut seen = Vec::new();
    let mut sink = |status: &str, _percent: u32, _estimating: bool| seen.push(status.to_string());

    let err = uninstall_foo(&fx.installation, Some(&mut sink)).expect_err("uninstall should fail");
    assert!(matches!(err, Error::NotInstalled { .. }));
    assert!(seen.is_empty());
    assert!(lock_is_free(fx.installation.store()));
}

mod support;

use std::fs;

use hangar_core::prelude::*;
use support::{ARCH, FOO, Fixture, app, default_files};

#[test]
fn fresh_installation_is_empty() {
    let fx = Fixture::new();

    let installed = fx
        .installation
        .list_installed_refs()
        .expect("list_installed_refs should succeed");
    assert!(installed.is_empty());
    assert!(fx.installation.list_remotes().expect("list_remotes should succeed").is_empty());

    let err = fx
        .installation
        .get_current_installed_app(FOO)
        .expect_err("nothing is current");
    assert!(matches!(err, Error::NotInstalled { .. }));
}

#[test]
fn install_resolves_deployment() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    let commit = fx.publish("origin", &app(FOO, "stable"), &default_files());

    let installed = fx.install_app("origin", FOO, "stable");
    assert_eq!(installed.commit, commit);
    assert_eq!(installed.latest_commit.as_deref(), Some(commit.as_str()));
    assert_eq!(installed.origin, "origin");
    assert!(installed.is_current);
    assert!(!installed.has_pending_update());
    assert!(installed.deploy_path.join("files/bin/foo").is_file());
    assert!(installed.installed_size > 0);

    let current = fx
        .installation
        .get_current_installed_app(FOO)
        .expect("current app should resolve");
    assert_eq!(current, installed);

    let exported = fx
        .root()
        .join("exports")
        .join(FOO)
        .join("share/applications/org.example.Foo.desktop");
    assert!(exported.is_file());
    assert!(fx.root().join(".changed").is_file());
}

#[test]
fn install_twice_fails_without_changes() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    fx.publish("origin", &app(FOO, "stable"), &default_files());
    let first = fx.install_app("origin", FOO, "stable");

    fx.publish("origin", &app(FOO, "stable"), &[("bin/foo", "v2")]);
    let err = fx
        .installation
        .install(
            "origin",
            RefKind::App,
            FOO,
            Some(ARCH),
            Some("stable"),
            None,
            &CancellationToken::new(),
        )
        .expect_err("second install should fail");
    assert!(matches!(err, Error::AlreadyInstalled { .. }));

    let again = fx
        .installation
        .get_installed_ref(RefKind::App, FOO, Some(ARCH), Some("stable"))
        .expect("ref should still resolve");
    assert_eq!(again, first);
}

#[test]
fn uninstall_removes_everything() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    fx.publish("origin", &app(FOO, "stable"), &default_files());
    let installed = fx.install_app("origin", FOO, "stable");

    let mut statuses = Vec::new();
    let mut sink = |status: &str, percent: u32, _estimating: bool| {
        statuses.push((status.to_string(), percent));
    };
    fx.installation
        .uninstall(
            RefKind::App,
            FOO,
            Some(ARCH),
            Some("stable"),
            Some(&mut sink),
            &CancellationToken::new(),
        )
        .expect("uninstall should succeed");

    assert_eq!(statuses.last(), Some(&("Uninstalled".to_string(), 100)));
    assert!(!installed.deploy_path.exists());
    assert!(!fx.root().join("app").join(FOO).exists());
    assert!(!fx.root().join("exports").join(FOO).exists());

    let err = fx
        .installation
        .get_installed_ref(RefKind::App, FOO, Some(ARCH), Some("stable"))
        .expect_err("ref should be gone");
    assert!(matches!(err, Error::NotInstalled { .. }));

    // Objects only the uninstalled commit used are pruned.
    let repo = ObjectRepo::new(fx.root().join("repo"));
    assert!(repo.list_commits().expect("list_commits should succeed").is_empty());

    let err = fx
        .installation
        .uninstall(
            RefKind::App,
            FOO,
            Some(ARCH),
            Some("stable"),
            None,
            &CancellationToken::new(),
        )
        .expect_err("second uninstall should fail");
    assert!(matches!(err, Error::NotInstalled { .. }));
}

#[test]
fn first_installed_branch_stays_current() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    fx.publish("origin", &app(FOO, "stable"), &default_files());
    fx.publish("origin", &app(FOO, "beta"), &[("bin/foo", "beta")]);

    let stable = fx.install_app("origin", FOO, "stable");
    let beta = fx.install_app("origin", FOO, "beta");
    assert!(stable.is_current);
    assert!(!beta.is_current);

    fx.installation
        .make_current_app(FOO, Some(ARCH), Some("beta"))
        .expect("make_current_app should succeed");
    let current = fx
        .installation
        .get_current_installed_app(FOO)
        .expect("current app should resolve");
    assert_eq!(current.branch(), "beta");

    let refreshed = fx
        .installation
        .get_installed_ref(RefKind::App, FOO, Some(ARCH), Some("stable"))
        .expect("stable should resolve");
    assert!(!refreshed.is_current);

    // Removing the current branch leaves no current app behind.
    fx.installation
        .uninstall(
            RefKind::App,
            FOO,
            Some(ARCH),
            Some("beta"),
            None,
            &CancellationToken::new(),
        )
        .expect("uninstall should succeed");
    let err = fx
        .installation
        .get_current_installed_app(FOO)
        .expect_err("no current app remains");
    assert!(matches!(err, Error::NotInstalled { .. }));

    let err = fx
        .installation
        .make_current_app(FOO, Some(ARCH), Some("beta"))
        .expect_err("beta is gone");
    assert!(matches!(err, Error::NotInstalled { .. }));
}

#[test]
fn arch_named_current_installs_like_any_other() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    let odd = Ref::app(FOO, Some("master"), Some("current")).expect("ref should compose");
    fx.publish("origin", &odd, &default_files());
    fx.publish("origin", &app("org.example.Bar", "master"), &[("bin/bar", "bar")]);

    let installed = fx
        .installation
        .install(
            "origin",
            RefKind::App,
            FOO,
            Some("current"),
            Some("master"),
            None,
            &CancellationToken::new(),
        )
        .expect("install should succeed");
    assert!(installed.is_current);
    assert_eq!(installed.reference, odd);
    fx.install_app("origin", "org.example.Bar", "master");

    let listed = fx
        .installation
        .list_installed_refs_by_kind(RefKind::App)
        .expect("list should succeed");
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|installed| installed.is_current));

    fx.installation
        .uninstall(
            RefKind::App,
            FOO,
            Some("current"),
            Some("master"),
            None,
            &CancellationToken::new(),
        )
        .expect("uninstall should succeed");
    let err = fx
        .installation
        .get_current_installed_app(FOO)
        .expect_err("no current app remains");
    assert!(matches!(err, Error::NotInstalled { .. }));
}

#[test]
fn runtimes_are_listed_by_kind() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    let runtime = Ref::runtime("org.example.Platform", Some("23.08"), Some(ARCH))
        .expect("ref should compose");
    fx.publish("origin", &runtime, &[("lib/libfoo.so", "elf")]);
    fx.publish("origin", &app(FOO, "stable"), &default_files());

    fx.install_app("origin", FOO, "stable");
    let installed_runtime = fx
        .installation
        .install(
            "origin",
            RefKind::Runtime,
            "org.example.Platform",
            Some(ARCH),
            Some("23.08"),
            None,
            &CancellationToken::new(),
        )
        .expect("runtime install should succeed");
    assert!(!installed_runtime.is_current);

    let apps = fx
        .installation
        .list_installed_refs_by_kind(RefKind::App)
        .expect("listing should succeed");
    let runtimes = fx
        .installation
        .list_installed_refs_by_kind(RefKind::Runtime)
        .expect("listing should succeed");
    assert_eq!(apps.len(), 1);
    assert_eq!(runtimes.len(), 1);
    assert_eq!(runtimes[0].reference, runtime);
    assert_eq!(
        fx.installation
            .list_installed_refs()
            .expect("listing should succeed")
            .len(),
        2
    );
}

#[test]
fn update_deploys_new_commit_once() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    let first = fx.publish("origin", &app(FOO, "stable"), &default_files());
    fx.install_app("origin", FOO, "stable");

    let second = fx.publish("origin", &app(FOO, "stable"), &[("bin/foo", "v2")]);
    assert_ne!(first, second);

    let updated = fx
        .installation
        .update(
            UpdateFlags::default(),
            RefKind::App,
            FOO,
            Some(ARCH),
            Some("stable"),
            None,
            &CancellationToken::new(),
        )
        .expect("update should succeed");
    assert_eq!(updated.commit, second);
    assert_eq!(
        fs::read_to_string(updated.deploy_path.join("files/bin/foo")).expect("read should succeed"),
        "v2"
    );

    let again = fx
        .installation
        .update(
            UpdateFlags::default(),
            RefKind::App,
            FOO,
            Some(ARCH),
            Some("stable"),
            None,
            &CancellationToken::new(),
        )
        .expect("second update should succeed");
    assert_eq!(again, updated);
}

#[test]
fn update_without_deploy_leaves_pending_update() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    let first = fx.publish("origin", &app(FOO, "stable"), &default_files());
    fx.install_app("origin", FOO, "stable");
    let second = fx.publish("origin", &app(FOO, "stable"), &[("bin/foo", "v2")]);

    let pulled = fx
        .installation
        .update(
            UpdateFlags {
                no_deploy: true,
                ..UpdateFlags::default()
            },
            RefKind::App,
            FOO,
            Some(ARCH),
            Some("stable"),
            None,
            &CancellationToken::new(),
        )
        .expect("pull-only update should succeed");
    assert_eq!(pulled.commit, first);
    assert_eq!(pulled.latest_commit.as_deref(), Some(second.as_str()));
    assert!(pulled.has_pending_update());

    let deployed = fx
        .installation
        .update(
            UpdateFlags {
                no_pull: true,
                ..UpdateFlags::default()
            },
            RefKind::App,
            FOO,
            Some(ARCH),
            Some("stable"),
            None,
            &CancellationToken::new(),
        )
        .expect("deploy-only update should succeed");
    assert_eq!(deployed.commit, second);
    assert!(!deployed.has_pending_update());
}

#[test]
fn cancelled_install_leaves_nothing_deployed() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    fx.publish("origin", &app(FOO, "stable"), &default_files());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fx
        .installation
        .install(
            "origin",
            RefKind::App,
            FOO,
            Some(ARCH),
            Some("stable"),
            None,
            &cancel,
        )
        .expect_err("cancelled install should fail");
    assert!(err.is_cancelled());
    assert!(
        fx.installation
            .list_installed_refs()
            .expect("listing should succeed")
            .is_empty()
    );
}

#[test]
fn install_progress_is_monotonic() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    fx.publish("origin", &app(FOO, "stable"), &default_files());

    let mut percents = Vec::new();
    let mut sink = |_status: &str, percent: u32, _estimating: bool| percents.push(percent);
    fx.installation
        .install(
            "origin",
            RefKind::App,
            FOO,
            Some(ARCH),
            Some("stable"),
            Some(&mut sink),
            &CancellationToken::new(),
        )
        .expect("install should succeed");

    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(percents.last(), Some(&100));
}

#[test]
fn unreadable_latest_commit_is_not_fatal() {
    let fx = Fixture::new();
    fx.add_remote("origin");
    let commit = fx.publish("origin", &app(FOO, "stable"), &default_files());
    fx.install_app("origin", FOO, "stable");

    let tracking = fx
        .root()
        .join("repo/refs/remotes/origin/app")
        .join(FOO)
        .join(ARCH)
        .join("stable");
    fs::remove_file(&tracking).expect("remove should succeed");
    fs::create_dir(&tracking).expect("create_dir should succeed");

    let installed = fx
        .installation
        .get_installed_ref(RefKind::App, FOO, Some(ARCH), Some("stable"))
        .expect("ref should still resolve");
    assert_eq!(installed.commit, commit);
    assert_eq!(installed.latest_commit, None);
}

#[test]
fn invalid_identifiers_are_rejected() {
    let fx = Fixture::new();
    let err = fx
        .installation
        .get_installed_ref(RefKind::App, "not a name", Some(ARCH), Some("stable"))
        .expect_err("bad name should fail");
    assert!(matches!(err, Error::InvalidIdentifier(_)));

    let err = fx
        .installation
        .get_installed_ref(RefKind::App, FOO, Some(ARCH), Some("../up"))
        .expect_err("bad branch should fail");
    assert!(matches!(err, Error::InvalidIdentifier(_)));
}

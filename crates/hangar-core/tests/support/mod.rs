#![allow(dead_code)]

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use hangar_core::prelude::*;
use tempfile::TempDir;

pub const ARCH: &str = "x86_64";
pub const FOO: &str = "org.example.Foo";

/// An installation root plus on-disk remote repositories to install from.
pub struct Fixture {
    pub tmp: TempDir,
    pub installation: Installation,
    counter: Cell<u32>,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let installation = Installation::new_for_path(tmp.path().join("root"), true);
        Self {
            tmp,
            installation,
            counter: Cell::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        self.installation.path()
    }

    pub fn repo_path(&self, remote: &str) -> PathBuf {
        self.tmp.path().join("remotes").join(remote)
    }

    pub fn repo(&self, remote: &str) -> ObjectRepo {
        ObjectRepo::new(self.repo_path(remote))
    }

    /// Register `name` pointing at its repository directory.
    pub fn add_remote(&self, name: &str) {
        let url = self.repo_path(name).to_string_lossy().to_string();
        self.installation
            .add_remote(RemoteConfig::new(name, url))
            .expect("add_remote should succeed");
    }

    /// Publish `files` as the new head of `r` in `remote`'s repository.
    pub fn publish(&self, remote: &str, r: &Ref, files: &[(&str, &str)]) -> String {
        let n = self.counter.get() + 1;
        self.counter.set(n);
        let src = self.tmp.path().join(format!("src-{n}"));
        for (path, content) in files {
            let path = src.join(path);
            fs::create_dir_all(path.parent().expect("file should have a parent"))
                .expect("create_dir_all should succeed");
            fs::write(&path, content).expect("write should succeed");
        }
        fs::create_dir_all(&src).expect("create_dir_all should succeed");
        self.repo(remote)
            .publish(&src, r, "[Application]\nname=test\n")
            .expect("publish should succeed")
    }

    pub fn install_app(&self, remote: &str, name: &str, branch: &str) -> InstalledRef {
        self.installation
            .install(
                remote,
                RefKind::App,
                name,
                Some(ARCH),
                Some(branch),
                None,
                &CancellationToken::new(),
            )
            .expect("install should succeed")
    }

    pub fn remote_count(&self) -> usize {
        self.installation
            .list_remotes()
            .expect("list_remotes should succeed")
            .len()
    }
}

pub fn app(name: &str, branch: &str) -> Ref {
    Ref::app(name, Some(branch), Some(ARCH)).expect("ref should compose")
}

pub fn default_files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("bin/foo", "#!/bin/sh\necho foo\n"),
        ("share/doc/README", "Foo\n"),
        ("export/share/applications/org.example.Foo.desktop", "[Desktop Entry]\n"),
    ]
}

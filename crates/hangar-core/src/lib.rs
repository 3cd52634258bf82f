//! Hangar Core Library
//!
//! Installs, updates and removes apps and runtimes ("refs") in an
//! installation root backed by a content-addressed object store.

pub mod config;
pub mod error;
pub mod installation;
pub mod monitor;
pub mod orchestration;
pub mod progress;
pub mod refs;
pub mod store;

pub use error::{Error, Result};
pub use installation::{InstalledRef, Installation, Remote, RemoteRef, RemoteSize};

/// Re-exports of commonly used types
pub mod prelude {
    // Errors
    pub use crate::error::{Error, Result};

    // Installation
    pub use crate::installation::{InstalledRef, Installation, Remote, RemoteRef, RemoteSize};
    pub use crate::orchestration::UpdateFlags;

    // Refs
    pub use crate::refs::{DEFAULT_BRANCH, Ref, RefKind, compose, decompose, default_arch};

    // Progress
    pub use crate::progress::{ProgressSink, format_size};

    // Store
    pub use crate::store::{
        BundleWriter, LocalStore, ObjectRepo, RemoteConfig, Store,
    };

    // Config and monitoring
    pub use crate::config::{ConfigStore, HangarConfig};
    pub use crate::monitor::ChangeMonitor;

    pub use tokio_util::sync::CancellationToken;
}

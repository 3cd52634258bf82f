//! Error kinds surfaced by installation operations.
//!
//! Store internals work in `anyhow` and are lifted into [`Error::StoreFailure`]
//! or [`Error::TransferFailed`] at the facade boundary. Everything else maps
//! one-to-one onto a lifecycle outcome a caller can match on.

use thiserror::Error;

/// Result alias used across the public API.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A ref component (name, arch, branch) or a full ref string is malformed.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("{name} branch {branch} already installed")]
    AlreadyInstalled { name: String, branch: String },

    #[error("{name} branch {branch} is not installed")]
    NotInstalled { name: String, branch: String },

    /// A remote, remote ref, override or similar lookup came back empty.
    #[error("{0}")]
    NotFound(String),

    #[error("operation was cancelled")]
    Cancelled,

    /// Network or verification failure while moving objects.
    #[error("transfer failed: {0:#}")]
    TransferFailed(anyhow::Error),

    /// Local I/O, locking or deployment failure.
    #[error("store failure: {0:#}")]
    StoreFailure(anyhow::Error),
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidIdentifier(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        Self::StoreFailure(err.into())
    }

    pub fn transfer(err: impl Into<anyhow::Error>) -> Self {
        Self::TransferFailed(err.into())
    }

    pub fn already_installed(name: &str, branch: &str) -> Self {
        Self::AlreadyInstalled {
            name: name.to_string(),
            branch: branch.to_string(),
        }
    }

    pub fn not_installed(name: &str, branch: &str) -> Self {
        Self::NotInstalled {
            name: name.to_string(),
            branch: branch.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Bail out with [`Error::Cancelled`] once the token has fired.
pub(crate) fn check_cancelled(cancel: &tokio_util::sync::CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

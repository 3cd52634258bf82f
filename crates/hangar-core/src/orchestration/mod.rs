//! Lifecycle operations on an [`Installation`](crate::Installation).
//!
//! Every mutating operation works on its own clone of the store. Operations
//! that move data also get their own runtime for the transfer (see
//! `context.rs`). Only uninstall holds the installation lock.

mod admin;
mod context;
mod install;
mod uninstall;
mod update;

pub use update::UpdateFlags;

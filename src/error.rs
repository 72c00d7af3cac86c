//! Crate error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LarderError {
    /// A store was resolved with no registry installed on the current
    /// component's app and none marked active for this thread.
    #[error("no active registry; install one on the host app or pass it explicitly")]
    NoActiveRegistry,

    /// `reset` only works for options stores, which carry a state factory.
    #[error("store '{id}' was built from a setup function and cannot be reset")]
    SetupStoreReset { id: String },

    /// The registry was disposed; it no longer builds stores.
    #[error("registry is disposed")]
    RegistryDisposed,

    /// A call named an action the store does not export.
    #[error("store '{id}' has no action '{name}'")]
    UnknownAction { id: String, name: String },
}

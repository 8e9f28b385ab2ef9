//! Error types for vmkit

use thiserror::Error;

/// Errors surfaced by the view-model registry and the binding layer
#[derive(Error, Debug)]
pub enum ViewModelError {
    /// No live or staged view model matches the lookup
    #[error("view model not found: {lookup}")]
    NotFound { lookup: String },

    /// A lookup was requested without a registry in scope
    #[error("no view model store in scope while looking up {lookup}")]
    MissingStore { lookup: String },

    /// No enclosing view model is active in the current scope
    #[error("no active view model in scope")]
    NoActiveViewModel,

    /// An id resolved to an instance of a different class
    #[error("view model '{id}' is a {found}, expected {expected}")]
    ClassMismatch {
        id: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Registry indexes disagree with each other
    #[error("corrupted view model index for '{id}': {reason}")]
    CorruptedIndex { id: String, reason: &'static str },

    /// The host scheduler refused lifecycle work
    #[error("failed to schedule lifecycle work: {0}")]
    Spawn(#[from] futures::task::SpawnError),

    /// Settings could not be parsed
    #[error("invalid view model settings: {0}")]
    Settings(#[from] toml::de::Error),
}

/// Result type for vmkit operations
pub type Result<T> = std::result::Result<T, ViewModelError>;

use thiserror::Error;

/// Errors surfaced by an [`ObjectStore`](crate::ObjectStore).
///
/// The set is closed on purpose: backends translate their own error shapes
/// (SDK service errors, HTTP statuses) into one of these three kinds and the
/// protocol layer only ever matches on the kind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("object not found: {0}")]
    NotFound(String),

    /// Throttling, 5xx, timeouts and dispatch failures. Safe to retry.
    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("backend error: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Errors raised while loading or querying the mount registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid mount path {path:?}: {reason}")]
    InvalidMountPath { path: String, reason: &'static str },

    #[error("duplicate mount path: {0}")]
    DuplicateMountPath(String),

    #[error("mount {mount} references unknown backend {backend:?}")]
    UnknownBackend { mount: String, backend: String },

    #[error("registry I/O error: {0}")]
    Io(String),

    #[error("registry parse error: {0}")]
    Parse(String),

    #[error("backend initialisation failed: {0}")]
    Backend(String),
}

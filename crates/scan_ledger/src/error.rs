//! Outcomes of service operations that callers are expected to act on.

/// Failure of a target or record operation.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The target id or name does not resolve.
    #[error("scan target not found")]
    NotFound,

    /// Another target already uses this name.
    #[error("scan target {0:?} already exists")]
    RecordExist(String),

    /// The target path would smuggle shell syntax into the scanner command.
    #[error("target path contains illegal characters")]
    IllegalPath,

    /// The name cannot be used as a result directory.
    #[error("invalid target name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name was rejected.
        reason: &'static str,
    },

    /// Pages are 1-indexed.
    #[error("page must be at least 1")]
    InvalidPage,

    /// The target store or the filesystem failed.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

//! Repository error types.

/// Errors returned by repository writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// An update named a record that does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record, e.g. `"inventory entry"`.
        entity: &'static str,
        /// The missing id.
        id: i64,
    },

    /// The write would break a uniqueness constraint.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    /// A record was removed.
    Deleted,
    /// Nothing matched.
    NotFound,
}

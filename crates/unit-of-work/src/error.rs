use thiserror::Error;

/// Errors raised by a [`Session`](crate::Session) implementation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session was closed and can no longer be used.
    #[error("Session is closed")]
    Closed,

    /// The backing store refused the commit. Pending writes are kept until
    /// the caller rolls back.
    #[error("Commit failed: {0}")]
    CommitFailed(String),
}

/// Errors raised by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The repository backend does not serve the requested finder.
    #[error("Lookup '{lookup}' is not supported for {aggregate}")]
    UnsupportedLookup {
        aggregate: &'static str,
        lookup: &'static str,
    },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// A stored row could not be converted to or from the aggregate.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the unit of work.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// No repository is configured for the requested aggregate type.
    #[error("Repository not found for: {0}")]
    RepositoryNotFound(&'static str),

    /// The operation needs an open session; call `enter` first.
    #[error("Unit of work has not been entered")]
    NotEntered,

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Result type for unit of work operations.
pub type Result<T> = std::result::Result<T, UnitOfWorkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_not_found_names_the_aggregate() {
        let err = UnitOfWorkError::RepositoryNotFound("Product");
        assert_eq!(err.to_string(), "Repository not found for: Product");
    }

    #[test]
    fn session_errors_convert_through_repository_errors() {
        let err: RepositoryError = SessionError::Closed.into();
        let err: UnitOfWorkError = err.into();
        assert!(matches!(
            err,
            UnitOfWorkError::Repository(RepositoryError::Session(SessionError::Closed))
        ));
    }
}

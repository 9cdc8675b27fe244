use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("db record version mismatch")]
    VersionConflict,
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("column is not updatable: {0}")]
    NotUpdatable(String),
    #[error("type mismatch: cannot read {found} as {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("update requires a primary key or an explicit predicate")]
    MissingPredicate,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Identity test for the optimistic-lock sentinel.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Error::VersionConflict)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

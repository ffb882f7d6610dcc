use thiserror::Error;

/// Failure taxonomy shared by every governance component.
///
/// Data problems found by validation and consistency checks are normally
/// reported through result objects; these variants are for the cases where an
/// operation cannot proceed at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("collection not found: {0}")]
    NotFound(String),
    #[error("failed to parse collection `{collection}`: {message}")]
    Parse { collection: String, message: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("migration of `{collection}` aborted: {reason}")]
    MigrationAborted {
        collection: String,
        reason: String,
        snapshot_id: Option<String>,
    },
    #[error("broken reference from `{collection}.{field}` to `{target}`: {value}")]
    ReferenceBroken {
        collection: String,
        field: String,
        target: String,
        value: String,
    },
    #[error("unknown version {version} for collection `{collection}`")]
    UnknownVersion { collection: String, version: String },
    #[error("migration step {version} failed: {message}")]
    Transform { version: String, message: String },
    #[error("io failure: {0}")]
    Io(String),
}

impl GovernanceError {
    pub fn parse(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            collection: collection.into(),
            message: message.into(),
        }
    }

    pub fn io(context: impl std::fmt::Display, err: &std::io::Error) -> Self {
        Self::Io(format!("{context}: {err}"))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

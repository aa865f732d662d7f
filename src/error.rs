#[derive(Debug, thiserror::Error)]
pub enum DossierError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid type '{0}', valid types: profile, contact, preference, schedule, task, decision, insight, context, goal, chat, feedback, personal")]
    InvalidType(String),

    #[error("invalid source '{0}', valid sources: explicit, learned, inferred")]
    InvalidSource(String),

    #[error("confidence must be between 0.0 and 1.0 (got {0})")]
    ConfidenceRange(f64),

    #[error("not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("vector index error: {0}")]
    Index(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DossierError {
    /// Storage-engine faults (disk full, corrupt file, poisoned pool) are the
    /// one category the tool layer must not translate into chat text.
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_) | Self::Internal(_))
    }
}

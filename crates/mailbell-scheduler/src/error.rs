use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No row of the given kind exists with this ID.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The row exists but its current status forbids the operation.
    #[error("Scheduled send {id} is {status}")]
    InvalidState { id: String, status: String },

    /// Caller-supplied data was rejected before touching storage.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A thread panicked while holding the connection lock.
    #[error("Storage connection lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

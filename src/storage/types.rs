use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another feedwatch process has locked the database
    #[error("Another feedwatch process appears to be running. Please stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();
        if Self::is_lock_message(&error_string) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }

    // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
    pub(crate) fn is_lock_message(lowercase: &str) -> bool {
        lowercase.contains("database is locked")
            || lowercase.contains("database table is locked")
            || lowercase.contains("sqlite_busy")
            || lowercase.contains("sqlite_locked")
            || lowercase.contains("unable to open database file")
    }
}

//! Core error types for Rock Annotator.

/// Core error type for lease coordination, submissions and exports.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The conditional lease write kept losing to concurrent callers.
    #[error("Lost the lease race {attempts} times in a row")]
    RaceLost { attempts: u32 },

    #[error("Task {task_id} is not leased to this annotator")]
    LeaseNotHeld { task_id: i64 },

    #[error("Invalid credentials for annotator '{username}'")]
    Credentials { username: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] ra_local_db::Error),
}

impl Error {
    /// Create a new not-found error.
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a new validation error.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new parse error.
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Whether this error means the referenced entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

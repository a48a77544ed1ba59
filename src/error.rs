use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Health endpoint or database socket unreachable
    #[error("connection failed: {0}")]
    Connection(String),

    /// Credentials rejected at sign-in
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("service not ready after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("{path}: {reason}")]
    FileSystem { path: PathBuf, reason: String },

    /// Credential file permissions weakened since they were written
    #[error("insecure credential file {path}: mode {mode:o}, expected {expected:o}")]
    Security {
        path: PathBuf,
        mode: u32,
        expected: u32,
    },

    #[error("no service installer for platform '{0}'")]
    UnsupportedPlatform(String),

    #[error("password length {actual} is below the minimum of {min}")]
    InvalidPasswordLength { min: usize, actual: usize },

    #[error("database error: {0}")]
    Database(String),

    // `source` is reserved by thiserror for the error chain
    #[error("link {from} -[{link_type}]-> {to} already exists")]
    LinkExists {
        from: String,
        to: String,
        link_type: String,
    },

    #[error("invalid link: {0}")]
    InvalidLink(String),

    #[error("`{program}` failed: {detail}")]
    Command { program: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    pub(crate) fn fs(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FileSystem {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Connection-class failures callers should treat as "offline".
    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout { .. } | Self::UnsupportedPlatform(_)
        )
    }
}

impl From<surrealdb::Error> for ServiceError {
    fn from(e: surrealdb::Error) -> Self {
        ServiceError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

//! The KV backend's error type, wrapping the shared
//! [`nimbus_ore::error::ErrorKind`] taxonomy with driver-specific
//! context (a SQLite error, a Postgres error, or a bad key).

use nimbus_ore::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("compare failed: {0}")]
    CompareFailed(String),

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("connection problem: {0}")]
    ConnectionProblem(#[source] anyhow::Error),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl KvError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KvError::NotFound(_) => ErrorKind::NotFound,
            KvError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            KvError::CompareFailed(_) => ErrorKind::CompareFailed,
            KvError::BadParameter(_) => ErrorKind::BadParameter,
            KvError::ConnectionProblem(_) => ErrorKind::ConnectionProblem,
            KvError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::NotFound(_))
    }
}

impl nimbus_ore::retry::Classify for KvError {
    fn kind(&self) -> ErrorKind {
        KvError::kind(self)
    }
}

impl From<rusqlite::Error> for KvError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => KvError::NotFound(err.to_string()),
            other => KvError::ConnectionProblem(other.into()),
        }
    }
}

impl From<tokio_postgres::Error> for KvError {
    fn from(err: tokio_postgres::Error) -> Self {
        KvError::ConnectionProblem(err.into())
    }
}

//! The installer's error type. A phase's connection-flavored failures
//! are retried with bounded backoff (§4.F "Failure semantics"); anything
//! else is surfaced verbatim and drives the operation to `Failed`.

use nimbus_ore::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("phase {phase} failed: {source}")]
    PhaseFailed {
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("connection problem: {0}")]
    ConnectionProblem(#[source] anyhow::Error),

    #[error(transparent)]
    Store(#[from] nimbus_store::StoreError),
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::BadParameter(_) => ErrorKind::BadParameter,
            InstallError::PhaseFailed { .. } => ErrorKind::BadParameter,
            InstallError::ConnectionProblem(_) => ErrorKind::ConnectionProblem,
            InstallError::Store(err) => match err {
                nimbus_store::StoreError::Kv(kv_err) => kv_err.kind(),
                _ => ErrorKind::BadParameter,
            },
        }
    }
}

impl nimbus_ore::retry::Classify for InstallError {
    fn kind(&self) -> ErrorKind {
        InstallError::kind(self)
    }
}

//! The health agent's error type. Timeline stores classify their own
//! `rusqlite` failures as `ConnectionProblem` so the RPC layer can apply
//! [`nimbus_ore::retry`] when forwarding events to the cluster timeline;
//! everything else is a permanent `BadParameter`.

use nimbus_ore::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("timeline store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("not the cluster master")]
    NotMaster,

    #[error("stale event: watermark has already advanced past {0}")]
    StaleEvent(chrono::DateTime<chrono::Utc>),

    #[error("rpc transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl HealthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HealthError::BadParameter(_) => ErrorKind::BadParameter,
            HealthError::Store(_) => ErrorKind::ConnectionProblem,
            HealthError::NotMaster => ErrorKind::BadParameter,
            HealthError::StaleEvent(_) => ErrorKind::CompareFailed,
            HealthError::Transport(_) => ErrorKind::ConnectionProblem,
        }
    }
}

impl nimbus_ore::retry::Classify for HealthError {
    fn kind(&self) -> ErrorKind {
        HealthError::kind(self)
    }
}

impl From<HealthError> for tonic::Status {
    fn from(err: HealthError) -> tonic::Status {
        match err.kind() {
            ErrorKind::BadParameter => tonic::Status::failed_precondition(err.to_string()),
            ErrorKind::CompareFailed => tonic::Status::aborted(err.to_string()),
            ErrorKind::ConnectionProblem => tonic::Status::unavailable(err.to_string()),
            ErrorKind::NotFound => tonic::Status::not_found(err.to_string()),
            ErrorKind::AlreadyExists => tonic::Status::already_exists(err.to_string()),
            ErrorKind::Timeout => tonic::Status::deadline_exceeded(err.to_string()),
            ErrorKind::Panic => tonic::Status::internal(err.to_string()),
        }
    }
}

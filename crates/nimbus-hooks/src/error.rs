//! The hook runner's error type. Transient Kubernetes API errors are
//! classified `ConnectionProblem` (retryable by callers via
//! `nimbus_ore::retry`); a malformed `HookRequest` is `BadParameter` and
//! is never retried.

use nimbus_ore::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("hook job failed: {0}")]
    JobFailed(String),

    #[error("codec error: {0}")]
    Codec(#[from] nimbus_codec::CodecError),
}

impl HookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HookError::BadParameter(_) => ErrorKind::BadParameter,
            HookError::Kube(_) => ErrorKind::ConnectionProblem,
            HookError::JobFailed(_) => ErrorKind::BadParameter,
            HookError::Codec(_) => ErrorKind::BadParameter,
        }
    }
}

impl nimbus_ore::retry::Classify for HookError {
    fn kind(&self) -> ErrorKind {
        HookError::kind(self)
    }
}

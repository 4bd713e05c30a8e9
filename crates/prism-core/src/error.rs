use prism_binary::BinaryError;
use prism_types::{FlagError, ImageTypeError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse error classification shared by every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CapabilityMissing,
    InvalidArgument,
    ResourceExhausted,
    DeviceLost,
    SubmissionFailed,
    BinaryMismatch,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("capability missing: {0}")]
    CapabilityMissing(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("submission failed: {0}")]
    SubmissionFailed(String),
    #[error("no universal binary entry fits: {0}")]
    BinaryMismatch(String),

    #[error("invalid universal binary: {0}")]
    Binary(#[from] BinaryError),
    #[error("invalid flags: {0}")]
    Flags(#[from] FlagError),
    #[error("invalid image type: {0}")]
    ImageType(#[from] ImageTypeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// Every failing public call produces exactly one `Error`, so the constructors are where the
// `error`-level log line is emitted.
impl Error {
    pub fn capability_missing(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(kind = "capability-missing", "{msg}");
        Self::CapabilityMissing(msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(kind = "invalid-argument", "{msg}");
        Self::InvalidArgument(msg)
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(kind = "resource-exhausted", "{msg}");
        Self::ResourceExhausted(msg)
    }

    pub fn device_lost(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(kind = "device-lost", "{msg}");
        Self::DeviceLost(msg)
    }

    pub fn submission_failed(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(kind = "submission-failed", "{msg}");
        Self::SubmissionFailed(msg)
    }

    pub fn binary_mismatch(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(kind = "binary-mismatch", "{msg}");
        Self::BinaryMismatch(msg)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CapabilityMissing(_) => ErrorKind::CapabilityMissing,
            Error::InvalidArgument(_)
            | Error::Binary(_)
            | Error::Flags(_)
            | Error::ImageType(_)
            | Error::Io(_) => ErrorKind::InvalidArgument,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::DeviceLost(_) => ErrorKind::DeviceLost,
            Error::SubmissionFailed(_) => ErrorKind::SubmissionFailed,
            Error::BinaryMismatch(_) => ErrorKind::BinaryMismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(
            Error::invalid_argument("size 0").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            Error::from(FlagError::MissingAccessMode).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(Error::device_lost("gone").kind(), ErrorKind::DeviceLost);
        assert_eq!(
            Error::binary_mismatch("no entry").to_string(),
            "no universal binary entry fits: no entry"
        );
    }
}

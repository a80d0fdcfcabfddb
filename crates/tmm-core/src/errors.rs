use std::path::PathBuf;

/// Core error type for the mirror job.
///
/// Adapter crates map their specific errors into this type so the pipeline can
/// tell fatal setup failures apart from per-message failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("dedup store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Fatal errors abort the whole run; everything else only skips a message.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Authentication(_) | Error::ChannelNotFound(_)
        )
    }

    /// Process exit code used by the binaries.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 2,
            Error::Authentication(_) => 3,
            Error::ChannelNotFound(_) => 4,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_setup_errors_are_fatal() {
        assert!(Error::Authentication("expired".into()).is_fatal());
        assert!(Error::ChannelNotFound("@nope".into()).is_fatal());
        assert!(Error::Config("missing".into()).is_fatal());
        assert!(!Error::Conversion("corrupt".into()).is_fatal());
        assert!(!Error::Upload("503".into()).is_fatal());
        assert!(!Error::Download("too big".into()).is_fatal());
    }

    #[test]
    fn exit_codes_are_distinct_for_setup_failures() {
        assert_eq!(Error::Config(String::new()).exit_code(), 2);
        assert_eq!(Error::Authentication(String::new()).exit_code(), 3);
        assert_eq!(Error::ChannelNotFound(String::new()).exit_code(), 4);
        assert_eq!(Error::External(String::new()).exit_code(), 1);
    }
}

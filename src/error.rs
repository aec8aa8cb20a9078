//! Error types for backend invocation, speech control and staged images.

use thiserror::Error;

/// Failure of one backend command. The `Display` text is what the user sees
/// after the `error: ` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// No usable backend is configured.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend process could not be started.
    #[error("failed to launch backend '{program}': {reason}")]
    Launch { program: String, reason: String },

    /// Reading from or writing to the backend failed.
    #[error("backend I/O failed: {0}")]
    Io(String),

    #[error("backend timed out after {0}s")]
    Timeout(u64),

    /// The backend ran and reported an error of its own.
    #[error("{message}")]
    Failed { status: Option<i32>, message: String },

    /// The reply could not be interpreted.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl From<std::io::Error> for BackendError {
    fn from(error: std::io::Error) -> Self {
        BackendError::Io(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
    #[error("speech recognition is not supported")]
    Unsupported,

    #[error("microphone is unavailable")]
    MicrophoneUnavailable,

    #[error("speech capability failed: {0}")]
    Capability(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("image is not a base64 data URL")]
    NotDataUrl,

    #[error("unsupported image type: {0}")]
    UnsupportedMediaType(String),

    #[error("image payload is not valid base64: {0}")]
    InvalidBase64(String),
}

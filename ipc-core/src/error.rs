use std::fmt;

/// The stable set of error codes exchanged on the wire via `RESPONSE.error.code`.
/// Kept as a closed enum rather than a bare string so callers can match on it
/// instead of comparing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    ConnectionLost,
    NotConnected,
    ServiceNotFound,
    MethodNotFound,
    ExecutionFailed,
    Timeout,
    DeadlineExceeded,
    InvalidMessage,
    SerializationFailed,
    DeserializationFailed,
    InvalidContext,
    MaxDepthExceeded,
    InternalError,
}

impl ErrorCode {
    /// Whether `call_with_retry` should attempt another try for this code.
    /// `METHOD_NOT_FOUND`, `SERVICE_NOT_FOUND`, and `INVALID_MESSAGE` represent
    /// a permanent mismatch, not a transient fault.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorCode::MethodNotFound | ErrorCode::ServiceNotFound | ErrorCode::InvalidMessage
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::ExecutionFailed => "EXECUTION_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::SerializationFailed => "SERIALIZATION_FAILED",
            ErrorCode::DeserializationFailed => "DESERIALIZATION_FAILED",
            ErrorCode::InvalidContext => "INVALID_CONTEXT",
            ErrorCode::MaxDepthExceeded => "MAX_DEPTH_EXCEEDED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(s)
    }
}

/// A wire-level error payload, as carried by `RESPONSE.error` and the
/// unsolicited `ERROR` message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemoteError {
    pub message: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        RemoteError {
            message: message.into(),
            code,
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// All error types produced by this crate's framing and context layers.
#[derive(Debug)]
pub enum IpcError {
    /// A frame's payload could not be serialised.
    SerializationFailed(String),
    /// A frame's payload could not be deserialised.
    DeserializationFailed(String),
    /// A message did not match the expected shape for its `type`.
    InvalidMessage(String),
    /// A context was missing a required field or had the wrong shape.
    InvalidContext(String),
    /// An I/O error surfaced while reading or writing a frame.
    Io(std::io::Error),
    /// An error that arrived from the remote peer, wrapped for local propagation.
    Remote(RemoteError),
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcError::SerializationFailed(msg) => write!(f, "serialization failed: {msg}"),
            IpcError::DeserializationFailed(msg) => write!(f, "deserialization failed: {msg}"),
            IpcError::InvalidMessage(msg) => write!(f, "invalid message: {msg}"),
            IpcError::InvalidContext(msg) => write!(f, "invalid context: {msg}"),
            IpcError::Io(err) => write!(f, "I/O error: {err}"),
            IpcError::Remote(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for IpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IpcError::Io(err) => Some(err),
            IpcError::Remote(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::Io(err)
    }
}

impl From<RemoteError> for IpcError {
    fn from(err: RemoteError) -> Self {
        IpcError::Remote(err)
    }
}

impl IpcError {
    /// The `ErrorCode` this error would carry if turned into a wire `RemoteError`.
    pub fn code(&self) -> ErrorCode {
        match self {
            IpcError::SerializationFailed(_) => ErrorCode::SerializationFailed,
            IpcError::DeserializationFailed(_) => ErrorCode::DeserializationFailed,
            IpcError::InvalidMessage(_) => ErrorCode::InvalidMessage,
            IpcError::InvalidContext(_) => ErrorCode::InvalidContext,
            IpcError::Io(_) => ErrorCode::ConnectionLost,
            IpcError::Remote(err) => err.code,
        }
    }
}

/// Convenience type alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, IpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_excludes_routing_and_invalid_message_codes() {
        assert!(!ErrorCode::MethodNotFound.is_retryable());
        assert!(!ErrorCode::ServiceNotFound.is_retryable());
        assert!(!ErrorCode::InvalidMessage.is_retryable());
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::ConnectionLost.is_retryable());
        assert!(ErrorCode::NotConnected.is_retryable());
        assert!(ErrorCode::ExecutionFailed.is_retryable());
    }

    #[test]
    fn display_formatting() {
        let err = RemoteError::new(ErrorCode::ServiceNotFound, "no such service: ghost");
        assert_eq!(err.to_string(), "SERVICE_NOT_FOUND: no such service: ghost");
    }

    #[test]
    fn error_code_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::MethodNotFound).unwrap();
        assert_eq!(json, "\"METHOD_NOT_FOUND\"");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "socket missing");
        let err: IpcError = io_err.into();
        assert!(matches!(err, IpcError::Io(_)));
    }
}

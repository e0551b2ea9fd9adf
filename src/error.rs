//! Error taxonomy for the bridge
//!
//! Every failure a tool can report maps onto one [`ErrorKind`]. The dispatch
//! facade turns a [`BridgeError`] into an [`ErrorReport`] (kind + message) for
//! the hosting assistant; the CLI prints the same report.

use serde::Serialize;
use thiserror::Error;

/// Result alias used by the transport, session and export layers
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Reported error kind, serialized verbatim into tool error payloads
#[allow(clippy::enum_variant_names)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// AbletonOSC is unreachable (nothing listening on the configured port)
    ConnectionError,
    /// No reply within the configured bound
    TimeoutError,
    /// Malformed or unexpected reply shape
    ProtocolError,
    /// Invalid track index, or a track without clips
    NotFoundError,
    /// Export attempted on an OS without GUI automation support
    UnsupportedPlatformError,
    /// Accessibility access denied
    PermissionError,
    /// An export is already in progress
    ConflictError,
    /// Tool arguments failed validation
    InvalidArgumentError,
    /// Operation not valid in the current export job state
    InvalidStateError,
    /// A GUI automation step failed or a UI element never appeared
    AutomationError,
    /// The export job was cancelled by the caller
    CancelledError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::UnsupportedPlatformError => "UnsupportedPlatformError",
            ErrorKind::PermissionError => "PermissionError",
            ErrorKind::ConflictError => "ConflictError",
            ErrorKind::InvalidArgumentError => "InvalidArgumentError",
            ErrorKind::InvalidStateError => "InvalidStateError",
            ErrorKind::AutomationError => "AutomationError",
            ErrorKind::CancelledError => "CancelledError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the OSC transport, the session layer and the export sequencer
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    #[error("cannot reach AbletonOSC: {0}")]
    Connection(String),

    #[error("no reply to {address} within {timeout_ms} ms")]
    Timeout { address: String, timeout_ms: u64 },

    #[error("unexpected reply: {0}")]
    Protocol(String),

    #[error("{0}")]
    NotFound(String),

    #[error("export automation is not supported on {os} (macOS only)")]
    UnsupportedPlatform { os: String },

    #[error("accessibility permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("GUI automation failed: {0}")]
    Automation(String),

    #[error("export job cancelled")]
    Cancelled,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Connection(_) => ErrorKind::ConnectionError,
            BridgeError::Timeout { .. } => ErrorKind::TimeoutError,
            BridgeError::Protocol(_) => ErrorKind::ProtocolError,
            BridgeError::NotFound(_) => ErrorKind::NotFoundError,
            BridgeError::UnsupportedPlatform { .. } => ErrorKind::UnsupportedPlatformError,
            BridgeError::PermissionDenied(_) => ErrorKind::PermissionError,
            BridgeError::Conflict(_) => ErrorKind::ConflictError,
            BridgeError::InvalidArgument(_) => ErrorKind::InvalidArgumentError,
            BridgeError::InvalidState(_) => ErrorKind::InvalidStateError,
            BridgeError::Automation(_) => ErrorKind::AutomationError,
            BridgeError::Cancelled => ErrorKind::CancelledError,
        }
    }

    /// True for errors meaning "Live is not there", as opposed to a bad request
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BridgeError::Connection(_) | BridgeError::Timeout { .. })
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from(self)
    }
}

/// Uniform error shape handed to the hosting protocol layer
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&BridgeError> for ErrorReport {
    fn from(err: &BridgeError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

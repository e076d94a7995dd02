//! Error types for streaming voice sessions.
//!
//! The taxonomy separates fatal errors, which terminate the session and
//! trigger teardown, from non-fatal errors, which are contained to the
//! frame or block that caused them:
//!
//! - Fatal: `ConnectionFailed`, `HandshakeRejected`, `DeviceUnavailable`,
//!   `Internal`
//! - Non-fatal: `MalformedFrame` (frame dropped), `DeviceRead` (retried on
//!   the next block), `DeviceWrite` (block dropped)

use thiserror::Error;

/// Errors that can occur during a streaming session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connection to the service failed, including the bounded connect
    /// timeout elapsing. Fatal; the session does not retry internally.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The handshake event could not be delivered. Fatal; raised before
    /// streaming begins.
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// An audio frame was not valid wire text. Non-fatal; the frame is
    /// dropped and the pipeline continues.
    #[error("Malformed audio frame: {0}")]
    MalformedFrame(String),

    /// The input device failed to produce a block. Non-fatal; the capture
    /// pipeline retries on the next iteration.
    #[error("Device read failed: {0}")]
    DeviceRead(String),

    /// The output device rejected a block. Non-fatal; the block is dropped
    /// and playback continues.
    #[error("Device write failed: {0}")]
    DeviceWrite(String),

    /// An audio device could not be opened at session start. Fatal.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether this error terminates the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::MalformedFrame(_)
                | SessionError::DeviceRead(_)
                | SessionError::DeviceWrite(_)
        )
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

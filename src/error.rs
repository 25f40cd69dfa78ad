//! Error types for the control and log protocols.
//!
//! [`ProtocolError`] covers everything a decoder or encoder can reject on its
//! own, without touching a socket. [`Error`] is the crate-level error that
//! adds malformed user input, transport failures and peer closure.

use std::io;
use thiserror::Error;

/// Failures of the crate's public operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A textual address could not be parsed.
    #[error("malformed address {input:?}: {reason}")]
    Format { input: String, reason: &'static str },

    /// Bytes were received (or about to be sent) that violate the wire format.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport reported an error, including a write that made no progress.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream before a complete frame arrived.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Maps an error from a framed read, turning end-of-stream into
    /// [`Error::ConnectionClosed`].
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            Error::Io(err)
        }
    }

    /// Returns true when the stream can no longer be read in frame order.
    ///
    /// Most protocol errors only poison the record they were found in; the
    /// length prefix was consumed correctly, so the next frame is still
    /// aligned. An oversized prefix is the exception: its body was never read.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectionClosed
                | Error::Protocol(ProtocolError::FrameTooLarge { .. })
        )
    }
}

/// Wire format violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported envelope version {0}, expected 0")]
    BadVersion(u8),

    #[error("length mismatch: expected {expected} payload bytes, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("unknown control message type {0}")]
    UnknownType(u8),

    #[error("unknown log type {0:#04x}")]
    UnknownLogType(u8),

    #[error("unknown command code {0}")]
    UnknownCommand(u8),

    #[error("target count {declared} does not match {actual} targets in payload")]
    CountMismatch { declared: u32, actual: usize },

    #[error("unsupported address family {0}, expected AF_INET")]
    BadFamily(i16),

    #[error("truncated {context}: need {need} bytes, got {got}")]
    Truncated {
        context: &'static str,
        need: usize,
        got: usize,
    },

    #[error("payload of {0} bytes does not fit a 32-bit length field")]
    PayloadTooLarge(usize),

    #[error("{0} targets do not fit a 32-bit count field")]
    TooManyTargets(usize),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Result of a pure encode or decode step.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

use thiserror::Error;

/// Errors produced by the framing and command layers.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A read deadline expired before any byte of the current unit arrived.
    #[error("timeout")]
    Timeout,

    #[error("bad packet: {0}")]
    BadPacket(String),

    /// The peer closed the stream.
    #[error("connection closed")]
    Closed,

    /// A frame could not be written before the write deadline.
    #[error("write timed out")]
    WriteTimeout,

    #[error("write mismatch: wrote {written} of {expected} bytes")]
    Mismatch { expected: usize, written: usize },

    #[error("frame too large: {0} bytes (max 65535)")]
    FrameTooLarge(usize),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed command: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether a read loop must stop after seeing this error.
    ///
    /// Only `Timeout` is retryable; every other transport error ends the
    /// session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RelayError::Timeout)
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

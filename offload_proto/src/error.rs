use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Peer closed early: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("Failed to write {expected} bytes: {source}")]
    ShortWrite {
        expected: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("Timed out after {after_ms}ms while {stage}")]
    Timeout { stage: &'static str, after_ms: u128 },
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed length: {0}")]
    MalformedLength(String),
    #[error("Malformed header: {0}")]
    MalformedHeader(String),
    #[error("Unexpected status code {0}")]
    UnexpectedStatus(u16),
    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),
    #[error("Result contains an embedded terminator at offset {0}")]
    EmbeddedTerminator(usize),
    #[error("Response body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Anything that can go wrong while moving one request/response over a wire.
#[derive(Error, Debug)]
pub enum WireError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> Self {
        WireError::Transport(TransportError::Io(err))
    }
}

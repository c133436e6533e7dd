use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Payload could not be decoded: {0}")]
    Undecodable(String),
    #[error("Analysis failed: {0}")]
    Failed(String),
}

/// The shared inference routine behind the server.
///
/// Only the accept loop calls it, one payload at a time, so implementations
/// hold mutable state freely and need no internal locking.
pub trait Analyzer: Send + 'static {
    fn analyze(&mut self, payload: &[u8]) -> Result<String, AnalyzerError>;
}

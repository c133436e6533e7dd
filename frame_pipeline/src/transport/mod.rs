mod http;
mod response;
mod unix;

pub use http::{HttpClient, HttpTransport, PostRequest};
pub use response::{parse_response, HttpResponse, ParseState, ResponseLimits, ResponseParser};
pub use unix::UnixTransport;

use crate::config::AnalyzerConfig;
use async_trait::async_trait;
use offload_proto::{ProtocolError, Timeouts, WireError};

/// Ships one encoded frame to the analyzer and returns the raw result bytes.
///
/// Every exchange is a fresh connection: `transmit` opens it and sends the
/// payload, `await_response` reads the answer and closes it.
#[async_trait]
pub trait AnalyzerTransport: Send {
    async fn transmit(&mut self, payload: &[u8]) -> Result<(), WireError>;
    async fn await_response(&mut self) -> Result<Vec<u8>, WireError>;
    fn endpoint(&self) -> String;
    /// Short label for logs and metrics.
    fn kind(&self) -> &'static str;
}

pub(crate) fn no_request_in_flight() -> WireError {
    ProtocolError::MalformedHeader("no request in flight".to_string()).into()
}

pub fn build_transport(
    config: &AnalyzerConfig,
    timeouts: Timeouts,
    content_type: &'static str,
) -> Box<dyn AnalyzerTransport> {
    match config {
        AnalyzerConfig::Unix {
            socket_path,
            max_result_bytes,
        } => Box::new(UnixTransport::new(
            socket_path.clone(),
            timeouts,
            *max_result_bytes,
        )),
        AnalyzerConfig::Http {
            host,
            port,
            path,
            content_type: configured,
            max_result_bytes,
        } => {
            let client = HttpClient::new(host.clone(), *port, timeouts, *max_result_bytes);
            let content_type = configured
                .clone()
                .unwrap_or_else(|| content_type.to_string());
            Box::new(HttpTransport::new(client, path.clone(), content_type))
        }
    }
}

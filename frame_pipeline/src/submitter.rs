use crate::{
    config::ResultSubmissionConfig,
    result::AnalysisResult,
    token::Token,
    transport::{HttpClient, PostRequest},
};
use offload_proto::{Timeouts, WireError};
use tracing::instrument;

const SUBMISSION_RESPONSE_LIMIT: usize = 64 * 1024;

/// Forwards analysis results to the collection service, keyed by instance
/// token. Best effort: one attempt per result, failures go back to the caller.
#[derive(Debug, Clone)]
pub struct ResultSubmitter {
    client: HttpClient,
    path: String,
    token: Token,
}

impl ResultSubmitter {
    pub fn new(config: &ResultSubmissionConfig, token: Token, timeouts: Timeouts) -> Self {
        let client = HttpClient::new(
            config.host.clone(),
            config.port,
            timeouts,
            SUBMISSION_RESPONSE_LIMIT,
        );
        let path = format!(
            "{}/{}",
            config.path_prefix.trim_end_matches('/'),
            token.as_str()
        );
        Self {
            client,
            path,
            token,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    #[instrument(skip(self, result), fields(token = %self.token))]
    pub async fn submit(&self, result: &AnalysisResult) -> Result<(), WireError> {
        let request = PostRequest {
            path: &self.path,
            content_type: "application/json",
            headers: &[("X-Instance-Token", self.token.as_str())],
            body: result.as_bytes(),
        };
        self.client.post(&request).await?;
        tracing::debug!("Submitted {} byte result to {}", result.as_bytes().len(), self.path);
        Ok(())
    }
}

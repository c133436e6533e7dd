use offload_proto::ProtocolError;
use std::fmt;

/// Text the analyzer produced for one frame. Conventionally JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisResult {
    body: String,
}

impl AnalysisResult {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ProtocolError> {
        let body = String::from_utf8(bytes)?;
        Ok(Self { body })
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.body.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Parses the body as JSON. Analyzers are free to answer with plain text,
    /// in which case this returns `None`.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.body)
    }
}

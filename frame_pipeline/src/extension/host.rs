use crate::{
    config::{AnalyzerConfig, Config, EncoderConfig, FrameConfig, ResultSubmissionConfig},
    telemetry::Metrics,
    token::Token,
};
use offload_proto::Timeouts;
use std::{collections::HashMap, sync::Arc};

/// Everything the host hands to an extension: instance identity, the
/// configured frame geometry and analyzer endpoint, and module options.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub token: Token,
    pub frame: FrameConfig,
    pub analyzer: AnalyzerConfig,
    pub timeouts: Timeouts,
    pub encoder: EncoderConfig,
    pub result_submission: Option<ResultSubmissionConfig>,
    pub options: HashMap<String, String>,
    pub metrics: Arc<Metrics>,
}

impl HostContext {
    pub fn from_config(config: &Config, token: Token, metrics: Arc<Metrics>) -> Self {
        Self {
            token,
            frame: config.frame.clone(),
            analyzer: config.analyzer.clone(),
            timeouts: config.timeouts.timeouts(),
            encoder: config.encoder.clone(),
            result_submission: config.result_submission.clone(),
            options: config.extension.options.clone(),
            metrics,
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> HostContext {
    use crate::frame::PixelFormat;

    HostContext {
        token: Token::new("test-instance").unwrap(),
        frame: FrameConfig {
            width: 2,
            height: 2,
            pixel_format: PixelFormat::Bgr24,
        },
        analyzer: AnalyzerConfig::Unix {
            socket_path: std::path::PathBuf::from("/nonexistent/frame-analyzer.socket"),
            max_result_bytes: 1024,
        },
        timeouts: Timeouts::default(),
        encoder: EncoderConfig::default(),
        result_submission: None,
        options: HashMap::new(),
        metrics: Arc::new(Metrics::new().unwrap()),
    }
}

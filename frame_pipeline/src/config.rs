use crate::frame::PixelFormat;
use offload_proto::Timeouts;
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub instance: InstanceConfig,
    pub extension: ExtensionConfig,
    pub frame: FrameConfig,
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub result_submission: Option<ResultSubmissionConfig>,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.frame.validate()?;
        self.analyzer.validate()?;
        if let Some(result_submission) = &self.result_submission {
            result_submission.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InstanceConfig {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtensionConfig {
    pub module: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FrameConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub pixel_format: PixelFormat,
}

impl FrameConfig {
    pub fn frame_len(&self) -> Option<usize> {
        self.pixel_format.frame_len(self.width, self.height)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!(
                "Frame dimensions must be positive, got {}x{}",
                self.width, self.height
            ));
        }
        if self.frame_len().is_none() {
            return Err(format!(
                "A {}x{} {} frame is too large",
                self.width, self.height, self.pixel_format
            ));
        }
        Ok(())
    }
}

/// Where frames are sent for analysis.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum AnalyzerConfig {
    Unix {
        #[serde(default = "default_socket_path")]
        socket_path: PathBuf,
        #[serde(default = "default_max_result_bytes")]
        max_result_bytes: usize,
    },
    Http {
        host: String,
        #[serde(default = "default_analyzer_port")]
        port: u16,
        #[serde(default = "default_analyzer_path")]
        path: String,
        #[serde(default)]
        content_type: Option<String>,
        #[serde(default = "default_max_result_bytes")]
        max_result_bytes: usize,
    },
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            AnalyzerConfig::Unix { .. } => Ok(()),
            AnalyzerConfig::Http {
                host,
                path,
                content_type,
                ..
            } => {
                check_host("analyzer.host", host)?;
                check_request_path("analyzer.path", path)?;
                match content_type {
                    Some(content_type) => check_header_value("analyzer.content_type", content_type),
                    None => Ok(()),
                }
            }
        }
    }
}

/// These end up verbatim in an HTTP request head.
fn check_host(field: &str, host: &str) -> Result<(), String> {
    if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/') {
        return Err(format!("{} must be a bare host name, got {:?}", field, host));
    }
    Ok(())
}

fn check_request_path(field: &str, path: &str) -> Result<(), String> {
    if !path.starts_with('/') || path.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!(
            "{} must start with '/' and contain no whitespace, got {:?}",
            field, path
        ));
    }
    Ok(())
}

fn check_header_value(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() || value.chars().any(|c| c.is_control()) {
        return Err(format!("{} is not a valid header value: {:?}", field, value));
    }
    Ok(())
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/frame-analyzer.socket")
}

fn default_max_result_bytes() -> usize {
    1024 * 1024
}

fn default_analyzer_port() -> u16 {
    9901
}

fn default_analyzer_path() -> String {
    "/post_img".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub read_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub write_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    1_000
}

fn default_io_timeout_ms() -> u64 {
    5_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout_ms(),
            read_ms: default_io_timeout_ms(),
            write_ms: default_io_timeout_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from_millis(self.connect_ms, self.read_ms, self.write_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    #[default]
    Jpeg,
    Raw,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EncoderConfig {
    #[serde(default)]
    pub kind: EncoderKind,
    #[serde(default = "default_jpeg_quality")]
    pub quality: u8,
    #[serde(default)]
    pub max_encoded_bytes: Option<usize>,
}

fn default_jpeg_quality() -> u8 {
    80
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            kind: EncoderKind::default(),
            quality: default_jpeg_quality(),
            max_encoded_bytes: None,
        }
    }
}

/// Secondary endpoint that collects analysis results per instance token.
#[derive(Debug, Deserialize, Clone)]
pub struct ResultSubmissionConfig {
    pub host: String,
    #[serde(default = "default_result_port")]
    pub port: u16,
    #[serde(default = "default_result_path_prefix")]
    pub path_prefix: String,
}

impl ResultSubmissionConfig {
    pub fn validate(&self) -> Result<(), String> {
        check_host("result_submission.host", &self.host)?;
        check_request_path("result_submission.path_prefix", &self.path_prefix)
    }
}

fn default_result_port() -> u16 {
    9902
}

fn default_result_path_prefix() -> String {
    "/post_result".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("FP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

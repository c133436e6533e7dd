mod analyzer;
mod server;
mod stats_analyzer;

pub mod config;

pub use analyzer::{Analyzer, AnalyzerError};
pub use server::{start_server, FramedServer, ServerSettings};
pub use stats_analyzer::FrameStatsAnalyzer;

mod result;
mod source;
mod submitter;

pub mod app;
pub mod config;
pub mod encoder;
pub mod extension;
pub mod frame;
pub mod pipeline;
pub mod telemetry;
pub mod token;
pub mod transport;

pub use app::{run_frames, start_app, RunSummary};
pub use result::AnalysisResult;
pub use source::RawFrameSource;
pub use submitter::ResultSubmitter;

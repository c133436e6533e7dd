use crate::{
    encoder::{EncodeError, FrameEncoder},
    frame::FrameDescriptor,
    result::AnalysisResult,
    submitter::ResultSubmitter,
    telemetry::Metrics,
    transport::AnalyzerTransport,
};
use offload_proto::WireError;
use std::{fmt, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Idle,
    Encoding,
    Transmitting,
    AwaitingResponse,
    Parsing,
    Done,
    Failed,
}

impl FrameStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameStage::Idle => "idle",
            FrameStage::Encoding => "encoding",
            FrameStage::Transmitting => "transmitting",
            FrameStage::AwaitingResponse => "awaiting_response",
            FrameStage::Parsing => "parsing",
            FrameStage::Done => "done",
            FrameStage::Failed => "failed",
        }
    }
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// What happened to one frame. A failed frame carries an empty result.
#[derive(Debug)]
pub struct FrameReport {
    pub stage: FrameStage,
    pub failed_at: Option<FrameStage>,
    pub result: AnalysisResult,
    pub error: Option<FrameError>,
    /// `None` when no collection endpoint is configured or the frame failed.
    pub submission: Option<Result<(), WireError>>,
}

impl FrameReport {
    pub fn is_done(&self) -> bool {
        self.stage == FrameStage::Done
    }
}

/// Encode, ship, await and parse one frame at a time.
pub struct FramePipeline {
    encoder: Box<dyn FrameEncoder>,
    transport: Box<dyn AnalyzerTransport>,
    submitter: Option<ResultSubmitter>,
    metrics: Arc<Metrics>,
    stage: FrameStage,
    frames_seen: u64,
}

impl FramePipeline {
    pub fn new(
        encoder: Box<dyn FrameEncoder>,
        transport: Box<dyn AnalyzerTransport>,
        submitter: Option<ResultSubmitter>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            encoder,
            transport,
            submitter,
            metrics,
            stage: FrameStage::Idle,
            frames_seen: 0,
        }
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn encoder(&self) -> &dyn FrameEncoder {
        self.encoder.as_ref()
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// Runs one frame through every stage. Never fails: a broken stage is
    /// reported and the pipeline is ready for the next frame.
    #[instrument(skip(self, frame), fields(frame = self.frames_seen + 1, transport = self.transport.kind()))]
    pub async fn process(&mut self, frame: &FrameDescriptor<'_>) -> FrameReport {
        self.frames_seen += 1;

        match self.run_stages(frame).await {
            Ok(result) => {
                self.stage = FrameStage::Done;
                self.metrics.record_frame("done", FrameStage::Done.as_str());
                tracing::debug!("Frame {} analysed: {}", self.frames_seen, result);

                let submission = match self.submitter.as_ref() {
                    Some(submitter) => Some(submit(submitter, &self.metrics, &result).await),
                    None => None,
                };
                FrameReport {
                    stage: FrameStage::Done,
                    failed_at: None,
                    result,
                    error: None,
                    submission,
                }
            }
            Err(error) => {
                let failed_at = self.stage;
                self.stage = FrameStage::Failed;
                self.metrics.record_frame("failed", failed_at.as_str());
                tracing::warn!(
                    "Frame {} abandoned while {}: {}",
                    self.frames_seen,
                    failed_at,
                    error
                );
                FrameReport {
                    stage: FrameStage::Failed,
                    failed_at: Some(failed_at),
                    result: AnalysisResult::default(),
                    error: Some(error),
                    submission: None,
                }
            }
        }
    }

    async fn run_stages(&mut self, frame: &FrameDescriptor<'_>) -> Result<AnalysisResult, FrameError> {
        self.stage = FrameStage::Encoding;
        let payload = self.encoder.encode(frame)?;
        self.metrics.record_encoded_bytes(payload.len());

        let started = Instant::now();
        self.stage = FrameStage::Transmitting;
        self.transport.transmit(payload).await?;

        self.stage = FrameStage::AwaitingResponse;
        let bytes = self.transport.await_response().await?;

        self.stage = FrameStage::Parsing;
        let result = AnalysisResult::from_bytes(bytes).map_err(WireError::from)?;

        self.metrics
            .record_analysis_duration(started.elapsed().as_millis() as u64, self.transport.kind());
        Ok(result)
    }
}

async fn submit(
    submitter: &ResultSubmitter,
    metrics: &Metrics,
    result: &AnalysisResult,
) -> Result<(), WireError> {
    let outcome = submitter.submit(result).await;
    match &outcome {
        Ok(()) => metrics.record_submission("submitted"),
        Err(e) => {
            metrics.record_submission("failed");
            tracing::warn!("Result submission to {} failed: {}", submitter.path(), e);
        }
    }
    outcome
}

//! Ships every frame to the shared analyzer and optionally forwards the
//! result to the collection service.

use super::{
    abi::{CapabilityTable, FrameStatus},
    host::HostContext,
};
use crate::{
    encoder::build_encoder,
    frame::{FrameDescriptor, PixelFormat},
    pipeline::FramePipeline,
    submitter::ResultSubmitter,
    transport::build_transport,
};
use futures::future::BoxFuture;

pub const MODULE_NAME: &str = "analyzer-client";

#[derive(Default)]
pub struct AnalyzerClientState {
    pipeline: Option<FramePipeline>,
    log_results: bool,
    failures: u64,
}

pub fn capabilities() -> CapabilityTable<AnalyzerClientState> {
    CapabilityTable {
        init: Some(init),
        uninit: Some(uninit),
        query_supported_formats: Some(query_supported_formats),
        handle_frame: Some(handle_frame),
    }
}

fn init(host: &HostContext) -> Result<AnalyzerClientState, String> {
    let log_results = match host.option("log_results") {
        None => false,
        Some(value) => value
            .parse::<bool>()
            .map_err(|_| format!("log_results must be true or false, got {:?}", value))?,
    };

    let encoder = build_encoder(&host.encoder);
    let transport = build_transport(&host.analyzer, host.timeouts, encoder.content_type());
    let submitter = host
        .result_submission
        .as_ref()
        .map(|config| ResultSubmitter::new(config, host.token.clone(), host.timeouts));

    tracing::info!(
        "Analyzer client for {} sending {} frames to {}{}",
        host.token,
        encoder.content_type(),
        transport.endpoint(),
        submitter
            .as_ref()
            .map(|s| format!(", results to {}", s.path()))
            .unwrap_or_default()
    );

    Ok(AnalyzerClientState {
        pipeline: Some(FramePipeline::new(
            encoder,
            transport,
            submitter,
            host.metrics.clone(),
        )),
        log_results,
        failures: 0,
    })
}

fn uninit(host: &HostContext, state: AnalyzerClientState) {
    let frames = state
        .pipeline
        .as_ref()
        .map(FramePipeline::frames_seen)
        .unwrap_or_default();
    tracing::info!(
        "Analyzer client for {} processed {} frames, {} failed",
        host.token,
        frames,
        state.failures
    );
}

fn query_supported_formats(_: &HostContext, state: &AnalyzerClientState) -> Vec<PixelFormat> {
    state
        .pipeline
        .as_ref()
        .map(|pipeline| pipeline.encoder().supported_formats().to_vec())
        .unwrap_or_default()
}

fn handle_frame<'a>(
    _: &'a HostContext,
    state: &'a mut AnalyzerClientState,
    frame: FrameDescriptor<'a>,
) -> BoxFuture<'a, FrameStatus> {
    Box::pin(async move {
        let Some(pipeline) = state.pipeline.as_mut() else {
            return FrameStatus::Failed;
        };

        let report = pipeline.process(&frame).await;
        if !report.is_done() {
            state.failures += 1;
            return FrameStatus::Failed;
        }

        if state.log_results {
            match report.result.json() {
                Some(json) => tracing::info!(result = %json, "Analysis result"),
                None => tracing::info!(result = %report.result, "Analysis result"),
            }
        }
        FrameStatus::Handled
    })
}

//! Logs frame geometry without contacting any analyzer. Useful for checking a
//! frame source before pointing it at a shared analyzer.

use super::{
    abi::{CapabilityTable, FrameStatus},
    host::HostContext,
};
use crate::frame::{FrameDescriptor, PixelFormat};
use futures::future::BoxFuture;

pub const MODULE_NAME: &str = "frame-logger";

#[derive(Debug, Default)]
pub struct FrameLoggerState {
    frames: u64,
    bytes: u64,
}

pub fn capabilities() -> CapabilityTable<FrameLoggerState> {
    CapabilityTable {
        init: None,
        uninit: Some(uninit),
        query_supported_formats: Some(query_supported_formats),
        handle_frame: Some(handle_frame),
    }
}

fn log_every(host: &HostContext) -> u64 {
    host.option("log_every")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1)
}

fn uninit(host: &HostContext, state: FrameLoggerState) {
    tracing::info!(
        "Frame logger for {} saw {} frames ({} bytes)",
        host.token,
        state.frames,
        state.bytes
    );
}

fn query_supported_formats(_: &HostContext, _: &FrameLoggerState) -> Vec<PixelFormat> {
    PixelFormat::ALL.to_vec()
}

fn handle_frame<'a>(
    host: &'a HostContext,
    state: &'a mut FrameLoggerState,
    frame: FrameDescriptor<'a>,
) -> BoxFuture<'a, FrameStatus> {
    Box::pin(async move {
        state.frames += 1;
        state.bytes += frame.data().len() as u64;

        if (state.frames - 1) % log_every(host) != 0 {
            return FrameStatus::Skipped;
        }
        tracing::info!(
            frame = state.frames,
            width = frame.width(),
            height = frame.height(),
            format = %frame.format(),
            "Frame received"
        );
        FrameStatus::Handled
    })
}

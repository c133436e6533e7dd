use opentelemetry::{
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to build the Prometheus exporter: {0}")]
    Exporter(String),
    #[error("Failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
    #[error("Encoded metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Per-instance counters for the frame path. Owns its meter provider so
/// several instances (and tests) never share readers.
pub struct Metrics {
    frames: Counter<u64>,
    dispatches: Counter<u64>,
    submissions: Counter<u64>,
    analysis_duration: Histogram<u64>,
    encoded_bytes: Histogram<u64>,
    registry: Registry,
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| MetricsError::Exporter(e.to_string()))?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("frame_pipeline");

        let frames = meter
            .u64_counter("frames_total")
            .with_description("Frames processed, by outcome and failing stage")
            .build();

        let dispatches = meter
            .u64_counter("dispatches_total")
            .with_description("Frames handed to the extension, by returned status")
            .build();

        let submissions = meter
            .u64_counter("result_submissions_total")
            .with_description("Results forwarded to the collection service, by outcome")
            .build();

        let analysis_duration = meter
            .u64_histogram("analysis_duration_ms")
            .with_boundaries(generate_boundaries((5, 25, 45, 245, 1245)))
            .with_description("Round trip of one frame through the analyzer in milliseconds")
            .build();

        let encoded_bytes = meter
            .u64_histogram("encoded_frame_bytes")
            .with_boundaries(vec![
                16_384.0, 65_536.0, 262_144.0, 1_048_576.0, 4_194_304.0, 8_388_608.0,
            ])
            .with_description("Size of encoded frames sent to the analyzer")
            .build();

        Ok(Metrics {
            frames,
            dispatches,
            submissions,
            analysis_duration,
            encoded_bytes,
            registry,
            _provider: provider,
        })
    }

    pub fn record_frame(&self, outcome: &'static str, stage: &'static str) {
        let attributes = [
            KeyValue::new("outcome", outcome),
            KeyValue::new("stage", stage),
        ];
        self.frames.add(1, &attributes);
    }

    pub fn record_dispatch(&self, status: &'static str) {
        self.dispatches.add(1, &[KeyValue::new("status", status)]);
    }

    pub fn record_submission(&self, outcome: &'static str) {
        self.submissions.add(1, &[KeyValue::new("outcome", outcome)]);
    }

    pub fn record_analysis_duration(&self, duration_ms: u64, transport: &'static str) {
        self.analysis_duration
            .record(duration_ms, &[KeyValue::new("transport", transport)]);
    }

    pub fn record_encoded_bytes(&self, bytes: usize) {
        self.encoded_bytes.record(bytes as u64, &[]);
    }

    /// Current values in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 5;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

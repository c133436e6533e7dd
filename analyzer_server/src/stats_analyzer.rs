use crate::{
    analyzer::{Analyzer, AnalyzerError},
    config::FrameConfig,
};
use image::GenericImageView;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct FrameSummary {
    frame: u64,
    width: u32,
    height: u32,
    payload_bytes: usize,
    source: &'static str,
    mean_luma: f32,
    results: Vec<serde_json::Value>,
}

fn mean_luma_bgr(pixels: &[u8]) -> f32 {
    let count = pixels.len() / 3;
    if count == 0 {
        return 0.0;
    }
    let sum: f64 = pixels
        .chunks_exact(3)
        .map(|px| 0.114 * px[0] as f64 + 0.587 * px[1] as f64 + 0.299 * px[2] as f64)
        .sum();
    (sum / count as f64) as f32
}

fn decode_compressed(payload: &[u8]) -> Result<(u32, u32, f32), AnalyzerError> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(payload))
        .with_guessed_format()
        .map_err(|e| AnalyzerError::Undecodable(format!("Error reading image: {}", e)))?;

    let img = image_reader
        .decode()
        .map_err(|e| AnalyzerError::Undecodable(format!("Error decoding image: {}", e)))?;

    let (width, height) = img.dimensions();
    let luma = img.to_luma8();
    let raw = luma.as_raw();
    let mean = if raw.is_empty() {
        0.0
    } else {
        (raw.iter().map(|v| *v as f64).sum::<f64>() / raw.len() as f64) as f32
    };

    Ok((width, height, mean))
}

/// Stand-in for the inference routine: reports frame geometry and brightness
/// in the JSON shape producers expect.
///
/// A payload of exactly `width * height * 3` bytes is taken as a raw BGR24
/// frame; anything else is decoded as a compressed image.
#[derive(Debug)]
pub struct FrameStatsAnalyzer {
    width: u32,
    height: u32,
    analyzed: u64,
}

impl FrameStatsAnalyzer {
    pub fn new(frame: &FrameConfig) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            analyzed: 0,
        }
    }

    fn raw_frame_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(3)
    }
}

impl Analyzer for FrameStatsAnalyzer {
    fn analyze(&mut self, payload: &[u8]) -> Result<String, AnalyzerError> {
        let (width, height, source, mean_luma) = if Some(payload.len()) == self.raw_frame_len() {
            (self.width, self.height, "raw_bgr24", mean_luma_bgr(payload))
        } else {
            let (width, height, mean) = decode_compressed(payload)?;
            (width, height, "compressed", mean)
        };

        self.analyzed += 1;
        tracing::debug!(
            "Frame {}: {}x{} from {} byte {} payload, mean luma {:.1}",
            self.analyzed,
            width,
            height,
            payload.len(),
            source,
            mean_luma
        );

        let summary = FrameSummary {
            frame: self.analyzed,
            width,
            height,
            payload_bytes: payload.len(),
            source,
            mean_luma,
            results: Vec::new(),
        };
        serde_json::to_string(&summary).map_err(|e| AnalyzerError::Failed(e.to_string()))
    }
}

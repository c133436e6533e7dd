use crate::{
    config::{EncoderConfig, EncoderKind},
    frame::{FrameDescriptor, PixelFormat},
};
use image::{codecs::jpeg::JpegEncoder, ExtendedColorType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("The {codec} codec does not accept {format} frames")]
    UnsupportedFormat {
        codec: &'static str,
        format: PixelFormat,
    },
    #[error("Codec rejected the frame: {0}")]
    CodecRejected(String),
}

/// Turns a raw frame into a self-contained buffer the analyzer can consume.
///
/// The returned slice borrows the encoder's internal storage and is only
/// valid until the next call to `encode`.
pub trait FrameEncoder: Send {
    fn content_type(&self) -> &'static str;
    fn supported_formats(&self) -> &'static [PixelFormat];
    fn encode(&mut self, frame: &FrameDescriptor<'_>) -> Result<&[u8], EncodeError>;
}

pub fn build_encoder(config: &EncoderConfig) -> Box<dyn FrameEncoder> {
    match config.kind {
        EncoderKind::Jpeg => Box::new(JpegFrameEncoder::new(
            config.quality,
            config.max_encoded_bytes,
        )),
        EncoderKind::Raw => Box::new(RawFrameEncoder::new(config.max_encoded_bytes)),
    }
}

fn check_bound(len: usize, max_encoded_bytes: Option<usize>) -> Result<(), EncodeError> {
    match max_encoded_bytes {
        Some(max) if len > max => Err(EncodeError::CodecRejected(format!(
            "encoded frame of {} bytes exceeds the {} byte bound",
            len, max
        ))),
        _ => Ok(()),
    }
}

fn bgr_to_rgb(bgr: &[u8], rgb: &mut Vec<u8>) {
    rgb.clear();
    rgb.reserve(bgr.len());
    for px in bgr.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
}

pub struct JpegFrameEncoder {
    quality: u8,
    max_encoded_bytes: Option<usize>,
    output: Vec<u8>,
    scratch: Vec<u8>,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8, max_encoded_bytes: Option<usize>) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            max_encoded_bytes,
            output: Vec::new(),
            scratch: Vec::new(),
        }
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn content_type(&self) -> &'static str {
        "image/jpeg"
    }

    fn supported_formats(&self) -> &'static [PixelFormat] {
        &[PixelFormat::Bgr24, PixelFormat::Rgb24, PixelFormat::Gray8]
    }

    fn encode(&mut self, frame: &FrameDescriptor<'_>) -> Result<&[u8], EncodeError> {
        let (pixels, color_type): (&[u8], ExtendedColorType) = match frame.format() {
            PixelFormat::Rgb24 => (frame.data(), ExtendedColorType::Rgb8),
            PixelFormat::Gray8 => (frame.data(), ExtendedColorType::L8),
            PixelFormat::Bgr24 => {
                bgr_to_rgb(frame.data(), &mut self.scratch);
                (self.scratch.as_slice(), ExtendedColorType::Rgb8)
            }
            format => {
                return Err(EncodeError::UnsupportedFormat {
                    codec: "jpeg",
                    format,
                })
            }
        };

        self.output.clear();
        JpegEncoder::new_with_quality(&mut self.output, self.quality)
            .encode(pixels, frame.width(), frame.height(), color_type)
            .map_err(|e| EncodeError::CodecRejected(e.to_string()))?;

        check_bound(self.output.len(), self.max_encoded_bytes)?;
        Ok(&self.output)
    }
}

/// Ships pixel bytes unchanged.
pub struct RawFrameEncoder {
    max_encoded_bytes: Option<usize>,
    output: Vec<u8>,
}

impl RawFrameEncoder {
    pub fn new(max_encoded_bytes: Option<usize>) -> Self {
        Self {
            max_encoded_bytes,
            output: Vec::new(),
        }
    }
}

impl FrameEncoder for RawFrameEncoder {
    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }

    fn supported_formats(&self) -> &'static [PixelFormat] {
        &PixelFormat::ALL
    }

    fn encode(&mut self, frame: &FrameDescriptor<'_>) -> Result<&[u8], EncodeError> {
        check_bound(frame.data().len(), self.max_encoded_bytes)?;
        self.output.clear();
        self.output.extend_from_slice(frame.data());
        Ok(&self.output)
    }
}

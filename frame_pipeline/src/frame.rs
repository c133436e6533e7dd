use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Bgr24,
    Rgb24,
    Gray8,
    Bgra32,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 4] = [
        PixelFormat::Bgr24,
        PixelFormat::Rgb24,
        PixelFormat::Gray8,
        PixelFormat::Bgra32,
    ];

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => 3,
            PixelFormat::Bgra32 => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Bgra32 => "bgra32",
        }
    }

    /// Bytes in one `width` x `height` frame, or `None` if that does not
    /// fit in a `usize`.
    pub fn frame_len(&self, width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(self.bytes_per_pixel())
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameDescriptorError {
    #[error("Frame dimensions must be positive, got {width}x{height}")]
    EmptyFrame { width: u32, height: u32 },
    #[error("A {width}x{height} {format} frame is too large to address")]
    TooLarge {
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    #[error("A {width}x{height} {format} frame needs {expected} bytes, got {actual}")]
    SizeMismatch {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// A borrowed view of one raw frame. Lives only as long as the dispatch that
/// received it.
#[derive(Debug, Clone, Copy)]
pub struct FrameDescriptor<'a> {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: &'a [u8],
}

impl<'a> FrameDescriptor<'a> {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: &'a [u8],
    ) -> Result<Self, FrameDescriptorError> {
        if width == 0 || height == 0 {
            return Err(FrameDescriptorError::EmptyFrame { width, height });
        }
        let expected = format
            .frame_len(width, height)
            .ok_or(FrameDescriptorError::TooLarge {
                width,
                height,
                format,
            })?;
        if data.len() != expected {
            return Err(FrameDescriptorError::SizeMismatch {
                width,
                height,
                format,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

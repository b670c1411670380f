//! Conversion boundary
//!
//! The external transcoding service used by destructive edits, exports and
//! thumbnail sampling.

use async_trait::async_trait;

use super::types::ExportQuality;
use crate::capture::traits::VideoFrame;
use crate::edit::types::{CropRect, TrimRange};
use crate::encoder::types::{Artifact, EncodingFormat};
use crate::utils::error::{AppResult, ConversionStage};

/// One conversion step
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOp {
    Trim(TrimRange),
    Crop(CropRect),
    /// Re-encode to `format`; a format without audio strips the audio track
    Transcode {
        format: EncodingFormat,
        quality: ExportQuality,
        watermark: bool,
    },
}

impl ConversionOp {
    pub fn stage(&self) -> ConversionStage {
        match self {
            ConversionOp::Trim(_) => ConversionStage::Trim,
            ConversionOp::Crop(_) => ConversionStage::Crop,
            ConversionOp::Transcode { .. } => ConversionStage::Transcode,
        }
    }
}

/// Optional stages a converter can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConverterCapabilities {
    pub watermark: bool,
    pub strip_audio: bool,
}

#[async_trait]
pub trait Converter: Send + Sync {
    fn capabilities(&self) -> ConverterCapabilities;

    /// Produce a new artifact; the input is never modified
    async fn convert(&self, input: &Artifact, op: &ConversionOp) -> AppResult<Artifact>;

    /// Decode one frame at `at_ms`
    async fn sample_frame(&self, input: &Artifact, at_ms: u64) -> AppResult<VideoFrame>;
}

//! Export types and configuration
//!
//! This module defines the types used for export requests, progress
//! tracking and partial-success reporting.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capture::traits::QualityTier;
use crate::edit::types::{CropRect, TrimRange};
use crate::encoder::types::{Artifact, AudioCodec, Container, EncodingFormat, VideoCodec};

/// Export quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportQuality {
    Low,
    #[default]
    Medium,
    High,
    Lossless,
}

impl ExportQuality {
    /// Get the CRF value for H.264/VP9 encoding
    /// Lower values = higher quality, larger files
    pub fn crf(&self) -> u8 {
        match self {
            ExportQuality::Low => 28,
            ExportQuality::Medium => 23,
            ExportQuality::High => 18,
            // CRF 0 has compatibility issues with yuv420p
            ExportQuality::Lossless => 1,
        }
    }

    /// Get the FFmpeg preset for H.264 encoding
    pub fn h264_preset(&self) -> &'static str {
        match self {
            ExportQuality::Low => "faster",
            ExportQuality::Medium => "medium",
            ExportQuality::High => "slow",
            ExportQuality::Lossless => "veryslow",
        }
    }

    /// Frame rate cap for GIF output
    pub fn gif_fps(&self) -> u32 {
        match self {
            ExportQuality::Low => 10,
            ExportQuality::Medium => 12,
            ExportQuality::High | ExportQuality::Lossless => 15,
        }
    }
}

impl From<QualityTier> for ExportQuality {
    fn from(tier: QualityTier) -> Self {
        match tier {
            QualityTier::High => ExportQuality::High,
            QualityTier::Medium => ExportQuality::Medium,
            QualityTier::Low => ExportQuality::Low,
        }
    }
}

/// Codecs written for each export container
pub fn export_format(container: Container) -> EncodingFormat {
    match container {
        Container::Mp4 => EncodingFormat::new(Container::Mp4, Some(VideoCodec::H264), Some(AudioCodec::Aac)),
        Container::Webm => EncodingFormat::new(Container::Webm, Some(VideoCodec::Vp9), Some(AudioCodec::Opus)),
        Container::Gif => EncodingFormat::new(Container::Gif, Some(VideoCodec::Gif), None),
    }
}

/// Optional export stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportOptions {
    pub include_audio: bool,
    pub watermark: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_audio: true,
            watermark: false,
        }
    }
}

/// A request to export an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub container: Container,
    #[serde(default)]
    pub quality: ExportQuality,
    #[serde(default)]
    pub options: ExportOptions,
    /// Applied before transcoding
    #[serde(default)]
    pub trim: Option<TrimRange>,
    #[serde(default)]
    pub crop: Option<CropRect>,
}

impl ExportRequest {
    pub fn new(container: Container, quality: ExportQuality) -> Self {
        Self {
            container,
            quality,
            options: ExportOptions::default(),
            trim: None,
            crop: None,
        }
    }

    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_trim(mut self, trim: TrimRange) -> Self {
        self.trim = Some(trim);
        self
    }

    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }
}

/// Optional stage the converter could not apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeclinedCapability {
    Watermark,
    AudioRemoval,
}

impl fmt::Display for DeclinedCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclinedCapability::Watermark => f.write_str("watermark not applied"),
            DeclinedCapability::AudioRemoval => f.write_str("audio not removed"),
        }
    }
}

/// Result of an export
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub artifact: Artifact,
    /// No re-encode happened
    pub passthrough: bool,
    pub declined: Vec<DeclinedCapability>,
}

impl ExportOutcome {
    pub fn warnings(&self) -> Vec<String> {
        self.declined.iter().map(|d| d.to_string()).collect()
    }
}

/// Export progress stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ExportStage {
    Preparing,
    Trimming,
    Cropping,
    Transcoding,
    Finalizing,
    Complete,
    Error { message: String },
}

/// Export progress information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    /// Progress percentage (0.0 to 100.0)
    pub percent: f32,
    pub stage: ExportStage,
}

impl ExportProgress {
    pub fn preparing() -> Self {
        Self {
            percent: 0.0,
            stage: ExportStage::Preparing,
        }
    }

    pub fn trimming() -> Self {
        Self {
            percent: 10.0,
            stage: ExportStage::Trimming,
        }
    }

    pub fn cropping() -> Self {
        Self {
            percent: 30.0,
            stage: ExportStage::Cropping,
        }
    }

    pub fn transcoding() -> Self {
        Self {
            percent: 50.0,
            stage: ExportStage::Transcoding,
        }
    }

    pub fn finalizing() -> Self {
        Self {
            percent: 95.0,
            stage: ExportStage::Finalizing,
        }
    }

    pub fn complete() -> Self {
        Self {
            percent: 100.0,
            stage: ExportStage::Complete,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            percent: 0.0,
            stage: ExportStage::Error { message },
        }
    }
}

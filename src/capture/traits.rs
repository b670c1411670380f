//! Capture trait definitions
//!
//! Platform-agnostic source types, live stream handles and the boundary
//! trait the engine calls to acquire devices and displays.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::utils::error::AppResult;

/// Kind of media source that can be captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    Microphone,
    Screen,
    Window,
}

impl SourceKind {
    /// Screen and window sources come from the display capture service
    pub fn is_display(&self) -> bool {
        matches!(self, SourceKind::Screen | SourceKind::Window)
    }

    pub fn has_video(&self) -> bool {
        !matches!(self, SourceKind::Microphone)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Camera => "camera",
            SourceKind::Microphone => "microphone",
            SourceKind::Screen => "screen",
            SourceKind::Window => "window",
        };
        f.write_str(name)
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Capture quality tier requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    #[default]
    Medium,
    Low,
}

impl QualityTier {
    /// Resolution target handed to the capture service
    pub fn resolution(&self) -> Resolution {
        match self {
            QualityTier::High => Resolution {
                width: 1920,
                height: 1080,
            },
            QualityTier::Medium => Resolution {
                width: 1280,
                height: 720,
            },
            QualityTier::Low => Resolution {
                width: 854,
                height: 480,
            },
        }
    }

    /// Video bitrate in bits per second
    pub fn video_bitrate(&self) -> u32 {
        match self {
            QualityTier::High => 8_000_000,
            QualityTier::Medium => 4_000_000,
            QualityTier::Low => 1_500_000,
        }
    }

    /// Audio bitrate in bits per second
    pub fn audio_bitrate(&self) -> u32 {
        match self {
            QualityTier::High => 192_000,
            QualityTier::Medium => 128_000,
            QualityTier::Low => 96_000,
        }
    }
}

/// Whether an audio track should accompany a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioPreference {
    None,
    /// Requested when supported; its absence is not an error
    Preferred,
    Required,
}

/// A single request to the capture service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    pub kind: SourceKind,
    pub resolution: Resolution,
    pub audio: AudioPreference,
}

/// Description of what a live stream delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub kind: SourceKind,
    pub width: u32,
    pub height: u32,
    pub has_video: bool,
    pub has_audio: bool,
}

/// A single RGBA video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA pixels
    pub data: Arc<[u8]>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height * 4) as usize);
        Self {
            width,
            height,
            data: data.into(),
        }
    }

    /// Frame filled with one colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self::new(width, height, data)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        let px = self.data.get(idx..idx + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Interleaved f32 PCM samples
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

/// A live capture resource provided by the capture service.
///
/// Implementations must make `stop` idempotent.
pub trait MediaSource: Send + Sync {
    fn id(&self) -> Uuid;

    fn descriptor(&self) -> StreamDescriptor;

    /// Latest video frame, or `None` if nothing is readable yet
    fn read_frame(&self) -> Option<VideoFrame>;

    /// Audio captured since the previous call
    fn drain_audio(&self) -> Vec<AudioBuffer> {
        Vec::new()
    }

    fn stop(&self) -> AppResult<()>;

    fn is_stopped(&self) -> bool;
}

/// Exclusively owned handle to a live source.
///
/// Only the resource ledger releases handles. Everything else works with a
/// [`StreamReader`], which can read but never stop the source.
pub struct StreamHandle {
    source: Arc<dyn MediaSource>,
    released: bool,
}

impl StreamHandle {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            source,
            released: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.source.id()
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        self.source.descriptor()
    }

    pub fn reader(&self) -> StreamReader {
        StreamReader {
            source: Arc::clone(&self.source),
        }
    }

    /// Stop the underlying source. Consumes the handle so it is released once.
    pub(crate) fn release(mut self) -> AppResult<()> {
        self.released = true;
        if self.source.is_stopped() {
            return Ok(());
        }
        self.source.stop()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.released || self.source.is_stopped() {
            return;
        }
        tracing::warn!("Stream handle {} dropped without release; stopping", self.source.id());
        if let Err(e) = self.source.stop() {
            tracing::warn!("Failed to stop dropped stream {}: {}", self.source.id(), e);
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id())
            .field("descriptor", &self.descriptor())
            .finish()
    }
}

/// Non-owning read access to a live source
#[derive(Clone)]
pub struct StreamReader {
    source: Arc<dyn MediaSource>,
}

impl StreamReader {
    pub fn id(&self) -> Uuid {
        self.source.id()
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        self.source.descriptor()
    }

    pub fn read_frame(&self) -> Option<VideoFrame> {
        self.source.read_frame()
    }

    pub fn drain_audio(&self) -> Vec<AudioBuffer> {
        self.source.drain_audio()
    }

    pub fn is_live(&self) -> bool {
        !self.source.is_stopped()
    }
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader").field("id", &self.id()).finish()
    }
}

/// External device/display capture service
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Open a live source. Failures use the capture error kinds
    /// (`DeviceAbsent`, `PermissionDenied`, `DeviceBusy`).
    async fn open(&self, request: &SourceRequest) -> AppResult<StreamHandle>;
}

//! Encoding types
//!
//! Containers, codecs, negotiated formats, encoded chunks and the finished
//! artifact produced by a recording or a conversion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Webm,
    Mp4,
    Gif,
}

impl Container {
    /// Get the file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Webm => "webm",
            Container::Mp4 => "mp4",
            Container::Gif => "gif",
        }
    }

    /// FFmpeg muxer name
    pub fn muxer(&self) -> &'static str {
        match self {
            Container::Webm => "webm",
            Container::Mp4 => "mp4",
            Container::Gif => "gif",
        }
    }

    pub fn supports_audio(&self) -> bool {
        !matches!(self, Container::Gif)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Vp9,
    Vp8,
    H264,
    Gif,
}

impl VideoCodec {
    /// Get the FFmpeg encoder for this codec
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Vp8 => "libvpx",
            VideoCodec::H264 => "libx264",
            VideoCodec::Gif => "gif",
        }
    }

    fn mime_name(&self) -> &'static str {
        match self {
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Vp8 => "vp8",
            VideoCodec::H264 => "avc1",
            VideoCodec::Gif => "gif",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Opus,
    Aac,
}

impl AudioCodec {
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            AudioCodec::Opus => "libopus",
            AudioCodec::Aac => "aac",
        }
    }

    fn mime_name(&self) -> &'static str {
        match self {
            AudioCodec::Opus => "opus",
            AudioCodec::Aac => "mp4a",
        }
    }
}

/// A container/codec combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingFormat {
    pub container: Container,
    pub video: Option<VideoCodec>,
    pub audio: Option<AudioCodec>,
}

impl EncodingFormat {
    pub const fn new(container: Container, video: Option<VideoCodec>, audio: Option<AudioCodec>) -> Self {
        Self {
            container,
            video,
            audio,
        }
    }

    /// MIME type such as `video/webm;codecs=vp9,opus`
    pub fn mime_type(&self) -> String {
        let base = match (self.container, self.video) {
            (Container::Gif, _) => return "image/gif".to_string(),
            (Container::Webm, None) => "audio/webm",
            (Container::Mp4, None) => "audio/mp4",
            (Container::Webm, Some(_)) => "video/webm",
            (Container::Mp4, Some(_)) => "video/mp4",
        };
        let codecs: Vec<&str> = self
            .video
            .map(|v| v.mime_name())
            .into_iter()
            .chain(self.audio.map(|a| a.mime_name()))
            .collect();
        if codecs.is_empty() {
            base.to_string()
        } else {
            format!("{};codecs={}", base, codecs.join(","))
        }
    }

    /// Same format restricted to the tracks a stream actually has
    pub fn restricted_to(&self, has_video: bool, has_audio: bool) -> Self {
        Self {
            container: self.container,
            video: self.video.filter(|_| has_video),
            audio: self.audio.filter(|_| has_audio),
        }
    }
}

impl fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime_type())
    }
}

/// Capture formats in descending preference
pub fn default_preferences() -> Vec<EncodingFormat> {
    vec![
        EncodingFormat::new(Container::Webm, Some(VideoCodec::Vp9), Some(AudioCodec::Opus)),
        EncodingFormat::new(Container::Webm, Some(VideoCodec::Vp8), Some(AudioCodec::Opus)),
        EncodingFormat::new(Container::Webm, Some(VideoCodec::Vp8), None),
        EncodingFormat::new(Container::Mp4, Some(VideoCodec::H264), Some(AudioCodec::Aac)),
    ]
}

/// Parameters handed to an encoder backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
    pub has_video: bool,
    pub has_audio: bool,
}

/// One encoded fragment, covering `[start, end)` of active recording time
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub seq: u64,
    pub data: Vec<u8>,
    pub start: Duration,
    pub end: Duration,
}

impl EncodedChunk {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// A finished, immutable encoded media blob
#[derive(Clone)]
pub struct Artifact {
    pub id: Uuid,
    pub format: EncodingFormat,
    pub data: Arc<[u8]>,
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Concatenate chunks in order into an artifact
    pub fn assemble(format: EncodingFormat, chunks: &[EncodedChunk], width: u32, height: u32) -> Self {
        let total: usize = chunks.iter().map(|c| c.data.len()).sum();
        let mut data = Vec::with_capacity(total);
        for chunk in chunks {
            data.extend_from_slice(&chunk.data);
        }
        let duration: Duration = chunks.iter().map(|c| c.duration()).sum();

        Self {
            id: Uuid::new_v4(),
            format,
            data: data.into(),
            duration_ms: duration.as_millis() as u64,
            width,
            height,
            created_at: Utc::now(),
        }
    }

    /// New artifact produced from this one by a conversion
    pub fn derive(
        &self,
        format: EncodingFormat,
        data: Vec<u8>,
        duration_ms: u64,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            format,
            data: data.into(),
            duration_ms,
            width,
            height,
            created_at: Utc::now(),
        }
    }

    pub fn container(&self) -> Container {
        self.format.container
    }

    pub fn has_audio(&self) -> bool {
        self.format.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.format.video.is_some()
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            id: self.id,
            mime_type: self.format.mime_type(),
            container: self.format.container,
            size_bytes: self.data.len(),
            duration_ms: self.duration_ms,
            width: self.width,
            height: self.height,
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("id", &self.id)
            .field("format", &self.format.mime_type())
            .field("size_bytes", &self.data.len())
            .field("duration_ms", &self.duration_ms)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Metadata describing an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub id: Uuid,
    pub mime_type: String,
    pub container: Container,
    pub size_bytes: usize,
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
}

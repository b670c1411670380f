//! Scripted encoder and converter fakes shared by the unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::traits::VideoFrame;
use crate::encoder::backend::{EncodeInput, EncoderFactory, MediaEncoder};
use crate::encoder::types::{Artifact, EncodedChunk, EncoderSettings, EncodingFormat, VideoCodec};
use crate::export::convert::{ConversionOp, Converter, ConverterCapabilities};
use crate::utils::error::{AppError, AppResult, ConversionStage};

#[derive(Default)]
struct EncoderScript {
    supported_video: Option<Vec<VideoCodec>>,
    rejected: Vec<VideoCodec>,
    fail_after: Option<u64>,
    video_only: bool,
    opened: usize,
}

/// Encoder factory that emits a few marker bytes per tick
#[derive(Clone, Default)]
pub struct ScriptedEncoderFactory {
    script: Arc<Mutex<EncoderScript>>,
}

impl ScriptedEncoderFactory {
    /// Only video formats using one of `codecs` are supported
    pub fn supporting(codecs: &[VideoCodec]) -> Self {
        let factory = Self::default();
        factory.script.lock().supported_video = Some(codecs.to_vec());
        factory
    }

    /// Reported as supported, but rejected when opened
    pub fn reject_on_open(&self, codec: VideoCodec) {
        self.script.lock().rejected.push(codec);
    }

    /// Encoders fail on the tick after `ticks` successful ones
    pub fn fail_after(&self, ticks: u64) {
        self.script.lock().fail_after = Some(ticks);
    }

    /// Encoders write only the video track of two-track formats
    pub fn video_only(&self) {
        self.script.lock().video_only = true;
    }

    pub fn opened(&self) -> usize {
        self.script.lock().opened
    }
}

impl EncoderFactory for ScriptedEncoderFactory {
    fn is_supported(&self, format: &EncodingFormat) -> bool {
        let script = self.script.lock();
        match (&script.supported_video, format.video) {
            (Some(list), Some(codec)) => list.contains(&codec),
            _ => true,
        }
    }

    fn open(&self, format: &EncodingFormat, _settings: &EncoderSettings) -> AppResult<Box<dyn MediaEncoder>> {
        let mut script = self.script.lock();
        if let Some(codec) = format.video {
            if script.rejected.contains(&codec) {
                return Err(AppError::UnsupportedEncoding(format.to_string()));
            }
        }
        script.opened += 1;
        let written = if script.video_only && format.video.is_some() {
            format.restricted_to(true, false)
        } else {
            *format
        };
        Ok(Box::new(ScriptedEncoder {
            format: written,
            ticks: 0,
            fail_after: script.fail_after,
        }))
    }
}

struct ScriptedEncoder {
    format: EncodingFormat,
    ticks: u64,
    fail_after: Option<u64>,
}

impl MediaEncoder for ScriptedEncoder {
    fn format(&self) -> EncodingFormat {
        self.format
    }

    fn encode(&mut self, input: EncodeInput<'_>) -> AppResult<Vec<u8>> {
        if self.fail_after.is_some_and(|n| self.ticks >= n) {
            return Err(AppError::EncodeFailure("scripted encoder failure".to_string()));
        }
        self.ticks += 1;
        let mut out = Vec::new();
        if let Some(frame) = input.frame {
            out.extend_from_slice(&frame.pixel(0, 0).unwrap_or_default());
        }
        out.extend(input.audio.iter().map(|_| b'a'));
        Ok(out)
    }

    fn finish(&mut self) -> AppResult<Vec<u8>> {
        Ok(b"END".to_vec())
    }
}

#[derive(Default)]
struct ConverterScript {
    failing: Vec<ConversionStage>,
    watermark: bool,
    no_audio_removal: bool,
    short_frames: bool,
    calls: Vec<ConversionOp>,
}

/// Converter that rewrites metadata without touching real media
#[derive(Clone, Default)]
pub struct ScriptedConverter {
    script: Arc<Mutex<ConverterScript>>,
}

impl ScriptedConverter {
    pub fn fail(&self, stage: ConversionStage) {
        self.script.lock().failing.push(stage);
    }

    pub fn with_watermark(self) -> Self {
        self.script.lock().watermark = true;
        self
    }

    pub fn without_audio_removal(self) -> Self {
        self.script.lock().no_audio_removal = true;
        self
    }

    /// Sampled frames carry fewer bytes than their dimensions need
    pub fn with_short_frames(self) -> Self {
        self.script.lock().short_frames = true;
        self
    }

    pub fn calls(&self) -> Vec<ConversionOp> {
        self.script.lock().calls.clone()
    }
}

#[async_trait]
impl Converter for ScriptedConverter {
    fn capabilities(&self) -> ConverterCapabilities {
        let script = self.script.lock();
        ConverterCapabilities {
            watermark: script.watermark,
            strip_audio: !script.no_audio_removal,
        }
    }

    async fn convert(&self, input: &Artifact, op: &ConversionOp) -> AppResult<Artifact> {
        {
            let mut script = self.script.lock();
            script.calls.push(op.clone());
            if script.failing.contains(&op.stage()) {
                return Err(AppError::conversion(op.stage(), "scripted failure"));
            }
        }
        let mut data = input.data.to_vec();
        data.extend_from_slice(op.stage().to_string().as_bytes());

        let artifact = match op {
            ConversionOp::Trim(range) => {
                input.derive(input.format, data, range.duration_ms(), input.width, input.height)
            }
            ConversionOp::Crop(rect) => {
                let (_, _, width, height) = rect.to_pixels(input.width, input.height);
                input.derive(input.format, data, input.duration_ms, width, height)
            }
            ConversionOp::Transcode { format, .. } => {
                input.derive(*format, data, input.duration_ms, input.width, input.height)
            }
        };
        Ok(artifact)
    }

    async fn sample_frame(&self, input: &Artifact, _at_ms: u64) -> AppResult<VideoFrame> {
        let script = self.script.lock();
        if script.failing.contains(&ConversionStage::FrameSample) {
            return Err(AppError::conversion(ConversionStage::FrameSample, "scripted failure"));
        }
        if script.short_frames {
            return Ok(VideoFrame {
                width: input.width,
                height: input.height,
                data: vec![0u8; 100].into(),
            });
        }
        Ok(VideoFrame::solid(input.width.max(1), input.height.max(1), [200, 100, 50, 255]))
    }
}

/// Artifact with marker bytes and the given duration
pub fn artifact(format: EncodingFormat, duration_ms: u64, width: u32, height: u32) -> Artifact {
    let chunk = EncodedChunk {
        seq: 0,
        data: vec![1, 2, 3, 4, 5, 6, 7, 8],
        start: Duration::ZERO,
        end: Duration::from_millis(duration_ms),
    };
    Artifact::assemble(format, &[chunk], width, height)
}

//! Encoder boundary
//!
//! The external incremental encoder and the negotiation of which
//! container/codec combination to use with it.

use std::time::Duration;

use super::types::{EncoderSettings, EncodingFormat};
use crate::capture::traits::{AudioBuffer, VideoFrame};
use crate::utils::error::{AppError, AppResult};

/// Input for one encoder tick
pub struct EncodeInput<'a> {
    pub frame: Option<&'a VideoFrame>,
    pub audio: &'a [AudioBuffer],
    /// Presentation time in active recording time
    pub pts: Duration,
}

/// An open incremental encoder
pub trait MediaEncoder: Send {
    /// Format actually being written
    fn format(&self) -> EncodingFormat;

    /// Encode one tick; returns whatever container bytes are ready
    fn encode(&mut self, input: EncodeInput<'_>) -> AppResult<Vec<u8>>;

    /// Flush and return the remaining bytes
    fn finish(&mut self) -> AppResult<Vec<u8>>;
}

/// Opens encoders for negotiated formats
pub trait EncoderFactory: Send + Sync {
    fn is_supported(&self, format: &EncodingFormat) -> bool;

    /// Open an encoder. Returns `UnsupportedEncoding` if the platform rejects
    /// the format.
    fn open(&self, format: &EncodingFormat, settings: &EncoderSettings) -> AppResult<Box<dyn MediaEncoder>>;
}

/// Supported formats from `preferences`, in order, restricted to the tracks
/// the capture will have. Fails before anything is recorded if none are.
pub fn negotiate(
    factory: &dyn EncoderFactory,
    preferences: &[EncodingFormat],
    has_video: bool,
    has_audio: bool,
) -> AppResult<Vec<EncodingFormat>> {
    let mut candidates: Vec<EncodingFormat> = Vec::new();
    for preference in preferences {
        let format = preference.restricted_to(has_video, has_audio);
        if format.video.is_none() && format.audio.is_none() {
            continue;
        }
        if candidates.contains(&format) {
            continue;
        }
        if factory.is_supported(&format) {
            candidates.push(format);
        } else {
            tracing::debug!("Encoding format {} not supported", format);
        }
    }

    if candidates.is_empty() {
        return Err(AppError::UnsupportedEncoding(format!(
            "none of {} preferred formats is supported",
            preferences.len()
        )));
    }
    tracing::info!("Negotiated encoding format {}", candidates[0]);
    Ok(candidates)
}

/// Open the first candidate the platform accepts
pub fn open_with_fallback(
    factory: &dyn EncoderFactory,
    candidates: &[EncodingFormat],
    settings: &EncoderSettings,
) -> AppResult<Box<dyn MediaEncoder>> {
    for format in candidates {
        let format = format.restricted_to(settings.has_video, settings.has_audio);
        match factory.open(&format, settings) {
            Ok(encoder) => return Ok(encoder),
            Err(AppError::UnsupportedEncoding(reason)) => {
                tracing::warn!("Encoder rejected {}: {}; trying next format", format, reason);
            }
            Err(e) => return Err(e),
        }
    }
    Err(AppError::UnsupportedEncoding(
        "every negotiated format was rejected when opening the encoder".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::types::{default_preferences, Container, VideoCodec};
    use crate::test_support::ScriptedEncoderFactory;

    fn settings() -> EncoderSettings {
        EncoderSettings {
            width: 64,
            height: 36,
            fps: 30,
            video_bitrate: 1_000_000,
            audio_bitrate: 96_000,
            has_video: true,
            has_audio: true,
        }
    }

    #[test]
    fn test_negotiate_skips_unsupported() {
        let factory = ScriptedEncoderFactory::supporting(&[VideoCodec::H264]);
        let candidates = negotiate(&factory, &default_preferences(), true, true).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].container, Container::Mp4);
    }

    #[test]
    fn test_negotiate_fails_when_nothing_supported() {
        let factory = ScriptedEncoderFactory::supporting(&[]);
        let err = negotiate(&factory, &default_preferences(), true, true).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedEncoding(_)));
    }

    #[test]
    fn test_audio_only_negotiation_dedupes() {
        let factory = ScriptedEncoderFactory::default();
        let candidates = negotiate(&factory, &default_preferences(), false, true).unwrap();
        assert!(candidates.iter().all(|f| f.video.is_none()));
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_open_falls_back_on_rejection() {
        let factory = ScriptedEncoderFactory::default();
        factory.reject_on_open(VideoCodec::Vp9);
        let candidates = negotiate(&factory, &default_preferences(), true, true).unwrap();

        let encoder = open_with_fallback(&factory, &candidates, &settings()).unwrap();

        assert_eq!(encoder.format().video, Some(VideoCodec::Vp8));
    }
}

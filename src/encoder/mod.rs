//! Incremental encoding
//!
//! Format negotiation, the encoder backend boundary, the FFmpeg backend and
//! the adapter that turns a live stream into ordered chunks.

pub mod backend;
pub mod ffmpeg;
pub mod pipeline;
pub mod types;

pub use backend::{negotiate, open_with_fallback, EncodeInput, EncoderFactory, MediaEncoder};
pub use ffmpeg::FfmpegEncoderFactory;
pub use pipeline::{ChunkBuffer, Encoder, EncoderInput, EncoderTiming, FailureHook};
pub use types::{
    default_preferences, Artifact, ArtifactSummary, AudioCodec, Container, EncodedChunk,
    EncoderSettings, EncodingFormat, VideoCodec,
};

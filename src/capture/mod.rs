//! Media capture
//!
//! Source types and live handles, the capture boundary trait, the provider
//! that applies timeouts and ledger registration, and a synthetic backend.

pub mod provider;
pub mod synthetic;
pub mod traits;

pub use provider::CaptureProvider;
pub use synthetic::{ScriptedFailure, SyntheticCapture};
pub use traits::{
    AudioBuffer, AudioPreference, CaptureBackend, MediaSource, QualityTier, Resolution,
    SourceKind, SourceRequest, StreamDescriptor, StreamHandle, StreamReader, VideoFrame,
};

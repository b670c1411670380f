//! Recording state management
//!
//! Defines the session state machine states, the capture spec, recorder
//! configuration and the events/snapshots handed to the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use super::compositor::OverlayLayout;
use crate::capture::traits::{QualityTier, SourceKind};
use crate::encoder::types::{default_preferences, ArtifactSummary, EncodingFormat};
use crate::utils::error::{AppError, AppResult, ErrorKind};

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session
    #[default]
    Idle,
    /// Capture spec chosen, nothing acquired
    Selecting,
    /// Sources are being acquired
    Acquiring,
    /// Sources live, encoder not started
    Previewing,
    Recording,
    Paused,
    /// Encoder flushing
    Stopping,
    /// Artifact available
    Stopped,
    /// Artifact open in the edit surface
    Editing,
    Exporting,
    /// Failed; see the session error for the kind
    Error,
}

/// What to capture. Immutable once a session has been selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSpec {
    pub source: SourceKind,
    pub quality: QualityTier,
    /// Composite the camera over a screen or window source
    pub composite: bool,
}

impl CaptureSpec {
    pub fn new(source: SourceKind, quality: QualityTier) -> Self {
        Self {
            source,
            quality,
            composite: false,
        }
    }

    /// Screen or window with the camera composited on top
    pub fn composite(source: SourceKind, quality: QualityTier) -> Self {
        Self {
            source,
            quality,
            composite: true,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.composite && !self.source.is_display() {
            return Err(AppError::PreconditionViolation(format!(
                "composite capture needs a screen or window primary, got {}",
                self.source
            )));
        }
        Ok(())
    }

    /// Short label such as `screen` or `screen-camera`
    pub fn label(&self) -> String {
        if self.composite {
            format!("{}-camera", self.source)
        } else {
            self.source.to_string()
        }
    }
}

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Per-source acquisition timeout
    pub acquisition_timeout_ms: u64,
    pub target_fps: u32,
    pub scheduler_period_ms: u64,
    /// Primary source silence escalated as a capture error
    pub stall_timeout_ms: u64,
    /// Encoder chunk length
    pub chunk_timeslice_ms: u64,
    pub elapsed_tick_ms: u64,
    pub overlay: OverlayLayout,
    /// Encoding formats in descending preference
    pub encoding_preferences: Vec<EncodingFormat>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            acquisition_timeout_ms: 10_000,
            target_fps: 30,
            scheduler_period_ms: 16,
            stall_timeout_ms: 3_000,
            chunk_timeslice_ms: 1_000,
            elapsed_tick_ms: 1_000,
            overlay: OverlayLayout::default(),
            encoding_preferences: default_preferences(),
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RecorderConfig = serde_json::from_str(&content)?;
        tracing::debug!("Loaded recorder config from {:?}", path);
        Ok(config)
    }

    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.acquisition_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

/// Events emitted during a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RecordingEvent {
    Selected { spec: CaptureSpec },
    Acquiring,
    Previewing,
    Started,
    Paused,
    Resumed,
    /// Active recording time in milliseconds
    Progress { elapsed_ms: u64 },
    Stopped { duration_ms: u64 },
    Discarded,
    Warning { message: String },
    Error {
        kind: ErrorKind,
        message: String,
        retryable: bool,
    },
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Option<Uuid>,
    pub state: SessionState,
    pub capture_spec: Option<CaptureSpec>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_duration_ms: u64,
    pub elapsed_ms: u64,
    pub chunk_count: usize,
    pub artifact: Option<ArtifactSummary>,
    pub error: Option<ErrorKind>,
    pub retryable: bool,
    /// State a retry of the failed step resumes from
    pub retry_state: Option<SessionState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_requires_display_primary() {
        assert!(CaptureSpec::composite(SourceKind::Screen, QualityTier::Low)
            .validate()
            .is_ok());
        assert!(CaptureSpec::composite(SourceKind::Camera, QualityTier::Low)
            .validate()
            .is_err());
        assert_eq!(
            CaptureSpec::composite(SourceKind::Window, QualityTier::Low).label(),
            "window-camera"
        );
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recorder.json");
        std::fs::write(&path, r#"{ "targetFps": 24, "overlay": { "corner": "topLeft" } }"#).unwrap();

        let config = RecorderConfig::load(&path).unwrap();

        assert_eq!(config.target_fps, 24);
        assert_eq!(config.acquisition_timeout_ms, 10_000);
        assert_eq!(config.overlay.width_fraction, 0.22);
        assert!(!config.encoding_preferences.is_empty());
    }
}

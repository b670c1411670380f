//! Library schema definitions
//!
//! Saved recording metadata as persisted by the library stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::traits::SourceKind;
use crate::encoder::types::Container;
use crate::recorder::state::CaptureSpec;

/// What a saved recording was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Camera,
    Microphone,
    Screen,
    Window,
    ScreenCamera,
    WindowCamera,
    /// Imported or derived artifact with no capture spec
    Unknown,
}

impl From<&CaptureSpec> for SourceType {
    fn from(spec: &CaptureSpec) -> Self {
        match (spec.source, spec.composite) {
            (SourceKind::Screen, true) => SourceType::ScreenCamera,
            (SourceKind::Window, true) => SourceType::WindowCamera,
            (SourceKind::Camera, _) => SourceType::Camera,
            (SourceKind::Microphone, _) => SourceType::Microphone,
            (SourceKind::Screen, false) => SourceType::Screen,
            (SourceKind::Window, false) => SourceType::Window,
        }
    }
}

/// Thumbnail outcome, always recorded explicitly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ThumbnailStatus {
    Available { width: u32, height: u32 },
    Unavailable { reason: String },
}

impl ThumbnailStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, ThumbnailStatus::Available { .. })
    }
}

/// A library entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecording {
    pub id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    pub duration_ms: u64,
    pub container: Container,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
    pub thumbnail: ThumbnailStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_favorite: bool,
    /// Artifact retained by this library instance; never persisted
    #[serde(skip)]
    pub artifact_ref: Option<Uuid>,
}

impl SavedRecording {
    /// Playback and export need the binary
    pub fn is_playable(&self) -> bool {
        self.artifact_ref.is_some()
    }
}

/// Caller-supplied metadata for a save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    pub name: Option<String>,
    pub source_type: SourceType,
}

impl SaveMetadata {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            name: None,
            source_type,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::QualityTier;

    #[test]
    fn test_source_type_from_spec() {
        let composite = CaptureSpec::composite(SourceKind::Window, QualityTier::High);
        assert_eq!(SourceType::from(&composite), SourceType::WindowCamera);
        let camera = CaptureSpec::new(SourceKind::Camera, QualityTier::High);
        assert_eq!(SourceType::from(&camera), SourceType::Camera);
        assert_eq!(
            serde_json::to_string(&SourceType::ScreenCamera).unwrap(),
            "\"screen-camera\""
        );
    }

    #[test]
    fn test_artifact_ref_is_not_persisted() {
        let entry = SavedRecording {
            id: Uuid::new_v4(),
            name: "Demo".to_string(),
            source_type: SourceType::Screen,
            duration_ms: 1_000,
            container: Container::Webm,
            mime_type: "video/webm".to_string(),
            width: 64,
            height: 36,
            size_bytes: 10,
            thumbnail: ThumbnailStatus::Unavailable {
                reason: "audio only".to_string(),
            },
            created_at: Utc::now(),
            is_favorite: false,
            artifact_ref: Some(Uuid::new_v4()),
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("artifactRef"));
        assert!(json.contains("\"status\":\"unavailable\""));

        let loaded: SavedRecording = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.artifact_ref, None);
        assert!(!loaded.is_playable());
        assert_eq!(loaded.name, "Demo");
    }
}

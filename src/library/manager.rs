//! Library facade
//!
//! Saves finished artifacts as library entries. Metadata and thumbnails go
//! to the store; binaries are retained only by this instance, so a library
//! reopened over the same store lists every entry but cannot play them.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::schema::{SaveMetadata, SavedRecording, SourceType, ThumbnailStatus};
use super::store::LibraryStore;
use super::thumbnail::{downscale, encode_png, sample_time_ms, THUMBNAIL_WIDTH};
use crate::encoder::types::Artifact;
use crate::export::convert::Converter;
use crate::recorder::session::RecordingSession;
use crate::utils::error::{AppError, AppResult};

pub struct Library {
    store: Arc<dyn LibraryStore>,
    converter: Arc<dyn Converter>,
    artifacts: Mutex<HashMap<Uuid, Artifact>>,
}

impl Library {
    pub fn new(store: Arc<dyn LibraryStore>, converter: Arc<dyn Converter>) -> Self {
        Self {
            store,
            converter,
            artifacts: Mutex::new(HashMap::new()),
        }
    }

    /// Save an artifact. A failed thumbnail is recorded as unavailable and
    /// never blocks the save.
    pub async fn save(&self, artifact: &Artifact, metadata: SaveMetadata) -> AppResult<SavedRecording> {
        let (thumbnail, png) = self.make_thumbnail(artifact).await;
        let created_at = Utc::now();
        let name = metadata
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Recording {}", created_at.format("%Y-%m-%d %H:%M:%S")));

        let entry = SavedRecording {
            id: Uuid::new_v4(),
            name,
            source_type: metadata.source_type,
            duration_ms: artifact.duration_ms,
            container: artifact.container(),
            mime_type: artifact.format.mime_type(),
            width: artifact.width,
            height: artifact.height,
            size_bytes: artifact.size_bytes(),
            thumbnail,
            created_at,
            is_favorite: false,
            artifact_ref: Some(artifact.id),
        };

        self.store.put(&entry, png.as_deref())?;
        self.artifacts.lock().insert(entry.id, artifact.clone());
        tracing::info!(
            "Saved '{}' ({}ms, thumbnail available: {})",
            entry.name,
            entry.duration_ms,
            entry.thumbnail.is_available()
        );
        Ok(entry)
    }

    /// Save the artifact of a stopped session
    pub async fn save_session(&self, session: &RecordingSession, name: Option<String>) -> AppResult<SavedRecording> {
        let artifact = session
            .artifact()
            .ok_or_else(|| AppError::PreconditionViolation("session has no artifact to save".to_string()))?;
        let source_type = session
            .capture_spec()
            .map(|spec| SourceType::from(&spec))
            .unwrap_or(SourceType::Unknown);
        self.save(
            &artifact,
            SaveMetadata {
                name,
                source_type,
            },
        )
        .await
    }

    async fn make_thumbnail(&self, artifact: &Artifact) -> (ThumbnailStatus, Option<Vec<u8>>) {
        if !artifact.has_video() {
            return (
                ThumbnailStatus::Unavailable {
                    reason: "recording has no video track".to_string(),
                },
                None,
            );
        }

        let at_ms = sample_time_ms(artifact.duration_ms);
        let result = match self.converter.sample_frame(artifact, at_ms).await {
            Ok(frame) => downscale(&frame, THUMBNAIL_WIDTH)
                .and_then(|frame| encode_png(&frame).map(|png| (frame.width, frame.height, png))),
            Err(e) => Err(e),
        };

        match result {
            Ok((width, height, png)) => (ThumbnailStatus::Available { width, height }, Some(png)),
            Err(e) => {
                tracing::warn!("Thumbnail for {} unavailable: {}", artifact.id, e);
                (
                    ThumbnailStatus::Unavailable {
                        reason: e.to_string(),
                    },
                    None,
                )
            }
        }
    }

    /// Entries newest first, with the binary reference set where retained
    pub fn list(&self) -> AppResult<Vec<SavedRecording>> {
        let mut entries = self.store.list()?;
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries.into_iter().map(|e| self.attach_ref(e)).collect())
    }

    pub fn get(&self, id: Uuid) -> AppResult<Option<SavedRecording>> {
        Ok(self.store.get(id)?.map(|e| self.attach_ref(e)))
    }

    /// Retained binary, if this instance still holds it
    pub fn artifact(&self, id: Uuid) -> Option<Artifact> {
        self.artifacts.lock().get(&id).cloned()
    }

    pub fn thumbnail(&self, id: Uuid) -> AppResult<Option<Vec<u8>>> {
        self.store.thumbnail(id)
    }

    /// Remove an entry and release its retained binary
    pub fn delete(&self, id: Uuid) -> AppResult<()> {
        let released = self.artifacts.lock().remove(&id).is_some();
        let existed = self.store.remove(id)?;
        if !existed && !released {
            return Err(AppError::PreconditionViolation(format!("no library entry {}", id)));
        }
        tracing::info!("Deleted library entry {}", id);
        Ok(())
    }

    pub fn set_favorite(&self, id: Uuid, favorite: bool) -> AppResult<SavedRecording> {
        self.modify(id, |entry| entry.is_favorite = favorite)
    }

    pub fn toggle_favorite(&self, id: Uuid) -> AppResult<SavedRecording> {
        self.modify(id, |entry| entry.is_favorite = !entry.is_favorite)
    }

    pub fn rename(&self, id: Uuid, name: &str) -> AppResult<SavedRecording> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidEditParameters("name cannot be empty".to_string()));
        }
        self.modify(id, |entry| entry.name = name.to_string())
    }

    fn modify(&self, id: Uuid, apply: impl FnOnce(&mut SavedRecording)) -> AppResult<SavedRecording> {
        let mut entry = self
            .store
            .get(id)?
            .ok_or_else(|| AppError::PreconditionViolation(format!("no library entry {}", id)))?;
        apply(&mut entry);
        self.store.update(&entry)?;
        Ok(self.attach_ref(entry))
    }

    fn attach_ref(&self, mut entry: SavedRecording) -> SavedRecording {
        entry.artifact_ref = self.artifacts.lock().get(&entry.id).map(|a| a.id);
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::types::default_preferences;
    use crate::library::store::{DirectoryStore, MemoryStore};
    use crate::test_support::{artifact, ScriptedConverter};
    use crate::utils::error::ConversionStage;
    use tempfile::tempdir;

    fn library(converter: &ScriptedConverter) -> Library {
        Library::new(Arc::new(MemoryStore::new()), Arc::new(converter.clone()))
    }

    #[tokio::test]
    async fn test_save_generates_thumbnail() {
        let converter = ScriptedConverter::default();
        let library = library(&converter);
        let input = artifact(default_preferences()[0], 3_000, 640, 360);

        let saved = library
            .save(&input, SaveMetadata::new(SourceType::Screen).named("Demo"))
            .await
            .unwrap();

        assert_eq!(saved.duration_ms, 3_000);
        assert_eq!(saved.thumbnail, ThumbnailStatus::Available { width: 320, height: 180 });
        assert_eq!(saved.artifact_ref, Some(input.id));
        let png = library.thumbnail(saved.id).unwrap().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[tokio::test]
    async fn test_thumbnail_failure_does_not_block_save() {
        let converter = ScriptedConverter::default();
        converter.fail(ConversionStage::FrameSample);
        let library = library(&converter);
        let input = artifact(default_preferences()[0], 3_000, 64, 36);

        let saved = library.save(&input, SaveMetadata::new(SourceType::Camera)).await.unwrap();

        assert!(matches!(saved.thumbnail, ThumbnailStatus::Unavailable { .. }));
        assert!(saved.name.starts_with("Recording "));
        assert!(library.thumbnail(saved.id).unwrap().is_none());
        assert_eq!(library.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_truncated_sample_frame_does_not_block_save() {
        let converter = ScriptedConverter::default().with_short_frames();
        let library = library(&converter);
        let input = artifact(default_preferences()[0], 3_000, 640, 360);

        let saved = library.save(&input, SaveMetadata::new(SourceType::Screen)).await.unwrap();

        match &saved.thumbnail {
            ThumbnailStatus::Unavailable { reason } => assert!(reason.contains("100 of")),
            other => panic!("expected unavailable thumbnail, got {:?}", other),
        }
        assert!(library.thumbnail(saved.id).unwrap().is_none());
        assert_eq!(library.get(saved.id).unwrap().unwrap().duration_ms, 3_000);
    }

    #[tokio::test]
    async fn test_audio_only_thumbnail_is_unavailable() {
        let library = library(&ScriptedConverter::default());
        let format = default_preferences()[0].restricted_to(false, true);
        let input = artifact(format, 3_000, 0, 0);

        let saved = library
            .save(&input, SaveMetadata::new(SourceType::Microphone))
            .await
            .unwrap();

        assert_eq!(
            saved.thumbnail,
            ThumbnailStatus::Unavailable {
                reason: "recording has no video track".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_reload_keeps_metadata_without_binary() {
        let dir = tempdir().unwrap();
        let converter = ScriptedConverter::default();
        let input = artifact(default_preferences()[0], 3_000, 64, 36);

        let first = Library::new(
            Arc::new(DirectoryStore::open(dir.path()).unwrap()),
            Arc::new(converter.clone()),
        );
        let saved = first.save(&input, SaveMetadata::new(SourceType::Window)).await.unwrap();
        assert!(first.get(saved.id).unwrap().unwrap().is_playable());

        let reloaded = Library::new(
            Arc::new(DirectoryStore::open(dir.path()).unwrap()),
            Arc::new(converter),
        );
        let entry = reloaded.get(saved.id).unwrap().unwrap();

        assert_eq!(entry.duration_ms, 3_000);
        assert!(!entry.is_playable());
        assert!(reloaded.artifact(saved.id).is_none());
        assert!(reloaded.thumbnail(saved.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_favorite_rename_delete() {
        let library = library(&ScriptedConverter::default());
        let input = artifact(default_preferences()[0], 1_000, 64, 36);
        let saved = library.save(&input, SaveMetadata::new(SourceType::Screen)).await.unwrap();

        assert!(library.toggle_favorite(saved.id).unwrap().is_favorite);
        assert!(!library.set_favorite(saved.id, false).unwrap().is_favorite);
        assert_eq!(library.rename(saved.id, " Final cut ").unwrap().name, "Final cut");
        assert!(library.rename(saved.id, "  ").is_err());

        library.delete(saved.id).unwrap();
        assert!(library.get(saved.id).unwrap().is_none());
        assert!(library.artifact(saved.id).is_none());
        assert!(matches!(
            library.delete(saved.id),
            Err(AppError::PreconditionViolation(_))
        ));
    }
}

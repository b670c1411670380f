//! Edit pipeline
//!
//! Holds the artifact currently in the edit surface together with its
//! `EditState`. Preview edits only update state and republish the preview.
//! Trim and crop convert the artifact and swap it in once the conversion
//! succeeded, so a failed conversion leaves the previous artifact in place.

use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use super::preview::{apply_filters, PreviewState};
use super::types::{AudioSettings, CropRect, EditState, FilterSettings, TextOverlay, TrimRange};
use crate::capture::traits::VideoFrame;
use crate::encoder::types::Artifact;
use crate::export::pipeline::ExportPipeline;
use crate::utils::error::{AppError, AppResult};

#[derive(Default)]
struct EditInner {
    artifact: Option<Artifact>,
    state: EditState,
    revision: u64,
}

pub struct EditPipeline {
    exporter: ExportPipeline,
    inner: Mutex<EditInner>,
    preview: watch::Sender<PreviewState>,
}

impl EditPipeline {
    pub fn new(exporter: ExportPipeline) -> Self {
        let (preview, _) = watch::channel(PreviewState::from_edit_state(&EditState::default(), 0));
        Self {
            exporter,
            inner: Mutex::new(EditInner::default()),
            preview,
        }
    }

    /// Open an artifact for editing with default edit state
    pub fn attach(&self, artifact: Artifact) {
        tracing::info!("Editing artifact {} ({}ms)", artifact.id, artifact.duration_ms);
        let mut inner = self.inner.lock();
        inner.artifact = Some(artifact);
        inner.state = EditState::default();
        self.publish(&mut inner);
    }

    /// Close the edit surface, returning the current artifact
    pub fn detach(&self) -> Option<Artifact> {
        let mut inner = self.inner.lock();
        inner.state = EditState::default();
        self.publish(&mut inner);
        inner.artifact.take()
    }

    pub fn artifact(&self) -> Option<Artifact> {
        self.inner.lock().artifact.clone()
    }

    pub fn state(&self) -> EditState {
        self.inner.lock().state.clone()
    }

    /// Preview updates, sent on every edit state change
    pub fn subscribe_preview(&self) -> watch::Receiver<PreviewState> {
        self.preview.subscribe()
    }

    pub fn set_filters(&self, filters: FilterSettings) -> AppResult<()> {
        filters.validate()?;
        self.update(|state| state.filters = filters)
    }

    pub fn add_text_overlay(&self, overlay: TextOverlay) -> AppResult<Uuid> {
        overlay.validate()?;
        let id = overlay.id;
        self.update(|state| state.text_overlays.push(overlay))?;
        Ok(id)
    }

    pub fn update_text_overlay(&self, overlay: TextOverlay) -> AppResult<()> {
        overlay.validate()?;
        let mut inner = self.inner.lock();
        let Some(existing) = inner.state.text_overlays.iter_mut().find(|o| o.id == overlay.id) else {
            return Err(AppError::InvalidEditParameters(format!(
                "no text overlay {}",
                overlay.id
            )));
        };
        *existing = overlay;
        self.publish(&mut inner);
        Ok(())
    }

    pub fn remove_text_overlay(&self, id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock();
        let before = inner.state.text_overlays.len();
        inner.state.text_overlays.retain(|o| o.id != id);
        if inner.state.text_overlays.len() == before {
            return Err(AppError::InvalidEditParameters(format!("no text overlay {}", id)));
        }
        self.publish(&mut inner);
        Ok(())
    }

    pub fn set_audio(&self, audio: AudioSettings) -> AppResult<()> {
        audio.validate()?;
        self.update(|state| state.audio = audio)
    }

    /// Remember a trim selection without applying it
    pub fn set_trim_range(&self, range: TrimRange) -> AppResult<()> {
        let mut inner = self.inner.lock();
        let duration = current(&inner)?.duration_ms;
        range.validate(duration)?;
        inner.state.trim_range = Some(range);
        self.publish(&mut inner);
        Ok(())
    }

    /// Remember a crop selection without applying it
    pub fn set_crop_rect(&self, rect: CropRect) -> AppResult<()> {
        rect.validate()?;
        self.update(|state| state.crop_rect = Some(rect))
    }

    /// Back to default edit state; the artifact is kept
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = EditState::default();
        self.publish(&mut inner);
    }

    /// Frame with the current filters applied
    pub fn render_preview(&self, frame: &VideoFrame) -> VideoFrame {
        let filters = self.inner.lock().state.filters;
        apply_filters(frame, &filters)
    }

    /// Trim the current artifact to `range` and make the result current
    pub async fn trim(&self, range: TrimRange) -> AppResult<Artifact> {
        let source = {
            let inner = self.inner.lock();
            let artifact = current(&inner)?;
            range.validate(artifact.duration_ms)?;
            artifact.clone()
        };

        let trimmed = self.exporter.trim(&source, range).await?;
        self.swap(&source, trimmed.clone(), |state| state.trim_range = None)?;
        tracing::info!(
            "Trimmed {} to {}..{}ms, new artifact {}",
            source.id,
            range.start_ms,
            range.end_ms,
            trimmed.id
        );
        Ok(trimmed)
    }

    /// Crop the current artifact to `rect` and make the result current
    pub async fn crop(&self, rect: CropRect) -> AppResult<Artifact> {
        rect.validate()?;
        let source = {
            let inner = self.inner.lock();
            current(&inner)?.clone()
        };

        let cropped = self.exporter.crop(&source, rect).await?;
        self.swap(&source, cropped.clone(), |state| state.crop_rect = None)?;
        tracing::info!(
            "Cropped {} to {}x{}, new artifact {}",
            source.id,
            cropped.width,
            cropped.height,
            cropped.id
        );
        Ok(cropped)
    }

    /// Apply the remembered trim and crop selections, trim first
    pub async fn apply_pending(&self) -> AppResult<Option<Artifact>> {
        let state = self.state();
        let mut result = None;
        if let Some(range) = state.trim_range {
            result = Some(self.trim(range).await?);
        }
        if let Some(rect) = state.crop_rect {
            result = Some(self.crop(rect).await?);
        }
        Ok(result)
    }

    fn update(&self, apply: impl FnOnce(&mut EditState)) -> AppResult<()> {
        let mut inner = self.inner.lock();
        current(&inner)?;
        apply(&mut inner.state);
        self.publish(&mut inner);
        Ok(())
    }

    /// Replace `source` with `output` unless another artifact was attached meanwhile
    fn swap(&self, source: &Artifact, output: Artifact, clear: impl FnOnce(&mut EditState)) -> AppResult<()> {
        let mut inner = self.inner.lock();
        if inner.artifact.as_ref().map(|a| a.id) != Some(source.id) {
            return Err(AppError::PreconditionViolation(
                "artifact changed while converting".to_string(),
            ));
        }
        inner.artifact = Some(output);
        clear(&mut inner.state);
        self.publish(&mut inner);
        Ok(())
    }

    fn publish(&self, inner: &mut EditInner) {
        inner.revision += 1;
        self.preview
            .send_replace(PreviewState::from_edit_state(&inner.state, inner.revision));
    }
}

fn current(inner: &EditInner) -> AppResult<&Artifact> {
    inner
        .artifact
        .as_ref()
        .ok_or_else(|| AppError::PreconditionViolation("no artifact in the edit surface".to_string()))
}

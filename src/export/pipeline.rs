//! Export pipeline orchestration
//!
//! This module coordinates conversions: trim and crop for destructive edits,
//! and full exports that may trim, crop and re-encode in sequence.

use std::sync::Arc;

use super::convert::{ConversionOp, Converter};
use super::types::{export_format, DeclinedCapability, ExportOutcome, ExportProgress, ExportRequest};
use crate::edit::types::{CropRect, TrimRange};
use crate::encoder::types::{Artifact, Container};
use crate::utils::error::{AppError, AppResult, ConversionStage};

/// Export pipeline for converting finished artifacts
#[derive(Clone)]
pub struct ExportPipeline {
    converter: Arc<dyn Converter>,
}

impl ExportPipeline {
    pub fn new(converter: Arc<dyn Converter>) -> Self {
        Self { converter }
    }

    pub fn converter(&self) -> Arc<dyn Converter> {
        Arc::clone(&self.converter)
    }

    /// Cut `artifact` down to `range`
    pub async fn trim(&self, artifact: &Artifact, range: TrimRange) -> AppResult<Artifact> {
        range.validate(artifact.duration_ms)?;
        self.run(artifact, ConversionOp::Trim(range)).await
    }

    /// Crop every frame of `artifact` to `rect`
    pub async fn crop(&self, artifact: &Artifact, rect: CropRect) -> AppResult<Artifact> {
        rect.validate()?;
        if !artifact.has_video() {
            return Err(AppError::InvalidEditParameters(
                "cannot crop an audio-only recording".to_string(),
            ));
        }
        self.run(artifact, ConversionOp::Crop(rect)).await
    }

    /// Export `artifact` as requested. Exporting to the current container
    /// with nothing to change returns the input bytes unchanged.
    pub async fn export<F>(
        &self,
        artifact: &Artifact,
        request: &ExportRequest,
        on_progress: F,
    ) -> AppResult<ExportOutcome>
    where
        F: Fn(ExportProgress) + Send + Sync,
    {
        tracing::info!(
            "Starting export of {} to {:?} ({:?})",
            artifact.id,
            request.container,
            request.quality
        );
        on_progress(ExportProgress::preparing());

        let result = self.run_export(artifact, request, &on_progress).await;
        match &result {
            Ok(outcome) => {
                for warning in outcome.warnings() {
                    tracing::warn!("Export of {}: {}", artifact.id, warning);
                }
                on_progress(ExportProgress::complete());
            }
            Err(e) => {
                tracing::error!("Export of {} failed: {}", artifact.id, e);
                on_progress(ExportProgress::error(e.to_string()));
            }
        }
        result
    }

    async fn run_export<F>(
        &self,
        artifact: &Artifact,
        request: &ExportRequest,
        on_progress: &F,
    ) -> AppResult<ExportOutcome>
    where
        F: Fn(ExportProgress) + Send + Sync,
    {
        // Validate everything before any conversion runs
        let trim = request.trim.filter(|t| !t.is_full(artifact.duration_ms));
        if let Some(range) = trim {
            range.validate(artifact.duration_ms)?;
        }
        let crop = request.crop.filter(|c| !c.is_full());
        if let Some(rect) = crop {
            rect.validate()?;
        }
        if request.container == Container::Gif && !artifact.has_video() {
            return Err(AppError::InvalidEditParameters(
                "gif export needs a video track".to_string(),
            ));
        }

        let capabilities = self.converter.capabilities();
        let mut declined = Vec::new();

        let mut watermark = request.options.watermark;
        if watermark && !capabilities.watermark {
            declined.push(DeclinedCapability::Watermark);
            watermark = false;
        }
        let mut strip_audio = !request.options.include_audio && artifact.has_audio();
        if strip_audio && !capabilities.strip_audio {
            declined.push(DeclinedCapability::AudioRemoval);
            strip_audio = false;
        }

        let same_container = request.container == artifact.container();
        if same_container && !watermark && !strip_audio && trim.is_none() && crop.is_none() {
            tracing::info!("Export of {} is a pass-through", artifact.id);
            return Ok(ExportOutcome {
                artifact: artifact.clone(),
                passthrough: true,
                declined,
            });
        }

        let mut current = artifact.clone();
        if let Some(range) = trim {
            on_progress(ExportProgress::trimming());
            current = self.run(&current, ConversionOp::Trim(range)).await?;
        }
        if let Some(rect) = crop {
            on_progress(ExportProgress::cropping());
            current = self.run(&current, ConversionOp::Crop(rect)).await?;
        }

        if !same_container || watermark || strip_audio {
            on_progress(ExportProgress::transcoding());
            let keep_audio = current.has_audio() && !strip_audio;
            let format = export_format(request.container).restricted_to(current.has_video(), keep_audio);
            let op = ConversionOp::Transcode {
                format,
                quality: request.quality,
                watermark,
            };
            current = self.run(&current, op).await?;
        }

        on_progress(ExportProgress::finalizing());
        tracing::info!(
            "Export finished: {} ({} bytes)",
            current.format,
            current.size_bytes()
        );
        Ok(ExportOutcome {
            artifact: current,
            passthrough: false,
            declined,
        })
    }

    async fn run(&self, artifact: &Artifact, op: ConversionOp) -> AppResult<Artifact> {
        let stage = op.stage();
        tracing::debug!("Converting {} ({})", artifact.id, stage);
        match self.converter.convert(artifact, &op).await {
            Ok(output) => Ok(output),
            Err(e @ AppError::ConversionFailure { .. }) => Err(e),
            Err(e) => Err(AppError::conversion(stage, e.to_string())),
        }
    }
}

/// Stage reported for a failed export step
pub fn failed_stage(error: &AppError) -> Option<ConversionStage> {
    match error {
        AppError::ConversionFailure { stage, .. } => Some(*stage),
        _ => None,
    }
}

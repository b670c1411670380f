//! Capture provider
//!
//! Wraps the external capture service with the engine's timeout policy and
//! registers every acquired handle with the session's resource ledger the
//! moment it resolves.

use std::sync::Arc;
use std::time::Duration;

use super::traits::{
    AudioPreference, CaptureBackend, QualityTier, SourceKind, SourceRequest, StreamHandle,
    StreamReader,
};
use crate::recorder::ledger::{LedgerEpoch, ResourceLedger};
use crate::utils::error::{AppError, AppResult};

/// Acquires named media sources from a capture backend
#[derive(Clone)]
pub struct CaptureProvider {
    backend: Arc<dyn CaptureBackend>,
}

impl CaptureProvider {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self { backend }
    }

    /// Build the request sent to the capture service for a source kind
    pub fn request_for(kind: SourceKind, quality: QualityTier) -> SourceRequest {
        let audio = match kind {
            SourceKind::Microphone => AudioPreference::Required,
            SourceKind::Camera | SourceKind::Screen | SourceKind::Window => {
                AudioPreference::Preferred
            }
        };
        SourceRequest {
            kind,
            resolution: quality.resolution(),
            audio,
        }
    }

    /// Acquire a source, failing with `AcquisitionTimeout` if the backend does
    /// not answer in time. Every acquisition goes through here.
    pub async fn acquire_with_timeout(
        &self,
        kind: SourceKind,
        quality: QualityTier,
        timeout: Duration,
    ) -> AppResult<StreamHandle> {
        let request = Self::request_for(kind, quality);
        tracing::debug!(
            "Acquiring {} at {}x{} (timeout {:?})",
            kind,
            request.resolution.width,
            request.resolution.height,
            timeout
        );

        let handle = match tokio::time::timeout(timeout, self.backend.open(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!("Acquisition of {} timed out after {:?}", kind, timeout);
                return Err(AppError::AcquisitionTimeout {
                    kind,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let descriptor = handle.descriptor();
        if kind.has_video() && !descriptor.has_video {
            return Err(AppError::DeviceAbsent(format!("{} delivered no video track", kind)));
        }
        if request.audio == AudioPreference::Required && !descriptor.has_audio {
            return Err(AppError::DeviceAbsent(format!("{} delivered no audio track", kind)));
        }
        if request.audio == AudioPreference::Preferred && !descriptor.has_audio {
            tracing::warn!("{} acquired without audio; continuing video-only", kind);
        }

        tracing::info!("Acquired {} stream {}", kind, handle.id());
        Ok(handle)
    }

    /// Acquire a source and hand it straight to the ledger
    pub async fn acquire_tracked(
        &self,
        kind: SourceKind,
        quality: QualityTier,
        timeout: Duration,
        ledger: &ResourceLedger,
        epoch: LedgerEpoch,
    ) -> AppResult<StreamReader> {
        let handle = self.acquire_with_timeout(kind, quality, timeout).await?;
        ledger.track_stream(handle, epoch)
    }
}

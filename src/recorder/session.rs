//! Recording session
//!
//! The session state machine. It owns the resource ledger for everything it
//! acquires and coordinates the capture provider, the compositor and the
//! encoder from source selection through stop.
//!
//! Every method takes `&self`; a session can be cloned and shared between
//! the host and background tasks. Only `acquire`, `stop` and `export`
//! suspend, every other transition completes synchronously.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::clock::ActiveClock;
use super::compositor::{Compositor, CompositorSettings};
use super::ledger::{LedgerEpoch, ResourceLedger};
use super::state::{CaptureSpec, RecorderConfig, RecordingEvent, SessionSnapshot, SessionState};
use crate::capture::provider::CaptureProvider;
use crate::capture::traits::{Resolution, SourceKind, StreamReader, VideoFrame};
use crate::edit::pipeline::EditPipeline;
use crate::encoder::backend::{negotiate, EncoderFactory};
use crate::encoder::pipeline::{ChunkBuffer, Encoder, EncoderInput, EncoderTiming};
use crate::encoder::types::{Artifact, EncoderSettings, EncodingFormat};
use crate::export::pipeline::ExportPipeline;
use crate::export::types::{ExportOutcome, ExportProgress, ExportRequest};
use crate::utils::error::{AppError, AppResult, ErrorKind};

const EVENT_CAPACITY: usize = 64;

/// Live streams of an acquired capture
#[derive(Debug, Clone)]
struct LiveCapture {
    video: Option<StreamReader>,
    audio: Vec<StreamReader>,
    width: u32,
    height: u32,
}

impl LiveCapture {
    /// Artifact dimensions; zero without a video track
    fn video_dims(&self) -> (u32, u32) {
        match self.video {
            Some(_) => (self.width, self.height),
            None => (0, 0),
        }
    }
}

#[derive(Default)]
struct Inner {
    id: Option<Uuid>,
    state: SessionState,
    spec: Option<CaptureSpec>,
    /// Bumped by discard so late async completions can tell they are stale
    generation: u64,
    epoch: Option<LedgerEpoch>,
    candidates: Vec<EncodingFormat>,
    live: Option<LiveCapture>,
    encoder: Option<Encoder>,
    clock: ActiveClock,
    chunks: ChunkBuffer,
    started_at: Option<DateTime<Utc>>,
    artifact: Option<Artifact>,
    error: Option<ErrorKind>,
    retryable: bool,
}

struct Shared {
    config: RecorderConfig,
    capture: CaptureProvider,
    encoders: Arc<dyn EncoderFactory>,
    ledger: ResourceLedger,
    inner: Mutex<Inner>,
    events: broadcast::Sender<RecordingEvent>,
}

impl Shared {
    fn emit(&self, event: RecordingEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_error(&self, error: &AppError, retryable: bool) {
        self.emit(RecordingEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
            retryable,
        });
    }

    fn release_all(&self) {
        let report = self.ledger.release_all();
        for failure in report.failures {
            self.emit(RecordingEvent::Warning {
                message: format!("failed to release {}: {}", failure.resource, failure.message),
            });
        }
    }

    /// Abort a live session after a capture or encoder failure.
    ///
    /// Keeps whatever the encoder had already produced as a partial artifact.
    fn fail_active(self: &Arc<Self>, error: AppError) {
        let (encoder, generation, (width, height)) = {
            let mut inner = self.inner.lock();
            if !matches!(
                inner.state,
                SessionState::Previewing | SessionState::Recording | SessionState::Paused
            ) {
                tracing::debug!("Ignoring failure in {:?}: {}", inner.state, error);
                return;
            }
            tracing::error!("Session {:?} failed: {}", inner.id, error);
            inner.state = SessionState::Error;
            inner.error = Some(error.kind());
            inner.retryable = false;
            inner.clock.stop();
            let dims = inner.live.take().map(|live| live.video_dims()).unwrap_or((0, 0));
            (inner.encoder.take(), inner.generation, dims)
        };

        self.release_all();
        self.emit_error(&error, false);

        let Some(encoder) = encoder else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            encoder.abort();
            return;
        };
        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let format = encoder.format();
            if let Err(e) = encoder.stop().await {
                tracing::debug!("Encoder flush after failure: {}", e);
            }
            let mut inner = shared.inner.lock();
            if inner.generation != generation || inner.state != SessionState::Error {
                return;
            }
            let chunks = std::mem::take(&mut *inner.chunks.lock());
            if chunks.is_empty() {
                return;
            }
            let partial = Artifact::assemble(format, &chunks, width, height);
            tracing::info!("Kept partial recording: {}ms", partial.duration_ms);
            inner.artifact = Some(partial);
            drop(inner);
            shared.emit(RecordingEvent::Warning {
                message: "recording failed; the captured part was kept".to_string(),
            });
        });
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(encoder) = self.inner.get_mut().encoder.take() {
            encoder.abort();
        }
        let report = self.ledger.release_all();
        if report.released > 0 {
            tracing::info!("Session torn down; released {} resources", report.released);
        }
    }
}

/// Restores a transitional state if the future driving it is dropped
struct TransitionGuard {
    shared: Arc<Shared>,
    generation: u64,
    during: SessionState,
    restore: SessionState,
    release: bool,
    armed: bool,
}

impl TransitionGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != self.generation || inner.state != self.during {
                return;
            }
            tracing::warn!("{:?} was cancelled; back to {:?}", self.during, self.restore);
            inner.state = self.restore;
        }
        if self.release {
            self.shared.release_all();
        }
    }
}

/// A recording session
#[derive(Clone)]
pub struct RecordingSession {
    shared: Arc<Shared>,
}

impl RecordingSession {
    pub fn new(config: RecorderConfig, capture: CaptureProvider, encoders: Arc<dyn EncoderFactory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                capture,
                encoders,
                ledger: ResourceLedger::new(),
                inner: Mutex::new(Inner::default()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.shared.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    pub fn id(&self) -> Option<Uuid> {
        self.shared.inner.lock().id
    }

    pub fn capture_spec(&self) -> Option<CaptureSpec> {
        self.shared.inner.lock().spec
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.shared.inner.lock().error
    }

    pub fn artifact(&self) -> Option<Artifact> {
        self.shared.inner.lock().artifact.clone()
    }

    /// Resources currently held by the session's ledger
    pub fn live_resources(&self) -> usize {
        self.shared.ledger.live_count()
    }

    /// Active recording time so far
    pub fn elapsed(&self) -> Duration {
        self.shared.inner.lock().clock.active_elapsed()
    }

    /// Latest frame of the live capture, for preview
    pub fn preview_frame(&self) -> Option<VideoFrame> {
        let inner = self.shared.inner.lock();
        inner.live.as_ref()?.video.as_ref()?.read_frame()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.inner.lock();
        let chunk_count = inner.chunks.lock().len();
        SessionSnapshot {
            id: inner.id,
            state: inner.state,
            capture_spec: inner.spec,
            started_at: inner.started_at,
            paused_duration_ms: inner.clock.paused_total().as_millis() as u64,
            elapsed_ms: inner.clock.active_elapsed().as_millis() as u64,
            chunk_count,
            artifact: inner.artifact.as_ref().map(Artifact::summary),
            error: inner.error,
            retryable: inner.retryable,
            retry_state: (inner.state == SessionState::Error && inner.retryable)
                .then_some(SessionState::Selecting),
        }
    }

    /// Choose what to capture. Only valid with no active session.
    pub fn select(&self, spec: CaptureSpec) -> AppResult<Uuid> {
        spec.validate()?;
        let id = {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Idle {
                return Err(rejected("select", inner.state));
            }
            let id = Uuid::new_v4();
            inner.id = Some(id);
            inner.spec = Some(spec);
            inner.state = SessionState::Selecting;
            inner.error = None;
            inner.retryable = false;
            id
        };
        tracing::info!("Session {} selected {}", id, spec.label());
        self.shared.emit(RecordingEvent::Selected { spec });
        Ok(id)
    }

    /// Acquire the selected sources and enter preview.
    ///
    /// Also retries a failed acquisition with the same spec.
    pub async fn acquire(&self) -> AppResult<()> {
        let shared = &self.shared;
        let (spec, generation, epoch) = {
            let mut inner = shared.inner.lock();
            let retry = inner.state == SessionState::Error && inner.retryable;
            if inner.state != SessionState::Selecting && !retry {
                return Err(rejected("acquire", inner.state));
            }
            let spec = inner
                .spec
                .ok_or_else(|| AppError::PreconditionViolation("no capture spec selected".to_string()))?;

            // Codec support is settled before any device is opened
            let has_video = spec.source.has_video();
            let negotiated = negotiate(
                shared.encoders.as_ref(),
                &shared.config.encoding_preferences,
                has_video,
                true,
            );
            let candidates = match negotiated {
                Ok(candidates) => candidates,
                Err(e) => {
                    inner.state = SessionState::Error;
                    inner.error = Some(e.kind());
                    inner.retryable = false;
                    drop(inner);
                    shared.emit_error(&e, false);
                    return Err(e);
                }
            };

            let epoch = shared.ledger.epoch();
            inner.candidates = candidates;
            inner.epoch = Some(epoch);
            inner.state = SessionState::Acquiring;
            inner.error = None;
            inner.retryable = false;
            (spec, inner.generation, epoch)
        };
        shared.emit(RecordingEvent::Acquiring);
        tracing::info!("Acquiring {}", spec.label());

        let guard = TransitionGuard {
            shared: Arc::clone(shared),
            generation,
            during: SessionState::Acquiring,
            restore: SessionState::Selecting,
            release: true,
            armed: true,
        };
        let result = self.acquire_sources(spec, epoch).await;
        guard.disarm();

        let mut inner = shared.inner.lock();
        if inner.generation != generation || inner.state != SessionState::Acquiring {
            return Err(AppError::PreconditionViolation(
                "session was discarded during acquisition".to_string(),
            ));
        }

        match result {
            Ok(live) => {
                let missing_audio = spec.source != SourceKind::Microphone && live.audio.is_empty();
                inner.live = Some(live);
                inner.state = SessionState::Previewing;
                drop(inner);
                if missing_audio {
                    shared.emit(RecordingEvent::Warning {
                        message: format!("{} has no audio; recording video only", spec.label()),
                    });
                }
                tracing::info!("Previewing {}", spec.label());
                shared.emit(RecordingEvent::Previewing);
                Ok(())
            }
            Err(e) => {
                let retryable = e.is_retryable();
                inner.state = SessionState::Error;
                inner.error = Some(e.kind());
                inner.retryable = retryable;
                drop(inner);
                tracing::warn!("Acquisition of {} failed: {}", spec.label(), e);
                shared.release_all();
                shared.emit_error(&e, retryable);
                Err(e)
            }
        }
    }

    async fn acquire_sources(&self, spec: CaptureSpec, epoch: LedgerEpoch) -> AppResult<LiveCapture> {
        let shared = &self.shared;
        let timeout = shared.config.acquisition_timeout();
        let capture = &shared.capture;
        let ledger = &shared.ledger;

        if !spec.composite {
            let reader = capture
                .acquire_tracked(spec.source, spec.quality, timeout, ledger, epoch)
                .await?;
            let descriptor = reader.descriptor();
            return Ok(LiveCapture {
                video: descriptor.has_video.then(|| reader.clone()),
                audio: if descriptor.has_audio { vec![reader] } else { Vec::new() },
                width: descriptor.width,
                height: descriptor.height,
            });
        }

        // Both acquisitions run concurrently; whichever resolved is already
        // tracked when the other fails
        let (primary, camera) = tokio::try_join!(
            capture.acquire_tracked(spec.source, spec.quality, timeout, ledger, epoch),
            capture.acquire_tracked(SourceKind::Camera, spec.quality, timeout, ledger, epoch),
        )?;

        let canvas = Resolution {
            width: primary.descriptor().width,
            height: primary.descriptor().height,
        };
        let compositor = Compositor::new(CompositorSettings {
            canvas,
            target_fps: shared.config.target_fps,
            scheduler_period: Duration::from_millis(shared.config.scheduler_period_ms),
            stall_timeout: Duration::from_millis(shared.config.stall_timeout_ms),
            layout: shared.config.overlay.clone(),
        });

        let weak: Weak<Shared> = Arc::downgrade(shared);
        let stream = compositor.composite(
            primary.clone(),
            camera.clone(),
            Arc::new(move |error| {
                if let Some(shared) = weak.upgrade() {
                    shared.fail_active(error);
                }
            }),
        );
        let token = stream.token.clone();
        let composite = ledger.track_stream(stream.handle, epoch)?;
        ledger.track_task("compositor", token, epoch)?;

        let audio = [primary, camera]
            .into_iter()
            .filter(|r| r.descriptor().has_audio)
            .collect();
        Ok(LiveCapture {
            video: Some(composite),
            audio,
            width: canvas.width,
            height: canvas.height,
        })
    }

    /// Start encoding the previewed capture
    pub fn start(&self) -> AppResult<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if inner.state != SessionState::Previewing {
            return Err(rejected("start", inner.state));
        }
        let (Some(live), Some(spec), Some(epoch)) = (inner.live.clone(), inner.spec, inner.epoch) else {
            return Err(AppError::PreconditionViolation("no live capture to record".to_string()));
        };

        let settings = EncoderSettings {
            width: live.width,
            height: live.height,
            fps: shared.config.target_fps,
            video_bitrate: spec.quality.video_bitrate(),
            audio_bitrate: spec.quality.audio_bitrate(),
            has_video: live.video.is_some(),
            has_audio: !live.audio.is_empty(),
        };
        let clock = ActiveClock::new();
        let chunks = ChunkBuffer::default();
        clock.start();

        let weak = Arc::downgrade(shared);
        let started = Encoder::start(
            shared.encoders.as_ref(),
            &inner.candidates,
            settings,
            EncoderInput {
                video: live.video.clone(),
                audio: live.audio.clone(),
            },
            clock.clone(),
            EncoderTiming {
                frame_interval: shared.config.frame_interval(),
                timeslice: Duration::from_millis(shared.config.chunk_timeslice_ms),
            },
            Arc::clone(&chunks),
            Arc::new(move |error| {
                if let Some(shared) = weak.upgrade() {
                    shared.fail_active(error);
                }
            }),
        );
        let encoder = match started {
            Ok(encoder) => encoder,
            Err(e) => {
                inner.state = SessionState::Error;
                inner.error = Some(e.kind());
                inner.retryable = false;
                inner.live = None;
                drop(inner);
                tracing::error!("Encoder could not start: {}", e);
                shared.release_all();
                shared.emit_error(&e, false);
                return Err(e);
            }
        };

        shared.ledger.track_task("encoder", encoder.token(), epoch)?;
        let counter = spawn_elapsed_counter(
            clock.clone(),
            Duration::from_millis(shared.config.elapsed_tick_ms),
            shared.events.clone(),
        );
        shared.ledger.track_task("elapsed-counter", counter, epoch)?;

        let format = encoder.format();
        let audio_dropped = settings.has_audio && format.audio.is_none();
        tracing::info!("Recording {} as {}", spec.label(), format);
        inner.encoder = Some(encoder);
        inner.clock = clock;
        inner.chunks = chunks;
        inner.started_at = Some(Utc::now());
        inner.state = SessionState::Recording;
        drop(inner);
        shared.emit(RecordingEvent::Started);
        if audio_dropped {
            tracing::warn!("Encoder writes {} without the captured audio", format);
            shared.emit(RecordingEvent::Warning {
                message: format!("{} cannot carry the captured audio; recording video only", format),
            });
        }
        Ok(())
    }

    pub fn pause(&self) -> AppResult<()> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Recording {
                return Err(rejected("pause", inner.state));
            }
            inner.clock.pause();
            if let Some(encoder) = &inner.encoder {
                encoder.pause();
            }
            inner.state = SessionState::Paused;
        }
        tracing::info!("Recording paused");
        self.shared.emit(RecordingEvent::Paused);
        Ok(())
    }

    pub fn resume(&self) -> AppResult<()> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Paused {
                return Err(rejected("resume", inner.state));
            }
            inner.clock.resume();
            if let Some(encoder) = &inner.encoder {
                encoder.resume();
            }
            inner.state = SessionState::Recording;
        }
        tracing::info!("Recording resumed");
        self.shared.emit(RecordingEvent::Resumed);
        Ok(())
    }

    /// Flush the encoder, release every handle and assemble the artifact
    pub async fn stop(&self) -> AppResult<Artifact> {
        let shared = &self.shared;
        let (encoder, generation) = {
            let mut inner = shared.inner.lock();
            if !matches!(inner.state, SessionState::Recording | SessionState::Paused) {
                return Err(rejected("stop", inner.state));
            }
            inner.state = SessionState::Stopping;
            inner.clock.stop();
            (inner.encoder.take(), inner.generation)
        };
        tracing::info!("Stopping recording");

        let encoder =
            encoder.ok_or_else(|| AppError::PreconditionViolation("recording has no encoder".to_string()))?;
        let format = encoder.format();
        let flushed = encoder.stop().await;
        shared.release_all();

        let mut inner = shared.inner.lock();
        if inner.generation != generation {
            return Err(AppError::PreconditionViolation(
                "session was discarded while stopping".to_string(),
            ));
        }

        let chunks = std::mem::take(&mut *inner.chunks.lock());
        let (width, height) = inner.live.take().map(|live| live.video_dims()).unwrap_or((0, 0));
        let artifact = Artifact::assemble(format, &chunks, width, height);

        if let Err(e) = flushed {
            inner.state = SessionState::Error;
            inner.error = Some(e.kind());
            inner.retryable = false;
            if !chunks.is_empty() {
                inner.artifact = Some(artifact);
            }
            drop(inner);
            tracing::error!("Encoder flush failed: {}", e);
            shared.emit_error(&e, false);
            return Err(e);
        }

        inner.artifact = Some(artifact.clone());
        inner.state = SessionState::Stopped;
        drop(inner);
        tracing::info!(
            "Recording stopped: {}ms, {} chunks, {} bytes",
            artifact.duration_ms,
            chunks.len(),
            artifact.size_bytes()
        );
        shared.emit(RecordingEvent::Stopped {
            duration_ms: artifact.duration_ms,
        });
        Ok(artifact)
    }

    /// Cancel everything, release every handle and return to idle.
    ///
    /// Callable from any state; a second call does nothing.
    pub fn discard(&self) {
        let shared = &self.shared;
        let previous = {
            let mut inner = shared.inner.lock();
            if inner.state == SessionState::Idle {
                return;
            }
            if let Some(encoder) = inner.encoder.take() {
                encoder.abort();
            }
            let previous = inner.state;
            let generation = inner.generation + 1;
            *inner = Inner {
                generation,
                ..Inner::default()
            };
            previous
        };
        shared.release_all();
        tracing::info!("Session discarded from {:?}", previous);
        shared.emit(RecordingEvent::Discarded);
    }

    /// Put the recorded artifact into `editor`
    pub fn open_editor(&self, editor: &EditPipeline) -> AppResult<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != SessionState::Stopped {
            return Err(rejected("open editor", inner.state));
        }
        let artifact = inner
            .artifact
            .clone()
            .ok_or_else(|| AppError::PreconditionViolation("no artifact to edit".to_string()))?;
        editor.attach(artifact);
        inner.state = SessionState::Editing;
        Ok(())
    }

    /// Adopt the editor's current artifact as the session artifact
    pub fn commit_edits(&self, editor: &EditPipeline) -> AppResult<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != SessionState::Editing {
            return Err(rejected("commit edits", inner.state));
        }
        if let Some(artifact) = editor.artifact() {
            inner.artifact = Some(artifact);
        }
        Ok(())
    }

    /// Commit the editor's artifact and leave the edit surface
    pub fn close_editor(&self, editor: &EditPipeline) -> AppResult<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != SessionState::Editing {
            return Err(rejected("close editor", inner.state));
        }
        if let Some(artifact) = editor.detach() {
            inner.artifact = Some(artifact);
        }
        inner.state = SessionState::Stopped;
        Ok(())
    }

    /// Export request for the current artifact's container at the quality it
    /// was captured with
    pub fn export_request(&self) -> AppResult<ExportRequest> {
        let inner = self.shared.inner.lock();
        let (Some(artifact), Some(spec)) = (&inner.artifact, inner.spec) else {
            return Err(AppError::PreconditionViolation("no artifact to export".to_string()));
        };
        Ok(ExportRequest::new(artifact.container(), spec.quality.into()))
    }

    /// Export the session artifact. Edits must be committed first.
    pub async fn export<F>(
        &self,
        pipeline: &ExportPipeline,
        request: &ExportRequest,
        on_progress: F,
    ) -> AppResult<ExportOutcome>
    where
        F: Fn(ExportProgress) + Send + Sync,
    {
        let shared = &self.shared;
        let (artifact, previous, generation) = {
            let mut inner = shared.inner.lock();
            if !matches!(inner.state, SessionState::Stopped | SessionState::Editing) {
                return Err(rejected("export", inner.state));
            }
            let artifact = inner
                .artifact
                .clone()
                .ok_or_else(|| AppError::PreconditionViolation("no artifact to export".to_string()))?;
            let previous = inner.state;
            inner.state = SessionState::Exporting;
            (artifact, previous, inner.generation)
        };

        let guard = TransitionGuard {
            shared: Arc::clone(shared),
            generation,
            during: SessionState::Exporting,
            restore: previous,
            release: false,
            armed: true,
        };
        let outcome = pipeline.export(&artifact, request, on_progress).await;
        guard.disarm();

        {
            let mut inner = shared.inner.lock();
            if inner.generation == generation && inner.state == SessionState::Exporting {
                inner.state = previous;
            }
        }
        if let Ok(outcome) = &outcome {
            for warning in outcome.warnings() {
                shared.emit(RecordingEvent::Warning { message: warning });
            }
        }
        outcome
    }
}

fn rejected(transition: &str, state: SessionState) -> AppError {
    tracing::warn!("Rejected {} in state {:?}", transition, state);
    AppError::PreconditionViolation(format!("cannot {} while {:?}", transition, state))
}

/// Emits active recording time every `period` until cancelled
fn spawn_elapsed_counter(
    clock: ActiveClock,
    period: Duration,
    events: broadcast::Sender<RecordingEvent>,
) -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !clock.is_paused() {
                        let elapsed_ms = clock.active_elapsed().as_millis() as u64;
                        let _ = events.send(RecordingEvent::Progress { elapsed_ms });
                    }
                }
            }
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{ScriptedFailure, SyntheticCapture};
    use crate::capture::traits::QualityTier;
    use crate::export::types::ExportQuality;
    use crate::library::{Library, MemoryStore, SourceType, ThumbnailStatus};
    use crate::edit::types::TrimRange;
    use crate::encoder::types::VideoCodec;
    use crate::test_support::{ScriptedConverter, ScriptedEncoderFactory};

    const TICK: Duration = Duration::from_millis(100);

    fn test_config() -> RecorderConfig {
        RecorderConfig {
            acquisition_timeout_ms: 1_000,
            target_fps: 10,
            scheduler_period_ms: 10,
            stall_timeout_ms: 500,
            chunk_timeslice_ms: 300,
            elapsed_tick_ms: 100,
            ..RecorderConfig::default()
        }
    }

    fn session_with(backend: &SyntheticCapture, encoders: &ScriptedEncoderFactory) -> RecordingSession {
        RecordingSession::new(
            test_config(),
            CaptureProvider::new(Arc::new(backend.clone())),
            Arc::new(encoders.clone()),
        )
    }

    fn setup() -> (SyntheticCapture, ScriptedEncoderFactory, RecordingSession) {
        let backend = SyntheticCapture::new().with_frame_size(16, 9);
        let encoders = ScriptedEncoderFactory::default();
        let session = session_with(&backend, &encoders);
        (backend, encoders, session)
    }

    fn assert_released(backend: &SyntheticCapture, session: &RecordingSession) {
        assert_eq!(session.live_resources(), 0);
        assert_eq!(backend.live_handles(), 0);
    }

    async fn record(session: &RecordingSession, spec: CaptureSpec) {
        session.select(spec).unwrap();
        session.acquire().await.unwrap();
        session.start().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_pause_resume_duration() {
        let (backend, _, session) = setup();
        record(&session, CaptureSpec::new(SourceKind::Camera, QualityTier::Low)).await;

        tokio::time::sleep(TICK * 3).await;
        session.pause().unwrap();
        tokio::time::sleep(TICK * 2).await;
        session.resume().unwrap();
        tokio::time::sleep(TICK * 2).await;
        let artifact = session.stop().await.unwrap();

        let expected = (TICK * 5).as_millis() as u64;
        let tolerance = TICK.as_millis() as u64;
        assert!(artifact.duration_ms.abs_diff(expected) <= tolerance);
        assert!(artifact.has_audio());
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.snapshot().chunk_count, 0);
        assert_released(&backend, &session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_composite_camera_denied_releases_screen() {
        let (backend, _, session) = setup();
        backend.fail(SourceKind::Camera, ScriptedFailure::Denied);
        backend.delay(SourceKind::Camera, Duration::from_millis(50));

        session
            .select(CaptureSpec::composite(SourceKind::Screen, QualityTier::Low))
            .unwrap();
        let err = session.acquire().await.unwrap_err();

        assert!(matches!(err, AppError::PermissionDenied(_)));
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.snapshot().retryable);
        assert_eq!(backend.opened_handles(), 1);
        assert_released(&backend, &session);

        session.discard();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_composite_without_overlay_frames_records_primary() {
        let (backend, _, session) = setup();
        backend.frameless(SourceKind::Camera);

        record(&session, CaptureSpec::composite(SourceKind::Screen, QualityTier::Low)).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        let artifact = session.stop().await.unwrap();

        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!((artifact.width, artifact.height), (16, 9));
        // Encoded frames carry the screen pattern's top-left pixel
        let screen = [30u8, 60, 200, 255];
        assert!(artifact.data.windows(4).any(|w| w == screen));
        assert_released(&backend, &session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_from_every_state_releases_everything() {
        let (backend, _, session) = setup();
        let spec = CaptureSpec::composite(SourceKind::Window, QualityTier::Low);

        session.discard();
        assert_eq!(session.state(), SessionState::Idle);

        session.select(spec).unwrap();
        session.discard();
        assert_released(&backend, &session);

        session.select(spec).unwrap();
        session.acquire().await.unwrap();
        assert_eq!(session.state(), SessionState::Previewing);
        assert!(session.live_resources() > 0);
        session.discard();
        assert_released(&backend, &session);

        record(&session, spec).await;
        tokio::time::sleep(TICK * 2).await;
        session.discard();
        assert_released(&backend, &session);

        record(&session, spec).await;
        session.pause().unwrap();
        session.discard();
        assert_released(&backend, &session);

        record(&session, spec).await;
        tokio::time::sleep(TICK * 2).await;
        session.stop().await.unwrap();
        session.discard();
        assert!(session.artifact().is_none());
        assert_eq!(session.state(), SessionState::Idle);
        assert_released(&backend, &session);

        session.discard();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_during_acquisition_releases_late_handles() {
        let (backend, _, session) = setup();
        backend.delay(SourceKind::Screen, Duration::from_millis(300));
        session
            .select(CaptureSpec::composite(SourceKind::Screen, QualityTier::Low))
            .unwrap();

        let acquiring = session.clone();
        let task = tokio::spawn(async move { acquiring.acquire().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.state(), SessionState::Acquiring);

        session.discard();
        let result = task.await.unwrap();

        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(backend.opened_handles(), 2);
        assert_released(&backend, &session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transitions_are_reported() {
        let (_, _, session) = setup();

        assert!(matches!(session.stop().await, Err(AppError::PreconditionViolation(_))));
        assert!(session.pause().is_err());
        assert!(session.acquire().await.is_err());
        assert!(session.export_request().is_err());
        assert_eq!(session.state(), SessionState::Idle);

        let spec = CaptureSpec::new(SourceKind::Screen, QualityTier::Low);
        session.select(spec).unwrap();
        assert!(matches!(session.select(spec), Err(AppError::PreconditionViolation(_))));
        assert!(session.start().is_err());
        assert_eq!(session.state(), SessionState::Selecting);

        assert!(session
            .select(CaptureSpec::composite(SourceKind::Camera, QualityTier::Low))
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_encoding_fails_before_acquiring() {
        let backend = SyntheticCapture::new().with_frame_size(16, 9);
        let encoders = ScriptedEncoderFactory::supporting(&[]);
        let session = session_with(&backend, &encoders);

        session
            .select(CaptureSpec::new(SourceKind::Screen, QualityTier::Low))
            .unwrap();
        let err = session.acquire().await.unwrap_err();

        assert!(matches!(err, AppError::UnsupportedEncoding(_)));
        assert_eq!(session.error(), Some(ErrorKind::UnsupportedEncoding));
        assert!(!session.snapshot().retryable);
        assert_eq!(backend.opened_handles(), 0);
        assert!(session.acquire().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_codec_falls_back_at_start() {
        let backend = SyntheticCapture::new().with_frame_size(16, 9);
        let encoders = ScriptedEncoderFactory::default();
        encoders.reject_on_open(VideoCodec::Vp9);
        let session = session_with(&backend, &encoders);

        record(&session, CaptureSpec::new(SourceKind::Screen, QualityTier::Low)).await;
        tokio::time::sleep(TICK * 3).await;
        let artifact = session.stop().await.unwrap();

        assert_eq!(artifact.format.video, Some(VideoCodec::Vp8));
        assert_eq!(encoders.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_audio_track_is_a_warning() {
        let backend = SyntheticCapture::new().with_frame_size(16, 9);
        let encoders = ScriptedEncoderFactory::default();
        encoders.video_only();
        let session = session_with(&backend, &encoders);
        let mut events = session.subscribe();

        record(&session, CaptureSpec::new(SourceKind::Camera, QualityTier::Low)).await;
        tokio::time::sleep(TICK * 3).await;
        let artifact = session.stop().await.unwrap();

        let mut warnings = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RecordingEvent::Warning { message } = event {
                warnings.push(message);
            }
        }
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("audio"));
        assert!(artifact.has_video());
        assert!(!artifact.has_audio());
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_with_audio_records_without_warning() {
        let (_, _, session) = setup();
        let mut events = session.subscribe();

        record(&session, CaptureSpec::new(SourceKind::Camera, QualityTier::Low)).await;
        tokio::time::sleep(TICK * 2).await;
        let artifact = session.stop().await.unwrap();

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, RecordingEvent::Warning { .. }), "{:?}", event);
        }
        assert!(artifact.has_audio());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_can_be_retried() {
        let (backend, _, session) = setup();
        backend.delay(SourceKind::Camera, Duration::from_secs(20));

        session
            .select(CaptureSpec::new(SourceKind::Camera, QualityTier::Low))
            .unwrap();
        let err = session.acquire().await.unwrap_err();
        assert!(matches!(err, AppError::AcquisitionTimeout { .. }));
        assert_eq!(session.error(), Some(ErrorKind::AcquisitionTimeout));
        let snapshot = session.snapshot();
        assert!(snapshot.retryable);
        assert_eq!(snapshot.retry_state, Some(SessionState::Selecting));

        backend.delay(SourceKind::Camera, Duration::ZERO);
        session.acquire().await.unwrap();

        assert_eq!(session.state(), SessionState::Previewing);
        assert!(session.preview_frame().is_some());
        assert_eq!(session.error(), None);
        assert_eq!(session.snapshot().retry_state, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encode_failure_aborts_and_keeps_partial() {
        let (backend, encoders, session) = setup();
        encoders.fail_after(4);
        let mut events = session.subscribe();

        record(&session, CaptureSpec::new(SourceKind::Screen, QualityTier::Low)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.error(), Some(ErrorKind::EncodeFailure));
        assert_eq!(session.snapshot().retry_state, None);
        assert_released(&backend, &session);
        let partial = session.artifact().unwrap();
        assert!(partial.size_bytes() > 0);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let RecordingEvent::Error { kind, retryable, .. } = event {
                assert_eq!(kind, ErrorKind::EncodeFailure);
                assert!(!retryable);
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_stall_is_escalated() {
        let (backend, _, session) = setup();
        backend.frameless(SourceKind::Screen);

        record(&session, CaptureSpec::composite(SourceKind::Screen, QualityTier::Low)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.error(), Some(ErrorKind::DeviceAbsent));
        assert_released(&backend, &session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_follow_lifecycle() {
        let (_, _, session) = setup();
        let mut events = session.subscribe();

        record(&session, CaptureSpec::new(SourceKind::Screen, QualityTier::Low)).await;
        tokio::time::sleep(TICK * 3).await;
        session.stop().await.unwrap();

        let mut names = Vec::new();
        let mut progress = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                RecordingEvent::Progress { elapsed_ms } => progress.push(elapsed_ms),
                other => names.push(format!("{:?}", other)),
            }
        }
        assert!(names[0].starts_with("Selected"));
        assert_eq!(names[1], "Acquiring");
        assert_eq!(names[2], "Previewing");
        assert_eq!(names[3], "Started");
        assert!(names.last().unwrap().starts_with("Stopped"));
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_microphone_session_is_audio_only() -> anyhow::Result<()> {
        let (backend, _, session) = setup();
        session.select(CaptureSpec::new(SourceKind::Microphone, QualityTier::Low))?;
        session.acquire().await?;
        session.start()?;
        tokio::time::sleep(TICK * 3).await;
        let artifact = session.stop().await?;

        assert!(!artifact.has_video());
        assert!(artifact.has_audio());
        assert_eq!((artifact.width, artifact.height), (0, 0));
        assert_released(&backend, &session);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_stopped_session_to_library() -> anyhow::Result<()> {
        let (_, _, session) = setup();
        let converter = ScriptedConverter::default();
        let library = Library::new(Arc::new(MemoryStore::new()), Arc::new(converter));

        record(&session, CaptureSpec::new(SourceKind::Camera, QualityTier::Low)).await;
        tokio::time::sleep(TICK * 4).await;
        let artifact = session.stop().await?;
        let saved = library.save_session(&session, Some("Take".to_string())).await?;

        assert_eq!(saved.duration_ms, artifact.duration_ms);
        assert_eq!(saved.thumbnail, ThumbnailStatus::Available { width: 16, height: 9 });
        assert_eq!(saved.source_type, SourceType::Camera);
        assert_eq!(library.artifact(saved.id).map(|a| a.id), Some(artifact.id));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_and_export_round_trip() {
        let (_, _, session) = setup();
        let exporter = ExportPipeline::new(Arc::new(ScriptedConverter::default()));
        let editor = EditPipeline::new(exporter.clone());

        record(&session, CaptureSpec::new(SourceKind::Screen, QualityTier::Low)).await;
        tokio::time::sleep(TICK * 10).await;
        let recorded = session.stop().await.unwrap();

        session.open_editor(&editor).unwrap();
        assert_eq!(session.state(), SessionState::Editing);
        assert!(editor.trim(TrimRange::new(500, 500)).await.is_err());
        editor.trim(TrimRange::new(0, 500)).await.unwrap();
        session.close_editor(&editor).unwrap();

        let edited = session.artifact().unwrap();
        assert_ne!(edited.id, recorded.id);
        assert_eq!(edited.duration_ms, 500);

        let request = session.export_request().unwrap();
        assert_eq!(request, ExportRequest::new(edited.container(), ExportQuality::Low));
        let outcome = session.export(&exporter, &request, |_| {}).await.unwrap();
        assert!(outcome.passthrough);
        assert_eq!(outcome.artifact.data, edited.data);
        assert_eq!(session.state(), SessionState::Stopped);
    }
}

//! Synthetic capture backend
//!
//! Produces solid test-pattern frames and silent audio without touching any
//! device. Used for headless runs and tests; failures, delays and frame-less
//! sources can be scripted per source kind.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::traits::{
    AudioBuffer, AudioPreference, CaptureBackend, MediaSource, SourceKind, SourceRequest,
    StreamDescriptor, StreamHandle, VideoFrame,
};
use crate::utils::error::{AppError, AppResult};

/// Failure a scripted source reports when opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Absent,
    Denied,
    Busy,
}

impl ScriptedFailure {
    fn to_error(self, kind: SourceKind) -> AppError {
        match self {
            ScriptedFailure::Absent => AppError::DeviceAbsent(format!("no {} found", kind)),
            ScriptedFailure::Denied => {
                AppError::PermissionDenied(format!("{} access was denied", kind))
            }
            ScriptedFailure::Busy => AppError::DeviceBusy(format!("{} is in use", kind)),
        }
    }
}

#[derive(Debug, Clone)]
struct Script {
    failure: Option<ScriptedFailure>,
    delay: Duration,
    frameless: bool,
    audio: bool,
    fail_stop: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            failure: None,
            delay: Duration::ZERO,
            frameless: false,
            audio: true,
            fail_stop: false,
        }
    }
}

#[derive(Default)]
struct SyntheticState {
    scripts: Mutex<HashMap<SourceKind, Script>>,
    frame_size: Mutex<Option<(u32, u32)>>,
    live: AtomicUsize,
    opened: AtomicUsize,
}

/// Test-pattern capture service
#[derive(Clone, Default)]
pub struct SyntheticCapture {
    state: Arc<SyntheticState>,
}

impl SyntheticCapture {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, kind: SourceKind, update: impl FnOnce(&mut Script)) {
        let mut scripts = self.state.scripts.lock();
        update(scripts.entry(kind).or_default());
    }

    /// Make opening `kind` fail
    pub fn fail(&self, kind: SourceKind, failure: ScriptedFailure) {
        self.script(kind, |s| s.failure = Some(failure));
    }

    /// Delay opening `kind`
    pub fn delay(&self, kind: SourceKind, delay: Duration) {
        self.script(kind, |s| s.delay = delay);
    }

    /// Sources of `kind` open fine but never produce a readable frame
    pub fn frameless(&self, kind: SourceKind) {
        self.script(kind, |s| s.frameless = true);
    }

    pub fn without_audio(&self, kind: SourceKind) {
        self.script(kind, |s| s.audio = false);
    }

    /// Stopping sources of `kind` reports an error (the source still stops)
    pub fn failing_stop(&self, kind: SourceKind) {
        self.script(kind, |s| s.fail_stop = true);
    }

    /// Override the frame size instead of using the requested resolution
    pub fn with_frame_size(self, width: u32, height: u32) -> Self {
        *self.state.frame_size.lock() = Some((width, height));
        self
    }

    /// Number of sources opened and not yet stopped
    pub fn live_handles(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn opened_handles(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureBackend for SyntheticCapture {
    async fn open(&self, request: &SourceRequest) -> AppResult<StreamHandle> {
        let script = self
            .state
            .scripts
            .lock()
            .get(&request.kind)
            .cloned()
            .unwrap_or_default();

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if let Some(failure) = script.failure {
            return Err(failure.to_error(request.kind));
        }

        let (width, height) = if request.kind.has_video() {
            self.state
                .frame_size
                .lock()
                .unwrap_or((request.resolution.width, request.resolution.height))
        } else {
            (0, 0)
        };
        let has_audio = script.audio && request.audio != AudioPreference::None;

        let frame = request
            .kind
            .has_video()
            .then(|| VideoFrame::solid(width, height, pattern_colour(request.kind)));

        self.state.live.fetch_add(1, Ordering::SeqCst);
        self.state.opened.fetch_add(1, Ordering::SeqCst);

        let source = TestPatternSource {
            id: Uuid::new_v4(),
            descriptor: StreamDescriptor {
                kind: request.kind,
                width,
                height,
                has_video: request.kind.has_video(),
                has_audio,
            },
            frame: if script.frameless { None } else { frame },
            fail_stop: script.fail_stop,
            stopped: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        };
        Ok(StreamHandle::new(Arc::new(source)))
    }
}

fn pattern_colour(kind: SourceKind) -> [u8; 4] {
    match kind {
        SourceKind::Screen => [30, 60, 200, 255],
        SourceKind::Window => [140, 40, 180, 255],
        SourceKind::Camera => [40, 180, 90, 255],
        SourceKind::Microphone => [0, 0, 0, 255],
    }
}

struct TestPatternSource {
    id: Uuid,
    descriptor: StreamDescriptor,
    frame: Option<VideoFrame>,
    fail_stop: bool,
    stopped: AtomicBool,
    state: Arc<SyntheticState>,
}

impl MediaSource for TestPatternSource {
    fn id(&self) -> Uuid {
        self.id
    }

    fn descriptor(&self) -> StreamDescriptor {
        self.descriptor
    }

    fn read_frame(&self) -> Option<VideoFrame> {
        if self.is_stopped() {
            return None;
        }
        self.frame.clone()
    }

    fn drain_audio(&self) -> Vec<AudioBuffer> {
        if self.is_stopped() || !self.descriptor.has_audio {
            return Vec::new();
        }
        // 10ms of silence per call
        vec![AudioBuffer {
            sample_rate: 48_000,
            channels: 1,
            samples: vec![0.0; 480],
        }]
    }

    fn stop(&self) -> AppResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.live.fetch_sub(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(AppError::DeviceBusy(format!(
                "{} refused to stop cleanly",
                self.descriptor.kind
            )));
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

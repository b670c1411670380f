//! Encoder adapter
//!
//! Drives an encoder backend from a live stream: samples the stream once per
//! frame interval while not paused, groups the encoded bytes into chunks of
//! active recording time and appends them, in order, to the session's chunk
//! buffer. Stopping flushes the backend before the task ends.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::backend::{open_with_fallback, EncodeInput, EncoderFactory, MediaEncoder};
use super::types::{EncodedChunk, EncoderSettings, EncodingFormat};
use crate::capture::traits::{StreamReader, VideoFrame};
use crate::recorder::clock::ActiveClock;
use crate::utils::error::{AppError, AppResult};

/// Ordered chunk buffer shared between the encoder task and the session
pub type ChunkBuffer = Arc<Mutex<Vec<EncodedChunk>>>;

/// Invoked from the encoder task when the backend fails mid-recording
pub type FailureHook = Arc<dyn Fn(AppError) + Send + Sync>;

/// Streams feeding the encoder
#[derive(Debug, Clone)]
pub struct EncoderInput {
    pub video: Option<StreamReader>,
    pub audio: Vec<StreamReader>,
}

/// Timing parameters for the encoder task
#[derive(Debug, Clone, Copy)]
pub struct EncoderTiming {
    pub frame_interval: Duration,
    pub timeslice: Duration,
}

/// A started encoder. `stop` consumes it, so it can only be stopped once.
pub struct Encoder {
    format: EncodingFormat,
    token: CancellationToken,
    paused: watch::Sender<bool>,
    task: JoinHandle<AppResult<()>>,
}

impl Encoder {
    /// Open the first accepted candidate format and start encoding
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        factory: &dyn EncoderFactory,
        candidates: &[EncodingFormat],
        settings: EncoderSettings,
        input: EncoderInput,
        clock: ActiveClock,
        timing: EncoderTiming,
        chunks: ChunkBuffer,
        on_failure: FailureHook,
    ) -> AppResult<Self> {
        let backend = open_with_fallback(factory, candidates, &settings)?;
        let format = backend.format();
        let token = CancellationToken::new();
        let (paused, paused_rx) = watch::channel(false);

        tracing::info!(
            "Encoder started: {} {}x{} @ {}fps, {} bps",
            format,
            settings.width,
            settings.height,
            settings.fps,
            settings.video_bitrate
        );

        let task = tokio::spawn(run(
            backend,
            input,
            clock,
            timing,
            paused_rx,
            token.clone(),
            chunks,
            on_failure,
        ));

        Ok(Self {
            format,
            token,
            paused,
            task,
        })
    }

    pub fn format(&self) -> EncodingFormat {
        self.format
    }

    /// Token that stops the encoder loop
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Stop sampling, flush the backend and wait until every queued chunk
    /// has been appended.
    pub async fn stop(self) -> AppResult<()> {
        self.token.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(AppError::EncodeFailure(format!("encoder task failed: {}", e))),
        }
    }

    /// Stop without waiting for a flush
    pub fn abort(self) {
        self.token.cancel();
        self.task.abort();
    }
}

struct PendingChunk {
    seq: u64,
    data: Vec<u8>,
    start: Duration,
}

impl PendingChunk {
    fn seal(&mut self, end: Duration, chunks: &ChunkBuffer) {
        if end <= self.start && self.data.is_empty() {
            return;
        }
        let chunk = EncodedChunk {
            seq: self.seq,
            data: std::mem::take(&mut self.data),
            start: self.start,
            end: end.max(self.start),
        };
        self.seq += 1;
        self.start = chunk.end;
        chunks.lock().push(chunk);
    }
}

/// Run one backend call on the blocking pool.
///
/// Backends may block on pipe I/O; keeping them off the runtime threads
/// keeps the compositor and elapsed counter on schedule. On failure the
/// backend is dropped on the blocking thread as well.
async fn on_blocking_pool<F>(
    mut backend: Box<dyn MediaEncoder>,
    call: F,
) -> AppResult<(Box<dyn MediaEncoder>, Vec<u8>)>
where
    F: FnOnce(&mut dyn MediaEncoder) -> AppResult<Vec<u8>> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let bytes = call(backend.as_mut())?;
        Ok((backend, bytes))
    });
    match task.await {
        Ok(result) => result,
        Err(e) => Err(AppError::EncodeFailure(format!("encoder call panicked: {}", e))),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    mut backend: Box<dyn MediaEncoder>,
    input: EncoderInput,
    clock: ActiveClock,
    timing: EncoderTiming,
    paused: watch::Receiver<bool>,
    token: CancellationToken,
    chunks: ChunkBuffer,
    on_failure: FailureHook,
) -> AppResult<()> {
    let mut ticker = tokio::time::interval(timing.frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut pending = PendingChunk {
        seq: 0,
        data: Vec::new(),
        start: clock.active_elapsed(),
    };
    let mut held_frame: Option<VideoFrame> = None;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if *paused.borrow() {
            continue;
        }

        let pts = clock.active_elapsed();
        if let Some(video) = &input.video {
            if let Some(frame) = video.read_frame() {
                held_frame = Some(frame);
            }
        }
        let audio: Vec<_> = input.audio.iter().flat_map(|a| a.drain_audio()).collect();

        let frame = held_frame.clone();
        let encoded = on_blocking_pool(backend, move |encoder| {
            encoder.encode(EncodeInput {
                frame: frame.as_ref(),
                audio: &audio,
                pts,
            })
        })
        .await;
        match encoded {
            Ok((returned, bytes)) => {
                backend = returned;
                pending.data.extend_from_slice(&bytes);
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!("Encoder failed at {:?}: {}", pts, message);
                // Keep what was already encoded
                pending.seal(pts, &chunks);
                on_failure(AppError::EncodeFailure(message.clone()));
                return Err(AppError::EncodeFailure(message));
            }
        }

        if pts.saturating_sub(pending.start) >= timing.timeslice {
            pending.seal(pts, &chunks);
        }
    }

    let tail = on_blocking_pool(backend, |encoder| encoder.finish()).await;
    let end = clock.active_elapsed();
    match tail {
        Ok((_, bytes)) => {
            pending.data.extend_from_slice(&bytes);
            pending.seal(end, &chunks);
            tracing::debug!("Encoder flushed {} chunks", pending.seq);
            Ok(())
        }
        Err(e) => {
            pending.seal(end, &chunks);
            Err(AppError::EncodeFailure(format!("flush failed: {}", e)))
        }
    }
}

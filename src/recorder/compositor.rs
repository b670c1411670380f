//! Real-time compositor
//!
//! Draws a primary source scaled to the full canvas and an overlay source in
//! a bordered corner region, producing a synthetic video stream. The frame
//! loop is a tokio task paced by elapsed time and owned by a single
//! cancellation token.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capture::traits::{
    MediaSource, Resolution, StreamDescriptor, StreamHandle, StreamReader, VideoFrame,
};
use crate::utils::error::{AppError, AppResult};

/// Corner of the canvas the overlay is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayCorner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Placement of the overlay region
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayLayout {
    /// Overlay width as a fraction of canvas width, clamped to 0.20..=0.25
    pub width_fraction: f64,
    pub corner: OverlayCorner,
    /// Distance from the canvas edges, in percent of canvas size
    pub margin_percent: f64,
    pub border_px: u32,
    pub border_rgba: [u8; 4],
}

impl Default for OverlayLayout {
    fn default() -> Self {
        Self {
            width_fraction: 0.22,
            corner: OverlayCorner::BottomRight,
            margin_percent: 3.0,
            border_px: 4,
            border_rgba: [255, 255, 255, 255],
        }
    }
}

/// Pixel rectangle on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl OverlayLayout {
    /// Overlay rectangle for a source of the given native size
    pub fn overlay_rect(&self, canvas_w: u32, canvas_h: u32, src_w: u32, src_h: u32) -> Rect {
        let fraction = self.width_fraction.clamp(0.20, 0.25);
        let margin_x = (canvas_w as f64 * self.margin_percent / 100.0).round() as u32;
        let margin_y = (canvas_h as f64 * self.margin_percent / 100.0).round() as u32;

        let width = ((canvas_w as f64 * fraction).round() as u32).max(1);
        let aspect = if src_w > 0 && src_h > 0 {
            src_h as f64 / src_w as f64
        } else {
            9.0 / 16.0
        };
        let max_height = canvas_h.saturating_sub(2 * margin_y).max(1);
        let height = ((width as f64 * aspect).round() as u32).clamp(1, max_height);

        let right = canvas_w.saturating_sub(margin_x + width);
        let bottom = canvas_h.saturating_sub(margin_y + height);
        let (x, y) = match self.corner {
            OverlayCorner::TopLeft => (margin_x, margin_y),
            OverlayCorner::TopRight => (right, margin_y),
            OverlayCorner::BottomLeft => (margin_x, bottom),
            OverlayCorner::BottomRight => (right, bottom),
        };

        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// Overlay position as a percentage of the canvas
    pub fn position_percent(&self, rect: Rect, canvas_w: u32, canvas_h: u32) -> (f64, f64) {
        (
            rect.x as f64 * 100.0 / canvas_w.max(1) as f64,
            rect.y as f64 * 100.0 / canvas_h.max(1) as f64,
        )
    }
}

/// Compositor configuration
#[derive(Debug, Clone)]
pub struct CompositorSettings {
    pub canvas: Resolution,
    pub target_fps: u32,
    /// How often the scheduler wakes; renders are gated to `target_fps`
    pub scheduler_period: Duration,
    /// Primary source silence that is escalated as a capture error
    pub stall_timeout: Duration,
    pub layout: OverlayLayout,
}

/// Counters describing loop behaviour
#[derive(Debug, Default)]
pub struct CompositorStats {
    pub rendered: AtomicU64,
    pub held: AtomicU64,
    pub primary_misses: AtomicU64,
    pub overlay_misses: AtomicU64,
}

/// Called once when the primary source stays unreadable past the stall timeout
pub type StallHook = Arc<dyn Fn(AppError) + Send + Sync>;

/// A running composite: the stream handle plus the loop's cancellation token
pub struct CompositeStream {
    pub handle: StreamHandle,
    pub token: CancellationToken,
    pub stats: Arc<CompositorStats>,
}

/// Combines two live video sources into one
pub struct Compositor {
    settings: CompositorSettings,
}

impl Compositor {
    pub fn new(settings: CompositorSettings) -> Self {
        Self { settings }
    }

    /// Start compositing `overlay` on top of `primary`.
    ///
    /// Both inputs are only read. Must be called inside a tokio runtime.
    pub fn composite(
        &self,
        primary: StreamReader,
        overlay: StreamReader,
        on_stall: StallHook,
    ) -> CompositeStream {
        let token = CancellationToken::new();
        let stats = Arc::new(CompositorStats::default());
        let latest = Arc::new(Mutex::new(None));
        let canvas = self.settings.canvas;

        let source = CompositeSource {
            id: Uuid::new_v4(),
            descriptor: StreamDescriptor {
                kind: primary.descriptor().kind,
                width: canvas.width,
                height: canvas.height,
                has_video: true,
                has_audio: false,
            },
            latest: Arc::clone(&latest),
            token: token.clone(),
            stopped: AtomicBool::new(false),
        };

        tracing::info!(
            "Starting compositor {}x{} @ {}fps",
            canvas.width,
            canvas.height,
            self.settings.target_fps
        );

        tokio::spawn(run_loop(
            primary,
            overlay,
            self.settings.clone(),
            latest,
            token.clone(),
            Arc::clone(&stats),
            on_stall,
        ));

        CompositeStream {
            handle: StreamHandle::new(Arc::new(source)),
            token,
            stats,
        }
    }
}

struct CompositeSource {
    id: Uuid,
    descriptor: StreamDescriptor,
    latest: Arc<Mutex<Option<VideoFrame>>>,
    token: CancellationToken,
    stopped: AtomicBool,
}

impl MediaSource for CompositeSource {
    fn id(&self) -> Uuid {
        self.id
    }

    fn descriptor(&self) -> StreamDescriptor {
        self.descriptor
    }

    fn read_frame(&self) -> Option<VideoFrame> {
        self.latest.lock().clone()
    }

    fn stop(&self) -> AppResult<()> {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.token.cancel();
            self.latest.lock().take();
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

async fn run_loop(
    primary: StreamReader,
    overlay: StreamReader,
    settings: CompositorSettings,
    latest: Arc<Mutex<Option<VideoFrame>>>,
    token: CancellationToken,
    stats: Arc<CompositorStats>,
    on_stall: StallHook,
) {
    let (canvas_w, canvas_h) = (settings.canvas.width, settings.canvas.height);
    let frame_interval = Duration::from_secs_f64(1.0 / settings.target_fps.max(1) as f64);
    let full = Rect {
        x: 0,
        y: 0,
        width: canvas_w,
        height: canvas_h,
    };

    let mut scheduler = tokio::time::interval(settings.scheduler_period);
    scheduler.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut canvas = opaque_black(canvas_w, canvas_h);
    let mut next_due: Option<Instant> = None;
    let mut primary_seen = false;
    let mut primary_missing_since: Option<Instant> = None;
    let mut escalated = false;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = scheduler.tick() => {}
        }

        let now = Instant::now();
        if let Some(due) = next_due {
            if now < due {
                continue;
            }
        }
        // Stay on the fps grid unless we fell more than a frame behind
        next_due = Some(match next_due {
            Some(due) if now.saturating_duration_since(due) < frame_interval => due + frame_interval,
            _ => now + frame_interval,
        });

        let mut drew = false;
        match primary.read_frame() {
            Some(frame) => {
                draw_scaled(&mut canvas, canvas_w, canvas_h, &frame, full);
                primary_seen = true;
                primary_missing_since = None;
                drew = true;
            }
            None => {
                stats.primary_misses.fetch_add(1, Ordering::Relaxed);
                let since = *primary_missing_since.get_or_insert(now);
                if !escalated && now.saturating_duration_since(since) >= settings.stall_timeout {
                    escalated = true;
                    tracing::error!(
                        "Primary source produced no frames for {:?}",
                        settings.stall_timeout
                    );
                    on_stall(AppError::DeviceAbsent(
                        "primary source stopped delivering frames".to_string(),
                    ));
                }
            }
        }

        if primary_seen {
            match overlay.read_frame() {
                Some(frame) => {
                    let rect = settings
                        .layout
                        .overlay_rect(canvas_w, canvas_h, frame.width, frame.height);
                    draw_scaled(&mut canvas, canvas_w, canvas_h, &frame, rect);
                    draw_border(
                        &mut canvas,
                        canvas_w,
                        canvas_h,
                        rect,
                        settings.layout.border_px,
                        settings.layout.border_rgba,
                    );
                    drew = true;
                }
                None => {
                    stats.overlay_misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if drew {
            *latest.lock() = Some(VideoFrame {
                width: canvas_w,
                height: canvas_h,
                data: Arc::from(canvas.as_slice()),
            });
            stats.rendered.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.held.fetch_add(1, Ordering::Relaxed);
        }
    }

    latest.lock().take();
    tracing::debug!(
        "Compositor stopped after {} frames",
        stats.rendered.load(Ordering::Relaxed)
    );
}

fn opaque_black(width: u32, height: u32) -> Vec<u8> {
    let mut canvas = vec![0u8; (width * height * 4) as usize];
    for px in canvas.chunks_exact_mut(4) {
        px[3] = 255;
    }
    canvas
}

/// Draw `src` scaled into `dest` with nearest-neighbour sampling
pub fn draw_scaled(canvas: &mut [u8], canvas_w: u32, canvas_h: u32, src: &VideoFrame, dest: Rect) {
    if src.width == 0 || src.height == 0 || dest.width == 0 || dest.height == 0 {
        return;
    }

    for dy in 0..dest.height {
        let y = dest.y + dy;
        if y >= canvas_h {
            break;
        }
        let src_y = (dy as u64 * src.height as u64 / dest.height as u64) as u32;

        for dx in 0..dest.width {
            let x = dest.x + dx;
            if x >= canvas_w {
                break;
            }
            let src_x = (dx as u64 * src.width as u64 / dest.width as u64) as u32;

            let src_idx = ((src_y * src.width + src_x) * 4) as usize;
            let dst_idx = ((y * canvas_w + x) * 4) as usize;
            if src_idx + 3 >= src.data.len() || dst_idx + 3 >= canvas.len() {
                continue;
            }
            canvas[dst_idx..dst_idx + 4].copy_from_slice(&src.data[src_idx..src_idx + 4]);
        }
    }
}

/// Draw a border of `thickness` pixels just outside `rect`
pub fn draw_border(
    canvas: &mut [u8],
    canvas_w: u32,
    canvas_h: u32,
    rect: Rect,
    thickness: u32,
    rgba: [u8; 4],
) {
    if thickness == 0 {
        return;
    }
    let left = rect.x as i64 - thickness as i64;
    let top = rect.y as i64 - thickness as i64;
    let right = (rect.x + rect.width) as i64 + thickness as i64;
    let bottom = (rect.y + rect.height) as i64 + thickness as i64;

    for y in top.max(0)..bottom.min(canvas_h as i64) {
        for x in left.max(0)..right.min(canvas_w as i64) {
            let inside = x >= rect.x as i64
                && x < (rect.x + rect.width) as i64
                && y >= rect.y as i64
                && y < (rect.y + rect.height) as i64;
            if inside {
                continue;
            }
            let idx = ((y as u32 * canvas_w + x as u32) * 4) as usize;
            if idx + 3 < canvas.len() {
                canvas[idx..idx + 4].copy_from_slice(&rgba);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticCapture;
    use crate::capture::traits::{CaptureBackend, QualityTier, SourceKind};
    use crate::capture::CaptureProvider;

    fn settings() -> CompositorSettings {
        CompositorSettings {
            canvas: Resolution {
                width: 100,
                height: 60,
            },
            target_fps: 30,
            scheduler_period: Duration::from_millis(16),
            stall_timeout: Duration::from_secs(1),
            layout: OverlayLayout::default(),
        }
    }

    async fn open(backend: &SyntheticCapture, kind: SourceKind) -> StreamHandle {
        let request = CaptureProvider::request_for(kind, QualityTier::Low);
        backend.open(&request).await.unwrap()
    }

    #[test]
    fn test_overlay_rect_bottom_right() {
        let layout = OverlayLayout::default();
        let rect = layout.overlay_rect(1000, 600, 640, 480);

        assert_eq!(rect.width, 220);
        assert_eq!(rect.height, 165);
        assert_eq!(rect.x, 1000 - 30 - 220);
        assert_eq!(rect.y, 600 - 18 - 165);
        let (px, py) = layout.position_percent(rect, 1000, 600);
        assert!((px - 75.0).abs() < 0.01);
        assert!(py > 60.0 && py < 70.0);
    }

    #[test]
    fn test_overlay_width_fraction_is_clamped() {
        let layout = OverlayLayout {
            width_fraction: 0.9,
            ..OverlayLayout::default()
        };
        let rect = layout.overlay_rect(1000, 600, 1280, 720);
        assert_eq!(rect.width, 250);
    }

    #[test]
    fn test_draw_scaled_and_border() {
        let mut canvas = opaque_black(10, 10);
        let red = VideoFrame::solid(2, 2, [255, 0, 0, 255]);
        let rect = Rect {
            x: 4,
            y: 4,
            width: 4,
            height: 4,
        };
        draw_scaled(&mut canvas, 10, 10, &red, rect);
        draw_border(&mut canvas, 10, 10, rect, 1, [255, 255, 255, 255]);
        let frame = VideoFrame::new(10, 10, canvas);

        assert_eq!(frame.pixel(5, 5), Some([255, 0, 0, 255]));
        assert_eq!(frame.pixel(3, 3), Some([255, 255, 255, 255]));
        assert_eq!(frame.pixel(8, 8), Some([255, 255, 255, 255]));
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0, 255]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_composite_draws_primary_and_overlay() {
        let backend = SyntheticCapture::new().with_frame_size(32, 18);
        let screen = open(&backend, SourceKind::Screen).await;
        let camera = open(&backend, SourceKind::Camera).await;

        let compositor = Compositor::new(settings());
        let composite = compositor.composite(screen.reader(), camera.reader(), Arc::new(|_| {}));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let frame = composite.handle.reader().read_frame().unwrap();
        assert_eq!((frame.width, frame.height), (100, 60));
        assert_eq!(frame.pixel(1, 1), Some([30, 60, 200, 255]));
        let rect = OverlayLayout::default().overlay_rect(100, 60, 32, 18);
        assert_eq!(
            frame.pixel(rect.x + rect.width / 2, rect.y + rect.height / 2),
            Some([40, 180, 90, 255])
        );

        // Elapsed-time gating: ~6 renders in 200ms at 30fps, not one per 16ms tick
        let rendered = composite.stats.rendered.load(Ordering::Relaxed);
        assert!((5..=8).contains(&rendered), "rendered {}", rendered);

        composite.handle.release().unwrap();
        assert!(composite.token.is_cancelled());
        screen.release().unwrap();
        camera.release().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_overlay_keeps_primary_only() {
        let backend = SyntheticCapture::new().with_frame_size(32, 18);
        backend.frameless(SourceKind::Camera);
        let screen = open(&backend, SourceKind::Screen).await;
        let camera = open(&backend, SourceKind::Camera).await;

        let composite =
            Compositor::new(settings()).composite(screen.reader(), camera.reader(), Arc::new(|_| {}));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let frame = composite.handle.reader().read_frame().unwrap();
        assert_eq!(frame.pixel(95, 55), Some([30, 60, 200, 255]));
        assert!(composite.stats.overlay_misses.load(Ordering::Relaxed) > 0);
        composite.token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_stall_is_escalated_once() {
        let backend = SyntheticCapture::new().with_frame_size(32, 18);
        backend.frameless(SourceKind::Screen);
        let screen = open(&backend, SourceKind::Screen).await;
        let camera = open(&backend, SourceKind::Camera).await;

        let stalls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&stalls);
        let composite = Compositor::new(settings()).composite(
            screen.reader(),
            camera.reader(),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(stalls.load(Ordering::SeqCst), 0);
        assert!(composite.handle.reader().read_frame().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(stalls.load(Ordering::SeqCst), 1);
        composite.token.cancel();
    }
}

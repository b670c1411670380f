//! Studio Recorder - capture, composite, encode and export recordings.
//!
//! This is the engine behind a creator studio: it acquires camera, screen,
//! window and microphone sources, composites the camera over a display,
//! encodes incrementally, and hands finished artifacts to the edit, export
//! and library layers. Device capture, encoding backends, conversion and
//! library storage sit behind traits so hosts can plug in their own.

pub mod capture;
pub mod edit;
pub mod encoder;
pub mod export;
pub mod library;
pub mod recorder;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use recorder::{CaptureSpec, RecorderConfig, RecordingEvent, RecordingSession, SessionState};
pub use utils::error::{AppError, AppResult, ErrorKind};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging.
///
/// Honours `RUST_LOG`; safe to call more than once.
pub fn init_tracing() {
    let initialized = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studio_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if initialized {
        tracing::info!("Starting Studio Recorder v{}", env!("CARGO_PKG_VERSION"));
    }
}

//! Recording system module
//!
//! This module implements the recording session:
//! - ResourceLedger owning every live handle of a session
//! - Compositor combining a display source with the camera
//! - ActiveClock measuring recorded time without pauses
//! - RecordingSession driving the state machine

pub mod clock;
pub mod compositor;
pub mod ledger;
pub mod session;
pub mod state;

pub use clock::ActiveClock;
pub use compositor::{
    CompositeStream, Compositor, CompositorSettings, CompositorStats, OverlayCorner, OverlayLayout,
};
pub use ledger::{LedgerEpoch, ReleaseFailure, ReleaseReport, ResourceLedger};
pub use session::RecordingSession;
pub use state::{CaptureSpec, RecorderConfig, RecordingEvent, SessionSnapshot, SessionState};

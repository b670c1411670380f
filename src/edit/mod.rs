//! Editing
//!
//! Edit state for a recorded artifact, preview rendering of the
//! non-destructive edits and the pipeline for trim and crop.

pub mod pipeline;
pub mod preview;
pub mod types;

pub use pipeline::EditPipeline;
pub use preview::{apply_filters, css_filter, gain_at, visible_overlays, PreviewState};
pub use types::{
    AudioSettings, CropRect, EditState, FilterSettings, TextOverlay, TextPosition, TrimRange,
    VisibleInterval,
};

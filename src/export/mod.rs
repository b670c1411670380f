//! Export module
//!
//! Conversion of finished artifacts: the converter boundary, the export
//! pipeline, the FFmpeg converter and the download surface.

pub mod convert;
pub mod download;
pub mod ffmpeg;
pub mod pipeline;
pub mod types;

pub use convert::{ConversionOp, Converter, ConverterCapabilities};
pub use download::{download, DirectorySink, DownloadRequest, DownloadSink};
pub use ffmpeg::FfmpegConverter;
pub use pipeline::ExportPipeline;
pub use types::{
    DeclinedCapability, ExportOptions, ExportOutcome, ExportProgress, ExportQuality, ExportRequest,
    ExportStage,
};

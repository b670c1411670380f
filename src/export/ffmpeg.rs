//! FFmpeg converter
//!
//! Runs conversions through the `ffmpeg` binary. Artifacts are staged in
//! temporary files since FFmpeg needs seekable input for most containers.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::convert::{ConversionOp, Converter, ConverterCapabilities};
use super::types::ExportQuality;
use crate::capture::traits::VideoFrame;
use crate::encoder::types::{Artifact, Container, EncodingFormat, VideoCodec};
use crate::utils::error::{AppError, AppResult, ConversionStage};

/// Converter backed by the `ffmpeg` binary
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    binary: PathBuf,
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl FfmpegConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific FFmpeg executable
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, stage: ConversionStage, args: &[String]) -> AppResult<Vec<u8>> {
        tracing::debug!("Running FFmpeg ({}): {:?}", stage, args);

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::conversion(stage, format!("Failed to start FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::conversion(
                stage,
                format!("FFmpeg exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(output.stdout)
    }
}

/// Write an artifact to a temp file with the right extension
fn stage_input(artifact: &Artifact, stage: ConversionStage) -> AppResult<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("studio-input-")
        .suffix(&format!(".{}", artifact.container().extension()))
        .tempfile()
        .map_err(|e| AppError::conversion(stage, format!("Failed to create temp file: {}", e)))?;
    std::io::Write::write_all(&mut file, &artifact.data)
        .map_err(|e| AppError::conversion(stage, format!("Failed to stage input: {}", e)))?;
    Ok(file)
}

#[async_trait]
impl Converter for FfmpegConverter {
    fn capabilities(&self) -> ConverterCapabilities {
        ConverterCapabilities {
            watermark: false,
            strip_audio: true,
        }
    }

    async fn convert(&self, input: &Artifact, op: &ConversionOp) -> AppResult<Artifact> {
        let stage = op.stage();
        let input_file = stage_input(input, stage)?;
        let workdir = tempfile::tempdir()
            .map_err(|e| AppError::conversion(stage, format!("Failed to create temp dir: {}", e)))?;

        let (format, duration_ms, width, height) = output_shape(input, op);
        let output_path = workdir.path().join(format!("output.{}", format.container.extension()));
        let args = build_conversion_args(input, op, input_file.path(), &output_path);

        self.run(stage, &args).await?;

        let data = tokio::fs::read(&output_path)
            .await
            .map_err(|e| AppError::conversion(stage, format!("Failed to read output: {}", e)))?;
        if data.is_empty() {
            return Err(AppError::conversion(stage, "FFmpeg produced an empty file"));
        }

        tracing::info!("FFmpeg {} finished: {} bytes", stage, data.len());
        Ok(input.derive(format, data, duration_ms, width, height))
    }

    async fn sample_frame(&self, input: &Artifact, at_ms: u64) -> AppResult<VideoFrame> {
        let stage = ConversionStage::FrameSample;
        if !input.has_video() {
            return Err(AppError::conversion(stage, "artifact has no video track"));
        }
        let input_file = stage_input(input, stage)?;
        let args = build_sample_args(input, input_file.path(), at_ms);

        let data = self.run(stage, &args).await?;
        let expected = (input.width * input.height * 4) as usize;
        if data.len() < expected {
            return Err(AppError::conversion(
                stage,
                format!("expected {} bytes of RGBA, got {}", expected, data.len()),
            ));
        }
        Ok(VideoFrame::new(input.width, input.height, data[..expected].to_vec()))
    }
}

/// Format, duration and dimensions of the converted artifact
fn output_shape(input: &Artifact, op: &ConversionOp) -> (EncodingFormat, u64, u32, u32) {
    match op {
        ConversionOp::Trim(range) => (input.format, range.duration_ms(), input.width, input.height),
        ConversionOp::Crop(rect) => {
            let (_, _, w, h) = rect.to_pixels(input.width, input.height);
            (input.format, input.duration_ms, w, h)
        }
        ConversionOp::Transcode { format, .. } => (*format, input.duration_ms, input.width, input.height),
    }
}

fn build_conversion_args(input: &Artifact, op: &ConversionOp, input_path: &Path, output_path: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input_path.to_string_lossy().to_string(),
    ];

    match op {
        ConversionOp::Trim(range) => {
            args.extend([
                "-ss".into(),
                format!("{:.3}", range.start_secs()),
                "-to".into(),
                format!("{:.3}", range.end_secs()),
            ]);
            args.extend(codec_args(&input.format, ExportQuality::High));
        }
        ConversionOp::Crop(rect) => {
            let (x, y, w, h) = rect.to_pixels(input.width, input.height);
            args.extend(["-vf".into(), format!("crop={}:{}:{}:{}", w, h, x, y)]);
            args.extend(codec_args(&input.format, ExportQuality::High));
        }
        ConversionOp::Transcode { format, quality, .. } => {
            args.extend(codec_args(format, *quality));
        }
    }

    args.push(output_path.to_string_lossy().to_string());
    args
}

/// Video and audio codec options for writing `format`
fn codec_args(format: &EncodingFormat, quality: ExportQuality) -> Vec<String> {
    let crf = quality.crf().to_string();
    let mut args: Vec<String> = Vec::new();

    match format.video {
        Some(VideoCodec::H264) => args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            quality.h264_preset().into(),
            "-crf".into(),
            crf,
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-movflags".into(),
            "+faststart".into(),
        ]),
        Some(codec @ (VideoCodec::Vp9 | VideoCodec::Vp8)) => args.extend([
            "-c:v".into(),
            codec.ffmpeg_encoder().into(),
            "-crf".into(),
            crf,
            "-b:v".into(),
            "0".into(),
        ]),
        Some(VideoCodec::Gif) => args.extend([
            "-vf".into(),
            format!(
                "fps={},scale=800:-1:flags=lanczos,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse",
                quality.gif_fps()
            ),
        ]),
        None => args.push("-vn".into()),
    }

    match format.audio {
        Some(audio) if format.container != Container::Gif => args.extend([
            "-c:a".into(),
            audio.ffmpeg_encoder().into(),
            "-b:a".into(),
            "192k".into(),
        ]),
        _ => args.push("-an".into()),
    }
    args
}

fn build_sample_args(input: &Artifact, input_path: &Path, at_ms: u64) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        format!("{:.3}", at_ms as f64 / 1000.0),
        "-i".into(),
        input_path.to_string_lossy().to_string(),
        "-frames:v".into(),
        "1".into(),
        "-s".into(),
        format!("{}x{}", input.width, input.height),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-".into(),
    ]
}

//! FFmpeg encoder backend
//!
//! Runs one FFmpeg process per recording. Raw RGBA frames (or f32 PCM for
//! audio-only captures) are written to its stdin and the muxed container
//! bytes are collected from its stdout. The reported format carries only
//! the tracks actually written.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use super::backend::{EncodeInput, EncoderFactory, MediaEncoder};
use super::types::{Container, EncoderSettings, EncodingFormat};
use crate::capture::traits::AudioBuffer;
use crate::utils::error::{AppError, AppResult};

/// Encoder factory backed by the `ffmpeg` binary on the PATH
#[derive(Debug, Default)]
pub struct FfmpegEncoderFactory {
    encoders: OnceLock<HashSet<String>>,
}

impl FfmpegEncoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn available_encoders(&self) -> &HashSet<String> {
        self.encoders.get_or_init(|| {
            match Command::new("ffmpeg").args(["-hide_banner", "-encoders"]).output() {
                Ok(output) if output.status.success() => {
                    let list = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
                    tracing::debug!("FFmpeg reports {} encoders", list.len());
                    list
                }
                Ok(output) => {
                    tracing::warn!("ffmpeg -encoders exited with {}", output.status);
                    HashSet::new()
                }
                Err(e) => {
                    tracing::warn!("FFmpeg not available: {}", e);
                    HashSet::new()
                }
            }
        })
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn is_supported(&self, format: &EncodingFormat) -> bool {
        let encoders = self.available_encoders();
        let video_ok = format
            .video
            .map_or(true, |v| encoders.contains(v.ffmpeg_encoder()));
        let audio_ok = format
            .audio
            .map_or(true, |a| encoders.contains(a.ffmpeg_encoder()));
        video_ok && audio_ok && (format.audio.is_none() || format.container.supports_audio())
    }

    fn open(&self, format: &EncodingFormat, settings: &EncoderSettings) -> AppResult<Box<dyn MediaEncoder>> {
        if !self.is_supported(format) {
            return Err(AppError::UnsupportedEncoding(format.to_string()));
        }
        let encoder = FfmpegMediaEncoder::open(*format, settings)?;
        Ok(Box::new(encoder))
    }
}

/// Names from the `ffmpeg -encoders` listing
fn parse_encoder_list(listing: &str) -> HashSet<String> {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            if flags.len() != 6 {
                return None;
            }
            parts.next().map(str::to_string)
        })
        .collect()
}

/// Sample layout of the raw PCM piped to an audio-only encode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AudioLayout {
    sample_rate: u32,
    channels: u16,
}

impl AudioLayout {
    fn of(buffer: &AudioBuffer) -> Self {
        Self {
            sample_rate: buffer.sample_rate,
            channels: buffer.channels,
        }
    }
}

impl fmt::Display for AudioLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz x{}", self.sample_rate, self.channels)
    }
}

/// Format FFmpeg will actually write.
///
/// A single stdin pipe carries one raw stream, so captures with both
/// tracks are written video-only.
fn written_format(format: &EncodingFormat) -> EncodingFormat {
    if format.video.is_some() {
        format.restricted_to(true, false)
    } else {
        *format
    }
}

/// Arguments for a video encode reading RGBA frames from stdin
fn video_args(format: &EncodingFormat, settings: &EncoderSettings) -> Vec<String> {
    let mut args = input_prelude();
    if let Some(video) = format.video {
        args.extend([
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgba".into(),
            "-s".into(),
            format!("{}x{}", settings.width, settings.height),
            "-r".into(),
            settings.fps.to_string(),
            "-i".into(),
            "-".into(),
            "-c:v".into(),
            video.ffmpeg_encoder().into(),
            "-b:v".into(),
            settings.video_bitrate.to_string(),
        ]);
        if format.container == Container::Mp4 {
            args.extend(["-pix_fmt".into(), "yuv420p".into()]);
        }
    }
    push_output(&mut args, format.container);
    args
}

/// Arguments for an audio-only encode reading interleaved f32 PCM
fn audio_args(format: &EncodingFormat, settings: &EncoderSettings, layout: AudioLayout) -> Vec<String> {
    let mut args = input_prelude();
    if let Some(audio) = format.audio {
        args.extend([
            "-f".into(),
            "f32le".into(),
            "-ar".into(),
            layout.sample_rate.to_string(),
            "-ac".into(),
            layout.channels.to_string(),
            "-i".into(),
            "-".into(),
            "-c:a".into(),
            audio.ffmpeg_encoder().into(),
            "-b:a".into(),
            settings.audio_bitrate.to_string(),
        ]);
    }
    push_output(&mut args, format.container);
    args
}

fn input_prelude() -> Vec<String> {
    vec!["-hide_banner".into(), "-loglevel".into(), "error".into()]
}

fn push_output(args: &mut Vec<String>, container: Container) {
    if container == Container::Mp4 {
        // mp4 can only be streamed to a pipe as fragments
        args.extend(["-movflags".into(), "frag_keyframe+empty_moov".into()]);
    }
    args.extend(["-f".into(), container.muxer().into(), "pipe:1".into()]);
}

/// One FFmpeg child process with its stdout drained on a reader thread
struct FfmpegProcess {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    output: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl FfmpegProcess {
    fn spawn(args: &[String]) -> io::Result<Self> {
        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(mut stdout)) = (stdin, stdout) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "FFmpeg pipes unavailable"));
        };

        let output = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&output);
        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 64 * 1024];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => sink.lock().extend_from_slice(&buf[..n]),
                    Err(e) => {
                        tracing::warn!("FFmpeg stdout read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            output,
            reader: Some(reader),
        })
    }

    fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut *self.output.lock())
    }

    fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::EncodeFailure("encoder already finished".to_string()))?;
        stdin
            .write_all(bytes)
            .map_err(|e| AppError::EncodeFailure(format!("Failed to write to FFmpeg: {}", e)))
    }

    /// Close stdin and wait for FFmpeg to drain
    fn finish(&mut self) -> AppResult<Vec<u8>> {
        drop(self.stdin.take());

        if let Some(child) = self.child.take() {
            let status = child
                .wait_with_output()
                .map_err(|e| AppError::EncodeFailure(format!("Failed to wait for FFmpeg: {}", e)))?
                .status;
            if let Some(reader) = self.reader.take() {
                let _ = reader.join();
            }
            if !status.success() {
                return Err(AppError::EncodeFailure(format!("FFmpeg exited with {}", status)));
            }
        }
        Ok(self.take_output())
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// A running FFmpeg encode.
///
/// Video encodes start FFmpeg when opened. Audio-only encodes start it on
/// the first audio buffer, whose sample rate and channel count fix the
/// PCM layout for the rest of the recording.
pub struct FfmpegMediaEncoder {
    format: EncodingFormat,
    settings: EncoderSettings,
    process: Option<FfmpegProcess>,
    layout: Option<AudioLayout>,
    frame_size: usize,
    frame_count: u64,
}

impl FfmpegMediaEncoder {
    fn open(format: EncodingFormat, settings: &EncoderSettings) -> AppResult<Self> {
        let written = written_format(&format);
        let process = if written.video.is_some() {
            let args = video_args(&written, settings);
            let process = FfmpegProcess::spawn(&args)
                .map_err(|e| AppError::UnsupportedEncoding(format!("Failed to start FFmpeg encoder: {}", e)))?;
            Some(process)
        } else {
            None
        };

        Ok(Self {
            format: written,
            settings: *settings,
            process,
            layout: None,
            frame_size: (settings.width * settings.height * 4) as usize,
            frame_count: 0,
        })
    }

    fn take_output(&self) -> Vec<u8> {
        self.process.as_ref().map(FfmpegProcess::take_output).unwrap_or_default()
    }

    fn process_mut(&mut self) -> AppResult<&mut FfmpegProcess> {
        self.process
            .as_mut()
            .ok_or_else(|| AppError::EncodeFailure("encoder already finished".to_string()))
    }

    fn encode_audio(&mut self, audio: &[AudioBuffer]) -> AppResult<()> {
        let Some(first) = audio.first() else {
            return Ok(());
        };
        let layout = match self.layout {
            Some(layout) => layout,
            None => {
                let layout = AudioLayout::of(first);
                let args = audio_args(&self.format, &self.settings, layout);
                let process = FfmpegProcess::spawn(&args)
                    .map_err(|e| AppError::EncodeFailure(format!("Failed to start FFmpeg encoder: {}", e)))?;
                tracing::debug!("Audio encode started at {}", layout);
                self.process = Some(process);
                self.layout = Some(layout);
                layout
            }
        };

        let mut pcm = Vec::new();
        for buffer in audio {
            let found = AudioLayout::of(buffer);
            if found != layout {
                return Err(AppError::EncodeFailure(format!(
                    "audio changed from {} to {} mid-recording",
                    layout, found
                )));
            }
            for sample in &buffer.samples {
                pcm.extend_from_slice(&sample.to_le_bytes());
            }
        }
        if !pcm.is_empty() {
            self.process_mut()?.write(&pcm)?;
        }
        Ok(())
    }
}

impl MediaEncoder for FfmpegMediaEncoder {
    fn format(&self) -> EncodingFormat {
        self.format
    }

    fn encode(&mut self, input: EncodeInput<'_>) -> AppResult<Vec<u8>> {
        if self.format.video.is_some() {
            let Some(frame) = input.frame else {
                return Ok(self.take_output());
            };
            if frame.data.len() != self.frame_size {
                return Err(AppError::EncodeFailure(format!(
                    "frame is {}x{}, encoder expects {} bytes",
                    frame.width, frame.height, self.frame_size
                )));
            }
            let data = Arc::clone(&frame.data);
            self.process_mut()?.write(&data)?;
            self.frame_count += 1;
        } else {
            self.encode_audio(input.audio)?;
        }
        Ok(self.take_output())
    }

    fn finish(&mut self) -> AppResult<Vec<u8>> {
        let Some(mut process) = self.process.take() else {
            tracing::info!("FFmpeg encoder finished without input");
            return Ok(Vec::new());
        };
        let tail = process.finish()?;
        tracing::info!("FFmpeg encoder finished: {} frames written", self.frame_count);
        Ok(tail)
    }
}

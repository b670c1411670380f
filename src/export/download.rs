//! Download surface
//!
//! Hands a finished artifact to the host for a user-facing save.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::encoder::types::Artifact;
use crate::utils::error::{AppError, AppResult, ConversionStage};

/// Suggested file name and type for a save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub suggested_name: String,
    pub extension: String,
    pub mime_type: String,
}

impl DownloadRequest {
    pub fn for_artifact(artifact: &Artifact, name: &str) -> Self {
        Self {
            suggested_name: sanitize_file_name(name),
            extension: artifact.container().extension().to_string(),
            mime_type: artifact.format.mime_type(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.suggested_name, self.extension)
    }
}

/// Replace characters that are not safe in file names
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        "recording".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Receives artifacts for saving
pub trait DownloadSink: Send + Sync {
    /// Save the bytes; returns where they ended up
    fn deliver(&self, request: &DownloadRequest, data: &[u8]) -> AppResult<String>;
}

/// Saves downloads into a directory, never overwriting existing files
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadSink for DirectorySink {
    fn deliver(&self, request: &DownloadRequest, data: &[u8]) -> AppResult<String> {
        let fail = |e: std::io::Error| AppError::conversion(ConversionStage::Download, e.to_string());
        std::fs::create_dir_all(&self.dir).map_err(fail)?;

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                request.file_name()
            } else {
                format!("{} ({}).{}", request.suggested_name, attempt, request.extension)
            };
            let path = self.dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(data).map_err(fail)?;
                    tracing::info!("Saved {} ({} bytes)", path.display(), data.len());
                    return Ok(path.to_string_lossy().to_string());
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(fail(e)),
            }
        }
    }
}

/// Deliver an artifact through `sink`
pub fn download(sink: &dyn DownloadSink, artifact: &Artifact, name: &str) -> AppResult<String> {
    let request = DownloadRequest::for_artifact(artifact, name);
    sink.deliver(&request, &artifact.data)
}

//! Library persistence
//!
//! Key-value stores for saved recording metadata and thumbnails. The
//! directory store keeps one `<id>.json` and an optional `<id>.png` per
//! entry; media binaries are never written here.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::schema::SavedRecording;
use crate::utils::error::AppResult;

/// External key-value store keyed by recording id
pub trait LibraryStore: Send + Sync {
    fn put(&self, entry: &SavedRecording, thumbnail: Option<&[u8]>) -> AppResult<()>;

    /// Update metadata, keeping the stored thumbnail
    fn update(&self, entry: &SavedRecording) -> AppResult<()>;

    fn get(&self, id: Uuid) -> AppResult<Option<SavedRecording>>;

    fn list(&self) -> AppResult<Vec<SavedRecording>>;

    fn thumbnail(&self, id: Uuid) -> AppResult<Option<Vec<u8>>>;

    /// Returns whether the entry existed
    fn remove(&self, id: Uuid) -> AppResult<bool>;
}

#[derive(Default)]
struct MemoryEntry {
    meta: Option<SavedRecording>,
    thumbnail: Option<Vec<u8>>,
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<Uuid, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LibraryStore for MemoryStore {
    fn put(&self, entry: &SavedRecording, thumbnail: Option<&[u8]>) -> AppResult<()> {
        self.entries.lock().insert(
            entry.id,
            MemoryEntry {
                meta: Some(entry.clone()),
                thumbnail: thumbnail.map(<[u8]>::to_vec),
            },
        );
        Ok(())
    }

    fn update(&self, entry: &SavedRecording) -> AppResult<()> {
        self.entries.lock().entry(entry.id).or_default().meta = Some(entry.clone());
        Ok(())
    }

    fn get(&self, id: Uuid) -> AppResult<Option<SavedRecording>> {
        Ok(self.entries.lock().get(&id).and_then(|e| e.meta.clone()))
    }

    fn list(&self) -> AppResult<Vec<SavedRecording>> {
        Ok(self.entries.lock().values().filter_map(|e| e.meta.clone()).collect())
    }

    fn thumbnail(&self, id: Uuid) -> AppResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(&id).and_then(|e| e.thumbnail.clone()))
    }

    fn remove(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.entries.lock().remove(&id).is_some())
    }
}

/// Directory-backed store
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn meta_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    fn thumbnail_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{}.png", id))
    }

    fn write_meta(&self, entry: &SavedRecording) -> AppResult<()> {
        let content = serde_json::to_string_pretty(entry)?;
        fs::write(self.meta_path(entry.id), content)?;
        Ok(())
    }
}

impl LibraryStore for DirectoryStore {
    fn put(&self, entry: &SavedRecording, thumbnail: Option<&[u8]>) -> AppResult<()> {
        self.write_meta(entry)?;
        let thumb_path = self.thumbnail_path(entry.id);
        match thumbnail {
            Some(png) => fs::write(&thumb_path, png)?,
            None if thumb_path.exists() => fs::remove_file(&thumb_path)?,
            None => {}
        }
        tracing::debug!("Saved library entry '{}' to {:?}", entry.name, self.root);
        Ok(())
    }

    fn update(&self, entry: &SavedRecording) -> AppResult<()> {
        self.write_meta(entry)
    }

    fn get(&self, id: Uuid) -> AppResult<Option<SavedRecording>> {
        let path = self.meta_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn list(&self) -> AppResult<Vec<SavedRecording>> {
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<SavedRecording>(&content) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping library entry {:?}: {}", path, e),
            }
        }
        Ok(entries)
    }

    fn thumbnail(&self, id: Uuid) -> AppResult<Option<Vec<u8>>> {
        let path = self.thumbnail_path(id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    fn remove(&self, id: Uuid) -> AppResult<bool> {
        let meta = self.meta_path(id);
        let existed = meta.exists();
        if existed {
            fs::remove_file(meta)?;
        }
        let thumb = self.thumbnail_path(id);
        if thumb.exists() {
            fs::remove_file(thumb)?;
        }
        Ok(existed)
    }
}

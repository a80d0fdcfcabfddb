use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;

use crate::{domain::MediaKind, errors::Error, ports::ObjectStore, Result};

pub const THUMBNAIL_FOLDER: &str = "thumbnails";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "wmv", "flv", "mkv", "webm"];

/// Lowercased extension of a key, without the dot.
pub fn extension_of(key: &str) -> Option<String> {
    let name = key.rsplit('/').next().unwrap_or(key);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Media kind implied by a key's extension.
pub fn media_kind_of_key(key: &str) -> Option<MediaKind> {
    let ext = extension_of(key)?;
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Photo)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

pub fn is_thumbnail_key(key: &str) -> bool {
    key.starts_with("thumbnails/") || key.contains("/thumbnails/")
}

/// Thumbnail location for a media key: `thumbnails/{key without extension}.jpg`.
pub fn thumbnail_key(key: &str) -> String {
    let without_ext = match key.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') => stem,
        _ => key,
    };
    format!("{THUMBNAIL_FOLDER}/{without_ext}.jpg")
}

pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "html" => "text/html",
        _ => "application/octet-stream",
    }
}

/// A stored object as kept by `MemoryObjectStore`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-process object store. Used by tests and `--dry-run` style tooling.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    uploads: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock_objects().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.lock_objects().get(key).cloned()
    }

    /// Every `upload` call in order, including overwrites.
    pub fn upload_log(&self) -> Vec<String> {
        self.uploads
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    fn lock_objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        // A poisoned lock only means a test panicked mid-upload; the map is still usable.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.lock_objects().insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        if let Ok(mut log) = self.uploads.lock() {
            log.push(key.to_string());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.lock_objects()
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| Error::External(format!("object not found: {key}")))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock_objects().contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock_objects()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn list_folders(&self) -> Result<Vec<String>> {
        let mut folders: Vec<String> = self
            .lock_objects()
            .keys()
            .filter_map(|k| k.split_once('/').map(|(folder, _)| folder.to_string()))
            .collect();
        folders.dedup();
        Ok(folders)
    }

    async fn list_root(&self) -> Result<Vec<String>> {
        Ok(self
            .lock_objects()
            .keys()
            .filter(|k| !k.contains('/'))
            .cloned()
            .collect())
    }
}

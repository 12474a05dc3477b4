//! Filesystem layout for asset files.
//!
//! Everything lives under one data directory:
//!
//! ```text
//! <data>/easel.sqlite3
//! <data>/tmp/<uuid>.part                      in-flight uploads
//! <data>/assets/<project>/<hash>.<ext>        content-addressed originals
//! <data>/thumbnails/<project>/<hash>.jpg      bounded thumbnails
//! <data>/trash/<project>/assets/...           soft-deleted files, mirrored
//! <data>/trash/<project>/thumbnails/...
//! ```
//!
//! All paths stored in the database are relative to the data directory so
//! the whole tree can be moved as a unit.

pub mod hashing;
pub mod thumbnails;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Layout {
    data_dir: PathBuf,
}

impl Layout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("easel.sqlite3")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    /// Relative storage path for a content-addressed asset file.
    pub fn asset_rel(&self, project_id: &str, content_hash: &str, ext: &str) -> String {
        if ext.is_empty() {
            format!("assets/{}/{}", project_id, content_hash)
        } else {
            format!("assets/{}/{}.{}", project_id, content_hash, ext)
        }
    }

    /// Relative path for an asset's thumbnail.
    pub fn thumbnail_rel(&self, project_id: &str, content_hash: &str) -> String {
        format!("thumbnails/{}/{}.jpg", project_id, content_hash)
    }

    /// The trash path mirroring a live relative path.
    pub fn trash_rel(&self, project_id: &str, live_rel: &str) -> String {
        format!("trash/{}/{}", project_id, live_rel)
    }

    pub fn absolute(&self, rel: &str) -> PathBuf {
        self.data_dir.join(rel)
    }

    pub fn project_dirs(&self, project_id: &str) -> [PathBuf; 3] {
        [
            self.data_dir.join("assets").join(project_id),
            self.data_dir.join("thumbnails").join(project_id),
            self.data_dir.join("trash").join(project_id),
        ]
    }

    /// Move a file between two relative locations, creating parents.
    /// Rename first; cross-device moves fall back to copy + delete.
    pub fn move_file(&self, from_rel: &str, to_rel: &str) -> Result<()> {
        let from = self.absolute(from_rel);
        let to = self.absolute(to_rel);
        move_file(&from, &to)
    }

    /// Permanently delete a file if it exists.
    pub fn remove_file(&self, rel: &str) -> Result<()> {
        let path = self.absolute(rel);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Total bytes held in a project's trash subtree.
    pub fn trash_size(&self, project_id: &str) -> u64 {
        let root = self.data_dir.join("trash").join(project_id);
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}

/// Move `from` to `to`, creating parent directories. Falls back to
/// copy-then-delete when rename fails (e.g. across filesystems).
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}

/// Map a MIME type to a normalized file extension for content-addressed
/// filenames. Unknown types fall back to the (sanitized) original extension.
pub fn extension_for(mime_type: &str, original_name: &str) -> String {
    let ext = match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/avif" => "avif",
        "text/plain" => "txt",
        "application/pdf" => "pdf",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        _ => "",
    };
    if !ext.is_empty() {
        return ext.to_string();
    }
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            e.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(8)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .unwrap_or_default()
}

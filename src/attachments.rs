//! Outbound attachment staging.
//!
//! The daemon reads attachment files from disk, so outbound media is written
//! to a staging directory the daemon can see, referenced by path in the send
//! request, and deleted again once the request resolves (success or error).
//! A grace-period sweep catches files whose request never resolved at all.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// A file staged for one outbound send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAttachment {
    /// Absolute path of the staged file.
    pub path: PathBuf,
    /// Declared content type, if the host supplied one.
    pub content_type: Option<String>,
    /// Size of the staged file in bytes.
    pub len: u64,
}

/// Writes and removes staged attachment files under one directory.
#[derive(Debug, Clone)]
pub struct AttachmentStager {
    dir: PathBuf,
}

impl AttachmentStager {
    /// Create a stager rooted at `dir`. The directory is created on first
    /// use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The staging directory this stager writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a freshly named file and return its absolute path.
    ///
    /// Filenames are UUID v4, so concurrent sends never collide; a file
    /// extension is appended when the content type maps to a conventional
    /// one, since some receiving clients key off it.
    pub async fn stage(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<StagedAttachment> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BridgeError::Staging(format!("create {:?}: {e}", self.dir)))?;
        let dir = fs::canonicalize(&self.dir)
            .await
            .map_err(|e| BridgeError::Staging(format!("canonicalize {:?}: {e}", self.dir)))?;

        let name = match content_type.and_then(extension_for) {
            Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        };
        let path = dir.join(name);

        fs::write(&path, bytes)
            .await
            .map_err(|e| BridgeError::Staging(format!("write {path:?}: {e}")))?;
        log::debug!("[Stager] staged {} bytes at {path:?}", bytes.len());

        Ok(StagedAttachment {
            path,
            content_type: content_type.map(str::to_string),
            len: bytes.len() as u64,
        })
    }

    /// Delete a staged file. A file that is already gone is not an error.
    pub async fn release(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                log::debug!("[Stager] released {path:?}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Staging(format!("remove {path:?}: {e}"))),
        }
    }

    /// Remove staged files older than `max_age`.
    ///
    /// Backstop against unbounded disk growth when a send never resolves.
    /// Returns the number of files removed.
    pub async fn sweep_stale(&self, max_age: Duration) -> usize {
        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return 0;
        };
        let now = SystemTime::now();
        let mut removed = 0;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let stale = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age >= max_age);
            if stale {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        log::warn!("[Stager] swept stale attachment {:?}", entry.path());
                        removed += 1;
                    }
                    Err(e) => {
                        log::warn!("[Stager] failed to sweep {:?}: {e}", entry.path());
                    }
                }
            }
        }
        removed
    }
}

/// Conventional file extension for a content type, when one exists.
fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "audio/mpeg" => Some("mp3"),
        "audio/ogg" => Some("ogg"),
        "text/plain" => Some("txt"),
        "application/pdf" => Some("pdf"),
        _ => None,
    }
}

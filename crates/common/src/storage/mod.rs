//! File storage under the media root
//!
//! Paths handed around the workflow are relative to the media root, the way
//! they are stored in the application and insertion rows.

use crate::errors::{AppError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Local filesystem storage rooted at the configured media folder
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path, refusing anything that escapes the root
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(AppError::Storage {
                path: relative.to_string(),
                message: "path must be relative to the media root".to_string(),
            });
        }
        Ok(self.root.join(path))
    }

    /// Write bytes, creating parent folders
    pub async fn save(&self, relative: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error(relative, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| storage_error(relative, e))?;
        debug!(path = %relative, size = bytes.len(), "Stored file");
        Ok(())
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.resolve(relative)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| storage_error(relative, e))
    }

    pub async fn exists(&self, relative: &str) -> Result<bool> {
        let path = self.resolve(relative)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| storage_error(relative, e))
    }

    /// Delete a file; a missing file is not an error
    pub async fn delete(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %relative, "File to delete was already missing");
                Ok(())
            }
            Err(e) => Err(storage_error(relative, e)),
        }
    }

    /// Delete a folder with everything below it; a missing folder is not an error
    pub async fn delete_tree(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(relative, e)),
        }
    }
}

fn storage_error(relative: &str, e: std::io::Error) -> AppError {
    AppError::Storage {
        path: relative.to_string(),
        message: e.to_string(),
    }
}

/// Folder holding every file of one applicant for one call
pub fn application_folder(call_id: i64, taxpayer_id: &str) -> String {
    format!("allegati/bando-{}/domanda-{}", call_id, taxpayer_id)
}

/// Folder of required insertion attachments for a target course year
pub fn required_attachment_folder(call_id: i64, taxpayer_id: &str, year: i32) -> String {
    format!(
        "{}/obbligatori/{}-anno",
        application_folder(call_id, taxpayer_id),
        year
    )
}

/// Folder of free insertion attachments for a course year
pub fn free_attachment_folder(call_id: i64, taxpayer_id: &str, year: i32) -> String {
    format!(
        "{}/scelta/{}-anno",
        application_folder(call_id, taxpayer_id),
        year
    )
}

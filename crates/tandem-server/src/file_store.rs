use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::error::ChatError;

/// Reject anything that is not a plain `[A-Za-z0-9._-]` name, or that
/// contains `..`.
pub fn validate_segment(segment: &str) -> Result<(), ChatError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if segment.is_empty() || segment.contains("..") || !segment.chars().all(allowed) {
        return Err(ChatError::Validation(format!(
            "Invalid path segment: {segment:?}"
        )));
    }
    Ok(())
}

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ChatError> {
    let mut resolved = base.to_path_buf();
    for component in target.strip_prefix(base).unwrap_or(target).components() {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ChatError::Validation("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(base) {
        return Err(ChatError::Validation("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

/// Flat `<root>/<folder>/<file>` storage for uploaded files.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FileStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ChatError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ChatError::Internal(format!(
                "Failed to create file directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        let base_path = base_path.canonicalize().unwrap_or(base_path);
        info!(path = %base_path.display(), "File store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Path of `folder/file_name`, validated against traversal.
    pub fn resolve(&self, folder: &str, file_name: &str) -> Result<PathBuf, ChatError> {
        validate_segment(folder)?;
        validate_segment(file_name)?;
        ensure_within(&self.base_path, &self.base_path.join(folder).join(file_name))
    }

    pub async fn exists(&self, folder: &str, file_name: &str) -> Result<bool, ChatError> {
        let path = self.resolve(folder, file_name)?;
        Ok(fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false))
    }

    pub async fn write(&self, folder: &str, file_name: &str, data: &[u8]) -> Result<(), ChatError> {
        if data.is_empty() {
            return Err(ChatError::Validation("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ChatError::PayloadTooLarge { max: self.max_size });
        }

        let path = self.resolve(folder, file_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ChatError::Internal(format!("Failed to create {folder}: {e}")))?;
        }

        fs::write(&path, data).await.map_err(|e| {
            ChatError::Internal(format!("Failed to write {folder}/{file_name}: {e}"))
        })?;

        debug!(folder, file = file_name, size = data.len(), "Stored file");
        Ok(())
    }

    pub async fn read(&self, folder: &str, file_name: &str) -> Result<Vec<u8>, ChatError> {
        let path = self.resolve(folder, file_name)?;

        let data = fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ChatError::NotFound(format!("File {folder}/{file_name}"))
            }
            _ => ChatError::Internal(format!("Failed to read {folder}/{file_name}: {e}")),
        })?;

        debug!(folder, file = file_name, size = data.len(), "Read file");
        Ok(data)
    }

    pub async fn remove(&self, folder: &str, file_name: &str) -> Result<(), ChatError> {
        let path = self.resolve(folder, file_name)?;

        fs::remove_file(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ChatError::NotFound(format!("File {folder}/{file_name}"))
            }
            _ => ChatError::Internal(format!("Failed to delete {folder}/{file_name}: {e}")),
        })?;

        debug!(folder, file = file_name, "Deleted file");
        Ok(())
    }
}

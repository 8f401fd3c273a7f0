//! Attachment blob storage
//!
//! Bytes live on disk under `<root>/<todo id>/<attachment id>`; the todo
//! row only records metadata and the storage key.

use std::path::PathBuf;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the root directory if needed.
    pub async fn initialize(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Attachment store initialized at: {:?}", self.root);
        Ok(())
    }

    /// Writes `data` and returns its storage key.
    pub async fn write(&self, todo_id: &str, attachment_id: &str, data: &[u8]) -> Result<String, AppError> {
        let key = format!("{}/{}", checked(todo_id)?, checked(attachment_id)?);
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a temp file first so readers never see a partial blob.
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key = %key, size = data.len(), "Wrote attachment");
        Ok(key)
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, AppError> {
        let path = self.path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::not_found("Attachment")),
            Err(e) => Err(e.into()),
        }
    }

    /// Deleting a missing blob is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), AppError> {
        let path = self.path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Deleted attachment");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path(&self, key: &str) -> Result<PathBuf, AppError> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(checked(segment)?);
        }
        Ok(path)
    }
}

/// Keys are built from ids; anything that could escape the root is refused.
fn checked(segment: &str) -> Result<&str, AppError> {
    let ok = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(segment)
    } else {
        Err(AppError::validation(format!("invalid storage key segment {segment:?}")))
    }
}

/// Strips directory components and control characters from an uploaded
/// file name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim().trim_start_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path());
        store.initialize().await.unwrap();

        let key = store.write("todo-1", "att-1", b"hello").await.unwrap();
        assert_eq!(key, "todo-1/att-1");
        assert_eq!(store.read(&key).await.unwrap(), b"hello");

        store.delete(&key).await.unwrap();
        assert!(matches!(store.read(&key).await, Err(AppError::NotFound(_))));
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path());
        assert!(store.write("..", "x", b"").await.is_err());
        assert!(store.read("../etc/passwd").await.is_err());
    }

    #[test]
    fn file_names_lose_their_directories() {
        assert_eq!(sanitize_file_name("../../secret.txt"), "secret.txt");
        assert_eq!(sanitize_file_name("C:\\docs\\plan.pdf"), "plan.pdf");
        assert_eq!(sanitize_file_name(".."), "attachment");
    }
}

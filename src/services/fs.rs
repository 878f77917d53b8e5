//! File operations confined to the project root.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::errors::FsError;

#[async_trait]
pub trait ProjectFs: Send + Sync {
    fn root(&self) -> &Path;

    async fn read(&self, path: &str) -> Result<String, FsError>;

    /// Write `content`, creating parent directories as needed.
    async fn write(&self, path: &str, content: &str) -> Result<(), FsError>;

    async fn exists(&self, path: &str) -> Result<bool, FsError>;

    async fn mkdir(&self, path: &str) -> Result<(), FsError>;

    /// Delete a file or a directory tree.
    async fn delete(&self, path: &str) -> Result<(), FsError>;
}

/// Map a project-relative path onto `root`, refusing anything that could leave it.
pub fn confine(root: &Path, path: &str) -> Result<PathBuf, FsError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(FsError::OutsideRoot(path.to_string()));
    }
    let relative = Path::new(trimmed);
    let mut joined = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FsError::OutsideRoot(path.to_string()));
            }
        }
    }
    Ok(joined)
}

fn io_error(path: &Path, source: std::io::Error) -> FsError {
    FsError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// `tokio::fs` backed implementation.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ProjectFs for LocalFs {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, path: &str) -> Result<String, FsError> {
        let full = confine(&self.root, path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| io_error(&full, e))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), FsError> {
        let full = confine(&self.root, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| io_error(&full, e))
    }

    async fn exists(&self, path: &str) -> Result<bool, FsError> {
        let full = confine(&self.root, path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| io_error(&full, e))
    }

    async fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let full = confine(&self.root, path)?;
        tokio::fs::create_dir_all(&full)
            .await
            .map_err(|e| io_error(&full, e))
    }

    async fn delete(&self, path: &str) -> Result<(), FsError> {
        let full = confine(&self.root, path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| io_error(&full, e))?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&full).await
        } else {
            tokio::fs::remove_file(&full).await
        }
        .map_err(|e| io_error(&full, e))
    }
}

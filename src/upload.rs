//! Attachment storage
//!
//! Files are addressed by `<todo id>/<file name>`; that pair is also the
//! `file_uri` handed back to clients.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use crate::config::{Config, UploadType};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file written by [`UploadStore::save`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub file_path: PathBuf,
    pub file_uri: String,
    pub file_name: String,
}

pub enum UploadStore {
    File(FileUploads),
}

/// Uploads stored under a local directory, one folder per todo
pub struct FileUploads {
    root: PathBuf,
}

impl UploadStore {
    pub fn open(config: &Config) -> Self {
        match config.upload_type {
            UploadType::File => UploadStore::File(FileUploads::new(&config.upload_dir)),
        }
    }

    pub async fn save(&self, todo_id: &str, file_name: &str, content: &[u8]) -> Result<StoredUpload, UploadError> {
        match self {
            UploadStore::File(files) => files.save(todo_id, file_name, content).await,
        }
    }

    pub async fn read(&self, todo_id: &str, file_name: &str) -> Result<Vec<u8>, UploadError> {
        match self {
            UploadStore::File(files) => files.read(todo_id, file_name).await,
        }
    }

    pub async fn delete_file(&self, todo_id: &str, file_name: &str) -> Result<(), UploadError> {
        match self {
            UploadStore::File(files) => files.delete_file(todo_id, file_name).await,
        }
    }

    pub async fn delete_folder(&self, todo_id: &str) -> Result<(), UploadError> {
        match self {
            UploadStore::File(files) => files.delete_folder(todo_id).await,
        }
    }
}

impl FileUploads {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn save(&self, todo_id: &str, file_name: &str, content: &[u8]) -> Result<StoredUpload, UploadError> {
        let folder = self.root.join(checked_segment(todo_id)?);
        let file_path = folder.join(checked_segment(file_name)?);

        fs::create_dir_all(&folder).await?;
        fs::write(&file_path, content).await?;

        Ok(StoredUpload {
            file_path,
            file_uri: format!("{}/{}", todo_id, file_name),
            file_name: file_name.to_string(),
        })
    }

    pub async fn read(&self, todo_id: &str, file_name: &str) -> Result<Vec<u8>, UploadError> {
        let path = self.file_path(todo_id, file_name)?;
        fs::read(&path).await.map_err(|e| not_found_or_io(e, todo_id, file_name))
    }

    pub async fn delete_file(&self, todo_id: &str, file_name: &str) -> Result<(), UploadError> {
        let path = self.file_path(todo_id, file_name)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(e, todo_id, file_name))
    }

    /// Remove a todo's folder with everything in it. A missing folder is fine.
    pub async fn delete_folder(&self, todo_id: &str) -> Result<(), UploadError> {
        let folder = self.root.join(checked_segment(todo_id)?);
        match fs::remove_dir_all(&folder).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn file_path(&self, todo_id: &str, file_name: &str) -> Result<PathBuf, UploadError> {
        Ok(self
            .root
            .join(checked_segment(todo_id)?)
            .join(checked_segment(file_name)?))
    }
}

fn not_found_or_io(e: std::io::Error, todo_id: &str, file_name: &str) -> UploadError {
    if e.kind() == ErrorKind::NotFound {
        UploadError::NotFound(format!("{}/{}", todo_id, file_name))
    } else {
        UploadError::Io(e)
    }
}

/// Accept only a single plain path segment: no separators, no `.` or `..`.
fn checked_segment(segment: &str) -> Result<&str, UploadError> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !segment.contains(['/', '\\']) => Ok(segment),
        _ => Err(UploadError::InvalidPath(segment.to_string())),
    }
}

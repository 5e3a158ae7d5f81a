//! Resume file storage.
//!
//! Uploads are streamed to disk chunk by chunk and never held in memory whole. Each stored file
//! gets a fresh `{uuid}{ext}` name; the client's filename only contributes its extension. Writes go
//! to a `.part` file that is renamed into place once the upload is complete, so a crashed or
//! rejected upload never leaves a file that looks finished.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

use crate::errors::Error;

/// Extension used when the client's filename has none we can use
const DEFAULT_EXTENSION: &str = ".pdf";
const MAX_EXTENSION_LEN: usize = 10;

/// Upload body chunks. Errors are already classified by the producer (for example a multipart
/// parse failure or an exceeded request body limit).
pub type ChunkStream<'a> = BoxStream<'a, Result<Bytes, Error>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Resume file cannot be empty")]
    Empty,

    #[error("Resume exceeds maximum size of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Invalid stored file name: {0}")]
    InvalidName(String),

    #[error("Stored file not found: {0}")]
    NotFound(String),

    /// The upload stream itself failed
    #[error(transparent)]
    Upload(Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Empty => Error::BadRequest { message: err.to_string() },
            StorageError::TooLarge { limit } => Error::PayloadTooLarge {
                message: format!(
                    "Resume exceeds maximum size of {} bytes ({:.1} MB)",
                    limit,
                    limit as f64 / (1024.0 * 1024.0)
                ),
            },
            StorageError::InvalidName(name) | StorageError::NotFound(name) => Error::NotFound {
                resource: "Resume".to_string(),
                id: name,
            },
            StorageError::Upload(inner) => inner,
            StorageError::Io(e) => Error::Internal {
                operation: format!("access resume storage: {e}"),
            },
        }
    }
}

/// Where resumes live. Implementations must be cheap to share across requests.
#[async_trait]
pub trait ResumeStorage: Send + Sync {
    /// Persist an upload and return its stored name.
    async fn store(&self, original_name: Option<&str>, chunks: ChunkStream<'_>) -> Result<String, StorageError>;

    /// Stream a stored file back.
    async fn open(&self, stored_name: &str) -> Result<BoxStream<'static, io::Result<Bytes>>, StorageError>;

    /// Read a stored file fully, for attaching to email.
    async fn read(&self, stored_name: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete a stored file. Missing files are not an error.
    async fn remove(&self, stored_name: &str) -> Result<(), StorageError>;
}

/// Pick the stored extension from a client filename: lower-cased, alphanumeric only.
pub fn stored_extension(original_name: Option<&str>) -> String {
    original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= MAX_EXTENSION_LEN && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Stores resumes as flat files in one directory.
#[derive(Debug, Clone)]
pub struct LocalResumeStorage {
    root: PathBuf,
    max_file_size: u64,
}

impl LocalResumeStorage {
    /// Create the storage, making the directory if needed.
    pub async fn new(root: impl Into<PathBuf>, max_file_size: u64) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root, max_file_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a stored name to its path, refusing anything that could escape the root.
    pub fn resolve(&self, stored_name: &str) -> Result<PathBuf, StorageError> {
        let valid = !stored_name.is_empty()
            && !stored_name.starts_with('.')
            && !stored_name.contains(['/', '\\'])
            && !stored_name.contains("..");
        if !valid {
            return Err(StorageError::InvalidName(stored_name.to_string()));
        }
        Ok(self.root.join(stored_name))
    }

    async fn write_chunks(&self, path: &Path, mut chunks: ChunkStream<'_>) -> Result<u64, StorageError> {
        let mut file = fs::File::create(path).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(StorageError::Upload)?;
            written += chunk.len() as u64;
            if written > self.max_file_size {
                return Err(StorageError::TooLarge {
                    limit: self.max_file_size,
                });
            }
            file.write_all(&chunk).await?;
        }

        if written == 0 {
            return Err(StorageError::Empty);
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

fn not_found_or(stored_name: &str, e: io::Error) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(stored_name.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl ResumeStorage for LocalResumeStorage {
    #[instrument(skip(self, chunks), err)]
    async fn store(&self, original_name: Option<&str>, chunks: ChunkStream<'_>) -> Result<String, StorageError> {
        let stored_name = format!("{}{}", uuid::Uuid::new_v4(), stored_extension(original_name));
        let final_path = self.root.join(&stored_name);
        let part_path = self.root.join(format!("{stored_name}.part"));

        match self.write_chunks(&part_path, chunks).await {
            Ok(size) => {
                fs::rename(&part_path, &final_path).await?;
                debug!(stored_name, size, "Stored resume");
                Ok(stored_name)
            }
            Err(e) => {
                match fs::remove_file(&part_path).await {
                    Err(cleanup) if cleanup.kind() != io::ErrorKind::NotFound => {
                        warn!(path = %part_path.display(), error = %cleanup, "Failed to remove partial upload");
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }

    async fn open(&self, stored_name: &str) -> Result<BoxStream<'static, io::Result<Bytes>>, StorageError> {
        let path = self.resolve(stored_name)?;
        let file = fs::File::open(&path).await.map_err(|e| not_found_or(stored_name, e))?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn read(&self, stored_name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(stored_name)?;
        fs::read(&path).await.map_err(|e| not_found_or(stored_name, e))
    }

    #[instrument(skip(self), err)]
    async fn remove(&self, stored_name: &str) -> Result<(), StorageError> {
        let path = self.resolve(stored_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

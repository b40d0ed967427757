//! Folder deletion: conflict check, chunk deletion, registry update

use crate::folders::{normalize_folder_path, FolderRegistry, FolderRemoval};
use crate::jobs::JobCoordinator;
use crate::storage::{Metadata, StorageBackend};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum RemoveError {
    #[error("Folder not found in index: {folder_path}")]
    NotFound { folder_path: String },

    #[error("Invalid folder path {folder_path:?}: {source}")]
    InvalidPath {
        folder_path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot remove folder while indexing job is active for this path: {folder_path}")]
    Conflict { folder_path: String },

    #[error("Failed to remove folder {folder_path}: {source}")]
    Internal {
        folder_path: String,
        #[source]
        source: BoxError,
    },
}

impl RemoveError {
    /// HTTP status an API layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            RemoveError::InvalidPath { .. } => 400,
            RemoveError::NotFound { .. } => 404,
            RemoveError::Conflict { .. } => 409,
            RemoveError::Internal { .. } => 500,
        }
    }

    fn internal(folder_path: &str, source: impl Into<BoxError>) -> Self {
        RemoveError::Internal {
            folder_path: folder_path.to_string(),
            source: source.into(),
        }
    }
}

/// Removes a folder's chunks from storage and its record from the registry
///
/// The running-job check is a point-in-time read. A job for the same folder
/// that starts after the check passes is not detected.
pub struct FolderRemover {
    registry: Arc<FolderRegistry>,
    storage: Arc<dyn StorageBackend>,
    jobs: Arc<dyn JobCoordinator>,
}

impl FolderRemover {
    pub fn new(
        registry: Arc<FolderRegistry>,
        storage: Arc<dyn StorageBackend>,
        jobs: Arc<dyn JobCoordinator>,
    ) -> Self {
        Self {
            registry,
            storage,
            jobs,
        }
    }

    pub async fn remove(&self, folder_path: impl AsRef<Path>) -> Result<FolderRemoval, RemoveError> {
        let requested = folder_path.as_ref();
        let folder_path =
            normalize_folder_path(requested).map_err(|source| RemoveError::InvalidPath {
                folder_path: requested.to_string_lossy().into_owned(),
                source,
            })?;

        self.check_conflict(&folder_path).await?;

        let record = self
            .registry
            .get(&folder_path)
            .await
            .map_err(|e| RemoveError::internal(&folder_path, e))?
            .ok_or_else(|| RemoveError::NotFound {
                folder_path: folder_path.clone(),
            })?;

        let deleted = if !record.chunk_ids.is_empty() {
            self.storage.delete_by_ids(&record.chunk_ids).await
        } else {
            let mut filter = Metadata::new();
            filter.insert("source".to_string(), folder_path.clone().into());
            self.storage.delete_by_metadata(&filter).await
        };

        let chunks_deleted = match deleted {
            Ok(count) => count,
            Err(e) => {
                error!("Failed to delete chunks for folder {}: {}", folder_path, e);
                return Err(RemoveError::internal(&folder_path, e));
            }
        };

        info!(
            "Deleted {} chunks by {} for folder: {}",
            chunks_deleted,
            if record.chunk_ids.is_empty() { "metadata" } else { "ids" },
            folder_path
        );

        self.registry
            .remove(&folder_path)
            .await
            .map_err(|e| RemoveError::internal(&folder_path, e))?;

        Ok(FolderRemoval::new(folder_path, chunks_deleted))
    }

    async fn check_conflict(&self, folder_path: &str) -> Result<(), RemoveError> {
        let stats = self
            .jobs
            .queue_stats()
            .await
            .map_err(|e| RemoveError::internal(folder_path, e))?;

        if stats.running == 0 {
            return Ok(());
        }

        let running = self
            .jobs
            .running_job()
            .await
            .map_err(|e| RemoveError::internal(folder_path, e))?;

        if let Some(job) = running {
            let running_path =
                normalize_folder_path(&job.folder_path).unwrap_or(job.folder_path);
            if running_path == folder_path {
                return Err(RemoveError::Conflict {
                    folder_path: folder_path.to_string(),
                });
            }
        }

        Ok(())
    }
}

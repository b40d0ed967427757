//! Store chunked folder content and record which chunks the folder owns

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::error::{QuarryError, Result};
use crate::folders::{normalize_folder_path, FolderRecord, FolderRegistry};
use crate::storage::{Metadata, StorageBackend};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// One pre-chunked piece of a folder's content
#[derive(Debug, Clone)]
pub struct IngestChunk {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl IngestChunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub record: FolderRecord,

    /// Chunks from the previous indexing run that were dropped
    pub stale_deleted: usize,

    /// Empty or duplicate chunks left out
    pub skipped: usize,
}

/// Indexes a folder's chunks and replaces its registry record
///
/// Each stored chunk gets `source` metadata set to the canonical folder
/// path. Re-indexing replaces the previous chunk set wholesale.
pub struct FolderIngest {
    registry: Arc<FolderRegistry>,
    storage: Arc<dyn StorageBackend>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_concurrent: usize,
}

impl FolderIngest {
    pub fn new(
        registry: Arc<FolderRegistry>,
        storage: Arc<dyn StorageBackend>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        config: &EmbeddingConfig,
    ) -> Self {
        Self {
            registry,
            storage,
            embedding_provider,
            batch_size: config.batch_size.max(1),
            max_concurrent: config.max_concurrent.max(1),
        }
    }

    pub async fn ingest(
        &self,
        folder_path: impl AsRef<Path>,
        chunks: Vec<IngestChunk>,
    ) -> Result<IngestReport> {
        let requested = folder_path.as_ref();
        let folder_path = normalize_folder_path(requested).map_err(|e| {
            QuarryError::io(e, format!("Failed to resolve folder path {:?}", requested))
        })?;

        let total = chunks.len();
        let chunks = prepare_chunks(chunks, &folder_path);
        let skipped = total - chunks.len();
        if skipped > 0 {
            warn!(
                "Skipped {} empty or duplicate chunks for {}",
                skipped, folder_path
            );
        }

        let previous = self.registry.get(&folder_path).await?;

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let metadatas: Vec<Metadata> = chunks.into_iter().map(|c| c.metadata).collect();

        let embeddings = self.embed_all(&texts).await?;

        if !ids.is_empty() {
            self.storage
                .upsert_documents(&ids, &embeddings, &texts, &metadatas)
                .await?;
        }

        let stale: Vec<String> = match &previous {
            Some(record) => {
                let current: HashSet<&str> = ids.iter().map(String::as_str).collect();
                record
                    .chunk_ids
                    .iter()
                    .filter(|id| !current.contains(id.as_str()))
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };

        // Until the stale chunks are gone the record owns both sets
        let owned: Vec<String> = ids.iter().chain(stale.iter()).cloned().collect();
        let mut record = match self
            .registry
            .add_or_update(&folder_path, owned.len(), owned)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.discard_unowned(&ids, previous.as_ref()).await;
                return Err(e);
            }
        };

        let stale_deleted = if stale.is_empty() {
            0
        } else {
            let deleted = self.storage.delete_by_ids(&stale).await?;
            record = self
                .registry
                .add_or_update(&folder_path, ids.len(), ids)
                .await?;
            deleted
        };

        info!(
            "Indexed {} chunks for {} ({} stale removed)",
            record.chunk_count, record.folder_path, stale_deleted
        );

        Ok(IngestReport {
            record,
            stale_deleted,
            skipped,
        })
    }

    /// Best-effort delete of freshly stored chunks no record owns
    async fn discard_unowned(&self, ids: &[String], previous: Option<&FolderRecord>) {
        let owned: HashSet<&str> = previous
            .map(|record| record.chunk_ids.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let unowned: Vec<String> = ids
            .iter()
            .filter(|id| !owned.contains(id.as_str()))
            .cloned()
            .collect();

        if unowned.is_empty() {
            return;
        }

        match self.storage.delete_by_ids(&unowned).await {
            Ok(n) => debug!("Discarded {} unrecorded chunks", n),
            Err(e) => warn!("Failed to discard {} unrecorded chunks: {}", unowned.len(), e),
        }
    }

    /// Embed `texts` in batches, at most `max_concurrent` batches at once
    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = Vec::new();

        for batch in texts.chunks(self.batch_size) {
            let batch = batch.to_vec();
            let provider = self.embedding_provider.clone();
            let semaphore = semaphore.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| {
                    EmbeddingError::GenerationError(format!("Failed to acquire semaphore: {}", e))
                })?;
                tokio::task::spawn_blocking(move || provider.embed_batch(&batch))
                    .await
                    .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?
            }));
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for task in tasks {
            embeddings.extend(task.await??);
        }

        debug!("Embedded {} chunks", embeddings.len());

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                texts.len(),
                embeddings.len()
            ))
            .into());
        }

        Ok(embeddings)
    }
}

/// Drop empty and repeated chunks, stamp `source`
fn prepare_chunks(chunks: Vec<IngestChunk>, folder_path: &str) -> Vec<IngestChunk> {
    let mut seen = HashSet::new();

    chunks
        .into_iter()
        .filter(|chunk| !chunk.text.trim().is_empty() && seen.insert(chunk.id.clone()))
        .map(|mut chunk| {
            chunk
                .metadata
                .insert("source".to_string(), folder_path.to_string().into());
            chunk
        })
        .collect()
}

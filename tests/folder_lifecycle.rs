//! Folder lifecycle against a real chunk store: ingest, list, re-index, remove

use quarry::config::{Config, EmbeddingConfig};
use quarry::embedding::{EmbeddingError, EmbeddingProvider};
use quarry::folders::{
    normalize_folder_path, resolve_file_types, FolderIndexer, FolderIngest, FolderListResponse,
    FolderRegistry, FolderRemover, IngestChunk, RemoveError,
};
use quarry::jobs::{JobCoordinator, JobQueue, JobStatus};
use quarry::storage::{ChunkStore, StorageBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Deterministic letter-frequency embeddings, no model download
struct LetterEmbedder;

impl EmbeddingProvider for LetterEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut embedding = vec![0.0; 26];
        for c in text.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
            embedding[(c - b'a') as usize] += 1.0;
        }
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        26
    }

    fn model_name(&self) -> &str {
        "letters"
    }
}

struct Harness {
    _root: TempDir,
    docs: PathBuf,
    notes: PathBuf,
    registry: Arc<FolderRegistry>,
    store: Arc<ChunkStore>,
    ingest: FolderIngest,
}

async fn harness() -> Harness {
    let root = TempDir::new().unwrap();
    let docs = root.path().join("docs");
    let notes = root.path().join("notes");
    std::fs::create_dir(&docs).unwrap();
    std::fs::create_dir(&notes).unwrap();

    let registry = Arc::new(FolderRegistry::open(root.path().join("state")).await.unwrap());
    let store = Arc::new(ChunkStore::open(&root.path().join("store")).unwrap());

    let embedding = EmbeddingConfig {
        batch_size: 2,
        max_concurrent: 2,
        ..Config::default().embedding
    };
    let ingest = FolderIngest::new(
        registry.clone(),
        store.clone(),
        Arc::new(LetterEmbedder),
        &embedding,
    );

    Harness {
        _root: root,
        docs,
        notes,
        registry,
        store,
        ingest,
    }
}

fn docs_chunks() -> Vec<IngestChunk> {
    vec![
        IngestChunk::new("docs-1", "rank fusion combines retrievers").with_metadata("file", "a.md"),
        IngestChunk::new("docs-2", "cross encoders rerank candidates").with_metadata("file", "a.md"),
        IngestChunk::new("docs-3", "the registry is persisted as jsonl").with_metadata("file", "b.md"),
    ]
}

#[tokio::test]
async fn test_ingest_records_ownership() {
    let h = harness().await;

    let report = h.ingest.ingest(&h.docs, docs_chunks()).await.unwrap();
    let canonical = normalize_folder_path(&h.docs).unwrap();

    assert_eq!(report.record.folder_path, canonical);
    assert_eq!(report.record.chunk_count, 3);
    assert_eq!(report.record.chunk_ids, vec!["docs-1", "docs-2", "docs-3"]);
    assert_eq!(report.stale_deleted, 0);
    assert_eq!(report.skipped, 0);

    assert_eq!(h.store.get_count().await.unwrap(), 3);

    let hits = h.store.keyword_search("jsonl", 5).await.unwrap();
    assert_eq!(hits[0].chunk_id, "docs-3");
    assert_eq!(hits[0].source(), Some(canonical.as_str()));
    assert_eq!(hits[0].metadata["file"], "b.md");

    let listing = FolderListResponse::from_records(&h.registry.list().await);
    assert_eq!(listing.total, 1);
    assert_eq!(listing.folders[0].chunk_count, 3);
}

#[tokio::test]
async fn test_reindex_drops_stale_chunks() {
    let h = harness().await;
    h.ingest.ingest(&h.docs, docs_chunks()).await.unwrap();

    let report = h
        .ingest
        .ingest(
            &h.docs,
            vec![
                IngestChunk::new("docs-1", "rank fusion combines retrievers"),
                IngestChunk::new("docs-4", "a brand new section"),
                IngestChunk::new("docs-5", "  "),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.stale_deleted, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.record.chunk_ids, vec!["docs-1", "docs-4"]);
    assert_eq!(h.store.get_count().await.unwrap(), 2);
    assert!(h.store.keyword_search("jsonl", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_folder_leaves_others() {
    let h = harness().await;
    h.ingest.ingest(&h.docs, docs_chunks()).await.unwrap();
    h.ingest
        .ingest(&h.notes, vec![IngestChunk::new("notes-1", "meeting notes about jsonl")])
        .await
        .unwrap();

    let remover = FolderRemover::new(h.registry.clone(), h.store.clone(), Arc::new(JobQueue::new()));

    // Equivalent spelling of the same folder
    let removal = remover.remove(h.docs.join("..").join("docs")).await.unwrap();

    let canonical = normalize_folder_path(&h.docs).unwrap();
    assert_eq!(removal.folder_path, canonical);
    assert_eq!(removal.chunks_deleted, 3);
    assert_eq!(
        removal.message,
        format!("Successfully removed 3 chunks for {}", canonical)
    );

    assert_eq!(h.store.get_count().await.unwrap(), 1);
    let hits = h.store.keyword_search("jsonl", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "notes-1");

    assert!(h.registry.get(&h.docs).await.unwrap().is_none());
    assert_eq!(h.registry.len().await, 1);

    // Removing again is a 404
    let err = remover.remove(&h.docs).await.unwrap_err();
    assert!(matches!(err, RemoveError::NotFound { .. }));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_remove_conflicts_with_running_job() {
    let h = harness().await;
    h.ingest.ingest(&h.docs, docs_chunks()).await.unwrap();

    let jobs = Arc::new(JobQueue::new());
    jobs.enqueue(&h.docs).await.unwrap();
    let job = jobs.start_next().await.unwrap();

    let remover = FolderRemover::new(h.registry.clone(), h.store.clone(), jobs.clone());

    let err = remover.remove(&h.docs).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert_eq!(h.store.get_count().await.unwrap(), 3);

    jobs.complete(&job.id).await.unwrap();
    let removal = remover.remove(&h.docs).await.unwrap();
    assert_eq!(removal.chunks_deleted, 3);
    assert_eq!(h.store.get_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let h = harness().await;
    h.ingest.ingest(&h.docs, docs_chunks()).await.unwrap();

    let reopened = FolderRegistry::open(h.registry.jsonl_path().parent().unwrap().to_path_buf())
        .await
        .unwrap();

    let record = reopened.get(&h.docs).await.unwrap().unwrap();
    assert_eq!(record.chunk_ids, vec!["docs-1", "docs-2", "docs-3"]);
}

#[tokio::test]
async fn test_failed_reindex_keeps_every_chunk_owned() {
    let h = harness().await;
    h.ingest.ingest(&h.docs, docs_chunks()).await.unwrap();

    // A directory where the registry's temp file goes makes the next write fail
    let blocker = h.registry.jsonl_path().with_extension("jsonl.tmp");
    std::fs::create_dir(&blocker).unwrap();

    let result = h
        .ingest
        .ingest(
            &h.docs,
            vec![
                IngestChunk::new("docs-1", "rank fusion combines retrievers"),
                IngestChunk::new("docs-4", "a brand new section"),
            ],
        )
        .await;
    assert!(result.is_err());

    // Old chunks survive, the unrecorded new one is discarded
    let record = h.registry.get(&h.docs).await.unwrap().unwrap();
    assert_eq!(record.chunk_ids, vec!["docs-1", "docs-2", "docs-3"]);
    assert_eq!(h.store.get_count().await.unwrap(), 3);

    std::fs::remove_dir(&blocker).unwrap();

    let remover = FolderRemover::new(h.registry.clone(), h.store.clone(), Arc::new(JobQueue::new()));
    let removal = remover.remove(&h.docs).await.unwrap();
    assert_eq!(removal.chunks_deleted, 3);
    assert_eq!(h.store.get_count().await.unwrap(), 0);
}

fn indexer(h: &Harness, jobs: Arc<JobQueue>) -> FolderIndexer {
    let ingest = FolderIngest::new(
        h.registry.clone(),
        h.store.clone(),
        Arc::new(LetterEmbedder),
        &Config::default().embedding,
    );
    FolderIndexer::new(jobs, ingest)
}

#[tokio::test]
async fn test_index_folder_from_disk() {
    let h = harness().await;
    std::fs::write(h.docs.join("fusion.md"), "rank fusion combines retrievers").unwrap();
    std::fs::write(h.docs.join("notes.txt"), "plain text notes").unwrap();
    std::fs::write(h.docs.join("lib.rs"), "pub fn fuse() {}").unwrap();

    let jobs = Arc::new(JobQueue::new());
    let globs = resolve_file_types(&["text"]).unwrap();
    let outcome = indexer(&h, jobs.clone()).index(&h.docs, &globs).await.unwrap();

    let canonical = normalize_folder_path(&h.docs).unwrap();
    assert_eq!(outcome.files, 2);
    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert_eq!(outcome.job.folder_path, canonical);
    assert_eq!(outcome.report.record.chunk_count, 2);
    assert_eq!(jobs.queue_stats().await.unwrap().completed, 1);

    let hits = h.store.keyword_search("fusion", 5).await.unwrap();
    assert_eq!(hits[0].metadata["file"], "fusion.md");
    assert_eq!(hits[0].source(), Some(canonical.as_str()));

    // Re-indexing with code globs replaces the text chunks
    let globs = resolve_file_types(&["rust"]).unwrap();
    let outcome = indexer(&h, jobs).index(&h.docs, &globs).await.unwrap();
    assert_eq!(outcome.files, 1);
    assert_eq!(outcome.report.stale_deleted, 2);
    assert_eq!(h.store.get_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_index_marks_job_failed() {
    let h = harness().await;
    std::fs::write(h.docs.join("a.md"), "some text").unwrap();

    let blocker = h.registry.jsonl_path().with_extension("jsonl.tmp");
    std::fs::create_dir(&blocker).unwrap();

    let jobs = Arc::new(JobQueue::new());
    let globs = resolve_file_types(&["text"]).unwrap();
    assert!(indexer(&h, jobs.clone()).index(&h.docs, &globs).await.is_err());

    let stats = jobs.queue_stats().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.running, 0);
    assert!(h.registry.get(&h.docs).await.unwrap().is_none());
    assert_eq!(h.store.get_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_index_missing_folder_queues_nothing() {
    let h = harness().await;
    let jobs = Arc::new(JobQueue::new());

    let missing = h.docs.join("absent");
    assert!(indexer(&h, jobs.clone()).index(&missing, &[]).await.is_err());
    assert_eq!(jobs.queue_stats().await.unwrap().total, 0);
}

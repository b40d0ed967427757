//! Folder lifecycle: which folders are indexed, which chunks they own
//!
//! - `FolderRegistry`: canonical path → `FolderRecord`, persisted as JSONL
//! - `FolderRemover`: deletes a folder's chunks and its record
//! - `FolderIngest`: stores freshly chunked text and records ownership
//! - `FolderIndexer`: scans a folder on disk and ingests it as a tracked job

mod indexer;
mod ingest;
mod paths;
mod presets;
mod registry;
mod removal;

pub use indexer::{scan_folder, FolderIndexer, IndexOutcome};
pub use ingest::{FolderIngest, IngestChunk, IngestReport};
pub use paths::normalize_folder_path;
pub use presets::{
    preset_globs, resolve_file_types, PresetError, DEFAULT_PRESETS, FILE_TYPE_PRESETS,
};
pub use registry::{FolderRegistry, REGISTRY_FILE};
pub use removal::{FolderRemover, RemoveError};

use serde::{Deserialize, Serialize};

/// Bookkeeping for one indexed folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    /// Canonical absolute path, unique key
    pub folder_path: String,

    pub chunk_count: usize,

    /// ISO 8601 UTC timestamp of the last successful indexing
    pub last_indexed: String,

    /// Chunks owned by this folder, in indexing order
    pub chunk_ids: Vec<String>,
}

/// One folder as reported by `folders list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderInfo {
    pub folder_path: String,
    pub chunk_count: usize,
    pub last_indexed: String,
}

impl From<&FolderRecord> for FolderInfo {
    fn from(record: &FolderRecord) -> Self {
        Self {
            folder_path: record.folder_path.clone(),
            chunk_count: record.chunk_count,
            last_indexed: record.last_indexed.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderListResponse {
    /// Sorted by path
    pub folders: Vec<FolderInfo>,
    pub total: usize,
}

impl FolderListResponse {
    pub fn from_records(records: &[FolderRecord]) -> Self {
        let folders: Vec<FolderInfo> = records.iter().map(FolderInfo::from).collect();
        Self {
            total: folders.len(),
            folders,
        }
    }
}

/// Outcome of a successful folder removal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRemoval {
    pub folder_path: String,
    pub chunks_deleted: usize,
    pub message: String,
}

impl FolderRemoval {
    pub fn new(folder_path: String, chunks_deleted: usize) -> Self {
        let message = format!(
            "Successfully removed {} chunks for {}",
            chunks_deleted, folder_path
        );
        Self {
            folder_path,
            chunks_deleted,
            message,
        }
    }
}

//! Folder registry with JSONL persistence

use crate::error::{QuarryError, Result};
use crate::folders::{normalize_folder_path, FolderRecord};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const REGISTRY_FILE: &str = "indexed_folders.jsonl";

/// Authoritative map from canonical folder path to its record
///
/// Every mutation rewrites the whole JSONL file (temp file, fsync, rename)
/// while holding the lock. If that write fails the in-memory change is
/// rolled back, so memory and disk never disagree. Mutations run on their
/// own task, so dropping the caller's future does not interrupt them.
pub struct FolderRegistry {
    files: RegistryFiles,
    records: Arc<Mutex<BTreeMap<String, FolderRecord>>>,
}

#[derive(Debug, Clone)]
struct RegistryFiles {
    state_dir: PathBuf,
    jsonl_path: PathBuf,
}

impl FolderRegistry {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let jsonl_path = state_dir.join(REGISTRY_FILE);
        Self {
            files: RegistryFiles {
                state_dir,
                jsonl_path,
            },
            records: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Registry loaded from `state_dir`
    pub async fn open(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let registry = Self::new(state_dir);
        registry.initialize().await?;
        Ok(registry)
    }

    pub fn jsonl_path(&self) -> &Path {
        &self.files.jsonl_path
    }

    /// Load records from disk, replacing the in-memory set
    ///
    /// Missing file means an empty registry. Corrupt lines are skipped.
    pub async fn initialize(&self) -> Result<usize> {
        let mut records = self.records.lock().await;

        let path = self.files.jsonl_path.clone();
        if !path.exists() {
            info!("No existing folder records found, starting fresh");
            records.clear();
            return Ok(0);
        }

        let loaded = tokio::task::spawn_blocking(move || load_jsonl(&path)).await??;
        info!(
            "Loaded {} folder records from {:?}",
            loaded.len(),
            self.files.jsonl_path
        );

        *records = loaded;
        Ok(records.len())
    }

    /// Insert or wholesale replace the record for `folder_path`
    pub async fn add_or_update(
        &self,
        folder_path: impl AsRef<Path>,
        chunk_count: usize,
        chunk_ids: Vec<String>,
    ) -> Result<FolderRecord> {
        let folder_path = normalize(folder_path.as_ref())?;
        let chunk_ids = dedup_preserving_order(chunk_ids);

        // Empty ids are allowed; removal then falls back to the source filter
        let chunk_count = if chunk_ids.is_empty() {
            chunk_count
        } else {
            if chunk_ids.len() != chunk_count {
                warn!(
                    "Folder {} reported chunk_count {} but owns {} distinct chunk ids; using {}",
                    folder_path,
                    chunk_count,
                    chunk_ids.len(),
                    chunk_ids.len()
                );
            }
            chunk_ids.len()
        };

        let record = FolderRecord {
            folder_path: folder_path.clone(),
            chunk_count,
            last_indexed: chrono::Utc::now().to_rfc3339(),
            chunk_ids,
        };

        let records = self.records.clone();
        let files = self.files.clone();
        let stored = record.clone();

        tokio::spawn(async move {
            let mut records = records.lock().await;
            let previous = records.insert(folder_path.clone(), stored);

            if let Err(e) = files.persist(&records).await {
                match previous {
                    Some(previous) => records.insert(folder_path, previous),
                    None => records.remove(&folder_path),
                };
                return Err(e);
            }
            Ok(())
        })
        .await??;

        debug!(
            "Added folder record: {} ({} chunks, {} ids)",
            record.folder_path,
            record.chunk_count,
            record.chunk_ids.len()
        );

        Ok(record)
    }

    /// Remove and return the record for `folder_path`, if any
    pub async fn remove(&self, folder_path: impl AsRef<Path>) -> Result<Option<FolderRecord>> {
        let folder_path = normalize(folder_path.as_ref())?;

        let records = self.records.clone();
        let files = self.files.clone();

        let removed = tokio::spawn(async move {
            let mut records = records.lock().await;
            let Some(removed) = records.remove(&folder_path) else {
                debug!("Folder not found for removal: {}", folder_path);
                return Ok(None);
            };

            if let Err(e) = files.persist(&records).await {
                records.insert(folder_path, removed);
                return Err(e);
            }

            debug!("Removed folder record: {}", folder_path);
            Ok(Some(removed))
        })
        .await??;

        Ok(removed)
    }

    /// All records, ascending by path
    pub async fn list(&self) -> Vec<FolderRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    pub async fn get(&self, folder_path: impl AsRef<Path>) -> Result<Option<FolderRecord>> {
        let folder_path = normalize(folder_path.as_ref())?;
        Ok(self.records.lock().await.get(&folder_path).cloned())
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Drop every record and delete the JSONL file
    pub async fn clear(&self) -> Result<()> {
        let records = self.records.clone();
        let jsonl_path = self.files.jsonl_path.clone();

        tokio::spawn(async move {
            let mut records = records.lock().await;

            if jsonl_path.exists() {
                tokio::fs::remove_file(&jsonl_path).await.map_err(|e| {
                    QuarryError::io(e, format!("Failed to delete {:?}", jsonl_path))
                })?;
                info!("Cleared all folder records and deleted {:?}", jsonl_path);
            } else {
                info!("Cleared folder records (no JSONL file to delete)");
            }

            records.clear();
            Ok::<_, QuarryError>(())
        })
        .await?
    }
}

impl RegistryFiles {
    async fn persist(&self, records: &BTreeMap<String, FolderRecord>) -> Result<()> {
        let snapshot: Vec<FolderRecord> = records.values().cloned().collect();
        let files = self.clone();

        tokio::task::spawn_blocking(move || {
            write_jsonl(&files.state_dir, &files.jsonl_path, &snapshot)
        })
        .await?
    }
}

fn normalize(path: &Path) -> Result<String> {
    normalize_folder_path(path)
        .map_err(|e| QuarryError::io(e, format!("Failed to resolve folder path {:?}", path)))
}

fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn load_jsonl(path: &Path) -> Result<BTreeMap<String, FolderRecord>> {
    let file = std::fs::File::open(path)
        .map_err(|e| QuarryError::io(e, format!("Failed to open {:?}", path)))?;

    let mut records = BTreeMap::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line_num = index + 1;
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping unreadable line {} in {:?}: {}", line_num, path, e);
                continue;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<FolderRecord>(line) {
            Ok(record) => {
                records.insert(record.folder_path.clone(), record);
            }
            Err(e) => {
                warn!("Skipping corrupt line {} in {:?}: {}", line_num, path, e);
            }
        }
    }

    Ok(records)
}

fn write_jsonl(state_dir: &Path, jsonl_path: &Path, records: &[FolderRecord]) -> Result<()> {
    std::fs::create_dir_all(state_dir)
        .map_err(|e| QuarryError::io(e, format!("Failed to create {:?}", state_dir)))?;

    let temp_path = jsonl_path.with_extension("jsonl.tmp");

    let mut file = std::fs::File::create(&temp_path)
        .map_err(|e| QuarryError::io(e, format!("Failed to create {:?}", temp_path)))?;

    for record in records {
        let line = serde_json::to_string(record).map_err(|e| {
            QuarryError::json(e, format!("Failed to encode record {}", record.folder_path))
        })?;
        writeln!(file, "{}", line)
            .map_err(|e| QuarryError::io(e, format!("Failed to write {:?}", temp_path)))?;
    }

    file.sync_all()
        .map_err(|e| QuarryError::io(e, format!("Failed to sync {:?}", temp_path)))?;
    drop(file);

    std::fs::rename(&temp_path, jsonl_path).map_err(|e| {
        QuarryError::io(
            e,
            format!("Failed to move {:?} into place at {:?}", temp_path, jsonl_path),
        )
    })?;

    Ok(())
}

//! Index a folder from disk as a tracked job: scan, ingest, finish the job

use crate::error::{QuarryError, Result};
use crate::folders::{FolderIngest, IngestChunk, IngestReport};
use crate::jobs::{Job, JobQueue};
use glob::Pattern;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone)]
pub struct IndexOutcome {
    /// The finished job
    pub job: Job,
    /// Files matched by the globs and read as text
    pub files: usize,
    pub report: IngestReport,
}

/// Runs `folders add` against a job queue it is the only worker for
pub struct FolderIndexer {
    jobs: Arc<JobQueue>,
    ingest: FolderIngest,
}

impl FolderIndexer {
    pub fn new(jobs: Arc<JobQueue>, ingest: FolderIngest) -> Self {
        Self { jobs, ingest }
    }

    /// Index every file under `folder_path` whose name matches one of `globs`
    ///
    /// Each matching UTF-8 file becomes one chunk keyed by its absolute path.
    /// The job is marked failed if scanning or ingesting fails.
    pub async fn index(&self, folder_path: impl AsRef<Path>, globs: &[String]) -> Result<IndexOutcome> {
        let requested = folder_path.as_ref();
        if !requested.is_dir() {
            return Err(QuarryError::io(
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
                format!("Cannot index {}", requested.display()),
            ));
        }

        let patterns = globs
            .iter()
            .map(|g| Pattern::new(g))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let id = self.jobs.enqueue(requested).await?;
        let job = self
            .jobs
            .start_next()
            .await
            .filter(|job| job.id == id)
            .ok_or_else(|| {
                QuarryError::Other(anyhow::anyhow!(
                    "Another indexing job is running, job {} stays queued",
                    id
                ))
            })?;

        match self.run(&job, patterns).await {
            Ok((files, report)) => {
                let job = self.jobs.complete(&job.id).await?;
                Ok(IndexOutcome { job, files, report })
            }
            Err(e) => {
                if let Err(fail_err) = self.jobs.fail(&job.id, e.to_string()).await {
                    warn!("Failed to mark job {} as failed: {}", job.id, fail_err);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, job: &Job, patterns: Vec<Pattern>) -> Result<(usize, IngestReport)> {
        let root = PathBuf::from(&job.folder_path);
        let chunks = tokio::task::spawn_blocking(move || scan_folder(&root, &patterns)).await?;
        let files = chunks.len();
        info!("Found {} matching files in {}", files, job.folder_path);

        let report = self.ingest.ingest(&job.folder_path, chunks).await?;
        Ok((files, report))
    }
}

/// One chunk per readable text file under `root` matching any pattern
///
/// Hidden files and directories are skipped. Order follows file names.
pub fn scan_folder(root: &Path, patterns: &[Pattern]) -> Vec<IngestChunk> {
    let mut chunks = Vec::new();

    let files = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file());

    for entry in files {
        let name = entry.file_name().to_string_lossy();
        if !patterns.iter().any(|p| p.matches(&name)) {
            continue;
        }

        let text = match std::fs::read_to_string(entry.path()) {
            Ok(text) => text,
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        chunks.push(
            IngestChunk::new(entry.path().to_string_lossy(), text)
                .with_metadata("file", relative.to_string_lossy().into_owned()),
        );
    }

    chunks
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

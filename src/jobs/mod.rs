//! Indexing job coordination
//!
//! `JobCoordinator` is the read-only view the folder remover needs; `JobQueue`
//! is an in-memory FIFO that runs one job at a time.

use crate::folders::normalize_folder_path;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is {status}, expected running")]
    NotRunning { id: String, status: JobStatus },

    #[error("Invalid folder path: {0}")]
    InvalidPath(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// The job currently indexing a folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningJob {
    pub id: String,
    pub folder_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub folder_path: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// What the folder remover asks about in-flight indexing
#[async_trait]
pub trait JobCoordinator: Send + Sync {
    async fn queue_stats(&self) -> Result<QueueStats, JobError>;

    /// The running job, if any
    async fn running_job(&self) -> Result<Option<RunningJob>, JobError>;
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, Job>,
    pending: VecDeque<String>,
    running: Option<String>,
}

/// In-memory FIFO job queue, one running job at a time
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an indexing job for `folder_path`; returns the job id
    pub async fn enqueue(&self, folder_path: impl AsRef<Path>) -> Result<String, JobError> {
        let folder_path = normalize_folder_path(folder_path)?;
        let id = Uuid::new_v4().to_string();

        let job = Job {
            id: id.clone(),
            folder_path: folder_path.clone(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        };

        let mut state = self.state.lock().await;
        state.jobs.insert(id.clone(), job);
        state.pending.push_back(id.clone());

        debug!("Queued job {} for {}", id, folder_path);
        Ok(id)
    }

    /// Move the oldest pending job to running
    ///
    /// Returns `None` when a job is already running or nothing is pending.
    pub async fn start_next(&self) -> Option<Job> {
        let mut state = self.state.lock().await;
        if state.running.is_some() {
            return None;
        }

        let id = state.pending.pop_front()?;
        let job = state.jobs.get_mut(&id)?;
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        let job = job.clone();

        state.running = Some(id);
        info!("Started job {} for {}", job.id, job.folder_path);
        Some(job)
    }

    pub async fn complete(&self, id: &str) -> Result<Job, JobError> {
        self.finish(id, JobStatus::Completed, None).await
    }

    pub async fn fail(&self, id: &str, error: impl Into<String>) -> Result<Job, JobError> {
        self.finish(id, JobStatus::Failed, Some(error.into())).await
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.state.lock().await.jobs.get(id).cloned()
    }

    async fn finish(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job, JobError> {
        let mut state = self.state.lock().await;

        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if job.status != JobStatus::Running {
            return Err(JobError::NotRunning {
                id: id.to_string(),
                status: job.status,
            });
        }

        job.status = status;
        job.finished_at = Some(Utc::now());
        job.error = error;
        let job = job.clone();

        state.running = None;

        match &job.error {
            Some(e) => warn!("Job {} for {} failed: {}", job.id, job.folder_path, e),
            None => info!("Job {} for {} completed", job.id, job.folder_path),
        }

        Ok(job)
    }
}

#[async_trait]
impl JobCoordinator for JobQueue {
    async fn queue_stats(&self) -> Result<QueueStats, JobError> {
        let state = self.state.lock().await;

        let mut stats = QueueStats {
            total: state.jobs.len(),
            ..QueueStats::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }

    async fn running_job(&self) -> Result<Option<RunningJob>, JobError> {
        let state = self.state.lock().await;

        Ok(state
            .running
            .as_ref()
            .and_then(|id| state.jobs.get(id))
            .map(|job| RunningJob {
                id: job.id.clone(),
                folder_path: job.folder_path.clone(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fifo_single_runner() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new();

        let first = queue.enqueue(dir.path().join("a")).await.unwrap();
        let second = queue.enqueue(dir.path().join("b")).await.unwrap();

        let running = queue.start_next().await.unwrap();
        assert_eq!(running.id, first);
        assert_eq!(running.status, JobStatus::Running);

        // Only one job runs at a time
        assert!(queue.start_next().await.is_none());

        let stats = queue.queue_stats().await.unwrap();
        assert_eq!(stats.running, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total, 2);

        let done = queue.complete(&first).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.finished_at.is_some());

        assert_eq!(queue.start_next().await.unwrap().id, second);
    }

    #[tokio::test]
    async fn test_running_job_reports_normalized_path() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("docs");
        std::fs::create_dir(&folder).unwrap();

        let queue = JobQueue::new();
        assert!(queue.running_job().await.unwrap().is_none());

        queue.enqueue(folder.join("..").join("docs")).await.unwrap();
        queue.start_next().await.unwrap();

        let running = queue.running_job().await.unwrap().unwrap();
        assert_eq!(
            running.folder_path,
            normalize_folder_path(&folder).unwrap()
        );
    }

    #[tokio::test]
    async fn test_fail_records_error() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new();

        let id = queue.enqueue(dir.path()).await.unwrap();
        queue.start_next().await.unwrap();

        let failed = queue.fail(&id, "embedding model missing").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("embedding model missing"));

        let stats = queue.queue_stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 0);
        assert!(queue.running_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finish_requires_running_job() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new();

        let id = queue.enqueue(dir.path()).await.unwrap();
        assert!(matches!(
            queue.complete(&id).await,
            Err(JobError::NotRunning { .. })
        ));
        assert!(matches!(
            queue.complete("missing").await,
            Err(JobError::NotFound(_))
        ));
    }
}

//! Download Orchestrator — a bounded-concurrency queue that streams files
//! off the dashcam to disk, with per-task retry and progress reporting.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::client::DeviceClient;
use crate::config::Config;
use crate::error::DownloadTaskError;
use crate::model::{DownloadTask, FileRecord, QueueSnapshot, TaskStatus};

const RETRY_BACKOFF: Duration = Duration::from_millis(2000);
const COORDINATOR_POLL: Duration = Duration::from_millis(500);

/// The device never reports `Content-Length`, so absolute progress is
/// estimated against this heuristic total until the transfer completes.
const ASSUMED_TOTAL_BYTES: f64 = 52_428_800.0;

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, path: &str, progress: f64, speed_mbps: f64);
}

#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn on_complete(&self, path: &str, local_path: &std::path::Path);
    async fn on_failed(&self, path: &str, error: &str);
}

pub struct DownloadOrchestrator {
    client: Arc<DeviceClient>,
    download_dir: PathBuf,
    max_parallel: usize,
    max_retries: u32,
    stream_chunk_size: usize,
    progress_sink: Arc<dyn ProgressSink>,
    completion_sink: Arc<dyn CompletionSink>,
    tasks: Mutex<HashMap<String, DownloadTask>>,
    order: Mutex<Vec<String>>,
    stop_flag: Arc<AtomicBool>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DownloadOrchestrator {
    pub fn new(
        client: Arc<DeviceClient>,
        config: &Config,
        progress_sink: Arc<dyn ProgressSink>,
        completion_sink: Arc<dyn CompletionSink>,
    ) -> Self {
        Self {
            client,
            download_dir: config.download_dir.clone(),
            max_parallel: config.max_parallel_downloads,
            max_retries: config.max_retries,
            stream_chunk_size: config.stream_chunk_size,
            progress_sink,
            completion_sink,
            tasks: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    fn destination_for(&self, file: &FileRecord) -> PathBuf {
        let date_dir = file.timestamp.format("%Y-%m-%d").to_string();
        self.download_dir.join(date_dir).join(&file.filename)
    }

    /// Enqueues a file for download. If the destination already exists on
    /// disk, the task is created already `Completed` rather than
    /// re-downloaded.
    pub async fn add_to_queue(&self, file: FileRecord) -> Result<(), DownloadTaskError> {
        let local_path = self.destination_for(&file);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let already_present = local_path.exists();
        let key = file.path.clone();

        let task = DownloadTask {
            file,
            status: if already_present {
                TaskStatus::Completed
            } else {
                TaskStatus::Queued
            },
            progress: if already_present { 100.0 } else { 0.0 },
            speed_mbps: 0.0,
            error: None,
            local_path: local_path.clone(),
        };

        if already_present {
            self.completion_sink.on_complete(&key, &local_path).await;
        }

        let mut tasks = self.tasks.lock().await;
        let mut order = self.order.lock().await;
        if !tasks.contains_key(&key) {
            order.push(key.clone());
        }
        tasks.insert(key, task);

        Ok(())
    }

    pub async fn add_many(&self, files: Vec<FileRecord>) -> Result<(), DownloadTaskError> {
        for file in files {
            self.add_to_queue(file).await?;
        }
        Ok(())
    }

    /// Rejected while the task is `Downloading`; returns whether it was removed.
    pub async fn remove_from_queue(&self, path: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        if tasks.get(path).map(|t| t.status) == Some(TaskStatus::Downloading) {
            return false;
        }

        let removed = tasks.remove(path).is_some();
        if removed {
            let mut order = self.order.lock().await;
            order.retain(|p| p != path);
        }
        removed
    }

    pub async fn pause_task(&self, path: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get_mut(path) {
            if task.status == TaskStatus::Queued {
                task.status = TaskStatus::Paused;
            }
        }
    }

    pub async fn resume_task(&self, path: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get_mut(path) {
            if task.status == TaskStatus::Paused {
                task.status = TaskStatus::Queued;
            }
        }
    }

    pub async fn clear_completed(&self) {
        let mut tasks = self.tasks.lock().await;
        let mut order = self.order.lock().await;
        order.retain(|p| tasks.get(p).map(|t| !t.is_complete()).unwrap_or(false));
        tasks.retain(|_, t| !t.is_complete());
    }

    pub async fn queue_status(&self) -> QueueSnapshot {
        let tasks = self.tasks.lock().await;
        let values: Vec<DownloadTask> = tasks.values().cloned().collect();
        QueueSnapshot::from_tasks(&values)
    }

    /// The single coordinator loop: promotes queued tasks to downloading up
    /// to `max_parallel` slots, running each attempt as its own tokio task.
    /// Runs until `stop()` is called.
    pub async fn run(self: Arc<Self>) {
        self.stop_flag.store(false, Ordering::SeqCst);
        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                return;
            }

            let promotable = self.promote_ready().await;

            if promotable.is_empty() {
                tokio::time::sleep(COORDINATOR_POLL).await;
                continue;
            }

            let mut handles = self.worker_handles.lock().await;
            handles.retain(|h| !h.is_finished());
            for path in promotable {
                let this = Arc::clone(&self);
                handles.push(tokio::spawn(async move {
                    this.run_task_with_retry(&path).await;
                }));
            }
        }
    }

    /// Signals the coordinator to stop promoting new tasks and waits for
    /// every in-flight worker to finish its current attempt.
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handles = std::mem::take(&mut *self.worker_handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn downloading_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|t| t.status == TaskStatus::Downloading)
            .count()
    }

    async fn promote_ready(&self) -> Vec<String> {
        let slots = self.max_parallel.saturating_sub(self.downloading_count().await);
        if slots == 0 {
            return Vec::new();
        }

        let order = self.order.lock().await;
        let mut tasks = self.tasks.lock().await;

        let mut promoted = Vec::new();
        for path in order.iter() {
            if promoted.len() >= slots {
                break;
            }
            if let Some(task) = tasks.get_mut(path) {
                if task.status == TaskStatus::Queued {
                    task.status = TaskStatus::Downloading;
                    promoted.push(path.clone());
                }
            }
        }
        promoted
    }

    async fn run_task_with_retry(&self, path: &str) {
        for attempt in 1..=self.max_retries {
            match self.attempt_download(path).await {
                Ok(()) => return,
                Err(e) => {
                    let max_retries = self.max_retries;
                    log::warn!("[download] attempt {attempt}/{max_retries} for {path} failed: {e}");
                    if attempt < self.max_retries {
                        {
                            let mut tasks = self.tasks.lock().await;
                            if let Some(task) = tasks.get_mut(path) {
                                task.progress = 0.0;
                                task.speed_mbps = 0.0;
                            }
                        }
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    } else {
                        let message = format!("download failed after {max_retries} attempts: {e}");
                        let mut tasks = self.tasks.lock().await;
                        if let Some(task) = tasks.get_mut(path) {
                            task.status = TaskStatus::Failed;
                            task.progress = 0.0;
                            task.error = Some(message.clone());
                        }
                        drop(tasks);
                        self.completion_sink.on_failed(path, &message).await;
                    }
                }
            }
        }
    }

    async fn attempt_download(&self, path: &str) -> Result<(), DownloadTaskError> {
        let local_path = {
            let tasks = self.tasks.lock().await;
            tasks
                .get(path)
                .map(|t| t.local_path.clone())
                .ok_or_else(|| DownloadTaskError::Disk(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "task removed before download started",
                )))?
        };

        let stream = self.client.open_stream(path, None).await?;
        tokio::pin!(stream);

        let mut file = tokio::fs::File::create(&local_path).await?;
        let mut downloaded: u64 = 0;
        let started = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for piece in chunk.chunks(self.stream_chunk_size) {
                file.write_all(piece).await?;
                downloaded += piece.len() as u64;
            }

            let elapsed = started.elapsed().as_secs_f64().max(0.001);
            let size_mb = downloaded as f64 / (1024.0 * 1024.0);
            let speed_mbps = size_mb * 8.0 / elapsed;
            let progress = (downloaded as f64 / ASSUMED_TOTAL_BYTES * 100.0).min(95.0);

            {
                let mut tasks = self.tasks.lock().await;
                if let Some(task) = tasks.get_mut(path) {
                    task.progress = progress;
                    task.speed_mbps = speed_mbps;
                }
            }
            self.progress_sink.on_progress(path, progress, speed_mbps).await;
        }

        file.flush().await?;

        {
            let mut tasks = self.tasks.lock().await;
            if let Some(task) = tasks.get_mut(path) {
                task.status = TaskStatus::Completed;
                task.progress = 100.0;
            }
        }
        self.completion_sink.on_complete(path, &local_path).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct NoopProgress;
    #[async_trait]
    impl ProgressSink for NoopProgress {
        async fn on_progress(&self, _path: &str, _progress: f64, _speed_mbps: f64) {}
    }

    struct NoopCompletion;
    #[async_trait]
    impl CompletionSink for NoopCompletion {
        async fn on_complete(&self, _path: &str, _local_path: &std::path::Path) {}
        async fn on_failed(&self, _path: &str, _error: &str) {}
    }

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            download_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn add_to_queue_short_circuits_existing_destination() {
        let dir = tempdir().unwrap();
        let client = Arc::new(DeviceClient::new("http://127.0.0.1:1", Duration::from_millis(50)).unwrap());
        let config = test_config(dir.path());
        let orchestrator = DownloadOrchestrator::new(
            client,
            &config,
            Arc::new(NoopProgress),
            Arc::new(NoopCompletion),
        );

        let file = FileRecord::parse("sd//norm/2025_10_12_220337_00.TS").unwrap();
        let dest = orchestrator.destination_for(&file);
        tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
        tokio::fs::write(&dest, b"already here").await.unwrap();

        orchestrator.add_to_queue(file).await.unwrap();
        let snap = orchestrator.queue_status().await;
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.queued, 0);
    }

    #[tokio::test]
    async fn queue_status_counts_by_state() {
        let dir = tempdir().unwrap();
        let client = Arc::new(DeviceClient::new("http://127.0.0.1:1", Duration::from_millis(50)).unwrap());
        let config = test_config(dir.path());
        let orchestrator = DownloadOrchestrator::new(
            client,
            &config,
            Arc::new(NoopProgress),
            Arc::new(NoopCompletion),
        );

        let a = FileRecord::parse("sd//norm/2025_10_12_220337_00.TS").unwrap();
        let b = FileRecord::parse("sd//norm/2025_10_12_220338_00.TS").unwrap();
        orchestrator.add_many(vec![a, b]).await.unwrap();

        let snap = orchestrator.queue_status().await;
        assert_eq!(snap.total, 2);
        assert_eq!(snap.queued, 2);
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_status() {
        let dir = tempdir().unwrap();
        let client = Arc::new(DeviceClient::new("http://127.0.0.1:1", Duration::from_millis(50)).unwrap());
        let config = test_config(dir.path());
        let orchestrator = DownloadOrchestrator::new(
            client,
            &config,
            Arc::new(NoopProgress),
            Arc::new(NoopCompletion),
        );

        let file = FileRecord::parse("sd//norm/2025_10_12_220337_00.TS").unwrap();
        let path = file.path.clone();
        orchestrator.add_to_queue(file).await.unwrap();

        orchestrator.pause_task(&path).await;
        assert_eq!(orchestrator.queue_status().await.paused, 1);

        orchestrator.resume_task(&path).await;
        assert_eq!(orchestrator.queue_status().await.queued, 1);
    }

    #[tokio::test]
    async fn remove_rejected_while_downloading() {
        let dir = tempdir().unwrap();
        let client = Arc::new(DeviceClient::new("http://127.0.0.1:1", Duration::from_millis(50)).unwrap());
        let config = test_config(dir.path());
        let orchestrator = DownloadOrchestrator::new(
            client,
            &config,
            Arc::new(NoopProgress),
            Arc::new(NoopCompletion),
        );

        let file = FileRecord::parse("sd//norm/2025_10_12_220337_00.TS").unwrap();
        let path = file.path.clone();
        orchestrator.add_to_queue(file).await.unwrap();

        {
            let mut tasks = orchestrator.tasks.lock().await;
            tasks.get_mut(&path).unwrap().status = TaskStatus::Downloading;
        }

        assert!(!orchestrator.remove_from_queue(&path).await);
        assert_eq!(orchestrator.queue_status().await.total, 1);

        {
            let mut tasks = orchestrator.tasks.lock().await;
            tasks.get_mut(&path).unwrap().status = TaskStatus::Queued;
        }
        assert!(orchestrator.remove_from_queue(&path).await);
        assert_eq!(orchestrator.queue_status().await.total, 0);
    }
}

//! End-to-end Download Orchestrator scenarios against a mock device,
//! mirroring the scenarios in the specification's testable-properties section.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashcam_core::download::{CompletionSink, ProgressSink};
use dashcam_core::{Config, DeviceClient, DownloadOrchestrator, FileRecord};
use tempfile::tempdir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct RecordingProgress {
    events: Mutex<Vec<(f64, f64)>>,
}
impl RecordingProgress {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}
#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn on_progress(&self, _path: &str, progress: f64, speed_mbps: f64) {
        self.events.lock().unwrap().push((progress, speed_mbps));
    }
}

struct RecordingCompletion {
    completed: Mutex<Vec<String>>,
    failed: Mutex<Vec<(String, String)>>,
    complete_calls: AtomicU32,
}
impl RecordingCompletion {
    fn new() -> Self {
        Self {
            completed: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            complete_calls: AtomicU32::new(0),
        }
    }
}
#[async_trait]
impl CompletionSink for RecordingCompletion {
    async fn on_complete(&self, path: &str, _local_path: &Path) {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.completed.lock().unwrap().push(path.to_string());
    }
    async fn on_failed(&self, path: &str, error: &str) {
        self.failed
            .lock()
            .unwrap()
            .push((path.to_string(), error.to_string()));
    }
}

fn test_file() -> FileRecord {
    FileRecord::parse("sd//norm/2025_10_12_220337_00.TS").unwrap()
}

async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met before timeout");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn happy_path_download_completes_with_full_progress() {
    let server = MockServer::start().await;
    let chunk = vec![7u8; 42 * 1024];
    let mut body = Vec::new();
    body.extend_from_slice(&chunk);
    body.extend_from_slice(&chunk);
    body.extend_from_slice(&chunk);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let client = Arc::new(DeviceClient::new(server.uri(), Duration::from_secs(5)).unwrap());
    let config = Config {
        download_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let progress = Arc::new(RecordingProgress::new());
    let completion = Arc::new(RecordingCompletion::new());
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        client,
        &config,
        progress.clone(),
        completion.clone(),
    ));

    let file = test_file();
    let path = file.path.clone();
    orchestrator.add_to_queue(file).await.unwrap();

    let runner = tokio::spawn(orchestrator.clone().run());
    wait_until(
        || orchestrator_is_done(&completion),
        Duration::from_secs(5),
    )
    .await;
    orchestrator.stop().await;
    let _ = runner.await;

    let snap = orchestrator.queue_status().await;
    assert_eq!(snap.completed, 1);
    assert_eq!(completion.completed.lock().unwrap(), vec![path]);

    let local_size = std::fs::metadata(orchestrator_dest(&orchestrator, &config).await)
        .unwrap()
        .len();
    assert_eq!(local_size, body.len() as u64);
    assert!(progress.events.lock().unwrap().iter().any(|(_, s)| *s > 0.0));
}

async fn orchestrator_dest(
    orchestrator: &DownloadOrchestrator,
    config: &Config,
) -> std::path::PathBuf {
    let file = test_file();
    config
        .download_dir
        .join(file.timestamp.format("%Y-%m-%d").to_string())
        .join(file.filename)
}

fn orchestrator_is_done(completion: &RecordingCompletion) -> bool {
    !completion.completed.lock().unwrap().is_empty() || !completion.failed.lock().unwrap().is_empty()
}

#[tokio::test]
async fn pre_existing_file_short_circuits_without_network_call() {
    let dir = tempdir().unwrap();
    // Port 1 is never reachable; any network call here would fail the test.
    let client = Arc::new(DeviceClient::new("http://127.0.0.1:1", Duration::from_millis(50)).unwrap());
    let config = Config {
        download_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let completion = Arc::new(RecordingCompletion::new());
    let orchestrator = DownloadOrchestrator::new(
        client,
        &config,
        Arc::new(RecordingProgress::new()),
        completion.clone(),
    );

    let file = test_file();
    let dest = config
        .download_dir
        .join(file.timestamp.format("%Y-%m-%d").to_string())
        .join(&file.filename);
    tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
    tokio::fs::write(&dest, b"already here").await.unwrap();

    orchestrator.add_to_queue(file).await.unwrap();

    let snap = orchestrator.queue_status().await;
    assert_eq!(snap.completed, 1);
    assert_eq!(snap.queued, 0);
    assert_eq!(completion.complete_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_retries_mark_task_failed_with_zeroed_progress() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let client = Arc::new(DeviceClient::new(server.uri(), Duration::from_secs(2)).unwrap());
    let config = Config {
        download_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let completion = Arc::new(RecordingCompletion::new());
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        client,
        &config,
        Arc::new(RecordingProgress::new()),
        completion.clone(),
    ));

    let file = test_file();
    orchestrator.add_to_queue(file).await.unwrap();

    let runner = tokio::spawn(orchestrator.clone().run());
    wait_until(
        || !completion.failed.lock().unwrap().is_empty(),
        Duration::from_secs(15),
    )
    .await;
    runner.abort();

    let snap = orchestrator.queue_status().await;
    assert_eq!(snap.failed, 1);

    let failed = completion.failed.lock().unwrap();
    assert!(failed[0].1.contains("after 3 attempts"));
}

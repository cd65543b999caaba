use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DashcamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Camera {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    Normal,
    Emergency,
    Photo,
}

fn filename_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4})_(\d{2})_(\d{2})_(\d{6})_\d{2}\.(TS|THM|TXT)$").unwrap()
    })
}

/// An immutable description of one on-device artifact. Constructed only from
/// a path whose filename matches the device's timestamp grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: String,
    pub filename: String,
    pub timestamp: NaiveDateTime,
    pub camera: Camera,
    pub kind: Kind,
    pub size_mb: Option<f64>,
    pub duration_secs: Option<u32>,
}

impl FileRecord {
    /// Parse a device-relative path, e.g. `"sd//back_norm/2025_10_12_220337_00.TS"`.
    pub fn parse(path: &str) -> Result<Self, DashcamError> {
        let filename = path
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(path);

        let caps = filename_pattern()
            .captures(filename)
            .ok_or_else(|| DashcamError::Parse(format!("invalid filename format: {filename}")))?;

        let year: i32 = caps[1].parse().unwrap();
        let month: u32 = caps[2].parse().unwrap();
        let day: u32 = caps[3].parse().unwrap();
        let hhmmss = &caps[4];
        let hour: u32 = hhmmss[0..2].parse().unwrap();
        let minute: u32 = hhmmss[2..4].parse().unwrap();
        let second: u32 = hhmmss[4..6].parse().unwrap();

        let timestamp = chrono::NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .ok_or_else(|| DashcamError::Parse(format!("invalid timestamp in: {filename}")))?;

        let camera = if path.contains("/back_") {
            Camera::Back
        } else {
            Camera::Front
        };

        let kind = if path.contains("/emr/") || path.contains("/back_emr/") {
            Kind::Emergency
        } else if path.contains("/photo/") || path.contains("/back_photo/") {
            Kind::Photo
        } else {
            Kind::Normal
        };

        Ok(Self {
            path: path.to_string(),
            filename: filename.to_string(),
            timestamp,
            camera,
            kind,
            size_mb: None,
            duration_secs: None,
        })
    }

    /// The thumbnail-source path, derived by replacing the `.TS` suffix with `.THM`.
    pub fn thumbnail_path(&self) -> String {
        replace_suffix(&self.path, ".TS", ".THM")
    }

    /// The GPS sidecar path, derived by replacing the `.TS` suffix with `.TXT`.
    pub fn gps_path(&self) -> String {
        replace_suffix(&self.path, ".TS", ".TXT")
    }
}

fn replace_suffix(path: &str, suffix: &str, replacement: &str) -> String {
    if let Some(stripped) = path.strip_suffix(suffix) {
        format!("{stripped}{replacement}")
    } else {
        path.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
}

/// Mutable transfer state owned by the Download Orchestrator. At most one
/// worker mutates a given task at a time.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub file: FileRecord,
    pub status: TaskStatus,
    pub progress: f64,
    pub speed_mbps: f64,
    pub error: Option<String>,
    pub local_path: std::path::PathBuf,
}

impl DownloadTask {
    pub fn is_active(&self) -> bool {
        matches!(self.status, TaskStatus::Queued | TaskStatus::Downloading)
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn has_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_key: String,
    pub file_path: String,
    pub cached_at: chrono::DateTime<chrono::Utc>,
    pub size: u64,
}

/// A derived view over the task queue, computed by scanning tasks.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueSnapshot {
    pub total: usize,
    pub queued: usize,
    pub downloading: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: usize,
}

impl QueueSnapshot {
    pub fn from_tasks(tasks: &[DownloadTask]) -> Self {
        let mut snap = QueueSnapshot {
            total: tasks.len(),
            ..Default::default()
        };
        for t in tasks {
            match t.status {
                TaskStatus::Queued => snap.queued += 1,
                TaskStatus::Downloading => snap.downloading += 1,
                TaskStatus::Completed => snap.completed += 1,
                TaskStatus::Failed => snap.failed += 1,
                TaskStatus::Paused => snap.paused += 1,
            }
        }
        snap
    }
}

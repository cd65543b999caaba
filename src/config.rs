use std::path::PathBuf;
use std::time::Duration;

/// Assembled once by the embedding application and handed to each component's
/// constructor. Replaces the original's class-level `Config` singleton.
#[derive(Debug, Clone)]
pub struct Config {
    pub dashcam_ip: String,
    pub dashcam_port: u16,
    pub connection_timeout: Duration,
    pub max_parallel_downloads: usize,
    pub stream_chunk_size: usize,
    pub max_retries: u32,
    pub download_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub max_cache_size_mb: u64,
}

impl Config {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.dashcam_ip, self.dashcam_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        let cache_dir = dirs_next::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dashcam-manager");
        let download_dir = dirs_next::download_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dashcam-manager");

        Self {
            dashcam_ip: "192.168.0.1".to_string(),
            dashcam_port: 80,
            connection_timeout: Duration::from_secs(10),
            max_parallel_downloads: 3,
            stream_chunk_size: 131_072,
            max_retries: 3,
            download_dir,
            cache_dir,
            max_cache_size_mb: 500,
        }
    }
}

/// The canonical set of on-device storage directories, as reported by
/// `getDirCapability`. Informational — the device is the source of truth.
pub const KNOWN_DIRECTORIES: &[&str] =
    &["norm", "back_norm", "emr", "back_emr", "photo", "back_photo"];

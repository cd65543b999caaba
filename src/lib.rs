//! Core library for driving a WiFi dashcam's file browser, thumbnail
//! cache, and download queue. No UI, no CLI, no persistence beyond the
//! on-disk thumbnail cache described in [`cache`].

pub mod cache;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod model;
pub mod session;
pub mod thumbnail;

pub use cache::ThumbnailCache;
pub use client::DeviceClient;
pub use config::Config;
pub use download::DownloadOrchestrator;
pub use error::{CacheError, ClientError, DashcamError, DownloadTaskError};
pub use model::{Camera, CacheEntry, DownloadTask, FileRecord, Kind, QueueSnapshot, TaskStatus};
pub use session::{SessionManager, SessionState};
pub use thumbnail::ThumbnailPipeline;

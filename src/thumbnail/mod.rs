//! Thumbnail Pipeline — loads preview images for a batch of file records
//! using a small worker pool, preferring the local cache and falling back
//! to the device, with generation-counter cancellation so a stale batch's
//! in-flight work never clobbers a newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::cache::ThumbnailCache;
use crate::client::DeviceClient;
use crate::model::FileRecord;

const WORKER_COUNT: usize = 3;
const DEVICE_COURTESY_DELAY: Duration = Duration::from_millis(50);

/// Notified as each thumbnail resolves, or fails, within a batch. Receivers
/// must discard callbacks whose `batch_id` no longer matches the caller's
/// current generation.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    async fn on_thumbnail(&self, batch_id: u64, path: String, jpeg: Vec<u8>);
    async fn on_error(&self, batch_id: u64, path: String, message: String);
}

pub struct ThumbnailPipeline {
    client: Arc<DeviceClient>,
    cache: Arc<ThumbnailCache>,
    sink: Arc<dyn DisplaySink>,
    generation: Arc<AtomicU64>,
}

impl ThumbnailPipeline {
    pub fn new(client: Arc<DeviceClient>, cache: Arc<ThumbnailCache>, sink: Arc<dyn DisplaySink>) -> Self {
        Self {
            client,
            cache,
            sink,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replaces any in-flight batch: bumps the generation counter so
    /// outstanding work from a prior call discards its results at its next
    /// checkpoint, then dispatches `records` across a fixed worker pool.
    pub async fn load_all(&self, records: Vec<FileRecord>) -> u64 {
        let batch_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let client = Arc::clone(&self.client);
        let cache = Arc::clone(&self.cache);
        let sink = Arc::clone(&self.sink);
        let generation = Arc::clone(&self.generation);

        stream::iter(records)
            .for_each_concurrent(WORKER_COUNT, move |record| {
                let client = Arc::clone(&client);
                let cache = Arc::clone(&cache);
                let sink = Arc::clone(&sink);
                let generation = Arc::clone(&generation);
                async move {
                    load_one(&client, &cache, &sink, &generation, batch_id, record).await;
                }
            })
            .await;

        batch_id
    }

    pub fn current_batch_id(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

fn is_current(generation: &AtomicU64, batch_id: u64) -> bool {
    generation.load(Ordering::SeqCst) == batch_id
}

/// Device error pages start with `<!` (HTML) and mis-routed MPEG-TS chunks
/// start with `G@`; neither is a valid JPEG and neither gets cached.
fn looks_like_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

fn looks_like_error_payload(data: &[u8]) -> bool {
    data.starts_with(b"<!") || data.starts_with(b"G@")
}

async fn load_one(
    client: &DeviceClient,
    cache: &ThumbnailCache,
    sink: &Arc<dyn DisplaySink>,
    generation: &AtomicU64,
    batch_id: u64,
    record: FileRecord,
) {
    // Checkpoint 1: entry.
    if !is_current(generation, batch_id) {
        return;
    }

    let thumb_path = record.thumbnail_path();

    // Cached by the source `.TS` path, matching the data model's notion of
    // "source file path" — only the device fetch itself uses `thumb_path`.
    if let Some(cached) = cache.get(&record.path) {
        if looks_like_jpeg(&cached) {
            sink.on_thumbnail(batch_id, record.path.clone(), cached).await;
            return;
        }
        log::debug!("[thumbnail] cached blob for {} failed validation, refetching", record.path);
        let _ = cache.invalidate(&record.path);
    }

    // Checkpoint 2: before the device round-trip.
    if !is_current(generation, batch_id) {
        return;
    }

    tokio::time::sleep(DEVICE_COURTESY_DELAY).await;

    let fetched = client.get_thumbnail(&thumb_path).await;

    // Checkpoint 3: after the device round-trip.
    if !is_current(generation, batch_id) {
        return;
    }

    match fetched {
        Ok(data) => {
            if looks_like_error_payload(&data) || !looks_like_jpeg(&data) {
                sink.on_error(
                    batch_id,
                    record.path.clone(),
                    format!("malformed thumbnail payload for {thumb_path}"),
                )
                .await;
                return;
            }

            if let Err(e) = cache.save(&record.path, &data) {
                log::warn!("[thumbnail] failed to cache {}: {e}", record.path);
            }

            // Checkpoint 4: before publishing.
            if !is_current(generation, batch_id) {
                return;
            }

            sink.on_thumbnail(batch_id, record.path.clone(), data).await;
        }
        Err(e) => {
            sink.on_error(batch_id, record.path.clone(), e.to_string()).await;
        }
    }
}

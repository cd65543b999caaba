/// Errors raised by the Device Client: transport failures and unparseable
/// wire responses. Discovery failures are surfaced as status notifications
/// by the Session Manager, not as `ClientError`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("disk error: {0}")]
    Disk(#[from] std::io::Error),
    #[error("unparseable response: {0}")]
    Protocol(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("disk error: {0}")]
    Disk(#[from] std::io::Error),
    #[error("metadata index corrupt: {0}")]
    Index(#[from] serde_json::Error),
}

/// Raised only by the internal per-attempt path of the Download Orchestrator;
/// never escapes a task — the orchestrator converts it into a `failed` status
/// with a message after retries are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum DownloadTaskError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("disk error: {0}")]
    Disk(#[from] std::io::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Debug, thiserror::Error)]
pub enum DashcamError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("parse error: {0}")]
    Parse(String),
}

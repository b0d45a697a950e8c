//! Per-subsystem error taxonomy for the data layer (§7). Each error enum
//! classifies its own variants as transient (worth retrying through the
//! scheduler's backoff policy, §4.11) or permanent.

use thiserror::Error;

/// Errors from the search-index Store (C7, §4.7).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("search index request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("search index returned malformed response: {0}")]
    Malformed(String),
    #[error("index does not exist: {0}")]
    IndexMissing(String),
}

impl StoreError {
    /// Transport failures (timeouts, connection resets) are retried;
    /// malformed responses and a missing index are not (§7).
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transport(e) if e.is_timeout() || e.is_connect())
    }
}

/// Errors from the ticket tracker client (C10, §4.10).
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("tracker request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("tracker returned malformed response: {0}")]
    Malformed(String),
    #[error("ticket not found: {0}")]
    NotFound(String),
}

impl TrackerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::Transport(e) if e.is_timeout() || e.is_connect())
    }
}

/// Errors from the chat client (C12, §4.12).
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat webhook rejected the payload: {0}")]
    Rejected(String),
    #[error("no webhook configured for channel {0:?}")]
    NoWebhook(String),
}

impl ChatError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Transport(e) if e.is_timeout() || e.is_connect())
    }
}

/// Errors from the archive object store client (C5, §4.5).
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("object storage request failed: {0}")]
    Transport(String),
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("access denied fetching {bucket}/{key}; system clock may be out of date")]
    Forbidden { bucket: String, key: String },
    #[error("failed to decompress archive: {0}")]
    Decompress(#[from] std::io::Error),
}

impl ObjectStoreError {
    /// §4.5: 403/404 are permanent for that key; anything else (an
    /// EOF/connection-reset mid-stream) is transient and retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, ObjectStoreError::Transport(_))
    }
}

/// Errors from the Scheduler's task queue (C11, §4.11).
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("task queue is shutting down")]
    ShuttingDown,
}

impl SchedulerError {
    pub fn is_transient(&self) -> bool {
        false
    }
}

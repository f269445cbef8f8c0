//! Download engine - the front door for multiple concurrent tasks
//!
//! Owns the shared HTTP client, hands tasks to a worker pool and keeps the
//! control flags of running tasks so callers can pause or cancel by id.

use crate::engine::pool::{DownloadWorkerPool, StartOptions, TaskHandle};
use crate::error::CoreError;
use reqwest::Client;
use segfetch_types::{DownloadTask, LinkInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Control flags of one running task, mirrored from its handle.
struct ActiveTask {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

/// Coordinates all download tasks behind a shared HTTP client.
pub struct DownloadEngine {
    client: Client,
    pool: DownloadWorkerPool,
    active: Arc<RwLock<HashMap<Uuid, ActiveTask>>>,
}

impl DownloadEngine {
    /// Create an engine with the default HTTP client.
    pub fn new() -> Result<Self, CoreError> {
        let client = Client::builder()
            .user_agent(concat!("segfetch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoreError::Unknown(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Create an engine around an existing client (proxy settings, custom
    /// TLS and so on are the caller's concern).
    pub fn with_client(client: Client) -> Self {
        Self {
            pool: DownloadWorkerPool::new(client.clone()),
            client,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Probe a URL for metadata so a caller can build a fully resolved
    /// [`DownloadTask`]. The engine itself never resolves what to download.
    pub async fn probe(&self, url: &url::Url) -> Result<LinkInfo, CoreError> {
        info!(%url, "probing url");
        let response = self.client.head(url.as_str()).send().await?;

        let final_url = response.url().to_string();
        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let resumable = response
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|s| s == "bytes")
            .unwrap_or(false);
        let file_name = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split("filename=")
                    .nth(1)
                    .map(|s| s.trim_matches('"').to_string())
            })
            .unwrap_or_else(|| {
                url.path_segments()
                    .and_then(|mut s| s.next_back())
                    .filter(|s| !s.is_empty())
                    .unwrap_or("download")
                    .to_string()
            });

        Ok(LinkInfo {
            url: url.to_string(),
            final_url: Some(final_url),
            file_name,
            size,
            content_type,
            resumable,
        })
    }

    /// Start a task split into `options.segment_count` parallel segments.
    ///
    /// Returns the task id together with the handle. Fails with
    /// `InvalidConfiguration` before any worker starts if the options or the
    /// task size are unusable.
    pub async fn start(
        &self,
        task: DownloadTask,
        options: StartOptions,
    ) -> Result<(Uuid, TaskHandle), CoreError> {
        let handle = self.pool.start(task, options)?;
        let id = Uuid::new_v4();

        let mut active = self.active.write().await;
        active.retain(|_, t| !t.finished.load(Ordering::Acquire));
        active.insert(
            id,
            ActiveTask {
                paused: handle.paused.clone(),
                cancelled: handle.cancelled.clone(),
                finished: handle.finished.clone(),
            },
        );
        Ok((id, handle))
    }

    /// Signal a running task to pause. Returns false when the id is unknown
    /// or the task already finished.
    pub async fn pause(&self, id: Uuid) -> bool {
        let active = self.active.read().await;
        match active.get(&id) {
            Some(task) if !task.finished.load(Ordering::Acquire) => {
                task.paused.store(true, Ordering::Release);
                info!(%id, "signalled pause");
                true
            }
            _ => false,
        }
    }

    /// Signal a running task to cancel. Returns false when the id is unknown
    /// or the task already finished.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let mut active = self.active.write().await;
        match active.remove(&id) {
            Some(task) if !task.finished.load(Ordering::Acquire) => {
                task.cancelled.store(true, Ordering::Release);
                info!(%id, "signalled cancel");
                true
            }
            _ => false,
        }
    }

    /// Number of tasks that have not yet reached a terminal state.
    pub async fn active_count(&self) -> usize {
        self.active
            .read()
            .await
            .values()
            .filter(|t| !t.finished.load(Ordering::Acquire))
            .count()
    }

    pub async fn is_active(&self, id: Uuid) -> bool {
        self.active
            .read()
            .await
            .get(&id)
            .map(|t| !t.finished.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

//! Generic durable FIFO queue — at-least-once sequential drain with fixed
//! inter-item pacing, snapshotted to a JSON file so a restart picks up
//! exactly where the drain stopped.
//!
//! The snapshot is written after each item completes (and when the queue
//! drains empty), so a crash mid-handler re-delivers that item. Handler
//! errors are logged and the item is dropped — pacing and ordering matter
//! more than any single delivery. Reused by email dispatch and
//! subscription teardown.

use outclaw_core::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Fire-and-forget producer side of a durable queue.
#[derive(Clone)]
pub struct QueueHandle<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> QueueHandle<T> {
    /// Append an item. A push to a stopped queue is silently dropped.
    pub fn push(&self, item: T) {
        let _ = self.tx.send(item);
    }
}

/// Spawn the drain loop. `handler` processes exactly one item at a time;
/// `pacing` is the fixed delay between items.
pub fn spawn_durable_queue<T, F, Fut>(
    name: &'static str,
    snapshot_path: PathBuf,
    pacing: Duration,
    handler: F,
) -> QueueHandle<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<T>();
    tokio::spawn(async move {
        let mut queue: VecDeque<T> = load_snapshot(&snapshot_path);
        if !queue.is_empty() {
            tracing::info!("♻️ [{name}] recovered {} queued item(s)", queue.len());
        }
        loop {
            if queue.is_empty() {
                // Drained: persist the empty snapshot and start fresh on
                // the next push.
                save_snapshot(name, &snapshot_path, &queue);
                match rx.recv().await {
                    Some(item) => queue.push_back(item),
                    None => break,
                }
            }
            while let Ok(item) = rx.try_recv() {
                queue.push_back(item);
            }

            // Peek-process-pop: the item stays in the snapshot until it
            // has actually been handled.
            let Some(item) = queue.front().cloned() else {
                continue;
            };
            if let Err(e) = handler(item).await {
                tracing::warn!("⚠️ [{name}] handler failed: {e}");
            }
            queue.pop_front();
            save_snapshot(name, &snapshot_path, &queue);

            tokio::time::sleep(pacing).await;
        }
        tracing::info!("🛑 [{name}] queue stopped");
    });
    QueueHandle { tx }
}

fn load_snapshot<T: DeserializeOwned>(path: &Path) -> VecDeque<T> {
    if !path.exists() {
        return VecDeque::new();
    }
    match std::fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!("⚠️ Failed to parse queue snapshot {}: {e}", path.display());
            VecDeque::new()
        }),
        Err(e) => {
            tracing::warn!("⚠️ Failed to read queue snapshot {}: {e}", path.display());
            VecDeque::new()
        }
    }
}

fn save_snapshot<T: Serialize>(name: &str, path: &Path, queue: &VecDeque<T>) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    match serde_json::to_string_pretty(queue) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                tracing::warn!("⚠️ [{name}] snapshot write failed: {e}");
            }
        }
        Err(e) => tracing::warn!("⚠️ [{name}] snapshot serialize failed: {e}"),
    }
}

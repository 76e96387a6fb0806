//! Single-writer actor for the state file.
//!
//! Every merge goes through one thread that owns the [`StateStore`], so a
//! load → mutate → save cycle never interleaves with another. Callers
//! hold a cloneable [`StoreHandle`] and await a oneshot reply.

use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use super::{AppMap, AppRecord, StateStore, StoreError};

/// Bound on queued requests; merges are human-paced.
const QUEUE_DEPTH: usize = 64;

enum StoreMessage {
    Merge {
        app_id: String,
        record: AppRecord,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Snapshot {
        reply: oneshot::Sender<AppMap>,
    },
}

/// Cloneable async handle to the writer thread.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreMessage>,
}

impl StoreHandle {
    /// Overwrite the entry for `app_id` and persist the full map.
    pub async fn merge(&self, app_id: &str, record: AppRecord) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreMessage::Merge {
                app_id: app_id.to_string(),
                record,
                reply,
            })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Current persisted map, read through the writer.
    pub async fn snapshot(&self) -> Result<AppMap, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreMessage::Snapshot { reply })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }
}

/// Start the writer thread. It exits once every handle is dropped.
pub fn spawn_writer(store: StateStore) -> std::io::Result<(StoreHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    let thread = std::thread::Builder::new()
        .name("state-writer".into())
        .spawn(move || run_writer(store, rx))?;
    Ok((StoreHandle { tx }, thread))
}

fn run_writer(store: StateStore, mut rx: mpsc::Receiver<StoreMessage>) {
    tracing::debug!(path = %store.path().display(), "state writer started");

    while let Some(message) = rx.blocking_recv() {
        match message {
            StoreMessage::Merge {
                app_id,
                record,
                reply,
            } => {
                let result = store.merge(&app_id, record);
                match &result {
                    Ok(()) => tracing::debug!(app_id = %app_id, "state merged"),
                    Err(e) => tracing::error!(app_id = %app_id, error = %e, "state write failed"),
                }
                // The caller may have gone away; the write stands either way.
                let _ = reply.send(result);
            }
            StoreMessage::Snapshot { reply } => {
                let _ = reply.send(store.load());
            }
        }
    }

    tracing::debug!("state writer stopped");
}

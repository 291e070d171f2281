// Background inbox trimming — a bounded queue drained by a fixed pool.
//
// Feed reads schedule a trim of the reader's inbox and return immediately.
// A trim already waiting for the same owner absorbs new requests, and a full
// queue drops the request (the next read will schedule it again). Each trim
// has its own deadline; failures are logged and forgotten.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::FeedSettings;
use crate::feed::{FeedStore, Mailbox};
use crate::timeout::bounded;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    Queued,
    /// A trim for this owner is already waiting.
    AlreadyPending,
    /// Queue full or closed; nothing was scheduled.
    Dropped,
}

pub struct TrimQueue {
    tx: mpsc::Sender<i64>,
    pending: Arc<Mutex<HashSet<i64>>>,
    workers: Vec<JoinHandle<()>>,
}

impl TrimQueue {
    /// Start `settings.trim_workers` workers trimming inboxes to
    /// `settings.inbox_max_len`.
    pub fn spawn(store: Arc<dyn FeedStore>, settings: &FeedSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.trim_queue.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let pending = Arc::new(Mutex::new(HashSet::new()));

        let workers = (0..settings.trim_workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    rx.clone(),
                    pending.clone(),
                    store.clone(),
                    settings.inbox_max_len,
                    settings.trim_timeout,
                ))
            })
            .collect();

        Self {
            tx,
            pending,
            workers,
        }
    }

    /// Ask for `owner`'s inbox to be trimmed. Never waits.
    pub fn schedule(&self, owner: i64) -> Scheduled {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if !pending.insert(owner) {
                return Scheduled::AlreadyPending;
            }
        }

        match self.tx.try_send(owner) {
            Ok(()) => Scheduled::Queued,
            Err(e) => {
                self.pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&owner);
                warn!(owner, error = %e, "Trim queue unavailable, dropping request");
                Scheduled::Dropped
            }
        }
    }

    /// Stop accepting work and wait for queued trims to finish.
    pub async fn close(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Trim worker panicked");
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<i64>>>,
    pending: Arc<Mutex<HashSet<i64>>>,
    store: Arc<dyn FeedStore>,
    max_len: usize,
    trim_timeout: Duration,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(owner) = next else {
            break;
        };

        // Cleared before trimming so a read during the trim can queue another.
        pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&owner);

        match bounded(
            trim_timeout,
            "inbox trim",
            store.trim(Mailbox::Inbox, owner, max_len),
        )
        .await
        {
            Ok(0) => {}
            Ok(removed) => debug!(worker, owner, removed, "Trimmed inbox"),
            Err(e) => warn!(worker, owner, error = %e, "Inbox trim failed"),
        }
    }
}

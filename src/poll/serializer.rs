use std::{
    collections::HashMap,
    fmt::Debug,
    future::Future,
    sync::{Arc, Mutex},
};

use futures_util::{future::BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot};

type Job = BoxFuture<'static, ()>;

/// FIFO task queues keyed by account, one task in flight per key.
///
/// Each key gets a worker task on first use, jobs for different keys run independently.
/// A job must not wait on another job of the same key, that would never finish.
#[derive(Clone, Default)]
pub struct PollSerializer {
    queues: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>>,
}

impl Debug for PollSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .queues
            .lock()
            .map(|q| q.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("PollSerializer").field("keys", &keys).finish()
    }
}

impl PollSerializer {
    /// Create a serializer with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `fut` to the queue of `key`. It starts once every earlier job of the key settled.
    ///
    /// The receiver gets the output, or a `RecvError` if the job panicked.
    pub fn enqueue<F>(&self, key: &str, fut: F) -> oneshot::Receiver<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut job: Job = async move {
            let _ = tx.send(fut.await);
        }
        .boxed();

        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(queue) = queues.get(key) {
            match queue.send(job) {
                Ok(()) => return rx,
                // worker gone, start a new one below
                Err(mpsc::error::SendError(j)) => job = j,
            }
        }

        let queue = spawn_worker(key);
        if queue.send(job).is_err() {
            log::error!("[{}] Poll queue closed right after creation", key);
        }
        queues.insert(key.to_string(), queue);

        rx
    }
}

fn spawn_worker(key: &str) -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let key = key.to_string();

    tokio::spawn(async move {
        log::trace!("[{}] Poll queue worker start", key);

        while let Some(job) = rx.recv().await {
            if let Err(err) = tokio::spawn(job).await {
                log::error!("[{}] Queued poll task failed: {}", key, err);
            }
        }

        log::trace!("[{}] Poll queue worker stop", key);
    });

    tx
}

//! Pull side of the gateway: fetch pages since the cursor and deliver them.

mod executor;
mod serializer;

pub use executor::PollExecutor;
pub use serializer::PollSerializer;

use std::sync::{Arc, Mutex};

use snafu::prelude::*;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{cursor::Cursor, health::HealthTracker, source::SourceError};

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// the source returned a position, already persisted
    Advanced(Cursor),
    /// the source returned no position, keep the current one
    Unchanged,
}

/// Error of one poll cycle
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum PollError {
    /// list events failed, cursor untouched
    #[snafu(display("[{account}] fetch events failed: {source}"))]
    FetchFailed {
        /// account id
        account: String,
        /// source error
        source: SourceError,
    },

    /// the queue dropped the cycle before it finished
    #[snafu(display("[{account}] poll cycle abandoned"))]
    Abandoned {
        /// account id
        account: String,
    },

    /// shutdown fired before the cycle made any progress
    #[snafu(display("[{account}] poll cycle cancelled"))]
    Cancelled {
        /// account id
        account: String,
    },
}

impl PollError {
    /// true if the cycle stopped because of shutdown
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Why a poll was requested, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollReason {
    /// push session opened, catch up on what was missed
    CatchUp,
    /// push session received a change hint
    Hint,
    /// fallback interval polling
    Interval,
}

/// Serialized poll trigger for one account.
///
/// Every request goes through the shared [`PollSerializer`], so requests from the push
/// session and from fallback polling never overlap, and each cycle reads the cursor left by
/// the previous one.
///
/// Once `cancel` fires, queued cycles are skipped and a running one stops at its next fetch
/// or delivery.
#[derive(Debug, Clone)]
pub struct AccountPoller {
    executor: Arc<PollExecutor>,
    serializer: PollSerializer,
    health: HealthTracker,
    cursor: Arc<Mutex<Cursor>>,
    cancel: CancellationToken,
}

impl AccountPoller {
    /// Create a poller starting from `cursor`, stopped by `cancel`.
    pub fn new(
        executor: PollExecutor,
        serializer: PollSerializer,
        health: HealthTracker,
        cursor: Cursor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor: Arc::new(executor),
            serializer,
            health,
            cursor: Arc::new(Mutex::new(cursor)),
            cancel,
        }
    }

    /// account id
    pub fn account(&self) -> &str {
        self.executor.account()
    }

    /// Latest cursor known after the last finished cycle.
    pub fn cursor(&self) -> Cursor {
        self.cursor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Queue a poll cycle without waiting for it.
    pub fn request(&self, reason: PollReason) -> oneshot::Receiver<Result<PollOutcome, PollError>> {
        let executor = self.executor.clone();
        let health = self.health.clone();
        let cursor = self.cursor.clone();
        let cancel = self.cancel.clone();

        log::trace!("[{}] Poll requested: {:?}", self.account(), reason);

        self.serializer.enqueue(self.account(), async move {
            if cancel.is_cancelled() {
                log::trace!("[{}] Skip poll ({:?}) after shutdown", executor.account(), reason);
                return error::Cancelled {
                    account: executor.account(),
                }
                .fail();
            }

            let current = cursor.lock().unwrap_or_else(|e| e.into_inner()).clone();

            let result = executor.poll(&current, &cancel).await;

            if matches!(&result, Err(err) if err.is_cancelled()) {
                log::debug!("[{}] Poll ({:?}) cancelled", executor.account(), reason);
                return result;
            }

            match &result {
                Ok(PollOutcome::Advanced(next)) => {
                    log::debug!(
                        "[{}] Poll ({:?}) advanced cursor {} -> {}",
                        executor.account(),
                        reason,
                        current,
                        next
                    );
                    *cursor.lock().unwrap_or_else(|e| e.into_inner()) = next.clone();
                }
                Ok(PollOutcome::Unchanged) => {
                    log::trace!("[{}] Poll ({:?}) cursor unchanged", executor.account(), reason);
                }
                Err(err) => {
                    log::warn!("Poll ({:?}) failed: {}", reason, err);
                }
            }

            health.record_poll(executor.account(), result.is_ok());

            result
        })
    }

    /// Wait until every cycle queued so far has settled.
    pub async fn settle(&self) {
        let _ = self.serializer.enqueue(self.account(), async {}).await;
    }

    /// Queue a poll cycle and wait for its result.
    pub async fn poll(&self, reason: PollReason) -> Result<PollOutcome, PollError> {
        match self.request(reason).await {
            Ok(result) => result,
            Err(_) => error::Abandoned {
                account: self.account(),
            }
            .fail(),
        }
    }
}

use std::{fmt::Debug, sync::Arc};

use snafu::prelude::*;
use tokio_util::sync::CancellationToken;

use super::{error, PollError, PollOutcome};
use crate::{
    api::types::EventPage,
    consumer::Consumer,
    cursor::{Cursor, CursorStore},
    event::DeliveredEvent,
    health::HealthTracker,
    source::EventSource,
};

/// Runs one fetch-and-deliver cycle for an account.
///
/// Not safe to run concurrently for the same account, go through
/// [`AccountPoller`](super::AccountPoller) instead of calling [`PollExecutor::poll`] from
/// several tasks.
pub struct PollExecutor {
    account: String,
    self_user_id: String,
    source: Arc<dyn EventSource>,
    consumer: Arc<dyn Consumer>,
    store: CursorStore,
    health: HealthTracker,
}

impl Debug for PollExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollExecutor")
            .field("account", &self.account)
            .field("self_user_id", &self.self_user_id)
            .field("source", &self.source)
            .field("consumer", &self.consumer.name())
            .field("store", &self.store)
            .finish()
    }
}

impl PollExecutor {
    /// Create an executor for `account`, whose own user id on the remote side is `self_user_id`.
    pub fn new(
        account: impl Into<String>,
        self_user_id: impl Into<String>,
        source: Arc<dyn EventSource>,
        consumer: Arc<dyn Consumer>,
        store: CursorStore,
        health: HealthTracker,
    ) -> Self {
        Self {
            account: account.into(),
            self_user_id: self_user_id.into(),
            source,
            consumer,
            store,
            health,
        }
    }

    /// account id
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Fetch one page after `cursor` and deliver it.
    ///
    /// An absent cursor makes this a synchronization run: nothing is delivered, only the
    /// position is recorded.
    ///
    /// When `cancel` fires the fetch is dropped and delivery stops before the next event. The
    /// cycle then reports the last persisted position, or [`PollError::Cancelled`] if it
    /// persisted nothing.
    pub async fn poll(
        &self,
        cursor: &Cursor,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, PollError> {
        if cursor.is_absent() {
            self.synchronize(cancel).await
        } else {
            self.deliver_page(cursor, cancel).await
        }
    }

    async fn fetch(
        &self,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<EventPage, PollError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => error::Cancelled {
                account: &self.account,
            }
            .fail(),
            page = self.source.list_events(cursor) => page.context(error::FetchFailed {
                account: &self.account,
            }),
        }
    }

    fn interrupted(&self, saved: Option<String>) -> Result<PollOutcome, PollError> {
        log::debug!("[{}] Delivery interrupted by shutdown", self.account);

        match saved {
            Some(t) => Ok(PollOutcome::Advanced(Cursor::Token(t))),
            None => error::Cancelled {
                account: &self.account,
            }
            .fail(),
        }
    }

    async fn synchronize(&self, cancel: &CancellationToken) -> Result<PollOutcome, PollError> {
        log::debug!("[{}] First run, synchronizing cursor", self.account);

        let page = self.fetch(None, cancel).await?;

        let skipped = page.items.len();
        let token = page
            .next_cursor
            .or_else(|| page.items.iter().rev().find_map(|e| e.cursor.clone()));

        let cursor = match token {
            Some(t) => Cursor::Token(t),
            None if skipped == 0 => Cursor::Seeded,
            None => {
                log::warn!(
                    "[{}] Source returned {} events but no cursor, stay unsynchronized",
                    self.account,
                    skipped
                );
                return Ok(PollOutcome::Unchanged);
            }
        };

        self.store.save(&self.account, &cursor).await;

        log::info!(
            "[{}] Connected, cursor synchronized to {}, {} historical events skipped",
            self.account,
            cursor,
            skipped
        );

        self.consumer.on_connected(&self.account).await;

        Ok(PollOutcome::Advanced(cursor))
    }

    async fn deliver_page(
        &self,
        cursor: &Cursor,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, PollError> {
        let page = self.fetch(cursor.token(), cancel).await?;

        log::debug!(
            "[{}] Fetched {} events after {}",
            self.account,
            page.items.len(),
            cursor
        );

        let mut last_position = None;
        let mut saved = None;

        for remote in page.items {
            if cancel.is_cancelled() {
                return self.interrupted(saved);
            }

            let position = remote.cursor.clone();
            let event = DeliveredEvent::from_remote(&self.account, &self.self_user_id, remote);

            if position.is_some() {
                last_position = position.clone();
            }

            if event.is_self_echo() {
                log::trace!("[{}] Skip self echo {}", self.account, event.id);
                continue;
            }

            let id = event.id.clone();
            let delivered = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.interrupted(saved),
                result = self.consumer.deliver(Arc::new(event)) => result,
            };

            match delivered {
                Ok(()) => {
                    log::trace!("[{}] Delivered event {}", self.account, id);
                    self.health.record_delivered(&self.account);

                    if let Some(p) = position {
                        self.store.save(&self.account, &Cursor::Token(p.clone())).await;
                        saved = Some(p);
                    }
                }
                Err(err) => {
                    log::warn!(
                        "[{}] Consumer {} failed on event {}: {}",
                        self.account,
                        self.consumer.name(),
                        id,
                        err
                    );
                    self.health.record_delivery_failure(&self.account);
                }
            }
        }

        match page.next_cursor.or(last_position) {
            Some(t) => {
                let next = Cursor::Token(t);
                self.store.save(&self.account, &next).await;
                Ok(PollOutcome::Advanced(next))
            }
            None => Ok(PollOutcome::Unchanged),
        }
    }
}

//! Per-account control loop: push when possible, poll when not, reconnect forever.

use std::{fmt::Debug, sync::Arc, time::Duration};

use snafu::prelude::*;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::BackoffPolicy,
    config::GatewayOptions,
    consumer::Consumer,
    cursor::{Cursor, CursorStore},
    health::HealthTracker,
    poll::{AccountPoller, PollExecutor, PollReason, PollSerializer},
    source::{EventSource, SourceError},
    status::{AccountConnection, ConnectionStatus, TransportMode},
    ws::{CloseKind, Endpoint, ParseEndpointError, PushTransport, SessionEnd},
};

/// Error when get a push session credential
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum CredentialError {
    /// the source refused or could not be reached
    #[snafu(display("request connection credential failed: {source}"))]
    Request {
        /// source error
        source: SourceError,
    },

    /// the returned endpoint is unusable
    #[snafu(display("credential endpoint is invalid: {source}"))]
    InvalidEndpoint {
        /// source error
        source: ParseEndpointError,
    },
}

/// Resources shared by every account of one gateway
#[derive(Debug, Clone)]
pub struct SharedResources {
    /// cursor files
    pub store: CursorStore,
    /// poll queues, keyed by account
    pub serializer: PollSerializer,
    /// health counters, keyed by account
    pub health: HealthTracker,
}

impl SharedResources {
    /// Resources with a cursor store at `options.state_dir`.
    pub fn from_options(options: &GatewayOptions) -> Self {
        Self {
            store: CursorStore::new(&options.state_dir),
            serializer: PollSerializer::new(),
            health: HealthTracker::new(),
        }
    }
}

/// What a supervisor leaves behind when it stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSummary {
    /// account id
    pub account: String,
    /// reconnect attempts during the run
    pub reconnects: u64,
    /// push sessions that opened
    pub sessions: u64,
    /// cursor at exit
    pub cursor: Cursor,
}

/// Keeps one delivery path alive for an account until cancelled.
pub struct ConnectionSupervisor {
    account: String,
    self_user_id: String,
    source: Arc<dyn EventSource>,
    consumer: Arc<dyn Consumer>,
    shared: SharedResources,
    transport: PushTransport,
    backoff: BackoffPolicy,
    fallback_interval: Duration,
    fallback_cycles: u32,
    conn: AccountConnection,
}

impl Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("account", &self.account)
            .field("source", &self.source)
            .field("consumer", &self.consumer.name())
            .field("backoff", &self.backoff)
            .field("status", &self.conn.status())
            .finish()
    }
}

impl ConnectionSupervisor {
    /// Create a supervisor for one account.
    pub fn new(
        account: impl Into<String>,
        self_user_id: impl Into<String>,
        source: Arc<dyn EventSource>,
        consumer: Arc<dyn Consumer>,
        options: &GatewayOptions,
        shared: SharedResources,
    ) -> Self {
        let account = account.into();
        let conn = AccountConnection::new(&account);

        Self {
            transport: PushTransport::from_options(options, shared.health.clone()),
            backoff: BackoffPolicy::from(&options.backoff),
            fallback_interval: options.fallback_poll_interval(),
            fallback_cycles: options.fallback_poll_cycles.max(1),
            account,
            self_user_id: self_user_id.into(),
            source,
            consumer,
            shared,
            conn,
        }
    }

    /// account id
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Watch the account's connection status.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.conn.subscribe()
    }

    async fn credential(&self) -> Result<(Endpoint, String), CredentialError> {
        let credential = self
            .source
            .request_credential()
            .await
            .context(error::Request)?;

        let endpoint = credential
            .endpoint
            .parse()
            .context(error::InvalidEndpoint)?;

        Ok((endpoint, credential.ticket))
    }

    /// Poll on a fixed interval for a bounded number of cycles.
    ///
    /// Returns false if cancelled.
    async fn fallback_poll(&self, poller: &AccountPoller, cancel: &CancellationToken) -> bool {
        self.conn.set_mode(TransportMode::Pull);

        for cycle in 1..=self.fallback_cycles {
            log::debug!(
                "[{}] Fallback poll {}/{}",
                self.account,
                cycle,
                self.fallback_cycles
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                // failures are logged by the poller
                _ = poller.poll(PollReason::Interval) => {}
            }

            if cycle < self.fallback_cycles && !sleep_or_cancel(self.fallback_interval, cancel).await {
                return false;
            }
        }

        true
    }

    /// Run until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> SupervisorSummary {
        let account = self.account.clone();

        let cursor = self.shared.store.load(&account).await;
        log::info!("[{}] Supervisor start from cursor {}", account, cursor);

        let executor = PollExecutor::new(
            &account,
            &self.self_user_id,
            self.source.clone(),
            self.consumer.clone(),
            self.shared.store.clone(),
            self.shared.health.clone(),
        );
        let poller = AccountPoller::new(
            executor,
            self.shared.serializer.clone(),
            self.shared.health.clone(),
            cursor,
            cancel.clone(),
        );

        let mut reconnects = 0;
        let mut sessions = 0;

        loop {
            let credential = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.credential() => result,
            };

            match credential {
                Ok((endpoint, ticket)) => {
                    self.conn.set_mode(TransportMode::Push);

                    let report = self
                        .transport
                        .run_session(&endpoint, &ticket, &poller, &self.conn, &cancel)
                        .await;

                    if report.opened {
                        sessions += 1;
                        self.backoff.reset();
                    }

                    log::debug!(
                        "[{}] Session finished in state {:?}, cursor {}",
                        account,
                        report.state,
                        report.cursor
                    );

                    match report.end {
                        SessionEnd::Aborted => break,
                        SessionEnd::Closed {
                            kind: CloseKind::Expected,
                            ..
                        } => {}
                        // keep events flowing until the next attempt
                        _ => {
                            if !self.fallback_poll(&poller, &cancel).await {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    log::warn!("[{}] {}, fall back to polling", account, err);
                    self.conn.record_error(err.to_string());

                    if !self.fallback_poll(&poller, &cancel).await {
                        break;
                    }
                }
            }

            if cancel.is_cancelled() {
                break;
            }

            let delay = self.backoff.next_delay();
            reconnects += 1;
            self.shared.health.record_reconnect(&account);

            log::info!(
                "[{}] Reconnect in {:?} (attempt {})",
                account,
                delay,
                self.backoff.attempt()
            );

            if !sleep_or_cancel(delay, &cancel).await {
                break;
            }
        }

        if self.conn.status().running {
            self.conn.mark_stopped(None);
        }

        // a cycle may still be unwinding from the cancel
        poller.settle().await;

        log::info!(
            "[{}] Supervisor stop after {} sessions and {} reconnects",
            account,
            sessions,
            reconnects
        );

        SupervisorSummary {
            account,
            reconnects,
            sessions,
            cursor: poller.cursor(),
        }
    }
}

/// Sleep, waking early on cancel. Returns false if cancelled.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

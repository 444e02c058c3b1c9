//! # Tidings
//!
//! A resilient event delivery gateway.
//!
//! For every configured account a [`ConnectionSupervisor`] keeps a websocket open to the
//! remote source. The websocket only carries "something changed" hints, every hint triggers
//! a poll of the event list since the stored cursor, and each new event is handed to the
//! [`Consumer`] exactly once per successful poll. When the websocket can't be used the
//! supervisor polls on an interval instead, and it always comes back with backoff.
//!
//! Delivery is at-least-once: a crash between delivering an event and persisting the cursor
//! delivers the event again on restart, consumers should drop duplicate event ids.

#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod api;
pub mod backoff;
pub mod config;
pub mod consumer;
pub mod cursor;
pub mod event;
pub mod health;
pub mod poll;
pub mod source;
pub mod status;
pub mod supervisor;
pub mod ws;

mod error;
#[cfg(test)]
mod testing;

pub use config::{AccountConfig, GatewayOptions};
pub use consumer::{Consumer, DeliveryError};
pub use cursor::{Cursor, CursorStore};
pub use error::Error;
pub use event::DeliveredEvent;
pub use source::{EventSource, SourceError};
pub use status::{ConnectionStatus, TransportMode};
pub use supervisor::{ConnectionSupervisor, SharedResources, SupervisorSummary};

use std::{collections::HashSet, sync::Arc};

use snafu::prelude::*;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// gateway result type
pub type Result<T> = std::result::Result<T, Error>;

/// What [`Gateway::run`] returns after shutdown
#[derive(Debug, Clone, Default)]
pub struct GatewaySummary {
    /// one entry per supervisor that exited cleanly
    pub accounts: Vec<SupervisorSummary>,
}

impl GatewaySummary {
    /// reconnects over all accounts
    pub fn total_reconnects(&self) -> u64 {
        self.accounts.iter().map(|a| a.reconnects).sum()
    }
}

/// Gateway instance, one supervisor per account
#[derive(Debug)]
pub struct Gateway {
    options: GatewayOptions,
    shared: SharedResources,
    consumer: Arc<dyn Consumer>,
    supervisors: Vec<ConnectionSupervisor>,
    ids: HashSet<String>,
}

impl Gateway {
    /// Create a gateway with an http api client for every configured account.
    pub fn new(options: GatewayOptions, consumer: Arc<dyn Consumer>) -> Result<Self> {
        options.validate().context(error::InvalidOptions)?;

        let mut gateway = Self {
            shared: SharedResources::from_options(&options),
            consumer,
            supervisors: Vec::new(),
            ids: HashSet::new(),
            options,
        };

        for account in gateway.options.accounts.clone() {
            let client = api::Client::new_from_bot_token(&account.base_url, &account.token)
                .with_context(|_| error::CreateAPIClientFailed {
                    account: &account.id,
                })?;

            gateway.add_account(&account.id, &account.self_user_id, Arc::new(client))?;
        }

        log::info!(
            "Gateway created with {} accounts, state in {}",
            gateway.supervisors.len(),
            gateway.options.state_dir.display()
        );

        Ok(gateway)
    }

    /// Register an extra account backed by any event source.
    pub fn add_account(
        &mut self,
        id: &str,
        self_user_id: &str,
        source: Arc<dyn EventSource>,
    ) -> Result<()> {
        ensure!(
            self.ids.insert(id.to_string()),
            error::DuplicateAccount { account: id }
        );

        self.supervisors.push(ConnectionSupervisor::new(
            id,
            self_user_id,
            source,
            self.consumer.clone(),
            &self.options,
            self.shared.clone(),
        ));

        Ok(())
    }

    /// Status receivers, one per account.
    pub fn statuses(&self) -> Vec<watch::Receiver<ConnectionStatus>> {
        self.supervisors.iter().map(|s| s.status()).collect()
    }

    /// Shared health counters.
    pub fn health(&self) -> health::HealthTracker {
        self.shared.health.clone()
    }

    /// Run every account until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> GatewaySummary {
        let reporter = tokio::spawn(
            self.shared
                .health
                .clone()
                .run_reporter(self.options.health_summary_interval(), cancel.clone()),
        );

        let handles: Vec<_> = self
            .supervisors
            .into_iter()
            .map(|s| {
                let account = s.account().to_string();
                (account, tokio::spawn(s.run(cancel.child_token())))
            })
            .collect();

        log::info!("Gateway running {} accounts", handles.len());

        let mut summary = GatewaySummary::default();

        for (account, handle) in handles {
            match handle.await {
                Ok(s) => summary.accounts.push(s),
                Err(err) => log::error!("[{}] Supervisor task failed: {}", account, err),
            }
        }

        if let Err(err) = reporter.await {
            log::error!("Health reporter task failed: {}", err);
        }

        self.shared.health.log_summary();
        log::info!(
            "Gateway stopped, {} reconnects in total",
            summary.total_reconnects()
        );

        summary
    }
}

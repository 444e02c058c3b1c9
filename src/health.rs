//! Per-account delivery counters and periodic summaries.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct AccountHealth {
    up_since: Option<Instant>,
    connects: u64,
    reconnects: u64,
    delivered: u64,
    delivery_failures: u64,
    polls: u64,
    poll_failures: u64,
    last_poll_at: Option<Instant>,
}

/// Point-in-time copy of one account's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// time since the current push session opened, `None` when not connected
    pub uptime: Option<Duration>,
    /// push sessions opened
    pub connects: u64,
    /// reconnect attempts
    pub reconnects: u64,
    /// events handed to the consumer successfully
    pub delivered: u64,
    /// events the consumer failed on
    pub delivery_failures: u64,
    /// finished poll cycles
    pub polls: u64,
    /// poll cycles whose fetch failed
    pub poll_failures: u64,
    /// time since the last poll cycle finished
    pub since_last_poll: Option<Duration>,
}

/// Health counters keyed by account.
///
/// Cheap to clone, every clone shares the counters. Recording never fails and never affects
/// the caller.
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    accounts: Arc<Mutex<HashMap<String, AccountHealth>>>,
}

impl HealthTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AccountHealth>> {
        // counters stay usable even if a holder panicked
        self.accounts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update<F: FnOnce(&mut AccountHealth)>(&self, account: &str, f: F) {
        let mut accounts = self.lock();
        f(accounts.entry(account.to_string()).or_default());
    }

    /// a push session opened
    pub fn record_connected(&self, account: &str) {
        self.update(account, |h| {
            h.connects += 1;
            h.up_since = Some(Instant::now());
        });
    }

    /// the push session ended
    pub fn record_disconnected(&self, account: &str) {
        self.update(account, |h| h.up_since = None);
    }

    /// the supervisor is about to retry
    pub fn record_reconnect(&self, account: &str) {
        self.update(account, |h| h.reconnects += 1);
    }

    /// one event reached the consumer
    pub fn record_delivered(&self, account: &str) {
        self.update(account, |h| h.delivered += 1);
    }

    /// the consumer failed on one event
    pub fn record_delivery_failure(&self, account: &str) {
        self.update(account, |h| h.delivery_failures += 1);
    }

    /// a poll cycle finished, `ok` is false when the fetch failed
    pub fn record_poll(&self, account: &str, ok: bool) {
        self.update(account, |h| {
            h.polls += 1;
            if !ok {
                h.poll_failures += 1;
            }
            h.last_poll_at = Some(Instant::now());
        });
    }

    /// Counters of one account, `None` if nothing was recorded for it.
    pub fn snapshot(&self, account: &str) -> Option<HealthSnapshot> {
        let now = Instant::now();
        self.lock().get(account).map(|h| HealthSnapshot {
            uptime: h.up_since.map(|t| now.saturating_duration_since(t)),
            connects: h.connects,
            reconnects: h.reconnects,
            delivered: h.delivered,
            delivery_failures: h.delivery_failures,
            polls: h.polls,
            poll_failures: h.poll_failures,
            since_last_poll: h.last_poll_at.map(|t| now.saturating_duration_since(t)),
        })
    }

    /// Log one summary line per account.
    pub fn log_summary(&self) {
        let mut accounts: Vec<String> = self.lock().keys().cloned().collect();
        accounts.sort();

        for account in accounts {
            if let Some(s) = self.snapshot(&account) {
                log::info!(
                    "[{}] Health: uptime {:?}, connects {}, reconnects {}, delivered {} ({} failed), polls {} ({} failed), last poll {:?} ago",
                    account,
                    s.uptime,
                    s.connects,
                    s.reconnects,
                    s.delivered,
                    s.delivery_failures,
                    s.polls,
                    s.poll_failures,
                    s.since_last_poll,
                );
            }
        }
    }

    /// Log a summary every `interval` until `cancel` fires.
    pub async fn run_reporter(self, interval: Duration, cancel: CancellationToken) {
        if interval.is_zero() {
            log::debug!("Health reporter disabled");
            return;
        }

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("Health reporter stop");
                    break;
                }
                _ = ticker.tick() => self.log_summary(),
            }
        }
    }
}

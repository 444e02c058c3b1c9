//! Per-account connection status.

use std::time::SystemTime;

use tokio::sync::watch;

/// Delivery path currently in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// websocket hints trigger polls
    Push,
    /// fixed interval polling
    Pull,
}

/// Snapshot of an account's connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// account id
    pub account_id: String,
    /// active delivery path
    pub transport_mode: TransportMode,
    /// a push session is open
    pub running: bool,
    /// last time a session opened
    pub last_start_at: Option<SystemTime>,
    /// last time a session ended
    pub last_stop_at: Option<SystemTime>,
    /// last abnormal ending, cleared when a session opens
    pub last_error: Option<String>,
}

/// Mutable connection record, owned by the account's supervisor.
///
/// Others observe it through [`AccountConnection::subscribe`].
#[derive(Debug)]
pub struct AccountConnection {
    tx: watch::Sender<ConnectionStatus>,
}

impl AccountConnection {
    /// New record in pull mode, not running.
    pub fn new(account_id: &str) -> Self {
        let (tx, _) = watch::channel(ConnectionStatus {
            account_id: account_id.to_string(),
            transport_mode: TransportMode::Pull,
            running: false,
            last_start_at: None,
            last_stop_at: None,
            last_error: None,
        });
        Self { tx }
    }

    /// current status
    pub fn status(&self) -> ConnectionStatus {
        self.tx.borrow().clone()
    }

    /// Receiver that sees every later change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    pub(crate) fn set_mode(&self, mode: TransportMode) {
        self.tx.send_if_modified(|s| {
            let changed = s.transport_mode != mode;
            s.transport_mode = mode;
            changed
        });
    }

    pub(crate) fn mark_running(&self) {
        self.tx.send_modify(|s| {
            s.running = true;
            s.last_start_at = Some(SystemTime::now());
            s.last_error = None;
        });
    }

    pub(crate) fn mark_stopped(&self, error: Option<String>) {
        self.tx.send_modify(|s| {
            s.running = false;
            s.last_stop_at = Some(SystemTime::now());
            if error.is_some() {
                s.last_error = error;
            }
        });
    }

    pub(crate) fn record_error(&self, error: String) {
        self.tx.send_modify(|s| s.last_error = Some(error));
    }
}

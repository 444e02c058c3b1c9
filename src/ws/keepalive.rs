use std::time::Duration;

use tokio::time::Instant;

/// Ping schedule and acknowledgement deadline of one session.
#[derive(Debug)]
pub(crate) struct Keepalive {
    interval: Duration,
    timeout: Duration,
    next_ping: Instant,
    deadline: Option<Instant>,
}

impl Keepalive {
    /// First ping one interval after `now`.
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            next_ping: now + interval,
            deadline: None,
        }
    }

    pub fn next_ping(&self) -> Instant {
        self.next_ping
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A ping went out: schedule the next one, arm the deadline unless already armed.
    pub fn sent(&mut self, now: Instant) {
        self.next_ping = now + self.interval;
        if self.deadline.is_none() {
            self.deadline = Some(now + self.timeout);
            log::trace!("Pong deadline armed: {:?}", self.deadline);
        }
    }

    /// An acknowledgement arrived.
    pub fn acked(&mut self) {
        if self.deadline.take().is_some() {
            log::trace!("Pong deadline cleared");
        }
    }
}

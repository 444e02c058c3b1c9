//! Scripted source and recording consumer for unit tests.

use std::{
    borrow::Cow,
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    api::types::{ConnectionCredential, EventPage, RemoteEvent},
    consumer::{Consumer, DeliveryError},
    event::DeliveredEvent,
    source::{EventSource, SourceError},
};

pub const SELF_ID: &str = "me";

pub fn remote(id: &str, author: &str, cursor: Option<&str>) -> RemoteEvent {
    RemoteEvent {
        id: id.to_string(),
        author_id: author.to_string(),
        content: format!("content of {}", id),
        cursor: cursor.map(str::to_string),
        ..Default::default()
    }
}

pub fn page(items: Vec<RemoteEvent>, next: Option<&str>) -> EventPage {
    EventPage {
        items,
        next_cursor: next.map(str::to_string),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Credential,
    List(Option<String>),
}

#[derive(Debug, Default)]
pub struct FakeSource {
    pages: Mutex<VecDeque<Result<EventPage, String>>>,
    credentials: Mutex<VecDeque<Result<ConnectionCredential, String>>>,
    calls: Mutex<Vec<Call>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_page(&self, page: EventPage) {
        self.pages.lock().unwrap().push_back(Ok(page));
    }

    pub fn push_fetch_error(&self, message: &str) {
        self.pages.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn push_credential(&self, endpoint: &str) {
        self.credentials
            .lock()
            .unwrap()
            .push_back(Ok(ConnectionCredential {
                ticket: "ticket".to_string(),
                endpoint: endpoint.to_string(),
                expires_at: 0,
            }));
    }

    pub fn push_credential_error(&self, message: &str) {
        self.credentials
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    /// The next fetch blocks until the returned sender fires or is dropped.
    pub fn hold_next_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gate.lock().unwrap().replace(rx);
        tx
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EventSource for FakeSource {
    async fn request_credential(&self) -> Result<ConnectionCredential, SourceError> {
        self.calls.lock().unwrap().push(Call::Credential);
        match self.credentials.lock().unwrap().pop_front() {
            Some(Ok(c)) => Ok(c),
            Some(Err(e)) => Err(e.into()),
            None => Err("no credential scripted".into()),
        }
    }

    async fn list_events(&self, cursor: Option<&str>) -> Result<EventPage, SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::List(cursor.map(str::to_string)));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let result = self
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(EventPage::default()));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        result.map_err(Into::into)
    }
}

#[derive(Debug, Default)]
pub struct RecordingConsumer {
    delivered: Mutex<Vec<Arc<DeliveredEvent>>>,
    fail_ids: HashSet<String>,
    connected: AtomicUsize,
    cancel_after: Mutex<Option<(String, CancellationToken)>>,
}

impl RecordingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fail_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    /// Fire `token` once `id` has been delivered.
    pub fn cancel_after(&self, id: &str, token: CancellationToken) {
        self.cancel_after
            .lock()
            .unwrap()
            .replace((id.to_string(), token));
    }

    pub fn delivered_ids(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Consumer for RecordingConsumer {
    fn name(&self) -> Cow<'static, str> {
        "Recording".into()
    }

    async fn deliver(&self, event: Arc<DeliveredEvent>) -> Result<(), DeliveryError> {
        if self.fail_ids.contains(&event.id) {
            return Err(format!("refuse {}", event.id).into());
        }
        let id = event.id.clone();
        self.delivered.lock().unwrap().push(event);

        if let Some((target, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if *target == id {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn on_connected(&self, _account_id: &str) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }
}

#![allow(dead_code)]

use std::{
    borrow::Cow,
    collections::VecDeque,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use tidings::{
    api::types::{ConnectionCredential, EventPage, RemoteEvent},
    Consumer, DeliveredEvent, DeliveryError, EventSource, SourceError,
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_tungstenite::WebSocketStream;

pub const SELF_ID: &str = "me";

pub fn remote(id: &str, author: &str, cursor: &str) -> RemoteEvent {
    RemoteEvent {
        id: id.to_string(),
        author_id: author.to_string(),
        content: format!("content of {}", id),
        cursor: Some(cursor.to_string()),
        ..Default::default()
    }
}

#[derive(Debug, Default)]
pub struct ScriptedSource {
    pages: Mutex<VecDeque<EventPage>>,
    endpoints: Mutex<VecDeque<String>>,
    lists: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_page(&self, items: Vec<RemoteEvent>, next: &str) {
        self.pages.lock().unwrap().push_back(EventPage {
            items,
            next_cursor: Some(next.to_string()),
        });
    }

    pub fn push_endpoint(&self, endpoint: &str) {
        self.endpoints
            .lock()
            .unwrap()
            .push_back(endpoint.to_string());
    }

    pub fn list_cursors(&self) -> Vec<Option<String>> {
        self.lists.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventSource for ScriptedSource {
    async fn request_credential(&self) -> Result<ConnectionCredential, SourceError> {
        match self.endpoints.lock().unwrap().pop_front() {
            Some(endpoint) => Ok(ConnectionCredential {
                ticket: "t".to_string(),
                endpoint,
                expires_at: 0,
            }),
            None => Err("no more tickets".into()),
        }
    }

    async fn list_events(&self, cursor: Option<&str>) -> Result<EventPage, SourceError> {
        self.lists.lock().unwrap().push(cursor.map(str::to_string));
        Ok(self.pages.lock().unwrap().pop_front().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    ids: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Consumer for Recorder {
    fn name(&self) -> Cow<'static, str> {
        "Recorder".into()
    }

    async fn deliver(&self, event: Arc<DeliveredEvent>) -> Result<(), DeliveryError> {
        self.ids.lock().unwrap().push(event.id.clone());
        Ok(())
    }
}

/// Accept one websocket on a random local port and hand it to `behavior`.
pub async fn serve_once<F, Fut>(behavior: F) -> (String, JoinHandle<Fut::Output>)
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        behavior(ws).await
    });

    (format!("ws://{}/realtime", addr), handle)
}

pub async fn wait_for<F: Fn() -> bool>(f: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

mod common;

use std::{borrow::Cow, sync::Arc, time::Duration};

use common::*;
use futures_util::{SinkExt, StreamExt};
use tidings::{
    health::HealthTracker,
    poll::{AccountPoller, PollExecutor, PollSerializer},
    status::AccountConnection,
    ws::{CloseKind, ConnectError, Endpoint, PushTransport, SessionEnd, SessionReport},
    Cursor, CursorStore,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;

const CHANGE: &str = r#"{"type":"change"}"#;

struct Harness {
    _dir: tempfile::TempDir,
    source: Arc<ScriptedSource>,
    consumer: Arc<Recorder>,
    poller: AccountPoller,
    conn: Arc<AccountConnection>,
    cancel: CancellationToken,
}

impl Harness {
    fn new(cursor: Cursor) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new();
        let consumer = Recorder::new();
        let health = HealthTracker::new();

        let executor = PollExecutor::new(
            "acc",
            SELF_ID,
            source.clone(),
            consumer.clone(),
            CursorStore::new(dir.path()),
            health.clone(),
        );
        let cancel = CancellationToken::new();
        let poller = AccountPoller::new(
            executor,
            PollSerializer::new(),
            health,
            cursor,
            cancel.clone(),
        );

        Self {
            _dir: dir,
            source,
            consumer,
            poller,
            conn: Arc::new(AccountConnection::new("acc")),
            cancel,
        }
    }

    fn session(
        &self,
        transport: PushTransport,
        endpoint: &str,
    ) -> tokio::task::JoinHandle<SessionReport> {
        let endpoint: Endpoint = endpoint.parse().unwrap();
        let poller = self.poller.clone();
        let conn = self.conn.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            transport
                .run_session(&endpoint, "ticket", &poller, &conn, &cancel)
                .await
        })
    }
}

fn transport(ping_ms: u64, pong_ms: u64) -> PushTransport {
    PushTransport::new(
        Duration::from_secs(2),
        Duration::from_millis(ping_ms),
        Duration::from_millis(pong_ms),
        HealthTracker::new(),
    )
}

/// Read until the client closes, return its close code.
async fn close_code(ws: &mut WebSocketStream<TcpStream>) -> Option<u16> {
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code));
        }
    }
    None
}

fn close_frame(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    }))
}

#[tokio::test]
async fn test_change_hint_triggers_poll_and_cancel_closes_normally() {
    let h = Harness::new(Cursor::Token("c0".to_string()));
    h.source.push_page(vec![remote("e1", "u1", "c1")], "c1");
    h.source.push_page(vec![remote("e2", "u2", "c2")], "c2");

    let (url, server) = serve_once(|mut ws| async move {
        ws.send(Message::Text(CHANGE.to_string())).await.unwrap();
        close_code(&mut ws).await
    })
    .await;

    let session = h.session(transport(10_000, 10_000), &url);

    let poller = h.poller.clone();
    wait_for(move || poller.cursor() == Cursor::Token("c2".to_string())).await;
    assert!(h.conn.status().running);

    h.cancel.cancel();
    let report = session.await.unwrap();

    assert!(report.opened);
    assert!(matches!(report.end, SessionEnd::Aborted));
    assert_eq!(report.cursor, Cursor::Token("c2".to_string()));
    assert_eq!(h.consumer.ids(), vec!["e1", "e2"]);
    assert_eq!(
        h.source.list_cursors(),
        vec![Some("c0".to_string()), Some("c1".to_string())]
    );

    assert_eq!(server.await.unwrap(), Some(1000));

    let status = h.conn.status();
    assert!(!status.running);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_compressed_binary_hint() {
    let h = Harness::new(Cursor::Token("c0".to_string()));
    // catch up finds nothing, the hint finds e1
    h.source.push_page(vec![], "c0");
    h.source.push_page(vec![remote("e1", "u1", "c1")], "c1");

    let (url, server) = serve_once(|mut ws| async move {
        let data = miniz_oxide::deflate::compress_to_vec_zlib(CHANGE.as_bytes(), 6);
        ws.send(Message::Binary(data)).await.unwrap();
        close_code(&mut ws).await
    })
    .await;

    let session = h.session(transport(10_000, 10_000), &format!("{}?compress=1", url));

    let consumer = h.consumer.clone();
    wait_for(move || consumer.ids() == vec!["e1"]).await;

    h.cancel.cancel();
    assert!(matches!(session.await.unwrap().end, SessionEnd::Aborted));
    assert_eq!(server.await.unwrap(), Some(1000));
}

#[tokio::test]
async fn test_missing_keepalive_ack_times_out() {
    let h = Harness::new(Cursor::Seeded);

    // reads everything, acknowledges nothing
    let (url, server) = serve_once(|mut ws| async move { close_code(&mut ws).await }).await;

    let report = h.session(transport(50, 100), &url).await.unwrap();

    assert!(report.opened);
    assert!(matches!(report.end, SessionEnd::PingTimeout));
    assert_eq!(server.await.unwrap(), Some(1001));

    let status = h.conn.status();
    assert!(!status.running);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn test_acknowledged_keepalive_keeps_session_open() {
    let h = Harness::new(Cursor::Seeded);

    let (url, server) = serve_once(|mut ws| async move {
        let mut acks = 0;
        let stop = tokio::time::sleep(Duration::from_millis(400));
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) if text.contains("keepalive") => {
                        acks += 1;
                        let ack = Message::Text(r#"{"type":"keepalive-ack"}"#.to_string());
                        ws.send(ack).await.unwrap();
                    }
                    Some(Ok(_)) => {}
                    _ => return acks,
                }
            }
        }

        let _ = ws.send(close_frame(CloseCode::Normal, "bye")).await;
        acks
    })
    .await;

    let report = h.session(transport(50, 100), &url).await.unwrap();

    assert!(server.await.unwrap() >= 3);
    match report.end {
        SessionEnd::Closed { code, reason, kind } => {
            assert_eq!(code, 1000);
            assert_eq!(reason, "bye");
            assert_eq!(kind, CloseKind::Expected);
        }
        other => panic!("unexpected end {:?}", other),
    }
    assert!(h.conn.status().last_error.is_none());
}

#[tokio::test]
async fn test_abnormal_close_is_recorded() {
    let h = Harness::new(Cursor::Seeded);

    let (url, _server) = serve_once(|mut ws| async move {
        ws.send(close_frame(CloseCode::Error, "internal")).await.unwrap();
        close_code(&mut ws).await
    })
    .await;

    let report = h.session(transport(10_000, 10_000), &url).await.unwrap();

    assert!(matches!(
        report.end,
        SessionEnd::Closed {
            code: 1011,
            kind: CloseKind::Abnormal,
            ..
        }
    ));

    let status = h.conn.status();
    assert!(!status.running);
    assert!(status.last_error.unwrap().contains("1011"));
}

#[tokio::test]
async fn test_connect_timeout() {
    let h = Harness::new(Cursor::Seeded);

    // accept tcp but never answer the upgrade
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _holder = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let transport = PushTransport::new(
        Duration::from_millis(200),
        Duration::from_secs(10),
        Duration::from_secs(10),
        HealthTracker::new(),
    );

    let report = h
        .session(transport, &format!("ws://{}/realtime", addr))
        .await
        .unwrap();

    assert!(!report.opened);
    assert!(matches!(
        report.end,
        SessionEnd::ConnectFailed(ConnectError::Timeout { .. })
    ));
    assert!(h.conn.status().last_error.is_some());
    assert!(h.consumer.ids().is_empty());
}

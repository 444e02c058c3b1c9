use std::{borrow::Cow, time::Duration};

use bytes::Bytes;
use futures_util::{future, FutureExt, Sink, SinkExt, StreamExt};
use snafu::prelude::*;
use tokio::time::Instant;
use tokio_tungstenite as websocket;
use tokio_util::sync::CancellationToken;
use websocket::tungstenite::{
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message as Frame,
};

use super::{
    keepalive::Keepalive,
    message::{self, Hint},
    state::{CloseKind, SessionState, Transition},
    Endpoint,
};
use crate::{
    config::GatewayOptions,
    cursor::Cursor,
    health::HealthTracker,
    poll::{AccountPoller, PollReason},
    status::AccountConnection,
};

pub(crate) type WebsocketClient =
    websocket::WebSocketStream<websocket::MaybeTlsStream<tokio::net::TcpStream>>;

const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Error when open a push session
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ConnectError {
    /// handshake did not finish in time
    #[snafu(display("connect {host} timed out after {timeout:?}"))]
    Timeout {
        /// endpoint host
        host: String,
        /// connect timeout
        timeout: Duration,
    },

    /// websocket handshake failed
    #[snafu(display("connect {host} failed: {source}"))]
    Handshake {
        /// endpoint host
        host: String,
        /// source error
        source: websocket::tungstenite::Error,
    },
}

/// Why a push session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// the socket never opened
    ConnectFailed(ConnectError),
    /// shutdown requested, closed with a normal closure code
    Aborted,
    /// peer closed the socket, or the stream ended
    Closed {
        /// close code, 1005 when the peer sent none, 1006 when the stream just ended
        code: u16,
        /// close reason
        reason: String,
        /// code classification
        kind: CloseKind,
    },
    /// no keepalive acknowledgement in time, closed by us
    PingTimeout,
    /// reading or writing the socket failed
    StreamError(websocket::tungstenite::Error),
}

impl SessionEnd {
    /// Description for the account status, `None` for expected endings.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Aborted => None,
            Self::Closed {
                kind: CloseKind::Expected,
                ..
            } => None,
            Self::Closed { code, reason, .. } => {
                Some(format!("closed with code {}: {}", code, reason))
            }
            Self::ConnectFailed(err) => Some(err.to_string()),
            Self::PingTimeout => Some("keepalive acknowledgement timed out".to_string()),
            Self::StreamError(err) => Some(format!("websocket stream broken: {}", err)),
        }
    }
}

/// Outcome of [`PushTransport::run_session`]
#[derive(Debug)]
pub struct SessionReport {
    /// latest cursor when the session ended
    pub cursor: Cursor,
    /// the socket opened at some point
    pub opened: bool,
    /// how it ended
    pub end: SessionEnd,
    /// final state machine state
    pub state: SessionState,
}

/// Runs push sessions: one websocket, hints in, keepalive out.
#[derive(Debug, Clone)]
pub struct PushTransport {
    connect_timeout: Duration,
    ping_interval: Duration,
    pong_timeout: Duration,
    health: HealthTracker,
}

impl PushTransport {
    /// Create a transport with explicit timings.
    pub fn new(
        connect_timeout: Duration,
        ping_interval: Duration,
        pong_timeout: Duration,
        health: HealthTracker,
    ) -> Self {
        Self {
            connect_timeout,
            ping_interval,
            pong_timeout,
            health,
        }
    }

    /// Create a transport with the timings from options.
    pub fn from_options(options: &GatewayOptions, health: HealthTracker) -> Self {
        Self::new(
            options.connect_timeout(),
            options.ping_interval(),
            options.pong_timeout(),
            health,
        )
    }

    async fn connect(&self, endpoint: &Endpoint, ticket: &str) -> Result<WebsocketClient, ConnectError> {
        let host = endpoint.host().to_string();
        let url = endpoint.url(ticket);

        log::debug!("Connecting push endpoint {}", host);

        match tokio::time::timeout(self.connect_timeout, websocket::connect_async(url.as_str())).await {
            Err(_) => error::Timeout {
                host,
                timeout: self.connect_timeout,
            }
            .fail(),
            Ok(result) => result
                .map(|(ws, _)| ws)
                .context(error::Handshake { host }),
        }
    }

    /// Run one session to its end.
    ///
    /// Polls are only requested through `poller`, never run here. The returned cursor is the
    /// poller's latest known value.
    pub async fn run_session(
        &self,
        endpoint: &Endpoint,
        ticket: &str,
        poller: &AccountPoller,
        conn: &AccountConnection,
        cancel: &CancellationToken,
    ) -> SessionReport {
        let account = poller.account();
        let state = SessionState::Connecting;

        let ws = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                log::debug!("[{}] Abort while connecting", account);
                return SessionReport {
                    cursor: poller.cursor(),
                    opened: false,
                    end: SessionEnd::Aborted,
                    state: state.on(Transition::Abort),
                };
            }

            result = self.connect(endpoint, ticket) => match result {
                Ok(ws) => ws,
                Err(err) => {
                    log::warn!("[{}] {}", account, err);
                    let end = SessionEnd::ConnectFailed(err);
                    conn.record_error(end.error_message().unwrap_or_default());
                    return SessionReport {
                        cursor: poller.cursor(),
                        opened: false,
                        end,
                        state: state.on(Transition::Error),
                    };
                }
            }
        };

        let state = state.on(Transition::Opened);

        log::info!("[{}] Push session open on {}", account, endpoint.host());

        conn.mark_running();
        self.health.record_connected(account);

        // catch up on whatever happened while disconnected
        drop(poller.request(PollReason::CatchUp));

        let (end, state) = self
            .drive(ws, endpoint.compress, poller, cancel, state)
            .await;

        match &end {
            SessionEnd::Aborted => log::info!("[{}] Push session closed by shutdown", account),
            SessionEnd::Closed {
                kind: CloseKind::Expected,
                code,
                reason,
            } => log::info!("[{}] Push session closed by peer ({} {})", account, code, reason),
            other => log::warn!(
                "[{}] Push session ended: {}",
                account,
                other.error_message().unwrap_or_default()
            ),
        }

        conn.mark_stopped(end.error_message());
        self.health.record_disconnected(account);

        SessionReport {
            cursor: poller.cursor(),
            opened: true,
            end,
            state,
        }
    }

    async fn drive(
        &self,
        mut ws: WebsocketClient,
        compress: bool,
        poller: &AccountPoller,
        cancel: &CancellationToken,
        mut state: SessionState,
    ) -> (SessionEnd, SessionState) {
        let account = poller.account();
        let mut keepalive = Keepalive::new(self.ping_interval, self.pong_timeout, Instant::now());

        loop {
            let pong_timeout = match keepalive.deadline() {
                Some(deadline) => tokio::time::sleep_until(deadline).boxed(),
                None => future::pending().boxed(),
            };

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    state = state.on(Transition::Abort);
                    close_quietly(&mut ws, CloseCode::Normal, "shutdown").await;
                    return (SessionEnd::Aborted, state.on(Transition::Close));
                }

                _ = pong_timeout => {
                    log::warn!("[{}] Keepalive not acknowledged in {:?}, closing", account, self.pong_timeout);
                    state = state.on(Transition::PingTimeout);
                    close_quietly(&mut ws, CloseCode::Away, "keepalive timeout").await;
                    return (SessionEnd::PingTimeout, state.on(Transition::Close));
                }

                _ = tokio::time::sleep_until(keepalive.next_ping()) => {
                    log::trace!("[{}] Send keepalive", account);
                    match send_within(&mut ws, message::keepalive(), self.pong_timeout).await {
                        Ok(()) => keepalive.sent(Instant::now()),
                        Err(SendFailure::Failed(err)) => {
                            return (SessionEnd::StreamError(err), state.on(Transition::Error));
                        }
                        Err(SendFailure::Stalled) => {
                            log::warn!("[{}] Keepalive send stalled for {:?}, closing", account, self.pong_timeout);
                            state = state.on(Transition::PingTimeout);
                            close_quietly(&mut ws, CloseCode::Away, "keepalive timeout").await;
                            return (SessionEnd::PingTimeout, state.on(Transition::Close));
                        }
                    }
                }

                frame = ws.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(err)) => {
                            return (SessionEnd::StreamError(err), state.on(Transition::Error));
                        }
                        None => {
                            return (
                                SessionEnd::Closed {
                                    code: CloseCode::Abnormal.into(),
                                    reason: "stream ended without close frame".to_string(),
                                    kind: CloseKind::Abnormal,
                                },
                                state.on(Transition::Close),
                            );
                        }
                    };

                    // text frames are plain json, binary ones are compressed when asked for
                    let (data, compressed): (Bytes, bool) = match frame {
                        Frame::Text(text) => (text.into_bytes().into(), false),
                        Frame::Binary(data) => (data.into(), compress),
                        Frame::Pong(_) => {
                            keepalive.acked();
                            state = state.on(Transition::PongReceived);
                            continue;
                        }
                        Frame::Close(close) => {
                            let (code, reason) = match close {
                                Some(f) => (u16::from(f.code), f.reason.into_owned()),
                                None => (CloseCode::Status.into(), String::new()),
                            };
                            return (
                                SessionEnd::Closed {
                                    code,
                                    reason,
                                    kind: CloseKind::classify(code),
                                },
                                state.on(Transition::Close),
                            );
                        }
                        _ => continue,
                    };

                    match Hint::decode(data, compressed) {
                        Ok(Hint::Change) => {
                            log::debug!("[{}] Change hint received", account);
                            state = state.on(Transition::HintReceived);
                            drop(poller.request(PollReason::Hint));
                        }
                        Ok(Hint::KeepaliveAck) => {
                            keepalive.acked();
                            state = state.on(Transition::PongReceived);
                        }
                        Err(err) if err.is_unknown_type() => {
                            log::debug!("[{}] Ignore frame: {}", account, err);
                        }
                        Err(err) => {
                            log::warn!("[{}] Malformed frame ignored: {}", account, err);
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
enum SendFailure {
    Stalled,
    Failed(websocket::tungstenite::Error),
}

/// Send one frame, giving up if the sink is not ready within `limit`.
async fn send_within<S>(sink: &mut S, frame: Frame, limit: Duration) -> Result<(), SendFailure>
where
    S: Sink<Frame, Error = websocket::tungstenite::Error> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(SendFailure::Failed(err)),
        Err(_) => Err(SendFailure::Stalled),
    }
}

async fn close_quietly(ws: &mut WebsocketClient, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    };

    match tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, ws.close(Some(frame))).await {
        Ok(Ok(())) => log::trace!("Close frame sent"),
        Ok(Err(err)) => log::debug!("Send close frame failed: {}", err),
        Err(_) => log::debug!("Send close frame timed out"),
    }
}

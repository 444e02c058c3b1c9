//! Push session state machine.

use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// opening the websocket
    Connecting,
    /// receiving hints
    Open,
    /// we started closing the socket
    Closing,
    /// socket is gone
    Closed,
}

/// Things that move a session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// websocket handshake finished
    Opened,
    /// a change hint arrived
    HintReceived,
    /// a keepalive acknowledgement arrived
    PongReceived,
    /// no acknowledgement before the deadline
    PingTimeout,
    /// peer closed, or the stream ended
    Close,
    /// socket error
    Error,
    /// shutdown requested
    Abort,
}

impl SessionState {
    /// Next state after `t`. Transitions that make no sense in a state leave it unchanged.
    pub fn on(self, t: Transition) -> Self {
        use SessionState::*;
        use Transition::*;

        let next = match (self, t) {
            (Connecting, Opened) => Open,
            (Open, HintReceived | PongReceived) => Open,
            (Open, PingTimeout | Abort) => Closing,
            (Connecting, Abort) => Closed,
            (_, Close | Error) => Closed,
            (s, _) => s,
        };

        if next != self {
            log::debug!("Session {:?} --{:?}--> {:?}", self, t, next);
        }

        next
    }
}

/// How the peer (or the stream) ended a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// 1000 normal closure or 1001 going away
    Expected,
    /// protocol errors, abnormal closure, server errors
    Abnormal,
    /// anything else, including application codes
    Other,
}

impl CloseKind {
    /// Classify a close code.
    pub fn classify(code: u16) -> Self {
        match CloseCode::from(code) {
            CloseCode::Normal | CloseCode::Away => Self::Expected,
            CloseCode::Protocol
            | CloseCode::Unsupported
            | CloseCode::Abnormal
            | CloseCode::Invalid
            | CloseCode::Policy
            | CloseCode::Size
            | CloseCode::Extension
            | CloseCode::Error
            | CloseCode::Tls => Self::Abnormal,
            _ => Self::Other,
        }
    }
}

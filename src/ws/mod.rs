//! Push transport: a websocket carrying change hints

mod endpoint;
mod keepalive;
pub mod message;
mod state;
mod transport;

pub use endpoint::{Endpoint, ParseEndpointError};
pub use message::{Hint, ParseHintError};
pub use state::{CloseKind, SessionState, Transition};
pub use transport::{ConnectError, PushTransport, SessionEnd, SessionReport};

//! The remote event source, as seen by the gateway.

use std::fmt::Debug;

use crate::api::types::{ConnectionCredential, EventPage};

/// Error produced by an [`EventSource`] implementation
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Narrow RPC contract of the remote side.
///
/// [`crate::api::Client`] is the http implementation.
#[async_trait::async_trait]
pub trait EventSource: Debug + Send + Sync {
    /// Get a single-use ticket and the endpoint to open one push session with.
    async fn request_credential(&self) -> Result<ConnectionCredential, SourceError>;

    /// List events after `cursor`, or from the start of the stream when it's `None`.
    async fn list_events(&self, cursor: Option<&str>) -> Result<EventPage, SourceError>;
}

//! Event consumers.

use std::{borrow::Cow, future::Future, sync::Arc};

use crate::event::DeliveredEvent;

/// Error returned by a consumer for one event
pub type DeliveryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Downstream side of the gateway.
///
/// `deliver` is called once per non self-authored event, in stream order, never concurrently
/// for the same account. Delivery is at-least-once: after a crash the same event id may come
/// again.
#[async_trait::async_trait]
pub trait Consumer: Send + Sync {
    /// consumer name
    fn name(&self) -> Cow<'static, str>;

    /// process one event
    async fn deliver(&self, event: Arc<DeliveredEvent>) -> Result<(), DeliveryError>;

    /// called once when an account finishes its first synchronization
    async fn on_connected(&self, _account_id: &str) {}
}

impl std::fmt::Debug for dyn Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Consumer({})", self.name())
    }
}

#[async_trait::async_trait]
impl<F, Fut> Consumer for F
where
    F: Fn(Arc<DeliveredEvent>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), DeliveryError>> + Send,
{
    fn name(&self) -> Cow<'static, str> {
        "Anonymous Fn Consumer".into()
    }

    async fn deliver(&self, event: Arc<DeliveredEvent>) -> Result<(), DeliveryError> {
        self(event).await
    }
}

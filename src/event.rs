//! Events handed to the consumer.

use serde::{Deserialize, Serialize};

use crate::api::types::{RemoteAttachment, RemoteEvent};

/// Who wrote an event, relative to the subscribing account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    /// the subscriber itself, an echo of its own output
    Subscriber,
    /// anyone else
    External,
}

/// File attached to an event, not downloaded by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// remote location
    pub url: String,
    /// file name
    pub name: String,
    /// declared content type
    pub content_type: Option<String>,
    /// declared size in bytes
    pub size: Option<u64>,
}

impl From<RemoteAttachment> for Attachment {
    fn from(a: RemoteAttachment) -> Self {
        Self {
            url: a.url,
            name: a.name,
            content_type: a.content_type,
            size: a.size,
        }
    }
}

/// One unit of remote data for the consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredEvent {
    /// owning account id
    pub account_id: String,
    /// unique event id, use it to drop duplicates after a crash
    pub id: String,
    /// raw author id on the remote side
    pub author_id: String,
    /// author classification
    pub author: Author,
    /// message content
    pub payload: String,
    /// thread or conversation key
    pub thread: Option<String>,
    /// creation time, milliseconds since unix epoch
    pub created_at: i64,
    /// attachments
    pub attachments: Vec<Attachment>,
}

impl DeliveredEvent {
    /// Build from the wire type, classifying the author against `self_user_id`.
    pub fn from_remote(account_id: &str, self_user_id: &str, remote: RemoteEvent) -> Self {
        let author = if remote.author_id == self_user_id {
            Author::Subscriber
        } else {
            Author::External
        };

        Self {
            account_id: account_id.to_string(),
            id: remote.id,
            author_id: remote.author_id,
            author,
            payload: remote.content,
            thread: remote.thread_id,
            created_at: remote.created_at,
            attachments: remote.attachments.into_iter().map(Into::into).collect(),
        }
    }

    /// true for echoes of the subscriber's own output
    pub fn is_self_echo(&self) -> bool {
        self.author == Author::Subscriber
    }
}

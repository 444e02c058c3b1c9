//! Remote source HTTP API types

use serde::{Deserialize, Serialize};

/// Response is common response structure with a code and message, and a data field.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Response<T> {
    /// zero is success
    pub code: i64,
    /// error message
    #[serde(default)]
    pub message: String,
    /// result data, differ type for each api, usually null on error
    #[serde(default)]
    pub data: Option<T>,
}

/// data type for api /realtime/ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCredential {
    /// single-use ticket
    pub ticket: String,
    /// websocket endpoint url
    pub endpoint: String,
    /// ticket expire time, milliseconds since unix epoch
    #[serde(default)]
    pub expires_at: i64,
}

/// data type for api /events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPage {
    /// events in stream order
    #[serde(default)]
    pub items: Vec<RemoteEvent>,
    /// position after the last item, null when the stream has nothing
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Event as returned by the source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    /// event id
    pub id: String,
    /// author user id
    pub author_id: String,
    /// text content
    #[serde(default)]
    pub content: String,
    /// thread or conversation id
    #[serde(default)]
    pub thread_id: Option<String>,
    /// create time, milliseconds since unix epoch
    #[serde(default)]
    pub created_at: i64,
    /// attached files
    #[serde(default)]
    pub attachments: Vec<RemoteAttachment>,
    /// stream position right after this event, when the source provides one
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Attachment as returned by the source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAttachment {
    /// download url
    pub url: String,
    /// file name
    #[serde(default)]
    pub name: String,
    /// declared mime type
    #[serde(default)]
    pub content_type: Option<String>,
    /// declared size in bytes
    #[serde(default)]
    pub size: Option<u64>,
}

/// request body for api /messages
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    /// thread to reply in, or a new conversation when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<&'a str>,
    /// text content
    pub content: &'a str,
}

/// data type for api /messages
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageData {
    /// id of the created event
    pub id: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_page_decode_minimal() {
        let resp: Response<EventPage> = serde_json::from_value(json!({
            "code": 0,
            "data": {
                "items": [
                    { "id": "e1", "author_id": "u2" },
                    {
                        "id": "e2",
                        "author_id": "u3",
                        "content": "hi",
                        "thread_id": "t",
                        "created_at": 1700000000000i64,
                        "attachments": [{ "url": "https://cdn/x.png", "name": "x.png", "size": 12 }],
                        "cursor": "c2"
                    }
                ],
                "next_cursor": "c2"
            }
        }))
        .unwrap();

        assert_eq!(resp.code, 0);
        let page = resp.data.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].content, "");
        assert_eq!(page.items[1].attachments[0].size, Some(12));
        assert_eq!(page.next_cursor.as_deref(), Some("c2"));
    }

    #[test]
    fn test_error_response_without_data() {
        let resp: Response<ConnectionCredential> = serde_json::from_value(json!({
            "code": 40100,
            "message": "unauthorized",
            "data": null
        }))
        .unwrap();

        assert_eq!(resp.code, 40100);
        assert_eq!(resp.message, "unauthorized");
        assert!(resp.data.is_none());
    }

    #[test]
    fn test_empty_page_decode() {
        let page: EventPage = serde_json::from_value(json!({ "next_cursor": null })).unwrap();

        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }
}

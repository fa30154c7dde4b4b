/// Message types for the live notification stream (SSE)
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CategoryInfo, EventNotification, IngestedPost, PostNotification};

/// Opaque identifier of one streaming connection
pub type ClientId = Uuid;

/// Payloads pushed to streaming clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    /// First message of every stream
    Connected { client_id: ClientId },

    /// Keepalive filler
    Ping,

    /// A new post cleared ingestion
    NewPost(PostNotification),

    /// An event was created or updated
    Event(EventNotification),

    /// Ingested post with full metadata for UI rendering
    IngestedPost(Box<IngestedPostView>),

    /// Arbitrary named event, used for direct client messages
    Custom {
        event: String,
        data: serde_json::Value,
    },
}

impl StreamMessage {
    pub fn connected(client_id: ClientId) -> Self {
        StreamMessage::Connected { client_id }
    }

    pub fn custom(event: impl Into<String>, data: serde_json::Value) -> Self {
        StreamMessage::Custom {
            event: event.into(),
            data,
        }
    }

    /// SSE `event:` field
    pub fn kind(&self) -> &str {
        match self {
            StreamMessage::Connected { .. } => "connected",
            StreamMessage::Ping => "ping",
            StreamMessage::NewPost(_) => "new_post",
            StreamMessage::Event(_) => "event",
            StreamMessage::IngestedPost(_) => "ingested_post",
            StreamMessage::Custom { event, .. } => event.as_str(),
        }
    }
}

/// Enriched ingested-post payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedPostView {
    #[serde(flatten)]
    pub post: IngestedPost,
    /// Markup-free headline derived from the content
    pub title: String,
    /// Markup-free content
    pub text: String,
    pub categories: Vec<CategoryInfo>,
}

/// One delivered item: the message plus the time it was handed to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamFrame {
    #[serde(flatten)]
    pub message: StreamMessage,
    pub timestamp: DateTime<Utc>,
}

impl StreamFrame {
    /// Stamp a message at delivery time
    pub fn now(message: StreamMessage) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Encode as one server-sent event
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("event: {}\ndata: {}\n\n", self.message.kind(), self.to_json()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_frame_carries_client_id() {
        let id = Uuid::new_v4();
        let frame = StreamFrame::now(StreamMessage::connected(id));
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "connected");
        assert_eq!(json["data"]["client_id"], id.to_string());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_sse_encoding() {
        let frame = StreamFrame::now(StreamMessage::Ping);
        let sse = frame.to_sse().unwrap();

        assert!(sse.starts_with("event: ping\ndata: {"));
        assert!(sse.ends_with("\n\n"));
    }

    #[test]
    fn test_custom_event_name() {
        let msg = StreamMessage::custom("trend_update", serde_json::json!({"topic": "rust"}));
        assert_eq!(msg.kind(), "trend_update");
    }
}

use serde::{Deserialize, Serialize};

/// Per-notification payload handed to the gateway.
///
/// `title`, `body` and `badge` become the visible alert; `post_id`,
/// `categories` and `relevance` travel as custom data so the app can deep-link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub post_id: String,
    pub title: String,
    pub body: String,
    pub badge: u32,
    #[serde(default)]
    pub categories: Vec<String>,
    pub relevance: f64,
}

impl PushPayload {
    /// Custom data block attached next to the `aps` dictionary
    pub fn custom_data(&self) -> serde_json::Value {
        serde_json::json!({
            "postId": self.post_id,
            "categories": self.categories,
            "relevance": self.relevance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_names() {
        let payload = PushPayload {
            post_id: "p-1".to_string(),
            title: "Title".to_string(),
            body: "Body".to_string(),
            badge: 1,
            categories: vec!["politics".to_string()],
            relevance: 8.5,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["postId"], "p-1");
        assert_eq!(json["badge"], 1);
        assert_eq!(json["categories"][0], "politics");

        let custom = payload.custom_data();
        assert_eq!(custom["postId"], "p-1");
        assert_eq!(custom["relevance"], 8.5);
        assert!(custom.get("title").is_none());
    }
}

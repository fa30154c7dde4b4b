use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Threshold assigned to devices registered without explicit preferences
pub const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.5;

/// Quiet-hours window ("HH:MM" local time). Stored with the device, not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: String,
    pub end: String,
}

/// One installed app instance, keyed by its push token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub token: String,

    /// Minimum content relevance (0.0-10.0) this device wants pushed
    pub relevance_threshold: f64,

    /// Subscribed categories; empty means every category
    pub categories: Vec<String>,

    pub is_active: bool,

    pub quiet_hours: Option<QuietHours>,

    pub registered_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Device {
    /// Device with default preferences, as created by auto-registration
    pub fn with_defaults(token: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
            categories: Vec::new(),
            is_active: true,
            quiet_hours: None,
            registered_at: now,
            last_updated: now,
        }
    }

    /// Apply a partial settings update, bumping `last_updated`
    pub fn apply(&mut self, update: &UpdateDeviceRequest, now: DateTime<Utc>) {
        if let Some(threshold) = update.relevance_threshold {
            self.relevance_threshold = threshold;
        }
        if let Some(categories) = &update.categories {
            self.categories = normalize_categories(categories);
        }
        if let Some(quiet_hours) = &update.quiet_hours {
            self.quiet_hours = Some(quiet_hours.clone());
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        self.last_updated = now;
    }
}

/// Trim, drop empties, de-duplicate while keeping first-seen order
pub fn normalize_categories(categories: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(categories.len());
    for category in categories {
        let trimmed = category.trim();
        if !trimmed.is_empty() && !out.iter().any(|c| c == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}

fn validate_token_format(token: &str) -> Result<(), ValidationError> {
    push_gateway::validate_device_token(token).map_err(|_| {
        let mut err = ValidationError::new("device_token");
        err.message = Some("device token must be 64 hexadecimal characters".into());
        err
    })
}

/// POST /devices
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    #[validate(custom(function = "validate_token_format"))]
    pub device_token: String,

    #[validate(range(min = 0.0, max = 10.0))]
    pub relevance_threshold: Option<f64>,

    #[serde(default)]
    pub categories: Vec<String>,

    pub quiet_hours: Option<QuietHours>,
}

impl RegisterDeviceRequest {
    /// Fresh device built from the registration body
    pub fn into_device(self, now: DateTime<Utc>) -> Device {
        Device {
            token: self.device_token,
            relevance_threshold: self
                .relevance_threshold
                .unwrap_or(DEFAULT_RELEVANCE_THRESHOLD),
            categories: normalize_categories(&self.categories),
            is_active: true,
            quiet_hours: self.quiet_hours,
            registered_at: now,
            last_updated: now,
        }
    }
}

/// PUT /devices/{token}
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceRequest {
    #[validate(range(min = 0.0, max = 10.0))]
    pub relevance_threshold: Option<f64>,
    pub categories: Option<Vec<String>>,
    pub quiet_hours: Option<QuietHours>,
    pub is_active: Option<bool>,
}

/// POST /devices/{token}/read
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    #[validate(length(min = 1))]
    pub post_id: String,
}

/// POST /analytics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEventRequest {
    #[validate(custom(function = "validate_token_format"))]
    pub device_token: String,

    #[validate(length(min = 1, max = 64))]
    pub event_type: String,

    pub post_id: Option<String>,

    pub metadata: Option<serde_json::Value>,
}

impl AnalyticsEventRequest {
    pub fn kind(&self) -> AnalyticsEventKind {
        AnalyticsEventKind::from_event_type(&self.event_type)
    }
}

/// Closed set of analytics event kinds used as metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsEventKind {
    AppOpen,
    PostOpened,
    PostShared,
    NotificationReceived,
    NotificationOpened,
    Other,
}

impl AnalyticsEventKind {
    /// Unrecognised event types collapse into `Other`
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type.trim().to_ascii_lowercase().as_str() {
            "app_open" => Self::AppOpen,
            "post_opened" => Self::PostOpened,
            "post_shared" => Self::PostShared,
            "notification_received" => Self::NotificationReceived,
            "notification_opened" => Self::NotificationOpened,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppOpen => "app_open",
            Self::PostOpened => "post_opened",
            Self::PostShared => "post_shared",
            Self::NotificationReceived => "notification_received",
            Self::NotificationOpened => "notification_opened",
            Self::Other => "other",
        }
    }
}

/// A post eligible for live broadcast and relevance-gated push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostNotification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub relevance: f64,
    #[serde(default)]
    pub categories: Vec<String>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Created,
    Updated,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Created => "created",
            EventStatus::Updated => "updated",
        }
    }
}

/// A clustered event (created or updated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNotification {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub status: EventStatus,
}

/// A post as produced by ingestion, content still carrying markup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedPost {
    pub id: String,
    pub content: String,
    pub author: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub relevance: f64,
    pub published_at: DateTime<Utc>,
}

/// Category metadata resolved for an ingested post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInfo {
    pub slug: String,
    pub name: String,
}

/// POST /notifications/test
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TestNotificationRequest {
    #[validate(custom(function = "validate_token_format"))]
    pub device_token: String,
}

/// POST /internal/notify/event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyEventRequest {
    pub event: EventNotification,
    pub average_relevance: Option<f64>,
}

/// POST /internal/notify/ingested
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyIngestedRequest {
    pub post: IngestedPost,
    #[serde(default)]
    pub categories: Vec<CategoryInfo>,
}

/// POST /internal/notify/bulk
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkNotifyRequest {
    #[validate(length(min = 1, max = 500))]
    pub posts: Vec<PostNotification>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analytics_event_kind_is_closed() {
        assert_eq!(
            AnalyticsEventKind::from_event_type("post_opened"),
            AnalyticsEventKind::PostOpened
        );
        assert_eq!(AnalyticsEventKind::from_event_type("APP_OPEN").as_str(), "app_open");
        assert_eq!(
            AnalyticsEventKind::from_event_type("x-random-1234").as_str(),
            "other"
        );
    }

    const TOKEN: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";

    #[test]
    fn test_defaults_on_auto_registration() {
        let device = Device::with_defaults(TOKEN, Utc::now());
        assert_eq!(device.relevance_threshold, 0.5);
        assert!(device.categories.is_empty());
        assert!(device.is_active);
        assert!(device.quiet_hours.is_none());
    }

    #[test]
    fn test_register_request_validation() {
        let ok = RegisterDeviceRequest {
            device_token: TOKEN.to_string(),
            relevance_threshold: Some(7.5),
            categories: vec![],
            quiet_hours: None,
        };
        assert!(ok.validate().is_ok());

        let bad_token = RegisterDeviceRequest {
            device_token: "not-a-token".to_string(),
            ..ok.clone()
        };
        assert!(bad_token.validate().is_err());

        let bad_threshold = RegisterDeviceRequest {
            relevance_threshold: Some(11.0),
            ..ok
        };
        assert!(bad_threshold.validate().is_err());
    }

    #[test]
    fn test_register_request_wire_format() {
        let request: RegisterDeviceRequest = serde_json::from_value(serde_json::json!({
            "deviceToken": TOKEN,
            "categories": ["sports", " sports ", "", "politics"],
        }))
        .unwrap();

        let device = request.into_device(Utc::now());
        assert_eq!(device.relevance_threshold, DEFAULT_RELEVANCE_THRESHOLD);
        assert_eq!(device.categories, vec!["sports", "politics"]);
    }

    #[test]
    fn test_partial_update_keeps_untouched_fields() {
        let registered = Utc::now();
        let mut device = Device::with_defaults(TOKEN, registered);
        device.categories = vec!["tech".to_string()];

        let update = UpdateDeviceRequest {
            relevance_threshold: Some(6.0),
            ..Default::default()
        };
        let later = registered + chrono::Duration::minutes(5);
        device.apply(&update, later);

        assert_eq!(device.relevance_threshold, 6.0);
        assert_eq!(device.categories, vec!["tech"]);
        assert_eq!(device.registered_at, registered);
        assert_eq!(device.last_updated, later);
    }

    #[test]
    fn test_event_status_serialization() {
        for status in [EventStatus::Created, EventStatus::Updated] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }
}

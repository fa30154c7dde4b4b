/// Dispatch Orchestrator
///
/// Entry point for upstream producers. Every notification goes out on two
/// channels, always in this order:
/// 1. Live broadcast to every connected stream client
/// 2. Relevance-gated push to eligible devices, in batches
///
/// Failures in the push path are logged with the elapsed time and returned as
/// `AppError::Orchestration`; the broadcast has already happened by then.
use std::sync::Arc;
use std::time::{Duration, Instant};

use push_gateway::{mask_token, validate_device_token, DynPushGateway, PushPayload};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::content;
use super::directory::DeviceDirectory;
use super::dispatcher::{BatchDispatcher, DispatchReport};
use super::eligibility::EligibilityResolver;
use crate::error::{AppError, Result};
use crate::models::{CategoryInfo, EventNotification, IngestedPost, PostNotification};
use crate::stream::{ConnectionRegistry, IngestedPostView, StreamMessage};

/// Posts below this relevance are broadcast only
pub const DEFAULT_PUSH_RELEVANCE_FLOOR: f64 = 8.0;

/// Pause between items of a bulk send
pub const DEFAULT_BULK_PAUSE: Duration = Duration::from_millis(100);

const PUSH_BADGE: u32 = 1;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub push_relevance_floor: f64,
    pub bulk_pause: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            push_relevance_floor: DEFAULT_PUSH_RELEVANCE_FLOOR,
            bulk_pause: DEFAULT_BULK_PAUSE,
        }
    }
}

/// What happened on the push channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PushOutcome {
    Dispatched(DispatchReport),
    BelowRelevanceFloor,
    MissingRelevance,
    NoEligibleDevices,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyOutcome {
    /// Stream subscriptions the broadcast was handed to
    pub broadcast_to: usize,
    pub push: PushOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Ids of posts whose dispatch failed
    pub failed: Vec<String>,
}

pub struct DispatchOrchestrator {
    registry: ConnectionRegistry,
    resolver: EligibilityResolver,
    dispatcher: BatchDispatcher,
    directory: Arc<dyn DeviceDirectory>,
    gateway: DynPushGateway,
    settings: DispatchSettings,
}

impl DispatchOrchestrator {
    pub fn new(
        registry: ConnectionRegistry,
        resolver: EligibilityResolver,
        dispatcher: BatchDispatcher,
        directory: Arc<dyn DeviceDirectory>,
        gateway: DynPushGateway,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            resolver,
            dispatcher,
            directory,
            gateway,
            settings,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Broadcast a post, then push it when relevance clears the floor
    pub async fn notify_post(&self, post: &PostNotification) -> Result<NotifyOutcome> {
        let started = Instant::now();
        let broadcast_to = self.registry.broadcast(StreamMessage::NewPost(post.clone()));

        let payload = PushPayload {
            post_id: post.id.clone(),
            title: post.title.clone(),
            body: content::push_body(&post.body),
            badge: PUSH_BADGE,
            categories: post.categories.clone(),
            relevance: post.relevance,
        };

        let push = self
            .push_post(payload)
            .await
            .map_err(|e| orchestration_error("notify_post", started, e))?;

        info!(
            post_id = %post.id,
            relevance = post.relevance,
            broadcast_to,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Post notification dispatched"
        );
        Ok(NotifyOutcome { broadcast_to, push })
    }

    /// Broadcast an event, then push to devices within its average relevance
    pub async fn notify_event(
        &self,
        event: &EventNotification,
        average_relevance: Option<f64>,
    ) -> Result<NotifyOutcome> {
        let started = Instant::now();
        let broadcast_to = self.registry.broadcast(StreamMessage::Event(event.clone()));

        let Some(average) = average_relevance else {
            warn!(
                event_id = %event.id,
                status = event.status.as_str(),
                "Event has no average relevance; skipping push"
            );
            return Ok(NotifyOutcome {
                broadcast_to,
                push: PushOutcome::MissingRelevance,
            });
        };

        let devices = self
            .resolver
            .for_event(Some(average))
            .await
            .map_err(|e| orchestration_error("notify_event", started, e))?;

        let push = if devices.is_empty() {
            PushOutcome::NoEligibleDevices
        } else {
            let payload = PushPayload {
                post_id: event.id.clone(),
                title: event.title.clone(),
                body: content::push_body(&event.summary),
                badge: PUSH_BADGE,
                categories: Vec::new(),
                relevance: average,
            };
            let report = self
                .dispatcher
                .dispatch(&devices, |_| Ok(payload.clone()))
                .await;
            self.deactivate_invalid(&report).await;
            PushOutcome::Dispatched(report)
        };

        info!(
            event_id = %event.id,
            status = event.status.as_str(),
            average,
            broadcast_to,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Event notification dispatched"
        );
        Ok(NotifyOutcome { broadcast_to, push })
    }

    /// Broadcast an ingested post with rendered metadata, then push it like a post
    pub async fn notify_ingested_post(
        &self,
        post: &IngestedPost,
        categories: &[CategoryInfo],
    ) -> Result<NotifyOutcome> {
        let started = Instant::now();
        let text = content::strip_markup(&post.content);
        let title = content::push_title(&text);
        let slugs: Vec<String> = categories.iter().map(|c| c.slug.clone()).collect();

        let view = IngestedPostView {
            post: post.clone(),
            title: title.clone(),
            text: text.clone(),
            categories: categories.to_vec(),
        };
        let broadcast_to = self
            .registry
            .broadcast(StreamMessage::IngestedPost(Box::new(view)));

        let payload = PushPayload {
            post_id: post.id.clone(),
            title,
            body: content::push_body(&text),
            badge: PUSH_BADGE,
            categories: slugs,
            relevance: post.relevance,
        };

        let push = self
            .push_post(payload)
            .await
            .map_err(|e| orchestration_error("notify_ingested_post", started, e))?;

        info!(
            post_id = %post.id,
            relevance = post.relevance,
            broadcast_to,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingested post notification dispatched"
        );
        Ok(NotifyOutcome { broadcast_to, push })
    }

    /// Fixed payload to one token, bypassing eligibility
    pub async fn send_test_notification(&self, device_token: &str) -> Result<()> {
        validate_device_token(device_token)?;

        let payload = PushPayload {
            post_id: "test".to_string(),
            title: "Test notification".to_string(),
            body: "Push notifications are working.".to_string(),
            badge: PUSH_BADGE,
            categories: Vec::new(),
            relevance: 10.0,
        };

        let masked = mask_token(device_token);
        self.gateway
            .send(device_token, &payload)
            .await
            .map_err(|e| {
                warn!(token = %masked, error = %e, "Test notification failed");
                AppError::Delivery {
                    token: masked.clone(),
                    reason: e.to_string(),
                }
            })?;

        info!(token = %masked, "Test notification sent");
        Ok(())
    }

    /// `notify_post` for each post in order, pausing between items.
    /// A failing item is logged and does not stop the rest.
    pub async fn send_bulk(&self, posts: &[PostNotification]) -> BulkSummary {
        let mut summary = BulkSummary {
            total: posts.len(),
            ..Default::default()
        };

        for (index, post) in posts.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.bulk_pause).await;
            }

            match self.notify_post(post).await {
                Ok(_) => summary.succeeded += 1,
                Err(e) => {
                    error!(post_id = %post.id, index, error = %e, "Bulk item failed; continuing");
                    summary.failed.push(post.id.clone());
                }
            }
        }

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            "Bulk send complete"
        );
        summary
    }

    async fn push_post(&self, payload: PushPayload) -> Result<PushOutcome> {
        if payload.relevance < self.settings.push_relevance_floor {
            debug!(
                post_id = %payload.post_id,
                relevance = payload.relevance,
                floor = self.settings.push_relevance_floor,
                "Below push relevance floor; broadcast only"
            );
            return Ok(PushOutcome::BelowRelevanceFloor);
        }

        let devices = self
            .resolver
            .for_post(payload.relevance, &payload.categories, &payload.post_id)
            .await?;
        if devices.is_empty() {
            return Ok(PushOutcome::NoEligibleDevices);
        }

        let report = self
            .dispatcher
            .dispatch(&devices, |_| Ok(payload.clone()))
            .await;
        self.deactivate_invalid(&report).await;
        Ok(PushOutcome::Dispatched(report))
    }

    async fn deactivate_invalid(&self, report: &DispatchReport) {
        for token in &report.invalid_tokens {
            match self.directory.deactivate(token).await {
                Ok(()) => info!(token = %mask_token(token), "Deactivated invalid device token"),
                Err(e) => warn!(
                    token = %mask_token(token),
                    error = %e,
                    "Failed to deactivate invalid device token"
                ),
            }
        }
    }
}

fn orchestration_error(stage: &'static str, started: Instant, err: AppError) -> AppError {
    let elapsed_ms = started.elapsed().as_millis();
    error!(stage, elapsed_ms = elapsed_ms as u64, error = %err, "Notification dispatch failed");
    AppError::Orchestration {
        stage,
        elapsed_ms,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Device, EventStatus};
    use crate::services::directory::InMemoryDirectory;
    use chrono::Utc;
    use futures::StreamExt;
    use push_gateway::testing::RecordingGateway;

    fn token(n: u8) -> String {
        format!("{:02x}", n).repeat(32)
    }

    fn device(n: u8, threshold: f64, categories: &[&str]) -> Device {
        let mut d = Device::with_defaults(token(n), Utc::now());
        d.relevance_threshold = threshold;
        d.categories = categories.iter().map(|c| c.to_string()).collect();
        d
    }

    fn post(id: &str, relevance: f64, categories: &[&str]) -> PostNotification {
        PostNotification {
            id: id.to_string(),
            title: format!("Post {}", id),
            body: "Body".to_string(),
            relevance,
            categories: categories.iter().map(|c| c.to_string()).collect(),
            published_at: Utc::now(),
        }
    }

    fn orchestrator(
        dir: &Arc<InMemoryDirectory>,
        gateway: &Arc<RecordingGateway>,
    ) -> DispatchOrchestrator {
        DispatchOrchestrator::new(
            ConnectionRegistry::new(),
            EligibilityResolver::new(dir.clone(), dir.clone()),
            BatchDispatcher::new(gateway.clone()),
            dir.clone(),
            gateway.clone(),
            DispatchSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_post_is_broadcast_and_pushed() {
        let dir = Arc::new(InMemoryDirectory::new());
        dir.insert(device(1, 8.0, &["politics"]));
        dir.insert(device(2, 9.0, &[]));
        let gateway = Arc::new(RecordingGateway::new());
        let orch = orchestrator(&dir, &gateway);
        let mut session = orch.registry().connect().unwrap();

        let outcome = orch.notify_post(&post("p1", 8.5, &["politics"])).await.unwrap();

        assert_eq!(outcome.broadcast_to, 1);
        assert!(matches!(outcome.push, PushOutcome::Dispatched(ref r) if r.delivered == 1));
        assert_eq!(gateway.sent_tokens(), vec![token(1)]);

        session.next().await.unwrap(); // connected
        let frame = session.next().await.unwrap();
        assert_eq!(frame.message.kind(), "new_post");
    }

    #[tokio::test]
    async fn test_low_relevance_post_is_broadcast_only() {
        let dir = Arc::new(InMemoryDirectory::new());
        dir.insert(device(1, 0.0, &[]));
        let gateway = Arc::new(RecordingGateway::new());
        let orch = orchestrator(&dir, &gateway);

        let outcome = orch.notify_post(&post("p1", 7.9, &[])).await.unwrap();

        assert_eq!(outcome.push, PushOutcome::BelowRelevanceFloor);
        assert!(gateway.attempted_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_event_without_average_skips_push() {
        let dir = Arc::new(InMemoryDirectory::new());
        dir.insert(device(1, 0.0, &[]));
        let gateway = Arc::new(RecordingGateway::new());
        let orch = orchestrator(&dir, &gateway);
        let event = EventNotification {
            id: "evt-1".to_string(),
            title: "Summit".to_string(),
            summary: "Leaders meet".to_string(),
            status: EventStatus::Updated,
        };

        let outcome = orch.notify_event(&event, None).await.unwrap();
        assert_eq!(outcome.push, PushOutcome::MissingRelevance);
        assert!(gateway.attempted_tokens().is_empty());

        let outcome = orch.notify_event(&event, Some(6.0)).await.unwrap();
        assert!(matches!(outcome.push, PushOutcome::Dispatched(_)));
        assert_eq!(gateway.sent()[0].1.post_id, "evt-1");
    }

    #[tokio::test]
    async fn test_ingested_post_title_is_derived_from_content() {
        let dir = Arc::new(InMemoryDirectory::new());
        dir.insert(device(1, 1.0, &["tech"]));
        let gateway = Arc::new(RecordingGateway::new());
        let orch = orchestrator(&dir, &gateway);
        let ingested = IngestedPost {
            id: "ing-1".to_string(),
            content: "<p>Chipmaker unveils new <b>fab</b>. Shares jump</p><p>More detail</p>"
                .to_string(),
            author: Some("wire".to_string()),
            source: None,
            url: None,
            relevance: 9.2,
            published_at: Utc::now(),
        };
        let categories = vec![CategoryInfo {
            slug: "tech".to_string(),
            name: "Technology".to_string(),
        }];

        orch.notify_ingested_post(&ingested, &categories)
            .await
            .unwrap();

        let (sent_to, payload) = gateway.sent().remove(0);
        assert_eq!(sent_to, token(1));
        assert_eq!(payload.title, "Chipmaker unveils new fab. Shares jump");
        assert_eq!(payload.categories, vec!["tech"]);
    }

    #[tokio::test]
    async fn test_invalid_tokens_are_deactivated() {
        let dir = Arc::new(InMemoryDirectory::new());
        dir.insert(device(1, 1.0, &[]));
        dir.insert(device(2, 1.0, &[]));
        let gateway = Arc::new(RecordingGateway::new().unregistered(token(2)));
        let orch = orchestrator(&dir, &gateway);

        orch.notify_post(&post("p1", 9.0, &[])).await.unwrap();

        assert!(dir.get_device(&token(1)).await.unwrap().unwrap().is_active);
        assert!(!dir.get_device(&token(2)).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_test_notification_validates_token() {
        let dir = Arc::new(InMemoryDirectory::new());
        let gateway = Arc::new(RecordingGateway::new().failing_for(token(3)));
        let orch = orchestrator(&dir, &gateway);

        let err = orch.send_test_notification("xyz").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        orch.send_test_notification(&token(1)).await.unwrap();
        assert_eq!(gateway.sent()[0].1.post_id, "test");

        let err = orch.send_test_notification(&token(3)).await.unwrap_err();
        assert!(matches!(err, AppError::Delivery { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_pauses_between_items() {
        let dir = Arc::new(InMemoryDirectory::new());
        let gateway = Arc::new(RecordingGateway::new());
        let orch = orchestrator(&dir, &gateway);
        let posts = vec![post("a", 1.0, &[]), post("b", 1.0, &[]), post("c", 1.0, &[])];

        let started = tokio::time::Instant::now();
        let summary = orch.send_bulk(&posts).await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 3);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}

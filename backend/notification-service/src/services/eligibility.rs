/// Eligibility Resolver
///
/// Computes which devices should receive a push for a post or an event.
/// Read-only: never writes to the directory or the receipt store.
use std::sync::Arc;

use tracing::debug;

use super::directory::{DeviceDirectory, EligibilityCriteria, ReadReceiptStore};
use crate::error::Result;
use crate::models::Device;

#[derive(Clone)]
pub struct EligibilityResolver {
    directory: Arc<dyn DeviceDirectory>,
    receipts: Arc<dyn ReadReceiptStore>,
}

impl EligibilityResolver {
    pub fn new(directory: Arc<dyn DeviceDirectory>, receipts: Arc<dyn ReadReceiptStore>) -> Self {
        Self {
            directory,
            receipts,
        }
    }

    /// Active devices wanting a post of this relevance and category that
    /// have not already read it
    pub async fn for_post(
        &self,
        relevance: f64,
        categories: &[String],
        post_id: &str,
    ) -> Result<Vec<Device>> {
        let candidates = self
            .directory
            .find_eligible_devices(&EligibilityCriteria::for_post(relevance, categories))
            .await?;

        if candidates.is_empty() {
            debug!(post_id, relevance, "No candidate devices for post");
            return Ok(candidates);
        }

        let readers = self.receipts.readers_of(post_id).await?;
        let before = candidates.len();
        let eligible: Vec<Device> = candidates
            .into_iter()
            .filter(|device| !readers.contains(&device.token))
            .collect();

        debug!(
            post_id,
            relevance,
            candidates = before,
            already_read = before - eligible.len(),
            eligible = eligible.len(),
            "Resolved post eligibility"
        );
        Ok(eligible)
    }

    /// Active devices whose threshold is within the event's average relevance.
    /// No average means nobody is eligible.
    pub async fn for_event(&self, average_relevance: Option<f64>) -> Result<Vec<Device>> {
        let Some(average) = average_relevance else {
            return Ok(Vec::new());
        };

        let eligible = self
            .directory
            .find_eligible_devices(&EligibilityCriteria::for_event(average))
            .await?;
        debug!(average, eligible = eligible.len(), "Resolved event eligibility");
        Ok(eligible)
    }
}

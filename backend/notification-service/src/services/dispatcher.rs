/// Batch Dispatcher
///
/// Sends one push per device through the gateway, in fixed-size batches.
///
/// Features:
/// - Batches processed strictly in order, devices within a batch sequentially
/// - Per-device failures are logged with a masked token and counted, never retried
/// - An error while preparing a batch abandons that batch only
/// - Tokens the gateway reports as invalid are collected for deactivation
use push_gateway::{mask_token, DynPushGateway, PushPayload};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::metrics;
use crate::models::Device;

/// Devices per batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// One failed delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    /// Masked device token
    pub token: String,
    pub reason: String,
}

/// Outcome of one dispatch run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub batches: usize,
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
    /// Batches abandoned before every device was attempted
    pub aborted_batches: usize,
    /// Devices never attempted because their batch was abandoned
    pub skipped: usize,
    /// Full tokens the gateway rejected as invalid
    #[serde(skip)]
    pub invalid_tokens: Vec<String>,
}

impl DispatchReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

pub struct BatchDispatcher {
    gateway: DynPushGateway,
    batch_size: usize,
}

impl BatchDispatcher {
    pub fn new(gateway: DynPushGateway) -> Self {
        Self::with_batch_size(gateway, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(gateway: DynPushGateway, batch_size: usize) -> Self {
        Self {
            gateway,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Push to every device, building each payload with `build_payload`
    ///
    /// Never fails as a whole; everything that went wrong is in the report.
    pub async fn dispatch<F>(&self, devices: &[Device], build_payload: F) -> DispatchReport
    where
        F: Fn(&Device) -> Result<PushPayload> + Send + Sync,
    {
        let mut report = DispatchReport::default();

        for (index, batch) in devices.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            metrics::record_push_batch();

            let attempted_before = report.attempted;
            if let Err(e) = self.send_batch(batch, &build_payload, &mut report).await {
                let attempted = report.attempted - attempted_before;
                report.aborted_batches += 1;
                report.skipped += batch.len() - attempted;
                error!(
                    batch = index,
                    size = batch.len(),
                    attempted,
                    error = %e,
                    "Push batch failed; continuing with next batch"
                );
            }
        }

        info!(
            devices = devices.len(),
            batches = report.batches,
            delivered = report.delivered,
            failed = report.failed(),
            skipped = report.skipped,
            "Push dispatch complete"
        );
        report
    }

    async fn send_batch<F>(
        &self,
        batch: &[Device],
        build_payload: &F,
        report: &mut DispatchReport,
    ) -> Result<()>
    where
        F: Fn(&Device) -> Result<PushPayload> + Send + Sync,
    {
        for device in batch {
            let payload = build_payload(device)?;
            report.attempted += 1;

            match self.gateway.send(&device.token, &payload).await {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::record_push_delivery(true);
                }
                Err(e) => {
                    let masked = mask_token(&device.token);
                    warn!(token = %masked, post_id = %payload.post_id, error = %e, "Push delivery failed");
                    metrics::record_push_delivery(false);

                    if e.is_invalid_token() {
                        report.invalid_tokens.push(device.token.clone());
                    }
                    report.failures.push(DeliveryFailure {
                        token: masked,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

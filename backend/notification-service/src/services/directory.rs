/// Device Directory and Read-Receipt Store
///
/// The dispatch core only reads devices and issues upsert / insert-if-absent
/// requests; storage lives behind these traits. `InMemoryDirectory` backs
/// tests and offline runs, `PgDirectory` backs production.
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::{Device, UpdateDeviceRequest};

/// Device-side predicate shared by every directory implementation
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityCriteria {
    /// Content relevance; devices with `threshold <= relevance` qualify
    pub relevance: f64,
    /// `Some` enables category matching (empty device categories match anything)
    pub categories: Option<Vec<String>>,
    pub active_only: bool,
}

impl EligibilityCriteria {
    pub fn for_post(relevance: f64, categories: &[String]) -> Self {
        Self {
            relevance,
            categories: Some(categories.to_vec()),
            active_only: true,
        }
    }

    pub fn for_event(average_relevance: f64) -> Self {
        Self {
            relevance: average_relevance,
            categories: None,
            active_only: true,
        }
    }

    pub fn matches(&self, device: &Device) -> bool {
        if self.active_only && !device.is_active {
            return false;
        }
        if device.relevance_threshold > self.relevance {
            return false;
        }
        match &self.categories {
            None => true,
            Some(wanted) => {
                device.categories.is_empty()
                    || device.categories.iter().any(|c| wanted.contains(c))
            }
        }
    }
}

#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Devices matching `criteria`, oldest registration first
    async fn find_eligible_devices(&self, criteria: &EligibilityCriteria) -> Result<Vec<Device>>;

    async fn get_device(&self, token: &str) -> Result<Option<Device>>;

    /// Insert or replace preferences; re-registration keeps `registered_at`
    /// and reactivates the device.
    async fn upsert_device(&self, device: Device) -> Result<Device>;

    /// Partial settings update; `NotFound` for unknown tokens
    async fn update_device(&self, token: &str, update: &UpdateDeviceRequest) -> Result<Device>;

    /// Register `token` with default preferences if unknown. True when created.
    async fn ensure_registered(&self, token: &str) -> Result<bool>;

    /// Soft-deactivate one device
    async fn deactivate(&self, token: &str) -> Result<()>;

    /// Soft-deactivate active devices not updated since `cutoff`
    async fn deactivate_stale(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait ReadReceiptStore: Send + Sync {
    async fn has_read(&self, device_token: &str, post_id: &str) -> Result<bool>;

    /// Insert-if-absent. True when a new receipt was written.
    async fn mark_read(&self, device_token: &str, post_id: &str) -> Result<bool>;

    /// Tokens of every device holding a receipt for `post_id`
    async fn readers_of(&self, post_id: &str) -> Result<HashSet<String>>;

    /// Delete receipts read before `cutoff`
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// DashMap-backed directory and receipt store
#[derive(Default)]
pub struct InMemoryDirectory {
    devices: DashMap<String, Device>,
    receipts: DashMap<(String, String), DateTime<Utc>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a device as-is (tests, fixtures)
    pub fn insert(&self, device: Device) {
        self.devices.insert(device.token.clone(), device);
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn receipt_count(&self) -> usize {
        self.receipts.len()
    }

    /// Write a receipt with an explicit timestamp
    pub fn insert_receipt(&self, device_token: &str, post_id: &str, read_at: DateTime<Utc>) {
        self.receipts
            .insert((device_token.to_string(), post_id.to_string()), read_at);
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDirectory {
    async fn find_eligible_devices(&self, criteria: &EligibilityCriteria) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|entry| criteria.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        devices.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.token.cmp(&b.token))
        });
        Ok(devices)
    }

    async fn get_device(&self, token: &str) -> Result<Option<Device>> {
        Ok(self.devices.get(token).map(|d| d.value().clone()))
    }

    async fn upsert_device(&self, mut device: Device) -> Result<Device> {
        let mut entry = self
            .devices
            .entry(device.token.clone())
            .or_insert_with(|| device.clone());
        device.registered_at = entry.registered_at;
        device.is_active = true;
        *entry = device.clone();
        debug!(token = %push_gateway::mask_token(&device.token), "Device upserted");
        Ok(device)
    }

    async fn update_device(&self, token: &str, update: &UpdateDeviceRequest) -> Result<Device> {
        let mut entry = self
            .devices
            .get_mut(token)
            .ok_or_else(|| AppError::NotFound(format!("device {}", push_gateway::mask_token(token))))?;
        entry.apply(update, Utc::now());
        Ok(entry.clone())
    }

    async fn ensure_registered(&self, token: &str) -> Result<bool> {
        let mut created = false;
        self.devices.entry(token.to_string()).or_insert_with(|| {
            created = true;
            Device::with_defaults(token, Utc::now())
        });
        if created {
            info!(token = %push_gateway::mask_token(token), "Auto-registered device");
        }
        Ok(created)
    }

    async fn deactivate(&self, token: &str) -> Result<()> {
        if let Some(mut device) = self.devices.get_mut(token) {
            device.is_active = false;
        }
        Ok(())
    }

    async fn deactivate_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut count = 0;
        for mut entry in self.devices.iter_mut() {
            if entry.is_active && entry.last_updated < cutoff {
                entry.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl ReadReceiptStore for InMemoryDirectory {
    async fn has_read(&self, device_token: &str, post_id: &str) -> Result<bool> {
        Ok(self
            .receipts
            .contains_key(&(device_token.to_string(), post_id.to_string())))
    }

    async fn mark_read(&self, device_token: &str, post_id: &str) -> Result<bool> {
        let mut inserted = false;
        self.receipts
            .entry((device_token.to_string(), post_id.to_string()))
            .or_insert_with(|| {
                inserted = true;
                Utc::now()
            });
        Ok(inserted)
    }

    async fn readers_of(&self, post_id: &str) -> Result<HashSet<String>> {
        Ok(self
            .receipts
            .iter()
            .filter(|entry| entry.key().1 == post_id)
            .map(|entry| entry.key().0.clone())
            .collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.receipts.len();
        self.receipts.retain(|_, read_at| *read_at >= cutoff);
        Ok((before - self.receipts.len()) as u64)
    }
}

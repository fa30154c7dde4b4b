/// PostgreSQL-backed device directory and read-receipt store
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use super::directory::{DeviceDirectory, EligibilityCriteria, ReadReceiptStore};
use crate::error::{AppError, Result};
use crate::models::{normalize_categories, Device, QuietHours, UpdateDeviceRequest};

const DEVICE_COLUMNS: &str = "token, relevance_threshold, categories, is_active, \
     quiet_hours_start, quiet_hours_end, registered_at, last_updated";

#[derive(Clone)]
pub struct PgDirectory {
    db: PgPool,
}

impl PgDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn device_from_row(row: &PgRow) -> Device {
        let start: Option<String> = row.get("quiet_hours_start");
        let end: Option<String> = row.get("quiet_hours_end");
        let quiet_hours = match (start, end) {
            (Some(start), Some(end)) => Some(QuietHours { start, end }),
            _ => None,
        };

        Device {
            token: row.get("token"),
            relevance_threshold: row.get("relevance_threshold"),
            categories: row.get("categories"),
            is_active: row.get("is_active"),
            quiet_hours,
            registered_at: row.get("registered_at"),
            last_updated: row.get("last_updated"),
        }
    }
}

#[async_trait]
impl DeviceDirectory for PgDirectory {
    async fn find_eligible_devices(&self, criteria: &EligibilityCriteria) -> Result<Vec<Device>> {
        // Same predicate as EligibilityCriteria::matches
        let query = format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM devices
            WHERE ($1 = FALSE OR is_active = TRUE)
              AND relevance_threshold <= $2
              AND ($3::TEXT[] IS NULL OR cardinality(categories) = 0 OR categories && $3)
            ORDER BY registered_at, token
            "#
        );

        let rows = sqlx::query(&query)
            .bind(criteria.active_only)
            .bind(criteria.relevance)
            .bind(criteria.categories.clone())
            .fetch_all(&self.db)
            .await
            .map_err(|e| {
                warn!("Failed to query eligible devices: {}", e);
                AppError::from(e)
            })?;

        Ok(rows.iter().map(Self::device_from_row).collect())
    }

    async fn get_device(&self, token: &str) -> Result<Option<Device>> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE token = $1");

        let row = sqlx::query(&query)
            .bind(token)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.as_ref().map(Self::device_from_row))
    }

    async fn upsert_device(&self, device: Device) -> Result<Device> {
        let query = format!(
            r#"
            INSERT INTO devices (
                token, relevance_threshold, categories, is_active,
                quiet_hours_start, quiet_hours_end, registered_at, last_updated
            ) VALUES ($1, $2, $3, TRUE, $4, $5, $6, $6)
            ON CONFLICT (token) DO UPDATE
            SET relevance_threshold = EXCLUDED.relevance_threshold,
                categories = EXCLUDED.categories,
                is_active = TRUE,
                quiet_hours_start = EXCLUDED.quiet_hours_start,
                quiet_hours_end = EXCLUDED.quiet_hours_end,
                last_updated = EXCLUDED.last_updated
            RETURNING {DEVICE_COLUMNS}
            "#
        );

        let (start, end) = match &device.quiet_hours {
            Some(q) => (Some(q.start.clone()), Some(q.end.clone())),
            None => (None, None),
        };

        let row = sqlx::query(&query)
            .bind(&device.token)
            .bind(device.relevance_threshold)
            .bind(&device.categories)
            .bind(start)
            .bind(end)
            .bind(device.last_updated)
            .fetch_one(&self.db)
            .await?;

        debug!(token = %push_gateway::mask_token(&device.token), "Device upserted");
        Ok(Self::device_from_row(&row))
    }

    async fn update_device(&self, token: &str, update: &UpdateDeviceRequest) -> Result<Device> {
        let query = format!(
            r#"
            UPDATE devices
            SET relevance_threshold = COALESCE($2, relevance_threshold),
                categories = COALESCE($3, categories),
                quiet_hours_start = COALESCE($4, quiet_hours_start),
                quiet_hours_end = COALESCE($5, quiet_hours_end),
                is_active = COALESCE($6, is_active),
                last_updated = NOW()
            WHERE token = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        );

        let categories = update.categories.as_deref().map(normalize_categories);
        let (start, end) = match &update.quiet_hours {
            Some(q) => (Some(q.start.clone()), Some(q.end.clone())),
            None => (None, None),
        };

        let row = sqlx::query(&query)
            .bind(token)
            .bind(update.relevance_threshold)
            .bind(categories)
            .bind(start)
            .bind(end)
            .bind(update.is_active)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref()
            .map(Self::device_from_row)
            .ok_or_else(|| AppError::NotFound(format!("device {}", push_gateway::mask_token(token))))
    }

    async fn ensure_registered(&self, token: &str) -> Result<bool> {
        let device = Device::with_defaults(token, Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO devices (token, relevance_threshold, categories, is_active, registered_at, last_updated)
            VALUES ($1, $2, '{}', TRUE, $3, $3)
            ON CONFLICT (token) DO NOTHING
            "#,
        )
        .bind(&device.token)
        .bind(device.relevance_threshold)
        .bind(device.registered_at)
        .execute(&self.db)
        .await?;

        let created = result.rows_affected() == 1;
        if created {
            info!(token = %push_gateway::mask_token(token), "Auto-registered device");
        }
        Ok(created)
    }

    async fn deactivate(&self, token: &str) -> Result<()> {
        sqlx::query("UPDATE devices SET is_active = FALSE WHERE token = $1")
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn deactivate_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE devices SET is_active = FALSE WHERE is_active = TRUE AND last_updated < $1",
        )
        .bind(cutoff)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ReadReceiptStore for PgDirectory {
    async fn has_read(&self, device_token: &str, post_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM read_receipts WHERE device_token = $1 AND post_id = $2) AS read",
        )
        .bind(device_token)
        .bind(post_id)
        .fetch_one(&self.db)
        .await?;
        Ok(row.get("read"))
    }

    async fn mark_read(&self, device_token: &str, post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO read_receipts (device_token, post_id, read_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (device_token, post_id) DO NOTHING
            "#,
        )
        .bind(device_token)
        .bind(post_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn readers_of(&self, post_id: &str) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT device_token FROM read_receipts WHERE post_id = $1")
            .bind(post_id)
            .fetch_all(&self.db)
            .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("device_token"))
            .collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM read_receipts WHERE read_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

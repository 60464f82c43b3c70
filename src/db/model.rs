//! Rows and outcomes returned by the delivery repository.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::DeliveryStatus;

/// A row of the `deliveries` table.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub page_id: String,
    pub notification_id: Option<String>,
    pub status: DeliveryStatus,
    pub broadcast_id: Option<i64>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of trying to start a delivery for a page.
#[derive(Debug, Clone)]
pub enum Claim {
    /// This caller owns the delivery; `attempt` counts from 1. `draft` is
    /// the broadcast a previous failed attempt created but did not send.
    Acquired { attempt: i64, draft: Option<u64> },
    /// Another delivery is in flight (within its lease) or already sent.
    Existing(DeliveryRecord),
}

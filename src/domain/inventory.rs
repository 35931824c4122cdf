use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Available,
    /// Popped for an order that is not committed yet.
    Reserved,
    Used,
}

/// A single-use redemption code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryCode {
    pub id: String,
    pub product_id: String,
    pub code: String,
    pub status: CodeStatus,
    pub order_id: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InventoryCode {
    pub fn new(product_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            code: code.into(),
            status: CodeStatus::Available,
            order_id: None,
            delivered_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Point-in-time view of one product's pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySnapshot {
    pub product_id: String,
    /// Available codes in the order they will be handed out.
    pub available: Vec<String>,
    pub reserved: Vec<String>,
    pub used: Vec<InventoryCode>,
}

impl InventorySnapshot {
    pub fn total(&self) -> usize {
        self.available.len() + self.reserved.len() + self.used.len()
    }
}

/// Result of a bulk upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub added: u32,
    pub skipped: u32,
    pub cleared: u32,
    pub available: u32,
}


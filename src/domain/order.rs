use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of an order.
///
/// `delivered`, `failed`, `refunded` and `expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    AwaitingPayment,
    Paid,
    Delivering,
    Delivered,
    AwaitingStock,
    Failed,
    Refunded,
    Expired,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Delivered => "delivered",
            OrderStatus::AwaitingStock => "awaiting_stock",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Failed | OrderStatus::Refunded | OrderStatus::Expired
        )
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Refunded) => true,
            (Pending, AwaitingPayment | Paid | Failed) => true,
            (AwaitingPayment, Paid | Failed | Expired) => true,
            (Paid, Delivering | Delivered | AwaitingStock) => true,
            (Delivering, Delivered | AwaitingStock) => true,
            (AwaitingStock, Delivering | Delivered) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Front surface an order came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Chat,
    Web,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Chat => "chat",
            Channel::Web => "web",
        }
    }
}

/// Whether payment is settled at purchase time or later through a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentFlow {
    Instant,
    Gateway,
}

impl FromStr for PaymentFlow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instant" => Ok(PaymentFlow::Instant),
            "gateway" => Ok(PaymentFlow::Gateway),
            other => Err(format!("unknown payment flow: {other}")),
        }
    }
}

/// External payment request tied to exactly one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInvoice {
    pub invoice_id: String,
    pub payment_url: String,
    pub amount: Decimal,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
    pub supported_currencies: Vec<String>,
}

/// What the buyer received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Record for a batch of codes, one per line.
    pub fn codes(codes: &[String], at: DateTime<Utc>) -> Self {
        Self {
            code: Some(codes.join("\n")),
            note: None,
            delivered_at: at,
        }
    }

    pub fn note(note: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            code: None,
            note: Some(note.into()),
            delivered_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub order_sn: String,
    pub buyer_id: String,
    pub product_id: String,
    pub product_title: String,
    pub quantity: u32,
    pub unit_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub channel: Channel,
    pub status: OrderStatus,
    pub invoice: Option<PaymentInvoice>,
    /// Opaque provider metadata merged from webhooks.
    pub payment_payload: serde_json::Value,
    pub delivery: Option<DeliveryRecord>,
    pub status_note: Option<String>,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn invoice_id(&self) -> Option<&str> {
        self.invoice.as_ref().map(|invoice| invoice.invoice_id.as_str())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::AwaitingPayment
            && self.invoice.as_ref().is_some_and(|invoice| invoice.expires_at <= now)
    }
}

/// Human-readable serial: `YYYYMMDDHHMMSSmmm-XXXXXX`.
pub fn new_order_sn(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string()[..6].to_ascii_uppercase();
    format!("{}-{}", now.format("%Y%m%d%H%M%S%3f"), suffix)
}

/// Filter and paging for order listings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub buyer_id: Option<String>,
    pub product_id: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl OrderQuery {
    pub const MAX_PAGE_SIZE: u32 = 100;
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    /// Page (1-based) and page size after clamping.
    pub fn paging(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let size = self
            .page_size
            .unwrap_or(Self::DEFAULT_PAGE_SIZE)
            .clamp(1, Self::MAX_PAGE_SIZE);
        (page, size)
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.status.map_or(true, |status| order.status == status)
            && self.buyer_id.as_deref().map_or(true, |buyer| order.buyer_id == buyer)
            && self.product_id.as_deref().map_or(true, |product| order.product_id == product)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub items: Vec<Order>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

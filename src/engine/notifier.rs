use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::domain::{Channel, Order};

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationKind {
    Delivered {
        code: Option<String>,
        instructions: Option<String>,
    },
    AwaitingStock,
    PaymentClosed {
        reason: String,
    },
}

/// A buyer-facing message about one order.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub buyer_id: String,
    pub channel: Channel,
    pub order_id: String,
    pub order_sn: String,
    pub product_title: String,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn for_order(order: &Order, kind: NotificationKind) -> Self {
        Self {
            buyer_id: order.buyer_id.clone(),
            channel: order.channel,
            order_id: order.id.clone(),
            order_sn: order.order_sn.clone(),
            product_title: order.product_title.clone(),
            kind,
        }
    }
}

/// Outbound buyer messaging. Failures are logged by callers and never abort fulfilment.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let kind = match &notification.kind {
            NotificationKind::Delivered { .. } => "delivered",
            NotificationKind::AwaitingStock => "awaiting_stock",
            NotificationKind::PaymentClosed { .. } => "payment_closed",
        };
        info!(
            buyer_id = %notification.buyer_id,
            channel = notification.channel.as_str(),
            order_sn = %notification.order_sn,
            kind,
            "Buyer notified"
        );
        Ok(())
    }
}

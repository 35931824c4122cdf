//! Payment webhook reconciliation.
//!
//! Providers deliver webhooks at least once, so handling is idempotent: an
//! order that is already final ignores every later event, and a duplicate
//! `PAID` racing the first one loses at the ledger's transition check.

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, instrument, warn};

use crate::domain::{Order, OrderStatus};
use crate::engine::dispatcher::{DeliveryDispatcher, DeliveryOutcome};
use crate::engine::ledger::OrderLedger;
use crate::engine::notifier::NotificationKind;
use crate::error::EngineError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub invoice_id: String,
    pub status: PaymentStatus,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub paid_amount: Option<Decimal>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// No order matches the event.
    NoMatch,
    /// The order is final or the event does not apply to its current state.
    Ignored(OrderStatus),
    Pending,
    Fulfilled(DeliveryOutcome),
    Closed(Order),
}

#[derive(Clone)]
pub struct PaymentReconciler {
    secret: Vec<u8>,
    orders: OrderLedger,
    dispatcher: DeliveryDispatcher,
}

impl PaymentReconciler {
    pub fn new(secret: impl Into<Vec<u8>>, orders: OrderLedger, dispatcher: DeliveryDispatcher) -> Self {
        Self {
            secret: secret.into(),
            orders,
            dispatcher,
        }
    }

    /// Hex HMAC-SHA256 of the raw body, compared in constant time.
    pub fn verify_signature(&self, raw_body: &[u8], signature: Option<&str>) -> bool {
        let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
            return false;
        };
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        mac.update(raw_body);
        mac.verify_slice(&expected).is_ok()
    }

    /// Verifies, parses and handles a raw webhook delivery.
    #[instrument(skip(self, raw_body, signature), fields(body_len = raw_body.len()))]
    pub async fn ingest(&self, raw_body: &[u8], signature: Option<&str>) -> Result<ReconcileOutcome, EngineError> {
        if !self.verify_signature(raw_body, signature) {
            warn!("Rejected webhook with bad signature");
            return Err(EngineError::SignatureInvalid);
        }
        let event: PaymentEvent = serde_json::from_slice(raw_body)
            .map_err(|e| EngineError::InvalidRequest(format!("malformed payment event: {e}")))?;
        self.handle(event).await
    }

    #[instrument(fields(invoice_id = %event.invoice_id, status = ?event.status), skip(self, event))]
    pub async fn handle(&self, event: PaymentEvent) -> Result<ReconcileOutcome, EngineError> {
        let Some(order) = self.resolve(&event).await? else {
            info!("No matching order for payment event");
            return Ok(ReconcileOutcome::NoMatch);
        };
        if order.status.is_terminal() {
            debug!(status = %order.status, "Order already final, event ignored");
            return Ok(ReconcileOutcome::Ignored(order.status));
        }

        match event.status {
            PaymentStatus::Pending => Ok(ReconcileOutcome::Pending),
            PaymentStatus::Paid => self.apply_paid(order, event).await,
            PaymentStatus::Failed => {
                self.close(order, OrderStatus::Failed, "payment failed at gateway").await
            }
            PaymentStatus::Expired => {
                self.close(order, OrderStatus::Expired, "payment window expired").await
            }
        }
    }

    async fn resolve(&self, event: &PaymentEvent) -> Result<Option<Order>, EngineError> {
        let Some(order_id) = event.order_id.as_deref() else {
            return self.orders.find_by_invoice(&event.invoice_id).await;
        };
        let order = self.orders.get_order(order_id).await?;
        Ok(order.filter(|order| {
            let matches = order.invoice_id() == Some(event.invoice_id.as_str());
            if !matches {
                warn!(order_id, "Event invoice does not belong to the named order");
            }
            matches
        }))
    }

    async fn apply_paid(&self, order: Order, event: PaymentEvent) -> Result<ReconcileOutcome, EngineError> {
        let paid = match order.status {
            OrderStatus::Pending | OrderStatus::AwaitingPayment => {
                if let (Some(amount), Some(currency)) = (event.paid_amount, event.currency.as_deref()) {
                    if currency.eq_ignore_ascii_case(&order.currency) && amount < order.total_amount {
                        warn!(%amount, expected = %order.total_amount, "Paid amount below order total");
                    }
                }
                match self.orders.mark_paid(&order.id, event.tx_hash, event.paid_amount).await {
                    Ok(paid) => paid,
                    Err(EngineError::IllegalTransition(_)) => {
                        // A concurrent delivery of the same event got there first.
                        debug!("Order already marked paid");
                        return Ok(ReconcileOutcome::Ignored(order.status));
                    }
                    Err(e) => return Err(e),
                }
            }
            // Paid but not delivered: resume after an interrupted attempt.
            OrderStatus::Paid | OrderStatus::AwaitingStock => order,
            other => return Ok(ReconcileOutcome::Ignored(other)),
        };

        let outcome = self.dispatcher.deliver(&paid).await?;
        info!(order_id = %paid.id, "Payment reconciled");
        Ok(ReconcileOutcome::Fulfilled(outcome))
    }

    async fn close(&self, order: Order, status: OrderStatus, note: &str) -> Result<ReconcileOutcome, EngineError> {
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::AwaitingPayment) {
            debug!(current = %order.status, "Late failure event ignored");
            return Ok(ReconcileOutcome::Ignored(order.status));
        }
        let closed = match self.orders.update_status(&order.id, status, Some(note.to_string())).await {
            Ok(closed) => closed,
            Err(EngineError::IllegalTransition(_)) => return Ok(ReconcileOutcome::Ignored(order.status)),
            Err(e) => return Err(e),
        };
        self.dispatcher
            .notify(&closed, NotificationKind::PaymentClosed { reason: note.to_string() })
            .await;
        info!(order_id = %closed.id, status = %closed.status, "Unpaid order closed");
        Ok(ReconcileOutcome::Closed(closed))
    }
}

#[cfg(test)]
pub(crate) fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

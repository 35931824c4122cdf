use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::clients::InventoryClient;
use crate::domain::{Order, OrderQuery, OrderStatus, Product};
use crate::engine::ledger::{delivery_record, return_codes, OrderLedger};
use crate::engine::notifier::{Notification, NotificationKind, Notifier};
use crate::error::EngineError;
use crate::ledger_actor::LedgerError;

/// What a delivery attempt did to the order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered(Order),
    AwaitingStock(Order),
    /// Already delivered or otherwise final; nothing changed.
    Unchanged(OrderStatus),
}

/// Turns paid orders into fulfilled ones.
#[derive(Clone)]
pub struct DeliveryDispatcher {
    orders: OrderLedger,
    inventory: InventoryClient,
    notifier: Arc<dyn Notifier>,
}

impl DeliveryDispatcher {
    pub fn new(orders: OrderLedger, inventory: InventoryClient, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            orders,
            inventory,
            notifier,
        }
    }

    /// Fulfils a paid order. The order is claimed as `delivering` before any
    /// code is reserved, so concurrent attempts on one order deliver at most once
    /// and a losing attempt touches neither the pool nor the buyer. Running short
    /// of stock parks the order in `awaiting_stock` and is reported as an outcome,
    /// not an error.
    #[instrument(fields(order_id = %order.id, status = %order.status), skip(self, order))]
    pub async fn deliver(&self, order: &Order) -> Result<DeliveryOutcome, EngineError> {
        if order.status.is_terminal() {
            debug!("Order already final, skipping delivery");
            return Ok(DeliveryOutcome::Unchanged(order.status));
        }
        if !matches!(
            order.status,
            OrderStatus::Paid | OrderStatus::AwaitingStock | OrderStatus::Delivering
        ) {
            return Err(EngineError::IllegalTransition(format!(
                "order {} is {} and cannot be delivered",
                order.id, order.status
            )));
        }

        let product = self.orders.product_for_order(order).await?;
        let was_waiting = order.status == OrderStatus::AwaitingStock;
        let claimed = match self.orders.claim_delivery(&order.id).await {
            Ok(claimed) => claimed,
            Err(LedgerError::IllegalTransition { from, .. }) => {
                debug!(%from, "Delivery already claimed or finished");
                return Ok(DeliveryOutcome::Unchanged(from));
            }
            Err(e) => return Err(e.into()),
        };

        let reserved = if product.delivery_mode.uses_inventory() {
            match self.inventory.reserve(product.id.clone(), claimed.quantity).await {
                Ok(Some(codes)) => codes,
                Ok(None) => return self.park(&claimed, was_waiting).await,
                Err(e) => {
                    error!(error = %e, "Reserving codes failed");
                    self.release(&claimed).await;
                    return Err(e.into());
                }
            }
        } else {
            Vec::new()
        };

        let record = delivery_record(&product, &reserved, Utc::now());
        match self.orders.attach_delivery(&claimed.id, record, true).await {
            Ok(delivered) => {
                self.bind_codes(&product, &delivered, reserved).await;
                info!(order_sn = %delivered.order_sn, "Order delivered");
                self.send(Notification::for_order(
                    &delivered,
                    NotificationKind::Delivered {
                        code: delivered.delivery.as_ref().and_then(|record| record.code.clone()),
                        instructions: delivered.delivery.as_ref().and_then(|record| record.note.clone()),
                    },
                ))
                .await;
                Ok(DeliveryOutcome::Delivered(delivered))
            }
            Err(LedgerError::InsufficientStock { available, .. }) => {
                warn!(available, "Stock counter short at delivery");
                return_codes(&self.inventory, &product.id, &claimed.id, reserved).await;
                self.park(&claimed, was_waiting).await
            }
            Err(LedgerError::IllegalTransition { from, .. }) => {
                // Refunded while the delivery was being prepared.
                debug!(%from, "Order moved on concurrently");
                return_codes(&self.inventory, &product.id, &claimed.id, reserved).await;
                Ok(DeliveryOutcome::Unchanged(from))
            }
            Err(e) => {
                error!(error = %e, "Delivery commit failed, compensating");
                return_codes(&self.inventory, &product.id, &claimed.id, reserved).await;
                self.release(&claimed).await;
                Err(e.into())
            }
        }
    }

    /// Re-runs delivery for a product's `awaiting_stock` orders, oldest first,
    /// stopping at the first one that is still short. Returns how many were delivered.
    #[instrument(skip(self))]
    pub async fn retry_awaiting_stock(&self, product_id: &str) -> Result<usize, EngineError> {
        let mut waiting = Vec::new();
        let mut page = 1;
        loop {
            let query = OrderQuery {
                status: Some(OrderStatus::AwaitingStock),
                product_id: Some(product_id.to_string()),
                page: Some(page),
                page_size: Some(OrderQuery::MAX_PAGE_SIZE),
                ..Default::default()
            };
            let batch = self.orders.list_orders(query).await?;
            let fetched = batch.items.len();
            waiting.extend(batch.items);
            if fetched < OrderQuery::MAX_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        waiting.reverse();

        let mut delivered = 0;
        for order in &waiting {
            match self.deliver(order).await? {
                DeliveryOutcome::Delivered(_) => delivered += 1,
                DeliveryOutcome::AwaitingStock(_) => break,
                DeliveryOutcome::Unchanged(_) => {}
            }
        }
        if delivered > 0 {
            info!(delivered, waiting = waiting.len(), "Backlog delivered after restock");
        }
        Ok(delivered)
    }

    /// Parks a claimed order until restock. Buyers already told they are
    /// waiting are not told again.
    async fn park(&self, claimed: &Order, was_waiting: bool) -> Result<DeliveryOutcome, EngineError> {
        let parked = match self.orders.park_for_stock(&claimed.id, "waiting for restock").await {
            Ok(parked) => parked,
            Err(LedgerError::IllegalTransition { from, .. }) => {
                debug!(%from, "Order moved on before it could be parked");
                return Ok(DeliveryOutcome::Unchanged(from));
            }
            Err(e) => return Err(e.into()),
        };
        if was_waiting {
            debug!("Still waiting for stock");
        } else {
            info!("Order parked until restock");
            self.send(Notification::for_order(&parked, NotificationKind::AwaitingStock))
                .await;
        }
        Ok(DeliveryOutcome::AwaitingStock(parked))
    }

    /// Hands a claimed order back after a failed attempt so the next restock retries it.
    async fn release(&self, claimed: &Order) {
        if let Err(e) = self.orders.park_for_stock(&claimed.id, "delivery attempt failed").await {
            error!(order_id = %claimed.id, error = %e, "Order left in delivering");
        }
    }

    async fn bind_codes(&self, product: &Product, order: &Order, codes: Vec<String>) {
        for code in codes {
            if let Err(e) = self.inventory.bind(product.id.clone(), code, order.id.clone()).await {
                error!(order_id = %order.id, error = %e, "Failed to bind delivered code");
            }
        }
    }

    /// Best-effort buyer notification about an order.
    pub async fn notify(&self, order: &Order, kind: NotificationKind) {
        self.send(Notification::for_order(order, kind)).await;
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(error = %e, "Buyer notification failed");
        }
    }
}

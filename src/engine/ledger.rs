//! Order creation and bookkeeping.
//!
//! `create_order` is a saga across two services: codes are reserved in the
//! inventory pool, then the order is committed in the ledger. A failed commit is
//! compensated by pushing the reserved codes back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use crate::clients::{InventoryClient, LedgerClient};
use crate::domain::{
    new_order_sn, Channel, DeliveryRecord, Order, OrderPage, OrderQuery, OrderReceipt, OrderStatus,
    PaymentFlow, Product, PurchaseRequest,
};
use crate::engine::catalog::CatalogStore;
use crate::engine::gateway::{InvoiceRequest, PaymentGateway};
use crate::error::EngineError;
use crate::ledger_actor::LedgerError;
use crate::messages::OrderChange;

const COMPENSATION_ATTEMPTS: u32 = 3;

/// Which payment flow each channel uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowPolicy {
    pub chat: PaymentFlow,
    pub web: PaymentFlow,
}

impl FlowPolicy {
    pub fn flow_for(&self, channel: Channel) -> PaymentFlow {
        match channel {
            Channel::Chat => self.chat,
            Channel::Web => self.web,
        }
    }
}

impl Default for FlowPolicy {
    fn default() -> Self {
        Self {
            chat: PaymentFlow::Gateway,
            web: PaymentFlow::Instant,
        }
    }
}

/// Returns reserved codes to the pool, retrying each push a bounded number of times.
///
/// A code whose push keeps failing is stranded as reserved; that is logged at
/// `error` with enough context to restore it by hand.
pub(crate) async fn return_codes(inventory: &InventoryClient, product_id: &str, order_id: &str, codes: Vec<String>) {
    for code in codes {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match inventory.push(product_id.to_string(), code.clone()).await {
                Ok(_) => {
                    debug!(product_id, order_id, "Reserved code returned");
                    break;
                }
                Err(e) if attempt < COMPENSATION_ATTEMPTS => {
                    warn!(product_id, order_id, attempt, error = %e, "Returning code failed, retrying");
                }
                Err(e) => {
                    error!(
                        product_id,
                        order_id,
                        code = %code,
                        error = %e,
                        "Compensation failed, inventory code stranded"
                    );
                    break;
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct OrderLedger {
    ledger: LedgerClient,
    inventory: InventoryClient,
    catalog: CatalogStore,
    gateway: Arc<dyn PaymentGateway>,
    flows: FlowPolicy,
}

impl OrderLedger {
    pub fn new(
        ledger: LedgerClient,
        inventory: InventoryClient,
        catalog: CatalogStore,
        gateway: Arc<dyn PaymentGateway>,
        flows: FlowPolicy,
    ) -> Self {
        Self {
            ledger,
            inventory,
            catalog,
            gateway,
            flows,
        }
    }

    #[instrument(
        fields(product_id = %request.product_id, buyer_id = %request.buyer_id, quantity = request.quantity, channel = request.channel.as_str()),
        skip(self, request)
    )]
    pub async fn create_order(&self, request: PurchaseRequest) -> Result<OrderReceipt, EngineError> {
        if request.quantity == 0 {
            return Err(EngineError::InvalidRequest("quantity must be at least 1".into()));
        }
        if request.buyer_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("buyer id is required".into()));
        }

        let product = self
            .catalog
            .get_product(&request.product_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("product {}", request.product_id)))?;

        if product.stock < request.quantity {
            info!(available = product.stock, "Rejected: out of stock");
            return Err(EngineError::OutOfStock {
                requested: request.quantity,
                available: product.stock,
            });
        }

        let (currency, unit_amount) = product
            .resolve_currency(request.currency.as_deref())
            .ok_or_else(|| EngineError::UnsupportedCurrency(request.currency.clone().unwrap_or_default()))?;

        let draft = draft_order(&product, &request, currency, unit_amount, Utc::now());
        match self.flows.flow_for(request.channel) {
            PaymentFlow::Instant => self.create_instant(product, draft).await,
            PaymentFlow::Gateway => self.create_gateway(product, draft).await,
        }
    }

    /// Reserve, commit as delivered, then bind the codes to the durable order.
    async fn create_instant(&self, product: Product, mut order: Order) -> Result<OrderReceipt, EngineError> {
        let reserved = if product.delivery_mode.uses_inventory() {
            self.inventory
                .reserve(product.id.clone(), order.quantity)
                .await?
                .ok_or_else(|| {
                    warn!(stock = product.stock, "Pool emptied between stock check and reserve");
                    EngineError::InventoryExhausted(product.id.clone())
                })?
        } else {
            Vec::new()
        };

        order.status = OrderStatus::Delivered;
        order.delivery = Some(delivery_record(&product, &reserved, order.created_at));
        let order_id = order.id.clone();

        let committed = match self.ledger.commit_order(order, true).await {
            Ok(committed) => committed,
            Err(e) => {
                error!(error = %e, "Order commit failed, compensating");
                return_codes(&self.inventory, &product.id, &order_id, reserved).await;
                return Err(match e {
                    LedgerError::InsufficientStock { requested, available, .. } => {
                        EngineError::OutOfStock { requested, available }
                    }
                    LedgerError::ActorCommunicationError(detail) => EngineError::DependencyUnavailable(detail),
                    other => EngineError::Internal(other.to_string()),
                });
            }
        };

        for code in reserved {
            if let Err(e) = self.inventory.bind(product.id.clone(), code, committed.id.clone()).await {
                // The order is durable and the buyer has the code; only the audit tag is missing.
                error!(order_id = %committed.id, error = %e, "Failed to bind delivered code");
            }
        }

        info!(order_id = %committed.id, order_sn = %committed.order_sn, "Order delivered instantly");
        Ok(OrderReceipt::from_order(&committed, &product))
    }

    /// Mint an invoice and park the order until the payment webhook arrives.
    async fn create_gateway(&self, product: Product, mut order: Order) -> Result<OrderReceipt, EngineError> {
        let invoice = self
            .gateway
            .create_invoice(InvoiceRequest {
                order_id: order.id.clone(),
                amount: order.total_amount,
                currency: order.currency.clone(),
                supported_currencies: product.price_map.keys().cloned().collect(),
                description: format!("{} x{}", product.title, order.quantity),
            })
            .await?;

        order.status = OrderStatus::AwaitingPayment;
        order.invoice = Some(invoice);
        let committed = self.ledger.commit_order(order, false).await?;

        info!(order_id = %committed.id, invoice_id = ?committed.invoice_id(), "Order awaiting payment");
        Ok(OrderReceipt::from_order(&committed, &product))
    }

    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        note: Option<String>,
    ) -> Result<Order, EngineError> {
        if matches!(status, OrderStatus::Paid | OrderStatus::Delivered) {
            return Err(EngineError::InvalidRequest(format!(
                "use mark_paid or attach_delivery to move an order to {status}"
            )));
        }
        let change = OrderChange::Status { status, note };
        Ok(self.ledger.transition_order(order_id.to_string(), change).await?)
    }

    #[instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_id: &str,
        tx_hash: Option<String>,
        paid_amount: Option<Decimal>,
    ) -> Result<Order, EngineError> {
        let change = OrderChange::Paid { tx_hash, paid_amount };
        Ok(self.ledger.transition_order(order_id.to_string(), change).await?)
    }

    /// Moves a paid or waiting order to `delivering`. Only one caller can win
    /// this transition, so only one delivery attempt runs per order at a time.
    #[instrument(skip(self))]
    pub async fn claim_delivery(&self, order_id: &str) -> Result<Order, LedgerError> {
        let change = OrderChange::Status { status: OrderStatus::Delivering, note: None };
        self.ledger.transition_order(order_id.to_string(), change).await
    }

    /// Releases a claimed order into `awaiting_stock`.
    #[instrument(skip(self))]
    pub async fn park_for_stock(&self, order_id: &str, note: &str) -> Result<Order, LedgerError> {
        let change = OrderChange::Status { status: OrderStatus::AwaitingStock, note: Some(note.to_string()) };
        self.ledger.transition_order(order_id.to_string(), change).await
    }

    /// Marks the order delivered, optionally consuming stock in the same step.
    #[instrument(skip(self, record))]
    pub async fn attach_delivery(
        &self,
        order_id: &str,
        record: DeliveryRecord,
        consume_stock: bool,
    ) -> Result<Order, LedgerError> {
        let change = OrderChange::Deliver { record, consume_stock };
        self.ledger.transition_order(order_id.to_string(), change).await
    }

    /// Admin-only refund of a non-terminal order.
    pub async fn refund(&self, order_id: &str, note: Option<String>) -> Result<Order, EngineError> {
        self.update_status(order_id, OrderStatus::Refunded, note).await
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>, EngineError> {
        Ok(self.ledger.get_order(order_id.to_string()).await?)
    }

    pub async fn find_by_invoice(&self, invoice_id: &str) -> Result<Option<Order>, EngineError> {
        Ok(self.ledger.find_order_by_invoice(invoice_id.to_string()).await?)
    }

    pub async fn list_orders(&self, query: OrderQuery) -> Result<OrderPage, EngineError> {
        Ok(self.ledger.list_orders(query).await?)
    }

    /// Product record as the ledger holds it, inactive or not.
    pub async fn product_for_order(&self, order: &Order) -> Result<Product, EngineError> {
        self.ledger
            .get_product(order.product_id.clone())
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("product {}", order.product_id)))
    }

    /// Expires unpaid orders whose invoice lapsed before `now`.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<Order>, EngineError> {
        Ok(self.ledger.expire_stale(now).await?)
    }
}

fn draft_order(
    product: &Product,
    request: &PurchaseRequest,
    currency: String,
    unit_amount: Decimal,
    now: DateTime<Utc>,
) -> Order {
    Order {
        id: uuid::Uuid::new_v4().to_string(),
        order_sn: new_order_sn(now),
        buyer_id: request.buyer_id.clone(),
        product_id: product.id.clone(),
        product_title: product.title.clone(),
        quantity: request.quantity,
        unit_amount,
        total_amount: unit_amount * Decimal::from(request.quantity),
        currency,
        channel: request.channel,
        status: OrderStatus::Pending,
        invoice: None,
        payment_payload: serde_json::Value::Object(serde_json::Map::new()),
        delivery: None,
        status_note: None,
        tx_hash: None,
        created_at: now,
        updated_at: now,
    }
}

/// Delivery record for a product: the reserved codes, or the stored instructions.
pub(crate) fn delivery_record(product: &Product, codes: &[String], at: DateTime<Utc>) -> DeliveryRecord {
    if !codes.is_empty() {
        return DeliveryRecord::codes(codes, at);
    }
    let note = product
        .delivery_instructions
        .clone()
        .unwrap_or_else(|| "Your order will be fulfilled by our team shortly.".to_string());
    DeliveryRecord::note(note, at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor_framework::ResourceActor;
    use crate::clients::CategoryClient;
    use crate::domain::{Category, DeliveryMode};
    use crate::engine::gateway::HostedInvoiceIssuer;
    use crate::inventory_actor::{InventoryError, InventoryService};
    use crate::ledger_actor::LedgerService;
    use crate::mock_framework::{create_mock_inventory, create_mock_ledger, expect_commit};
    use crate::messages::{InventoryRequest, LedgerRequest};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        orders: OrderLedger,
        ledger: LedgerClient,
        inventory: InventoryClient,
    }

    fn harness(flows: FlowPolicy) -> Harness {
        let (ledger_service, ledger) = LedgerService::new(32);
        tokio::spawn(ledger_service.run());
        let (inventory_service, inventory) = InventoryService::new(32);
        tokio::spawn(inventory_service.run());
        let (category_actor, categories) = ResourceActor::<Category>::new(8, || "cat".to_string());
        tokio::spawn(category_actor.run());

        let catalog = CatalogStore::new(
            ledger.clone(),
            inventory.clone(),
            CategoryClient::new(categories),
            Duration::from_secs(60),
        );
        let gateway = Arc::new(HostedInvoiceIssuer::new("https://pay.test", chrono::Duration::minutes(15)));
        let orders = OrderLedger::new(ledger.clone(), inventory.clone(), catalog, gateway, flows);
        Harness { orders, ledger, inventory }
    }

    async fn stock_codes(h: &Harness, product_id: &str, codes: &[&str]) {
        let product = Product::new(product_id, product_id, "Voucher", "USD", Decimal::new(10, 0))
            .with_price("EUR", Decimal::new(9, 0));
        h.ledger.upsert_product(product).await.unwrap();
        let codes = codes.iter().map(|c| c.to_string()).collect();
        h.inventory.bulk_upload(product_id.into(), codes, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_instant_code_order_delivers_and_binds() {
        let h = harness(FlowPolicy::default());
        stock_codes(&h, "p1", &["A", "B", "C"]).await;

        let request = PurchaseRequest::new("p1", "u1", Channel::Web).with_quantity(2).with_currency("eur");
        let receipt = h.orders.create_order(request).await.unwrap();

        assert_eq!(receipt.status, OrderStatus::Delivered);
        assert_eq!(receipt.code.as_deref(), Some("A\nB"));
        assert_eq!(receipt.currency, "EUR");
        assert_eq!(receipt.amount, Decimal::new(18, 0));

        let snapshot = h.inventory.snapshot("p1".into()).await.unwrap();
        assert_eq!(snapshot.used.len(), 2);
        assert!(snapshot.reserved.is_empty());
        assert_eq!(h.orders.catalog.get_product("p1").await.unwrap().unwrap().stock, 1);
    }

    #[tokio::test]
    async fn test_validation_failures_do_not_mutate() {
        let h = harness(FlowPolicy::default());
        stock_codes(&h, "p1", &["A"]).await;

        let missing = h.orders.create_order(PurchaseRequest::new("nope", "u1", Channel::Web)).await;
        assert!(matches!(missing, Err(EngineError::NotFound(_))));

        let too_many = h
            .orders
            .create_order(PurchaseRequest::new("p1", "u1", Channel::Web).with_quantity(2))
            .await;
        assert_eq!(too_many, Err(EngineError::OutOfStock { requested: 2, available: 1 }));

        let zero = h
            .orders
            .create_order(PurchaseRequest::new("p1", "u1", Channel::Web).with_quantity(0))
            .await;
        assert!(matches!(zero, Err(EngineError::InvalidRequest(_))));

        assert_eq!(h.inventory.available_count("p1".into()).await.unwrap(), 1);
        assert_eq!(h.ledger.get_order_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_code_product_switched_back_sells_pooled_codes() {
        let h = harness(FlowPolicy::default());
        stock_codes(&h, "p1", &["A", "B", "C"]).await;

        let as_text = Product::new("p1", "p1", "Voucher", "USD", Decimal::new(10, 0))
            .with_delivery(DeliveryMode::Text, Some("see email"));
        h.orders.catalog.upsert_product(as_text).await.unwrap();
        let back = Product::new("p1", "p1", "Voucher", "USD", Decimal::new(10, 0));
        assert_eq!(h.orders.catalog.upsert_product(back).await.unwrap().stock, 3);

        let receipt = h.orders.create_order(PurchaseRequest::new("p1", "u1", Channel::Web)).await.unwrap();
        assert_eq!(receipt.code.as_deref(), Some("A"));
        assert_eq!(h.orders.catalog.get_product("p1").await.unwrap().unwrap().stock, 2);
    }

    #[tokio::test]
    async fn test_failed_commit_returns_code_exactly_once() {
        let h = harness(FlowPolicy::default());
        stock_codes(&h, "p1", &["ONLY"]).await;
        h.ledger.fail_next_commit().await.unwrap();

        let result = h.orders.create_order(PurchaseRequest::new("p1", "u1", Channel::Web)).await;
        assert!(matches!(result, Err(EngineError::Internal(_))));

        let snapshot = h.inventory.snapshot("p1".into()).await.unwrap();
        assert_eq!(snapshot.available, vec!["ONLY".to_string()]);
        assert!(snapshot.reserved.is_empty());
        assert_eq!(h.ledger.get_order_count().await.unwrap(), 0);
        assert_eq!(h.orders.catalog.get_product("p1").await.unwrap().unwrap().stock, 1);
    }

    #[tokio::test]
    async fn test_gateway_order_waits_for_payment_without_reserving() {
        let h = harness(FlowPolicy { chat: PaymentFlow::Gateway, web: PaymentFlow::Gateway });
        stock_codes(&h, "p1", &["A"]).await;

        let receipt = h.orders.create_order(PurchaseRequest::new("p1", "u1", Channel::Chat)).await.unwrap();
        assert_eq!(receipt.status, OrderStatus::AwaitingPayment);
        assert!(receipt.code.is_none());
        let invoice = receipt.invoice.expect("gateway order carries an invoice");
        assert_eq!(invoice.amount, Decimal::new(10, 0));

        let found = h.orders.find_by_invoice(&invoice.invoice_id).await.unwrap().unwrap();
        assert_eq!(found.id, receipt.order_id);
        assert_eq!(h.inventory.available_count("p1".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_text_order_leaves_inventory_untouched() {
        let h = harness(FlowPolicy::default());
        let product = Product::new("p2", "guide", "Guide", "USD", Decimal::new(3, 0))
            .with_delivery(DeliveryMode::Text, Some("use at example.com"))
            .with_stock(5);
        h.ledger.upsert_product(product).await.unwrap();

        let receipt = h.orders.create_order(PurchaseRequest::new("p2", "u1", Channel::Web)).await.unwrap();
        assert_eq!(receipt.instructions.as_deref(), Some("use at example.com"));
        assert!(receipt.code.is_none());
        assert_eq!(h.ledger.get_product("p2".into()).await.unwrap().unwrap().stock, 4);
        assert_eq!(h.inventory.snapshot("p2".into()).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_update_status_rejects_shortcuts_and_terminal_moves() {
        let h = harness(FlowPolicy { chat: PaymentFlow::Gateway, web: PaymentFlow::Gateway });
        stock_codes(&h, "p1", &["A"]).await;
        let receipt = h.orders.create_order(PurchaseRequest::new("p1", "u1", Channel::Web)).await.unwrap();

        let shortcut = h.orders.update_status(&receipt.order_id, OrderStatus::Delivered, None).await;
        assert!(matches!(shortcut, Err(EngineError::InvalidRequest(_))));

        let failed = h
            .orders
            .update_status(&receipt.order_id, OrderStatus::Failed, Some("card declined".into()))
            .await
            .unwrap();
        assert_eq!(failed.status_note.as_deref(), Some("card declined"));

        let refund = h.orders.refund(&receipt.order_id, None).await;
        assert!(matches!(refund, Err(EngineError::IllegalTransition(_))));
    }

    fn mock_orders(ledger: LedgerClient, inventory: InventoryClient) -> OrderLedger {
        let (_category_actor, categories) = ResourceActor::<Category>::new(8, || "cat".to_string());
        let catalog = CatalogStore::new(
            ledger.clone(),
            inventory.clone(),
            CategoryClient::new(categories),
            Duration::from_secs(60),
        );
        let gateway = Arc::new(HostedInvoiceIssuer::new("https://pay.test", chrono::Duration::minutes(15)));
        OrderLedger::new(ledger, inventory, catalog, gateway, FlowPolicy::default())
    }

    async fn answer_code_product(rx: &mut mpsc::Receiver<LedgerRequest>) {
        match rx.recv().await {
            Some(LedgerRequest::GetProduct { key, respond_to }) => {
                assert_eq!(key, "p1");
                let product = Product::new("p1", "p1", "Voucher", "USD", Decimal::new(10, 0));
                respond_to.send(Ok(Some(product))).unwrap();
            }
            other => panic!("Expected GetProduct, got {other:?}"),
        }
    }

    async fn answer_available(rx: &mut mpsc::Receiver<InventoryRequest>, count: u32) {
        match rx.recv().await {
            Some(InventoryRequest::AvailableCount { product_id, respond_to }) => {
                assert_eq!(product_id, "p1");
                respond_to.send(Ok(count)).unwrap();
            }
            other => panic!("Expected AvailableCount, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pool_emptied_after_check_reports_inventory_exhausted() {
        let (ledger, mut ledger_rx) = create_mock_ledger(8);
        let (inventory, mut inventory_rx) = create_mock_inventory(8);
        let orders = mock_orders(ledger, inventory);

        let task = tokio::spawn(async move { orders.create_order(PurchaseRequest::new("p1", "u1", Channel::Web)).await });

        answer_code_product(&mut ledger_rx).await;
        answer_available(&mut inventory_rx, 1).await;
        match inventory_rx.recv().await {
            Some(InventoryRequest::Reserve { respond_to, .. }) => respond_to.send(Ok(None)).unwrap(),
            other => panic!("Expected Reserve, got {other:?}"),
        }

        assert_eq!(task.await.unwrap(), Err(EngineError::InventoryExhausted("p1".into())));
        assert!(ledger_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_compensation_retries_push_before_giving_up() {
        let (ledger, mut ledger_rx) = create_mock_ledger(8);
        let (inventory, mut inventory_rx) = create_mock_inventory(8);
        let orders = mock_orders(ledger, inventory);

        let task = tokio::spawn(async move { orders.create_order(PurchaseRequest::new("p1", "u1", Channel::Web)).await });

        answer_code_product(&mut ledger_rx).await;
        answer_available(&mut inventory_rx, 1).await;
        match inventory_rx.recv().await {
            Some(InventoryRequest::Reserve { count, respond_to, .. }) => {
                assert_eq!(count, 1);
                respond_to.send(Ok(Some(vec!["X".to_string()]))).unwrap();
            }
            other => panic!("Expected Reserve, got {other:?}"),
        }
        let (order, consume_stock, respond_to) = expect_commit(&mut ledger_rx).await.expect("Expected CommitOrder");
        assert!(consume_stock);
        assert_eq!(order.status, OrderStatus::Delivered);
        respond_to.send(Err(LedgerError::StorageError("disk full".into()))).unwrap();

        for _ in 0..COMPENSATION_ATTEMPTS {
            match inventory_rx.recv().await {
                Some(InventoryRequest::Push { code, respond_to, .. }) => {
                    assert_eq!(code, "X");
                    respond_to
                        .send(Err(InventoryError::ActorCommunicationError("busy".into())))
                        .unwrap();
                }
                other => panic!("Expected Push, got {other:?}"),
            }
        }

        let result = task.await.unwrap();
        assert_eq!(result, Err(EngineError::Internal("Storage error: disk full".into())));
        assert!(inventory_rx.try_recv().is_err());
    }
}

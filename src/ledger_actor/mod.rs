//! Product and order ledger service.
//!
//! Products, their stock counters and orders live in one actor, so "decrement
//! stock + insert order" and "decrement stock + mark delivered" are single
//! mailbox messages that either apply completely or not at all.
//!
//! Code-mode products keep no counter here. Their stock is the inventory
//! pool's available count, and a stored `stock` of 0 is not meaningful.

pub mod error;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::clients::LedgerClient;
use crate::domain::{Order, OrderPage, OrderQuery, OrderStatus, Product};
use crate::messages::{LedgerRequest, OrderChange, ServiceResponse};

pub use error::LedgerError;

pub struct LedgerService {
    receiver: mpsc::Receiver<LedgerRequest>,
    products: HashMap<String, Product>,
    slugs: HashMap<String, String>,
    orders: HashMap<String, Order>,
    /// Order ids in insertion order.
    order_log: Vec<String>,
    invoices: HashMap<String, String>,
    serials: HashSet<String>,
    #[cfg(test)]
    fail_next_commit: bool,
}

impl LedgerService {
    pub fn new(buffer_size: usize) -> (Self, LedgerClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let service = Self {
            receiver,
            products: HashMap::new(),
            slugs: HashMap::new(),
            orders: HashMap::new(),
            order_log: Vec::new(),
            invoices: HashMap::new(),
            serials: HashSet::new(),
            #[cfg(test)]
            fail_next_commit: false,
        };
        (service, LedgerClient::new(sender))
    }

    #[instrument(name = "ledger_service", skip(self))]
    pub async fn run(mut self) {
        info!("LedgerService starting");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                LedgerRequest::GetProduct { key, respond_to } => {
                    let _ = respond_to.send(Ok(self.find_product(&key).cloned()));
                }
                LedgerRequest::ListProducts { respond_to } => {
                    let _ = respond_to.send(Ok(self.products.values().cloned().collect()));
                }
                LedgerRequest::UpsertProduct { product, respond_to } => {
                    self.handle_upsert_product(product, respond_to);
                }
                LedgerRequest::CommitOrder { order, consume_stock, respond_to } => {
                    self.handle_commit_order(order, consume_stock, respond_to);
                }
                LedgerRequest::GetOrder { id, respond_to } => {
                    let _ = respond_to.send(Ok(self.orders.get(&id).cloned()));
                }
                LedgerRequest::FindOrderByInvoice { invoice_id, respond_to } => {
                    let order = self
                        .invoices
                        .get(&invoice_id)
                        .and_then(|order_id| self.orders.get(order_id))
                        .cloned();
                    let _ = respond_to.send(Ok(order));
                }
                LedgerRequest::ListOrders { query, respond_to } => {
                    self.handle_list_orders(query, respond_to);
                }
                LedgerRequest::TransitionOrder { order_id, change, respond_to } => {
                    self.handle_transition(order_id, change, respond_to);
                }
                LedgerRequest::ExpireStale { now, respond_to } => {
                    self.handle_expire_stale(now, respond_to);
                }
                LedgerRequest::Shutdown => {
                    info!("LedgerService shutting down");
                    break;
                }
                #[cfg(test)]
                LedgerRequest::FailNextCommit { respond_to } => {
                    self.fail_next_commit = true;
                    let _ = respond_to.send(Ok(()));
                }
                #[cfg(test)]
                LedgerRequest::GetOrderCount { respond_to } => {
                    let _ = respond_to.send(Ok(self.orders.len()));
                }
            }
        }

        info!("LedgerService stopped");
    }

    fn find_product(&self, key: &str) -> Option<&Product> {
        self.products.get(key).or_else(|| {
            self.slugs
                .get(&key.to_ascii_lowercase())
                .and_then(|id| self.products.get(id))
        })
    }

    /// Admin write path.
    #[instrument(fields(product_id = %product.id), skip(self, product, respond_to))]
    fn handle_upsert_product(&mut self, mut product: Product, respond_to: ServiceResponse<Product, LedgerError>) {
        product.normalize();
        if let Err(reason) = product.validate() {
            warn!(%reason, "Rejected product");
            send_error!(respond_to, LedgerError::ValidationError(reason));
        }
        if let Some(owner) = self.slugs.get(&product.slug).filter(|owner| **owner != product.id) {
            send_error!(
                respond_to,
                LedgerError::Conflict(format!("slug {} is used by {}", product.slug, owner))
            );
        }

        if product.delivery_mode.uses_inventory() {
            product.stock = 0;
        }
        if let Some(old_slug) = self.products.get(&product.id).map(|existing| existing.slug.clone()) {
            self.slugs.remove(&old_slug);
        }

        product.updated_at = Utc::now();
        self.slugs.insert(product.slug.clone(), product.id.clone());
        self.products.insert(product.id.clone(), product.clone());
        info!(mode = ?product.delivery_mode, stock = product.stock, "Product saved");
        let _ = respond_to.send(Ok(product));
    }

    #[instrument(fields(order_id = %order.id, product_id = %order.product_id, quantity = order.quantity), skip(self, order, respond_to))]
    fn handle_commit_order(&mut self, order: Order, consume_stock: bool, respond_to: ServiceResponse<Order, LedgerError>) {
        if self.take_injected_failure() {
            warn!("Injected commit failure");
            send_error!(respond_to, LedgerError::StorageError("injected commit failure".into()));
        }

        if order.quantity == 0 {
            send_error!(respond_to, LedgerError::ValidationError("quantity must be at least 1".into()));
        }
        if self.orders.contains_key(&order.id) || self.serials.contains(&order.order_sn) {
            send_error!(respond_to, LedgerError::Conflict(format!("order {} already exists", order.id)));
        }
        if let Some(invoice_id) = order.invoice_id().filter(|id| self.invoices.contains_key(*id)) {
            send_error!(respond_to, LedgerError::Conflict(format!("invoice {invoice_id} already bound")));
        }
        let Some(product) = self.products.get_mut(&order.product_id) else {
            send_error!(respond_to, LedgerError::ProductNotFound(order.product_id));
        };
        if consume_stock {
            if let Err(e) = take_stock(product, order.quantity, Utc::now()) {
                warn!(error = %e, "Stock ran out before commit");
                send_error!(respond_to, e);
            }
        }

        if let Some(invoice_id) = order.invoice_id() {
            self.invoices.insert(invoice_id.to_string(), order.id.clone());
        }
        self.serials.insert(order.order_sn.clone());
        self.order_log.push(order.id.clone());
        self.orders.insert(order.id.clone(), order.clone());
        info!(status = %order.status, "Order committed");
        let _ = respond_to.send(Ok(order));
    }

    #[cfg(test)]
    fn take_injected_failure(&mut self) -> bool {
        std::mem::take(&mut self.fail_next_commit)
    }

    #[cfg(not(test))]
    fn take_injected_failure(&mut self) -> bool {
        false
    }

    #[instrument(skip(self, respond_to))]
    fn handle_list_orders(&self, query: OrderQuery, respond_to: ServiceResponse<OrderPage, LedgerError>) {
        let (page, page_size) = query.paging();
        let matching: Vec<&Order> = self
            .order_log
            .iter()
            .rev()
            .filter_map(|id| self.orders.get(id))
            .filter(|order| query.matches(order))
            .collect();
        let total = matching.len();
        let offset = (page as usize - 1).saturating_mul(page_size as usize);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect();
        let _ = respond_to.send(Ok(OrderPage { items, total, page, page_size }));
    }

    #[instrument(fields(target = %change.target()), skip(self, change, respond_to))]
    fn handle_transition(&mut self, order_id: String, change: OrderChange, respond_to: ServiceResponse<Order, LedgerError>) {
        let Some(current) = self.orders.get(&order_id) else {
            send_error!(respond_to, LedgerError::OrderNotFound(order_id));
        };
        let from = current.status;
        let to = change.target();
        if !from.can_transition_to(to) {
            warn!(%from, %to, "Illegal order transition");
            send_error!(respond_to, LedgerError::IllegalTransition { order_id, from, to });
        }

        let now = Utc::now();
        let mut next = current.clone();
        match change {
            OrderChange::Status { status, note } => {
                next.status = status;
                if note.is_some() {
                    next.status_note = note;
                }
            }
            OrderChange::Paid { tx_hash, paid_amount } => {
                next.status = OrderStatus::Paid;
                merge_payment_payload(&mut next.payment_payload, tx_hash.as_deref(), paid_amount, now);
                if tx_hash.is_some() {
                    next.tx_hash = tx_hash;
                }
            }
            OrderChange::Deliver { record, consume_stock } => {
                if consume_stock {
                    let Some(product) = self.products.get_mut(&next.product_id) else {
                        send_error!(respond_to, LedgerError::ProductNotFound(next.product_id));
                    };
                    if let Err(e) = take_stock(product, next.quantity, now) {
                        warn!(error = %e, "Stock ran out before delivery");
                        send_error!(respond_to, e);
                    }
                }
                next.status = OrderStatus::Delivered;
                next.delivery = Some(record);
            }
        }
        next.updated_at = now;
        self.orders.insert(order_id, next.clone());
        info!(%from, to = %next.status, "Order transitioned");
        let _ = respond_to.send(Ok(next));
    }

    #[instrument(skip(self, respond_to))]
    fn handle_expire_stale(&mut self, now: DateTime<Utc>, respond_to: ServiceResponse<Vec<Order>, LedgerError>) {
        let mut expired = Vec::new();
        for order in self.orders.values_mut().filter(|order| order.is_expired_at(now)) {
            order.status = OrderStatus::Expired;
            order.status_note = Some("invoice expired before payment".into());
            order.updated_at = now;
            expired.push(order.clone());
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired unpaid orders");
        }
        let _ = respond_to.send(Ok(expired));
    }
}

/// Takes `quantity` off a counted product. Code-mode products are counted by
/// the inventory pool, whose reservation already claimed the units.
fn take_stock(product: &mut Product, quantity: u32, at: DateTime<Utc>) -> Result<(), LedgerError> {
    if product.delivery_mode.uses_inventory() {
        return Ok(());
    }
    if product.stock < quantity {
        return Err(LedgerError::InsufficientStock {
            product_id: product.id.clone(),
            requested: quantity,
            available: product.stock,
        });
    }
    product.stock -= quantity;
    product.updated_at = at;
    debug!(stock = product.stock, "Stock taken");
    Ok(())
}

fn merge_payment_payload(
    payload: &mut serde_json::Value,
    tx_hash: Option<&str>,
    paid_amount: Option<Decimal>,
    paid_at: DateTime<Utc>,
) {
    if !payload.is_object() {
        *payload = serde_json::Value::Object(serde_json::Map::new());
    }
    if let Some(map) = payload.as_object_mut() {
        map.insert("paidAt".into(), serde_json::Value::String(paid_at.to_rfc3339()));
        if let Some(tx_hash) = tx_hash {
            map.insert("txHash".into(), serde_json::Value::String(tx_hash.to_string()));
        }
        if let Some(amount) = paid_amount {
            map.insert("paidAmount".into(), serde_json::Value::String(amount.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{new_order_sn, Channel, DeliveryMode, DeliveryRecord, PaymentInvoice};

    fn spawn_ledger() -> LedgerClient {
        let (service, client) = LedgerService::new(32);
        tokio::spawn(service.run());
        client
    }

    fn text_product(stock: u32) -> Product {
        Product::new("p1", "Gift-Card", "Gift card", "USD", Decimal::new(10, 0))
            .with_delivery(DeliveryMode::Text, Some("use at example.com"))
            .with_stock(stock)
    }

    fn order(id: &str, status: OrderStatus, quantity: u32) -> Order {
        let now = Utc::now();
        Order {
            id: id.into(),
            order_sn: new_order_sn(now),
            buyer_id: "u1".into(),
            product_id: "p1".into(),
            product_title: "Gift card".into(),
            quantity,
            unit_amount: Decimal::new(10, 0),
            total_amount: Decimal::new(10, 0) * Decimal::from(quantity),
            currency: "USD".into(),
            channel: Channel::Web,
            status,
            invoice: None,
            payment_payload: serde_json::Value::Null,
            delivery: None,
            status_note: None,
            tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn invoice(id: &str, expires_at: DateTime<Utc>) -> PaymentInvoice {
        PaymentInvoice {
            invoice_id: id.into(),
            payment_url: format!("https://pay.test/pay/{id}"),
            amount: Decimal::new(10, 0),
            currency: "USD".into(),
            expires_at,
            supported_currencies: vec!["USD".into()],
        }
    }

    #[tokio::test]
    async fn test_product_lookup_by_id_or_slug() {
        let ledger = spawn_ledger();
        let saved = ledger.upsert_product(text_product(3)).await.unwrap();
        assert_eq!(saved.slug, "gift-card");

        assert!(ledger.get_product("p1".into()).await.unwrap().is_some());
        assert!(ledger.get_product("GIFT-CARD".into()).await.unwrap().is_some());
        assert!(ledger.get_product("nope".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_normalizes_and_rejects_slug_clash() {
        let ledger = spawn_ledger();
        let mut product = text_product(3);
        product.price_map = [("usd".to_string(), Decimal::new(10, 0)), ("eur".to_string(), Decimal::new(9, 0))]
            .into_iter()
            .collect();
        product.default_currency = "usd".into();
        let saved = ledger.upsert_product(product).await.unwrap();
        assert_eq!(saved.default_currency, "USD");
        assert!(saved.price_map.contains_key("EUR"));
        assert_eq!(saved.resolve_currency(Some("eur")).map(|(code, _)| code).as_deref(), Some("EUR"));

        let clash = Product::new("p2", "gift-card", "Other", "USD", Decimal::new(5, 0));
        assert!(matches!(ledger.upsert_product(clash).await, Err(LedgerError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_code_products_keep_no_counter() {
        let ledger = spawn_ledger();
        let codes = Product::new("p1", "codes", "Codes", "USD", Decimal::new(5, 0)).with_stock(99);
        assert_eq!(ledger.upsert_product(codes.clone()).await.unwrap().stock, 0);

        // Delivery commits never fail on a counter the pool owns.
        ledger.commit_order(order("o1", OrderStatus::Delivered, 2), true).await.unwrap();
        ledger.commit_order(order("o2", OrderStatus::Paid, 1), false).await.unwrap();
        let record = DeliveryRecord::codes(&["A".to_string()], Utc::now());
        let delivered = ledger
            .transition_order("o2".into(), OrderChange::Deliver { record, consume_stock: true })
            .await
            .unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(ledger.get_product("p1".into()).await.unwrap().unwrap().stock, 0);
    }

    #[tokio::test]
    async fn test_commit_order_consumes_stock_atomically() {
        let ledger = spawn_ledger();
        ledger.upsert_product(text_product(1)).await.unwrap();

        let first = ledger.commit_order(order("o1", OrderStatus::Delivered, 1), true).await;
        assert!(first.is_ok());
        let second = ledger.commit_order(order("o2", OrderStatus::Delivered, 1), true).await;
        assert!(matches!(second, Err(LedgerError::InsufficientStock { available: 0, .. })));

        assert_eq!(ledger.get_product("p1".into()).await.unwrap().unwrap().stock, 0);
        assert_eq!(ledger.get_order_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_rejects_duplicate_invoice() {
        let ledger = spawn_ledger();
        ledger.upsert_product(text_product(5)).await.unwrap();

        let mut a = order("o1", OrderStatus::AwaitingPayment, 1);
        a.invoice = Some(invoice("inv-1", Utc::now()));
        let mut b = order("o2", OrderStatus::AwaitingPayment, 1);
        b.invoice = Some(invoice("inv-1", Utc::now()));

        ledger.commit_order(a, false).await.unwrap();
        assert!(matches!(ledger.commit_order(b, false).await, Err(LedgerError::Conflict(_))));

        let found = ledger.find_order_by_invoice("inv-1".into()).await.unwrap().unwrap();
        assert_eq!(found.id, "o1");
        assert_eq!(ledger.get_product("p1".into()).await.unwrap().unwrap().stock, 5);
    }

    #[tokio::test]
    async fn test_transitions_follow_state_machine() {
        let ledger = spawn_ledger();
        ledger.upsert_product(text_product(2)).await.unwrap();
        ledger.commit_order(order("o1", OrderStatus::AwaitingPayment, 1), false).await.unwrap();

        let paid = ledger
            .transition_order(
                "o1".into(),
                OrderChange::Paid { tx_hash: Some("0xabc".into()), paid_amount: Some(Decimal::new(10, 0)) },
            )
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(paid.payment_payload["paidAmount"], "10");

        let again = ledger
            .transition_order("o1".into(), OrderChange::Paid { tx_hash: None, paid_amount: None })
            .await;
        assert!(matches!(again, Err(LedgerError::IllegalTransition { from: OrderStatus::Paid, .. })));

        let record = DeliveryRecord::note("use at example.com", Utc::now());
        let delivered = ledger
            .transition_order("o1".into(), OrderChange::Deliver { record, consume_stock: true })
            .await
            .unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(ledger.get_product("p1".into()).await.unwrap().unwrap().stock, 1);

        let refund = ledger
            .transition_order("o1".into(), OrderChange::Status { status: OrderStatus::Refunded, note: None })
            .await;
        assert!(matches!(refund, Err(LedgerError::IllegalTransition { .. })));
    }

    #[tokio::test]
    async fn test_deliver_without_stock_leaves_order_untouched() {
        let ledger = spawn_ledger();
        ledger.upsert_product(text_product(0)).await.unwrap();
        ledger.commit_order(order("o1", OrderStatus::Paid, 1), false).await.unwrap();

        let record = DeliveryRecord::note("x", Utc::now());
        let result = ledger
            .transition_order("o1".into(), OrderChange::Deliver { record, consume_stock: true })
            .await;
        assert!(matches!(result, Err(LedgerError::InsufficientStock { .. })));
        let order = ledger.get_order("o1".into()).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.delivery.is_none());
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_with_filters() {
        let ledger = spawn_ledger();
        ledger.upsert_product(text_product(10)).await.unwrap();
        for (id, buyer) in [("o1", "u1"), ("o2", "u2"), ("o3", "u1")] {
            let mut order = order(id, OrderStatus::Delivered, 1);
            order.buyer_id = buyer.into();
            ledger.commit_order(order, true).await.unwrap();
        }

        let query = OrderQuery { buyer_id: Some("u1".into()), ..Default::default() };
        let page = ledger.list_orders(query).await.unwrap();
        let ids: Vec<&str> = page.items.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["o3", "o1"]);
        assert_eq!(page.total, 2);

        let query = OrderQuery { page: Some(2), page_size: Some(2), ..Default::default() };
        let page = ledger.list_orders(query).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "o1");
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn test_expire_stale_only_touches_lapsed_invoices() {
        let ledger = spawn_ledger();
        ledger.upsert_product(text_product(1)).await.unwrap();
        let now = Utc::now();

        let mut lapsed = order("o1", OrderStatus::AwaitingPayment, 1);
        lapsed.invoice = Some(invoice("inv-1", now - chrono::Duration::minutes(1)));
        let mut fresh = order("o2", OrderStatus::AwaitingPayment, 1);
        fresh.invoice = Some(invoice("inv-2", now + chrono::Duration::minutes(10)));
        ledger.commit_order(lapsed, false).await.unwrap();
        ledger.commit_order(fresh, false).await.unwrap();

        let expired = ledger.expire_stale(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "o1");
        assert_eq!(ledger.get_order("o2".into()).await.unwrap().unwrap().status, OrderStatus::AwaitingPayment);
    }
}

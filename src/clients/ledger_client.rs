use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::{Order, OrderPage, OrderQuery, Product};
use crate::ledger_actor::LedgerError;
use crate::messages::{LedgerRequest, OrderChange};

#[derive(Clone)]
pub struct LedgerClient {
    sender: mpsc::Sender<LedgerRequest>,
}

impl LedgerClient {
    pub fn new(sender: mpsc::Sender<LedgerRequest>) -> Self {
        Self { sender }
    }

    pub async fn shutdown(&self) -> Result<(), LedgerError> {
        self.sender
            .send(LedgerRequest::Shutdown)
            .await
            .map_err(|_| LedgerError::ActorCommunicationError("Actor closed".to_string()))
    }
}

client_method!(LedgerClient => fn get_product(key: String) -> Option<Product> as LedgerRequest::GetProduct, Error = LedgerError);
client_method!(LedgerClient => fn list_products() -> Vec<Product> as LedgerRequest::ListProducts, Error = LedgerError);
client_method!(LedgerClient => fn upsert_product(product: Product) -> Product as LedgerRequest::UpsertProduct, Error = LedgerError);
client_method!(LedgerClient => fn commit_order(order: Order, consume_stock: bool) -> Order as LedgerRequest::CommitOrder, Error = LedgerError);
client_method!(LedgerClient => fn get_order(id: String) -> Option<Order> as LedgerRequest::GetOrder, Error = LedgerError);
client_method!(LedgerClient => fn find_order_by_invoice(invoice_id: String) -> Option<Order> as LedgerRequest::FindOrderByInvoice, Error = LedgerError);
client_method!(LedgerClient => fn list_orders(query: OrderQuery) -> OrderPage as LedgerRequest::ListOrders, Error = LedgerError);
client_method!(LedgerClient => fn transition_order(order_id: String, change: OrderChange) -> Order as LedgerRequest::TransitionOrder, Error = LedgerError);
client_method!(LedgerClient => fn expire_stale(now: DateTime<Utc>) -> Vec<Order> as LedgerRequest::ExpireStale, Error = LedgerError);

// Test-only messages for forcing failures and reading internal state
client_method!(#[cfg(test)] LedgerClient => fn fail_next_commit() -> () as LedgerRequest::FailNextCommit, Error = LedgerError);
client_method!(#[cfg(test)] LedgerClient => fn get_order_count() -> usize as LedgerRequest::GetOrderCount, Error = LedgerError);

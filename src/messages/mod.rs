use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use crate::domain::{
    DeliveryRecord, InventorySnapshot, Order, OrderPage, OrderQuery, OrderStatus, Product,
    UploadSummary,
};
use crate::inventory_actor::InventoryError;
use crate::ledger_actor::LedgerError;

/// Generic type aliases for service communication
pub type ServiceResult<T, E> = std::result::Result<T, E>;
pub type ServiceResponse<T, E> = oneshot::Sender<ServiceResult<T, E>>;

/// Messages for the inventory pool. Each variant carries its parameters and a
/// oneshot channel for the reply.
#[derive(Debug)]
pub enum InventoryRequest {
    /// Take one code; `None` when the pool is empty.
    Pop {
        product_id: String,
        respond_to: ServiceResponse<Option<String>, InventoryError>,
    },
    /// Take `count` codes or none at all.
    Reserve {
        product_id: String,
        count: u32,
        respond_to: ServiceResponse<Option<Vec<String>>, InventoryError>,
    },
    /// Return a reserved code to the front of the queue. `false` if it was already available.
    Push {
        product_id: String,
        code: String,
        respond_to: ServiceResponse<bool, InventoryError>,
    },
    Bind {
        product_id: String,
        code: String,
        order_id: String,
        respond_to: ServiceResponse<(), InventoryError>,
    },
    BulkUpload {
        product_id: String,
        codes: Vec<String>,
        clear_existing: bool,
        respond_to: ServiceResponse<UploadSummary, InventoryError>,
    },
    Snapshot {
        product_id: String,
        respond_to: ServiceResponse<InventorySnapshot, InventoryError>,
    },
    AvailableCount {
        product_id: String,
        respond_to: ServiceResponse<u32, InventoryError>,
    },
    Shutdown,
}

/// A status change applied atomically by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderChange {
    Status {
        status: OrderStatus,
        note: Option<String>,
    },
    Paid {
        tx_hash: Option<String>,
        paid_amount: Option<Decimal>,
    },
    /// Move to `delivered`, optionally taking `quantity` units off the product's
    /// stock counter. Code-mode products have none; the pool reservation is the take.
    Deliver {
        record: DeliveryRecord,
        consume_stock: bool,
    },
}

impl OrderChange {
    pub fn target(&self) -> OrderStatus {
        match self {
            OrderChange::Status { status, .. } => *status,
            OrderChange::Paid { .. } => OrderStatus::Paid,
            OrderChange::Deliver { .. } => OrderStatus::Delivered,
        }
    }
}

/// Messages for the product and order ledger.
#[derive(Debug)]
pub enum LedgerRequest {
    /// Lookup by id, then by slug.
    GetProduct {
        key: String,
        respond_to: ServiceResponse<Option<Product>, LedgerError>,
    },
    ListProducts {
        respond_to: ServiceResponse<Vec<Product>, LedgerError>,
    },
    UpsertProduct {
        product: Product,
        respond_to: ServiceResponse<Product, LedgerError>,
    },
    /// Insert a new order, taking its quantity off the stock counter when
    /// `consume_stock` is set.
    CommitOrder {
        order: Order,
        consume_stock: bool,
        respond_to: ServiceResponse<Order, LedgerError>,
    },
    GetOrder {
        id: String,
        respond_to: ServiceResponse<Option<Order>, LedgerError>,
    },
    FindOrderByInvoice {
        invoice_id: String,
        respond_to: ServiceResponse<Option<Order>, LedgerError>,
    },
    ListOrders {
        query: OrderQuery,
        respond_to: ServiceResponse<OrderPage, LedgerError>,
    },
    TransitionOrder {
        order_id: String,
        change: OrderChange,
        respond_to: ServiceResponse<Order, LedgerError>,
    },
    ExpireStale {
        now: DateTime<Utc>,
        respond_to: ServiceResponse<Vec<Order>, LedgerError>,
    },
    Shutdown,
    #[cfg(test)]
    FailNextCommit {
        respond_to: ServiceResponse<(), LedgerError>,
    },
    #[cfg(test)]
    GetOrderCount {
        respond_to: ServiceResponse<usize, LedgerError>,
    },
}

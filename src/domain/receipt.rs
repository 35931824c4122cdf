use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{Channel, Order, OrderStatus, PaymentInvoice};
use super::product::{DeliveryMode, Product};

/// Channel-neutral purchase request handed to the ledger by every frontend.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRequest {
    pub product_id: String,
    pub buyer_id: String,
    pub quantity: u32,
    pub currency: Option<String>,
    pub channel: Channel,
}

impl PurchaseRequest {
    pub fn new(product_id: impl Into<String>, buyer_id: impl Into<String>, channel: Channel) -> Self {
        Self {
            product_id: product_id.into(),
            buyer_id: buyer_id.into(),
            quantity: 1,
            currency: None,
            channel,
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub delivery_mode: DeliveryMode,
}

impl From<&Product> for ProductSnapshot {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            slug: product.slug.clone(),
            title: product.title.clone(),
            delivery_mode: product.delivery_mode,
        }
    }
}

/// What a buyer gets back from a purchase, rendered per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: String,
    pub order_sn: String,
    pub status: OrderStatus,
    pub product: ProductSnapshot,
    pub currency: String,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<PaymentInvoice>,
}

impl OrderReceipt {
    pub fn from_order(order: &Order, product: &Product) -> Self {
        let delivery = order.delivery.as_ref();
        Self {
            order_id: order.id.clone(),
            order_sn: order.order_sn.clone(),
            status: order.status,
            product: ProductSnapshot::from(product),
            currency: order.currency.clone(),
            amount: order.total_amount,
            code: delivery.and_then(|record| record.code.clone()),
            instructions: delivery.and_then(|record| record.note.clone()),
            invoice: order.invoice.clone(),
        }
    }
}

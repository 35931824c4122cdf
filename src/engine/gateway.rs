use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, instrument};

use crate::domain::PaymentInvoice;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("Gateway does not accept {0}")]
    UnsupportedCurrency(String),
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Gateway rejected the invoice: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceRequest {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub supported_currencies: Vec<String>,
    pub description: String,
}

/// Mints payment invoices for gateway-flow orders.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<PaymentInvoice, GatewayError>;
}

/// Issues invoices that point at a hosted payment page.
pub struct HostedInvoiceIssuer {
    base_url: String,
    ttl: Duration,
}

impl HostedInvoiceIssuer {
    pub fn new(base_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl,
        }
    }
}

#[async_trait]
impl PaymentGateway for HostedInvoiceIssuer {
    #[instrument(fields(order_id = %request.order_id), skip(self, request))]
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<PaymentInvoice, GatewayError> {
        if !request.supported_currencies.contains(&request.currency) {
            return Err(GatewayError::UnsupportedCurrency(request.currency));
        }
        if request.amount <= Decimal::ZERO {
            return Err(GatewayError::Rejected(format!("amount {} is not payable", request.amount)));
        }

        let invoice_id = uuid::Uuid::new_v4().to_string();
        let invoice = PaymentInvoice {
            payment_url: format!("{}/pay/{}", self.base_url, invoice_id),
            invoice_id,
            amount: request.amount,
            currency: request.currency,
            expires_at: Utc::now() + self.ttl,
            supported_currencies: request.supported_currencies,
        };
        info!(invoice_id = %invoice.invoice_id, "Invoice issued");
        Ok(invoice)
    }
}

//! HTTP storefront.
//!
//! GET  /health
//! GET  /api/store/catalog
//! GET  /api/store/products/{idOrSlug}
//! POST /api/shop/orders
//! GET  /api/shop/orders
//! POST /api/payments/webhook  (raw body, HMAC in `x-signature`)

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{CatalogTree, Channel, OrderPage, OrderQuery, OrderReceipt, OrderStatus, Product, PurchaseRequest};
use crate::engine::{CatalogStore, OrderLedger, PaymentReconciler, ReconcileOutcome};
use crate::error::EngineError;

pub const BUYER_HEADER: &str = "x-buyer-id";
pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogStore,
    pub orders: OrderLedger,
    pub reconciler: PaymentReconciler,
}

pub fn router(state: AppState) -> Router {
    let store = Router::new()
        .route("/api/store/catalog", get(catalog_tree))
        .route("/api/store/products/{id_or_slug}", get(product_detail));

    let shop = Router::new().route("/api/shop/orders", post(create_order).get(list_orders));

    // Signature-verified, raw body
    let webhook = Router::new().route("/api/payments/webhook", post(payment_webhook));

    Router::new()
        .route("/health", get(health_check))
        .merge(store)
        .merge(shop)
        .merge(webhook)
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: u32,
    message: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            code: code.code(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Buyer identity established by the upstream session layer.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyerSession {
    pub buyer_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for BuyerSession {
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(BUYER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|buyer| !buyer.is_empty())
            .map(|buyer| BuyerSession { buyer_id: buyer.to_string() })
            .ok_or(EngineError::Unauthorized)
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn catalog_tree(State(state): State<AppState>) -> Result<Response, EngineError> {
    let tree: Arc<CatalogTree> = state.catalog.get_catalog_tree().await?;
    Ok(Json(tree.as_ref()).into_response())
}

async fn product_detail(
    State(state): State<AppState>,
    Path(id_or_slug): Path<String>,
) -> Result<Json<Product>, EngineError> {
    state
        .catalog
        .get_product(&id_or_slug)
        .await?
        .map(Json)
        .ok_or_else(|| EngineError::NotFound(format!("product {id_or_slug}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderBody {
    product_id: String,
    #[serde(default)]
    quantity: Option<u32>,
    #[serde(default)]
    currency: Option<String>,
}

async fn create_order(
    State(state): State<AppState>,
    session: BuyerSession,
    Json(body): Json<CreateOrderBody>,
) -> Result<(StatusCode, Json<OrderReceipt>), EngineError> {
    let mut request = PurchaseRequest::new(body.product_id, session.buyer_id, Channel::Web)
        .with_quantity(body.quantity.unwrap_or(1));
    request.currency = body.currency;

    let receipt = state.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListOrdersParams {
    status: Option<OrderStatus>,
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn list_orders(
    State(state): State<AppState>,
    session: BuyerSession,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<OrderPage>, EngineError> {
    // Buyers only ever see their own orders.
    let query = OrderQuery {
        status: params.status,
        buyer_id: Some(session.buyer_id),
        product_id: None,
        page: params.page,
        page_size: params.page_size,
    };
    Ok(Json(state.orders.list_orders(query).await?))
}

async fn payment_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());

    match state.reconciler.ingest(&body, signature).await {
        Ok(ReconcileOutcome::NoMatch) => {
            Json(serde_json::json!({ "ok": true, "message": "No matching order" })).into_response()
        }
        Ok(outcome) => {
            info!(?outcome, "Webhook processed");
            Json(serde_json::json!({ "ok": true })).into_response()
        }
        Err(EngineError::SignatureInvalid) => StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => e.into_response(),
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::actor_framework::ResourceActor;
use crate::app_system::Config;
use crate::clients::{CategoryClient, InventoryClient, LedgerClient};
use crate::domain::{Category, UploadSummary};
use crate::engine::{
    CatalogStore, DeliveryDispatcher, HostedInvoiceIssuer, Notifier, OrderLedger, PaymentReconciler,
};
use crate::error::EngineError;
use crate::frontends::{AppState, ChatCommerceFrontend};

/// Result of a restock: what the pool took, the stock level it left, and how
/// many waiting orders it unblocked.
#[derive(Debug, Clone, PartialEq)]
pub struct RestockReport {
    pub upload: UploadSummary,
    pub stock: u32,
    pub delivered: usize,
}

/// Starts the services, wires the engine together, and handles shutdown.
pub struct FulfillmentSystem {
    pub catalog: CatalogStore,
    pub orders: OrderLedger,
    pub dispatcher: DeliveryDispatcher,
    pub reconciler: PaymentReconciler,
    ledger: LedgerClient,
    inventory: InventoryClient,
    categories: CategoryClient,
    handles: Vec<JoinHandle<()>>,
    sweeper: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl FulfillmentSystem {
    pub fn start(config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        let mut handles = Vec::new();

        let (ledger_service, ledger) = crate::ledger_actor::LedgerService::new(config.mailbox_size);
        handles.push(tokio::spawn(ledger_service.run()));

        let (inventory_service, inventory) = crate::inventory_actor::InventoryService::new(config.mailbox_size);
        handles.push(tokio::spawn(inventory_service.run()));

        let category_counter = Arc::new(AtomicU64::new(1));
        let next_category_id = move || format!("cat_{}", category_counter.fetch_add(1, Ordering::SeqCst));
        let (category_actor, category_resource_client) =
            ResourceActor::<Category>::new(config.mailbox_size, next_category_id);
        let categories = CategoryClient::new(category_resource_client);
        handles.push(tokio::spawn(category_actor.run()));

        let catalog = CatalogStore::new(ledger.clone(), inventory.clone(), categories.clone(), config.catalog_cache_ttl);
        let gateway = Arc::new(HostedInvoiceIssuer::new(&config.payment_base_url, config.invoice_ttl));
        let orders = OrderLedger::new(ledger.clone(), inventory.clone(), catalog.clone(), gateway, config.flows);
        let dispatcher = DeliveryDispatcher::new(orders.clone(), inventory.clone(), notifier);
        let reconciler = PaymentReconciler::new(config.webhook_secret.as_bytes(), orders.clone(), dispatcher.clone());

        let sweeper = spawn_expiry_sweeper(orders.clone(), dispatcher.clone(), config.expiry_sweep_interval);
        info!(flows = ?config.flows, "Fulfillment system started");

        Self {
            catalog,
            orders,
            dispatcher,
            reconciler,
            ledger,
            inventory,
            categories,
            handles,
            sweeper: Some(sweeper),
        }
    }

    pub fn web_state(&self) -> AppState {
        AppState {
            catalog: self.catalog.clone(),
            orders: self.orders.clone(),
            reconciler: self.reconciler.clone(),
        }
    }

    pub fn chat_frontend(&self) -> ChatCommerceFrontend {
        ChatCommerceFrontend::new(self.catalog.clone(), self.orders.clone())
    }

    pub fn inventory(&self) -> &InventoryClient {
        &self.inventory
    }

    pub fn ledger(&self) -> &LedgerClient {
        &self.ledger
    }

    /// Loads new codes, refreshes the catalog and delivers any orders that were
    /// waiting on this product. The pool is the product's stock, so this is the
    /// only write.
    #[instrument(skip(self, codes), fields(codes = codes.len()))]
    pub async fn restock(
        &self,
        product_id: &str,
        codes: Vec<String>,
        clear_existing: bool,
    ) -> Result<RestockReport, EngineError> {
        let product = self
            .ledger
            .get_product(product_id.to_string())
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("product {product_id}")))?;
        if !product.delivery_mode.uses_inventory() {
            return Err(EngineError::InvalidRequest(format!(
                "product {product_id} is not delivered from codes"
            )));
        }

        let upload = self.inventory.bulk_upload(product.id.clone(), codes, clear_existing).await?;
        let stock = upload.available;
        self.catalog.invalidate();
        info!(added = upload.added, cleared = upload.cleared, stock, "Inventory restocked");

        let delivered = self.dispatcher.retry_awaiting_stock(&product.id).await?;
        Ok(RestockReport { upload, stock, delivered })
    }

    /// Gracefully shutdown the entire system
    pub async fn shutdown(mut self) -> Result<(), String> {
        info!("Shutting down fulfillment system");

        if let Some((stop, handle)) = self.sweeper.take() {
            let _ = stop.send(());
            if let Err(e) = handle.await {
                error!(error = ?e, "Expiry sweeper shutdown error");
            }
        }

        let _ = self.ledger.shutdown().await;
        let _ = self.inventory.shutdown().await;
        let _ = self.categories.shutdown().await;

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = ?e, "Service shutdown error");
            }
        }

        info!("Fulfillment system shutdown complete");
        Ok(())
    }
}

fn spawn_expiry_sweeper(
    orders: OrderLedger,
    dispatcher: DeliveryDispatcher,
    every: std::time::Duration,
) -> (oneshot::Sender<()>, JoinHandle<()>) {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    match orders.expire_stale(Utc::now()).await {
                        Ok(expired) => {
                            for order in &expired {
                                dispatcher
                                    .notify(order, crate::engine::NotificationKind::PaymentClosed {
                                        reason: "payment window expired".to_string(),
                                    })
                                    .await;
                            }
                            if !expired.is_empty() {
                                info!(count = expired.len(), "Expired unpaid orders");
                            }
                        }
                        Err(e) => warn!(error = %e, "Expiry sweep failed"),
                    }
                }
            }
        }
    });
    (stop_tx, handle)
}

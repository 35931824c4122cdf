//! Inventory pool service.
//!
//! Owns every product's redemption codes. Each request is handled to completion
//! before the next one is read from the mailbox, so `pop`/`reserve` are a single
//! read-modify-write and two buyers can never receive the same code.

pub mod error;

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::clients::InventoryClient;
use crate::domain::{CodeStatus, InventoryCode, InventorySnapshot, UploadSummary};
use crate::messages::{InventoryRequest, ServiceResponse};

pub use error::InventoryError;

/// Codes for one product: the hand-out queue plus every code ever uploaded.
#[derive(Default)]
struct ProductPool {
    queue: VecDeque<String>,
    codes: HashMap<String, InventoryCode>,
}

impl ProductPool {
    fn available(&self) -> u32 {
        u32::try_from(self.queue.len()).unwrap_or(u32::MAX)
    }

    fn take(&mut self) -> Option<String> {
        let code = self.queue.pop_front()?;
        if let Some(entry) = self.codes.get_mut(&code) {
            entry.status = CodeStatus::Reserved;
        }
        Some(code)
    }
}

pub struct InventoryService {
    receiver: mpsc::Receiver<InventoryRequest>,
    pools: HashMap<String, ProductPool>,
}

impl InventoryService {
    pub fn new(buffer_size: usize) -> (Self, InventoryClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let service = Self {
            receiver,
            pools: HashMap::new(),
        };
        (service, InventoryClient::new(sender))
    }

    #[instrument(name = "inventory_service", skip(self))]
    pub async fn run(mut self) {
        info!("InventoryService starting");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                InventoryRequest::Pop { product_id, respond_to } => {
                    self.handle_pop(product_id, respond_to);
                }
                InventoryRequest::Reserve { product_id, count, respond_to } => {
                    self.handle_reserve(product_id, count, respond_to);
                }
                InventoryRequest::Push { product_id, code, respond_to } => {
                    self.handle_push(product_id, code, respond_to);
                }
                InventoryRequest::Bind { product_id, code, order_id, respond_to } => {
                    self.handle_bind(product_id, code, order_id, respond_to);
                }
                InventoryRequest::BulkUpload { product_id, codes, clear_existing, respond_to } => {
                    self.handle_bulk_upload(product_id, codes, clear_existing, respond_to);
                }
                InventoryRequest::Snapshot { product_id, respond_to } => {
                    self.handle_snapshot(product_id, respond_to);
                }
                InventoryRequest::AvailableCount { product_id, respond_to } => {
                    let count = self.pools.get(&product_id).map_or(0, ProductPool::available);
                    let _ = respond_to.send(Ok(count));
                }
                InventoryRequest::Shutdown => {
                    info!("InventoryService shutting down");
                    break;
                }
            }
        }

        info!("InventoryService stopped");
    }

    #[instrument(skip(self, respond_to))]
    fn handle_pop(&mut self, product_id: String, respond_to: ServiceResponse<Option<String>, InventoryError>) {
        let code = self.pools.get_mut(&product_id).and_then(ProductPool::take);
        match &code {
            Some(_) => debug!("Code reserved"),
            None => debug!("Pool empty"),
        }
        let _ = respond_to.send(Ok(code));
    }

    #[instrument(skip(self, respond_to))]
    fn handle_reserve(
        &mut self,
        product_id: String,
        count: u32,
        respond_to: ServiceResponse<Option<Vec<String>>, InventoryError>,
    ) {
        if count == 0 {
            send_error!(respond_to, InventoryError::InvalidRequest("count must be at least 1".into()));
        }
        let Some(pool) = self.pools.get_mut(&product_id).filter(|pool| pool.available() >= count) else {
            debug!("Not enough codes to reserve");
            let _ = respond_to.send(Ok(None));
            return;
        };
        let codes: Vec<String> = (0..count).filter_map(|_| pool.take()).collect();
        debug!(reserved = codes.len(), "Codes reserved");
        let _ = respond_to.send(Ok(Some(codes)));
    }

    /// Compensation path: puts a reserved code back at the front of the queue.
    #[instrument(skip(self, code, respond_to))]
    fn handle_push(&mut self, product_id: String, code: String, respond_to: ServiceResponse<bool, InventoryError>) {
        let Some(entry) = self
            .pools
            .get_mut(&product_id)
            .and_then(|pool| pool.codes.get_mut(&code))
        else {
            warn!("Push for an unknown code");
            send_error!(respond_to, InventoryError::UnknownCode { product_id, code });
        };

        match entry.status {
            CodeStatus::Available => {
                debug!("Code already available, nothing to return");
                let _ = respond_to.send(Ok(false));
            }
            CodeStatus::Used => {
                let order_id = entry.order_id.clone().unwrap_or_default();
                warn!(order_id = %order_id, "Refusing to return a used code");
                let _ = respond_to.send(Err(InventoryError::AlreadyUsed { code, order_id }));
            }
            CodeStatus::Reserved => {
                entry.status = CodeStatus::Available;
                if let Some(pool) = self.pools.get_mut(&product_id) {
                    pool.queue.push_front(code);
                }
                info!("Code returned to pool");
                let _ = respond_to.send(Ok(true));
            }
        }
    }

    #[instrument(skip(self, code, respond_to))]
    fn handle_bind(
        &mut self,
        product_id: String,
        code: String,
        order_id: String,
        respond_to: ServiceResponse<(), InventoryError>,
    ) {
        let Some(entry) = self
            .pools
            .get_mut(&product_id)
            .and_then(|pool| pool.codes.get_mut(&code))
        else {
            send_error!(respond_to, InventoryError::UnknownCode { product_id, code });
        };

        let result = match entry.status {
            CodeStatus::Reserved => {
                entry.status = CodeStatus::Used;
                entry.order_id = Some(order_id);
                entry.delivered_at = Some(Utc::now());
                debug!("Code bound to order");
                Ok(())
            }
            CodeStatus::Used if entry.order_id.as_deref() == Some(order_id.as_str()) => Ok(()),
            CodeStatus::Used => Err(InventoryError::AlreadyUsed {
                code,
                order_id: entry.order_id.clone().unwrap_or_default(),
            }),
            CodeStatus::Available => Err(InventoryError::NotReserved { code }),
        };
        let _ = respond_to.send(result);
    }

    #[instrument(fields(submitted = codes.len()), skip(self, codes, respond_to))]
    fn handle_bulk_upload(
        &mut self,
        product_id: String,
        codes: Vec<String>,
        clear_existing: bool,
        respond_to: ServiceResponse<UploadSummary, InventoryError>,
    ) {
        if product_id.trim().is_empty() {
            send_error!(respond_to, InventoryError::InvalidRequest("product id is required".into()));
        }

        let pool = self.pools.entry(product_id.clone()).or_default();
        let mut summary = UploadSummary::default();

        if clear_existing {
            // Used codes stay for audit; only the hand-out queue is dropped.
            for code in pool.queue.drain(..) {
                pool.codes.remove(&code);
                summary.cleared += 1;
            }
        }

        let mut seen = HashSet::new();
        for raw in codes {
            let code = raw.trim();
            if code.is_empty() || pool.codes.contains_key(code) || !seen.insert(code.to_string()) {
                summary.skipped += 1;
                continue;
            }
            pool.codes.insert(code.to_string(), InventoryCode::new(&product_id, code));
            pool.queue.push_back(code.to_string());
            summary.added += 1;
        }

        summary.available = pool.available();
        info!(
            added = summary.added,
            skipped = summary.skipped,
            cleared = summary.cleared,
            available = summary.available,
            "Codes uploaded"
        );
        let _ = respond_to.send(Ok(summary));
    }

    #[instrument(skip(self, respond_to))]
    fn handle_snapshot(&self, product_id: String, respond_to: ServiceResponse<InventorySnapshot, InventoryError>) {
        let mut snapshot = InventorySnapshot {
            product_id: product_id.clone(),
            ..Default::default()
        };
        if let Some(pool) = self.pools.get(&product_id) {
            snapshot.available = pool.queue.iter().cloned().collect();
            let mut reserved: Vec<&InventoryCode> = Vec::new();
            for entry in pool.codes.values() {
                match entry.status {
                    CodeStatus::Reserved => reserved.push(entry),
                    CodeStatus::Used => snapshot.used.push(entry.clone()),
                    CodeStatus::Available => {}
                }
            }
            reserved.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            snapshot.reserved = reserved.into_iter().map(|entry| entry.code.clone()).collect();
            snapshot.used.sort_by(|a, b| a.delivered_at.cmp(&b.delivered_at));
        }
        let _ = respond_to.send(Ok(snapshot));
    }
}

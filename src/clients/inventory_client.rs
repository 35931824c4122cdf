use tokio::sync::mpsc;

use crate::domain::{InventorySnapshot, UploadSummary};
use crate::inventory_actor::InventoryError;
use crate::messages::InventoryRequest;

#[derive(Clone)]
pub struct InventoryClient {
    sender: mpsc::Sender<InventoryRequest>,
}

impl InventoryClient {
    pub fn new(sender: mpsc::Sender<InventoryRequest>) -> Self {
        Self { sender }
    }

    pub async fn shutdown(&self) -> Result<(), InventoryError> {
        self.sender
            .send(InventoryRequest::Shutdown)
            .await
            .map_err(|_| InventoryError::ActorCommunicationError("Actor closed".to_string()))
    }
}

client_method!(InventoryClient => fn pop(product_id: String) -> Option<String> as InventoryRequest::Pop, Error = InventoryError);
client_method!(InventoryClient => fn reserve(product_id: String, count: u32) -> Option<Vec<String>> as InventoryRequest::Reserve, Error = InventoryError);
client_method!(InventoryClient => fn push(product_id: String, code: String) -> bool as InventoryRequest::Push, Error = InventoryError);
client_method!(InventoryClient => fn bind(product_id: String, code: String, order_id: String) -> () as InventoryRequest::Bind, Error = InventoryError);
client_method!(InventoryClient => fn bulk_upload(product_id: String, codes: Vec<String>, clear_existing: bool) -> UploadSummary as InventoryRequest::BulkUpload, Error = InventoryError);
client_method!(InventoryClient => fn snapshot(product_id: String) -> InventorySnapshot as InventoryRequest::Snapshot, Error = InventoryError);
client_method!(InventoryClient => fn available_count(product_id: String) -> u32 as InventoryRequest::AvailableCount, Error = InventoryError);

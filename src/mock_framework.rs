//! # Mock Framework
//!
//! Utilities for testing engine components without spinning up real services.
//!
//! Use [`create_mock_client`] or [`create_mock_ledger`] to get a client and the
//! receiving end of its mailbox, then answer requests by hand to script success,
//! failure or delays deterministically.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::actor_framework::{Entity, FrameworkError, ResourceClient, ResourceRequest};
use crate::clients::{InventoryClient, LedgerClient};
use crate::domain::Order;
use crate::engine::notifier::{Notification, Notifier, NotifyError};
use crate::ledger_actor::LedgerError;
use crate::messages::{InventoryRequest, LedgerRequest};

/// Creates a generic resource client whose requests land on the returned receiver.
pub fn create_mock_client<T: Entity>(buffer_size: usize) -> (ResourceClient<T>, mpsc::Receiver<ResourceRequest<T>>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (ResourceClient::new(sender), receiver)
}

pub fn create_mock_ledger(buffer_size: usize) -> (LedgerClient, mpsc::Receiver<LedgerRequest>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (LedgerClient::new(sender), receiver)
}

pub fn create_mock_inventory(buffer_size: usize) -> (InventoryClient, mpsc::Receiver<InventoryRequest>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (InventoryClient::new(sender), receiver)
}

/// Helper to verify that the next message is a Get request
pub async fn expect_get<T: Entity>(
    receiver: &mut mpsc::Receiver<ResourceRequest<T>>,
) -> Option<(T::Id, oneshot::Sender<Result<Option<T>, FrameworkError>>)> {
    match receiver.recv().await {
        Some(ResourceRequest::Get { id, respond_to }) => Some((id, respond_to)),
        _ => None,
    }
}

/// Helper to verify that the next message is a List request
pub async fn expect_list<T: Entity>(
    receiver: &mut mpsc::Receiver<ResourceRequest<T>>,
) -> Option<oneshot::Sender<Result<Vec<T>, FrameworkError>>> {
    match receiver.recv().await {
        Some(ResourceRequest::List { respond_to }) => Some(respond_to),
        _ => None,
    }
}

/// Helper to verify that the next ledger message is a CommitOrder request
pub async fn expect_commit(
    receiver: &mut mpsc::Receiver<LedgerRequest>,
) -> Option<(Order, bool, oneshot::Sender<Result<Order, LedgerError>>)> {
    match receiver.recv().await {
        Some(LedgerRequest::CommitOrder { order, consume_stock, respond_to }) => {
            Some((order, consume_stock, respond_to))
        }
        _ => None,
    }
}

/// Notifier that keeps every notification for later assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, CategoryCreate};

    #[tokio::test]
    async fn test_mock_client() {
        let (client, mut receiver) = create_mock_client::<Category>(10);

        let get_task = tokio::spawn(async move { client.get("cat_9".to_string()).await });

        let (id, responder) = expect_get(&mut receiver).await.expect("Expected Get request");
        assert_eq!(id, "cat_9");
        responder.send(Ok(None)).unwrap();

        assert_eq!(get_task.await.unwrap(), Ok(None));
    }

    #[tokio::test]
    async fn test_mock_client_sees_create_payload() {
        let (client, mut receiver) = create_mock_client::<Category>(10);

        let create_task = tokio::spawn(async move {
            client
                .create(CategoryCreate { name: "Games".into(), slug: "games".into(), sort: 1 })
                .await
        });

        match receiver.recv().await {
            Some(ResourceRequest::Create { params, respond_to }) => {
                assert_eq!(params.slug, "games");
                respond_to.send(Ok("cat_1".to_string())).unwrap();
            }
            _ => panic!("Expected Create request"),
        }
        assert_eq!(create_task.await.unwrap(), Ok("cat_1".to_string()));
    }
}

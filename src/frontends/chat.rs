//! Chat storefront: callback data in, rendered messages out.
//!
//! Transport (bot API, webhooks) lives outside the engine. This adapter only
//! turns a buyer's button press into engine calls and renders the result.

use std::str::FromStr;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::domain::{CatalogTree, Channel, Order, OrderQuery, OrderReceipt, OrderStatus, Product, PurchaseRequest};
use crate::engine::{CatalogStore, Notification, NotificationKind, Notifier, NotifyError, OrderLedger};
use crate::error::EngineError;

const RECENT_ORDERS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    Callback(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub action: ButtonAction,
}

impl Button {
    fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self { text: text.into(), action: ButtonAction::Callback(data.into()) }
    }

    fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self { text: text.into(), action: ButtonAction::Url(url.into()) }
    }
}

/// A rendered message addressed to one buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub buyer_id: String,
    pub text: String,
    pub keyboard: Vec<Vec<Button>>,
}

/// Parsed callback data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Home,
    Catalog,
    Orders,
    Product(String),
    OrderDetail(String),
    Buy { product_id: String, currency: Option<String> },
}

impl FromStr for ChatCommand {
    type Err = String;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = data.trim().split(':').collect();
        match parts.as_slice() {
            ["home"] | ["nav", "home"] => Ok(ChatCommand::Home),
            ["catalog"] | ["nav", "catalog"] => Ok(ChatCommand::Catalog),
            ["orders"] | ["nav", "orders"] => Ok(ChatCommand::Orders),
            ["catalog", "product", id] if !id.is_empty() => Ok(ChatCommand::Product(id.to_string())),
            ["order", "detail", id] if !id.is_empty() => Ok(ChatCommand::OrderDetail(id.to_string())),
            ["buy", id] if !id.is_empty() => Ok(ChatCommand::Buy { product_id: id.to_string(), currency: None }),
            ["buy", id, currency] if !id.is_empty() && !currency.is_empty() => Ok(ChatCommand::Buy {
                product_id: id.to_string(),
                currency: Some(currency.to_string()),
            }),
            _ => Err(format!("unrecognised callback: {data}")),
        }
    }
}

#[derive(Clone)]
pub struct ChatCommerceFrontend {
    catalog: CatalogStore,
    orders: OrderLedger,
}

impl ChatCommerceFrontend {
    pub fn new(catalog: CatalogStore, orders: OrderLedger) -> Self {
        Self { catalog, orders }
    }

    /// Handles one button press. Unknown data falls back to the home view.
    #[instrument(skip(self))]
    pub async fn handle_callback(&self, buyer_id: &str, data: &str) -> ChatMessage {
        let command = data.parse::<ChatCommand>().unwrap_or_else(|e| {
            debug!(error = %e, "Falling back to home view");
            ChatCommand::Home
        });
        match self.render(buyer_id, command).await {
            Ok(message) => message,
            Err(e) => error_view(buyer_id, &e),
        }
    }

    async fn render(&self, buyer_id: &str, command: ChatCommand) -> Result<ChatMessage, EngineError> {
        match command {
            ChatCommand::Home => Ok(home_view(buyer_id)),
            ChatCommand::Catalog => {
                let tree = self.catalog.get_catalog_tree().await?;
                Ok(catalog_view(buyer_id, &tree))
            }
            ChatCommand::Product(id) => {
                let product = self
                    .catalog
                    .get_product(&id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("product {id}")))?;
                Ok(product_view(buyer_id, &product))
            }
            ChatCommand::Orders => {
                let query = OrderQuery {
                    buyer_id: Some(buyer_id.to_string()),
                    page_size: Some(RECENT_ORDERS),
                    ..Default::default()
                };
                let page = self.orders.list_orders(query).await?;
                Ok(orders_view(buyer_id, &page.items))
            }
            ChatCommand::OrderDetail(id) => {
                let order = self
                    .orders
                    .get_order(&id)
                    .await?
                    .filter(|order| order.buyer_id == buyer_id)
                    .ok_or_else(|| EngineError::NotFound(format!("order {id}")))?;
                Ok(order_detail_view(&order))
            }
            ChatCommand::Buy { product_id, currency } => {
                let mut request = PurchaseRequest::new(product_id, buyer_id, Channel::Chat);
                request.currency = currency;
                let receipt = self.orders.create_order(request).await?;
                Ok(receipt_view(buyer_id, &receipt))
            }
        }
    }
}

fn home_row() -> Vec<Button> {
    vec![Button::callback("Home", "nav:home")]
}

fn home_view(buyer_id: &str) -> ChatMessage {
    ChatMessage {
        buyer_id: buyer_id.to_string(),
        text: "Welcome! Browse the catalog or check your orders.".to_string(),
        keyboard: vec![
            vec![Button::callback("Browse products", "nav:catalog")],
            vec![Button::callback("My orders", "nav:orders")],
        ],
    }
}

fn catalog_view(buyer_id: &str, tree: &CatalogTree) -> ChatMessage {
    if tree.categories.is_empty() {
        return ChatMessage {
            buyer_id: buyer_id.to_string(),
            text: "Nothing in stock right now.".to_string(),
            keyboard: vec![home_row()],
        };
    }
    let mut lines = vec!["Catalog".to_string()];
    let mut keyboard = Vec::new();
    for node in &tree.categories {
        lines.push(String::new());
        lines.push(node.category.name.clone());
        for product in &node.products {
            let price = product
                .price_label(&product.default_currency)
                .unwrap_or_default();
            lines.push(format!("  {} · {}", product.title, price));
            keyboard.push(vec![Button::callback(&product.title, format!("catalog:product:{}", product.id))]);
        }
    }
    keyboard.push(home_row());
    ChatMessage { buyer_id: buyer_id.to_string(), text: lines.join("\n"), keyboard }
}

fn product_view(buyer_id: &str, product: &Product) -> ChatMessage {
    let prices: Vec<String> = product
        .price_map
        .keys()
        .filter_map(|currency| product.price_label(currency))
        .collect();
    let mut text = format!("{}\nIn stock: {}\nPrice:\n{}", product.title, product.stock, prices.join("\n"));
    if let Some(description) = product.description.as_deref().filter(|d| !d.is_empty()) {
        text.push_str("\n\n");
        text.push_str(description);
    }

    let mut keyboard: Vec<Vec<Button>> = Vec::new();
    if product.stock > 0 {
        keyboard.push(
            product
                .price_map
                .keys()
                .map(|currency| Button::callback(format!("Buy ({currency})"), format!("buy:{}:{}", product.id, currency)))
                .collect(),
        );
    }
    keyboard.push(vec![Button::callback("Catalog", "nav:catalog")]);
    keyboard.push(home_row());
    ChatMessage { buyer_id: buyer_id.to_string(), text, keyboard }
}

fn orders_view(buyer_id: &str, orders: &[Order]) -> ChatMessage {
    if orders.is_empty() {
        return ChatMessage {
            buyer_id: buyer_id.to_string(),
            text: "No orders yet.".to_string(),
            keyboard: vec![vec![Button::callback("Browse products", "nav:catalog")], home_row()],
        };
    }
    let lines: Vec<String> = orders
        .iter()
        .map(|order| format!("#{} · {} · {} {}", order.order_sn, order.status, order.total_amount, order.currency))
        .collect();
    let mut keyboard: Vec<Vec<Button>> = orders
        .iter()
        .map(|order| vec![Button::callback(&order.order_sn, format!("order:detail:{}", order.id))])
        .collect();
    keyboard.push(home_row());
    ChatMessage {
        buyer_id: buyer_id.to_string(),
        text: format!("My orders\n\n{}", lines.join("\n")),
        keyboard,
    }
}

fn order_detail_view(order: &Order) -> ChatMessage {
    let delivery = match &order.delivery {
        Some(record) => record.code.as_deref().or(record.note.as_deref()).unwrap_or("done").to_string(),
        None => "pending".to_string(),
    };
    let text = format!(
        "Order {}\nStatus: {}\nAmount: {} {}\nPlaced: {}\nDelivery: {}",
        order.order_sn,
        order.status,
        order.total_amount,
        order.currency,
        order.created_at.format("%Y-%m-%d %H:%M UTC"),
        delivery
    );
    let mut keyboard = Vec::new();
    if order.status == OrderStatus::AwaitingPayment {
        if let Some(invoice) = &order.invoice {
            keyboard.push(vec![Button::url("Pay now", &invoice.payment_url)]);
        }
    }
    keyboard.push(vec![Button::callback("Refresh", format!("order:detail:{}", order.id))]);
    keyboard.push(vec![Button::callback("My orders", "nav:orders")]);
    ChatMessage { buyer_id: order.buyer_id.clone(), text, keyboard }
}

fn receipt_view(buyer_id: &str, receipt: &OrderReceipt) -> ChatMessage {
    let mut text = format!(
        "Order {}\nProduct: {}\nAmount: {} {}",
        receipt.order_sn, receipt.product.title, receipt.amount, receipt.currency
    );
    let mut keyboard = Vec::new();
    if let Some(invoice) = &receipt.invoice {
        text.push_str(&format!(
            "\nPay before {}. Tap refresh once paid.",
            invoice.expires_at.format("%Y-%m-%d %H:%M UTC")
        ));
        keyboard.push(vec![Button::url("Pay now", &invoice.payment_url)]);
    }
    if let Some(code) = &receipt.code {
        text.push_str(&format!("\n\nYour code:\n{code}"));
    }
    if let Some(instructions) = &receipt.instructions {
        text.push_str(&format!("\n\n{instructions}"));
    }
    keyboard.push(vec![Button::callback("Refresh", format!("order:detail:{}", receipt.order_id))]);
    keyboard.push(vec![Button::callback("My orders", "nav:orders")]);
    ChatMessage { buyer_id: buyer_id.to_string(), text, keyboard }
}

fn error_view(buyer_id: &str, error: &EngineError) -> ChatMessage {
    ChatMessage {
        buyer_id: buyer_id.to_string(),
        text: format!("⚠️ {}", error.public_message()),
        keyboard: vec![home_row()],
    }
}

fn notification_view(notification: &Notification) -> ChatMessage {
    let header = format!("Order {} · {}", notification.order_sn, notification.product_title);
    let text = match &notification.kind {
        NotificationKind::Delivered { code, instructions } => {
            let mut text = format!("{header}\nDelivered.");
            if let Some(code) = code {
                text.push_str(&format!("\n\nYour code:\n{code}"));
            }
            if let Some(instructions) = instructions {
                text.push_str(&format!("\n\n{instructions}"));
            }
            text
        }
        NotificationKind::AwaitingStock => {
            format!("{header}\nPayment received. We are restocking and will deliver as soon as possible.")
        }
        NotificationKind::PaymentClosed { reason } => format!("{header}\nClosed: {reason}"),
    };
    ChatMessage {
        buyer_id: notification.buyer_id.clone(),
        text,
        keyboard: vec![vec![Button::callback("View order", format!("order:detail:{}", notification.order_id))]],
    }
}

/// Pushes chat-channel notifications to an outbox drained by the bot transport.
#[derive(Clone)]
pub struct ChatNotifier {
    outbox: mpsc::Sender<ChatMessage>,
}

impl ChatNotifier {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ChatMessage>) {
        let (outbox, receiver) = mpsc::channel(buffer);
        (Self { outbox }, receiver)
    }
}

#[async_trait]
impl Notifier for ChatNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        if notification.channel != Channel::Chat {
            debug!(order_id = %notification.order_id, "Not a chat order, skipping");
            return Ok(());
        }
        self.outbox.send(notification_view(&notification)).await.map_err(|_| {
            warn!("Chat outbox closed");
            NotifyError("chat outbox closed".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor_framework::ResourceActor;
    use crate::clients::{CategoryClient, InventoryClient};
    use crate::domain::{Category, CategoryCreate, PaymentFlow};
    use crate::engine::{FlowPolicy, HostedInvoiceIssuer};
    use crate::inventory_actor::InventoryService;
    use crate::ledger_actor::LedgerService;
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_parse_callback_data() {
        assert_eq!("catalog".parse(), Ok(ChatCommand::Catalog));
        assert_eq!("nav:orders".parse(), Ok(ChatCommand::Orders));
        assert_eq!(
            "buy:p1".parse(),
            Ok(ChatCommand::Buy { product_id: "p1".into(), currency: None })
        );
        assert_eq!(
            "buy:p1:EUR".parse(),
            Ok(ChatCommand::Buy { product_id: "p1".into(), currency: Some("EUR".into()) })
        );
        assert_eq!("order:detail:o9".parse(), Ok(ChatCommand::OrderDetail("o9".into())));
        assert!("buy:".parse::<ChatCommand>().is_err());
        assert!("launch:missiles".parse::<ChatCommand>().is_err());
    }

    async fn frontend() -> (ChatCommerceFrontend, InventoryClient, CatalogStore) {
        let (ledger_service, ledger) = LedgerService::new(32);
        tokio::spawn(ledger_service.run());
        let (inventory_service, inventory) = InventoryService::new(32);
        tokio::spawn(inventory_service.run());
        let (category_actor, categories) = ResourceActor::<Category>::new(8, || "cat_1".to_string());
        tokio::spawn(category_actor.run());

        let catalog = CatalogStore::new(
            ledger.clone(),
            inventory.clone(),
            CategoryClient::new(categories),
            Duration::from_secs(60),
        );
        let gateway = Arc::new(HostedInvoiceIssuer::new("https://pay.test", chrono::Duration::minutes(15)));
        let flows = FlowPolicy { chat: PaymentFlow::Gateway, web: PaymentFlow::Instant };
        let orders = OrderLedger::new(ledger.clone(), inventory.clone(), catalog.clone(), gateway, flows);
        (ChatCommerceFrontend::new(catalog.clone(), orders), inventory, catalog)
    }

    #[tokio::test]
    async fn test_buy_renders_payment_link() {
        let (chat, inventory, catalog) = frontend().await;
        catalog
            .create_category(CategoryCreate { name: "Games".into(), slug: "games".into(), sort: 0 })
            .await
            .unwrap();
        catalog
            .upsert_product(
                Product::new("p1", "steam-10", "Steam 10", "USD", Decimal::new(10, 0)).in_category("cat_1", 0),
            )
            .await
            .unwrap();
        inventory.bulk_upload("p1".into(), vec!["K-1".into()], false).await.unwrap();
        catalog.invalidate();

        let listing = chat.handle_callback("u1", "catalog").await;
        assert!(listing.text.contains("Steam 10"));

        let message = chat.handle_callback("u1", "buy:p1").await;
        assert!(message.text.contains("USD"));
        let pay = message.keyboard.iter().flatten().find(|b| matches!(b.action, ButtonAction::Url(_)));
        assert!(pay.is_some(), "gateway receipt carries a pay button");

        let orders = chat.handle_callback("u1", "orders").await;
        assert!(orders.text.contains("awaiting_payment"));
        let other_buyer = chat.handle_callback("u2", "orders").await;
        assert_eq!(other_buyer.text, "No orders yet.");
    }

    #[tokio::test]
    async fn test_errors_render_as_warning() {
        let (chat, ..) = frontend().await;
        let message = chat.handle_callback("u1", "buy:missing").await;
        assert!(message.text.starts_with("⚠️"));
        assert_eq!(message.keyboard, vec![home_row()]);

        let fallback = chat.handle_callback("u1", "garbage").await;
        assert_eq!(fallback, home_view("u1"));
    }

    #[tokio::test]
    async fn test_chat_notifier_skips_web_orders() {
        let (notifier, mut outbox) = ChatNotifier::new(4);
        let notification = |channel| Notification {
            buyer_id: "u1".into(),
            channel,
            order_id: "o1".into(),
            order_sn: "SN1".into(),
            product_title: "Steam 10".into(),
            kind: NotificationKind::Delivered { code: Some("K-1".into()), instructions: None },
        };

        notifier.notify(notification(Channel::Web)).await.unwrap();
        notifier.notify(notification(Channel::Chat)).await.unwrap();

        let message = outbox.recv().await.unwrap();
        assert!(message.text.contains("K-1"));
        assert!(outbox.try_recv().is_err());

        drop(outbox);
        assert!(notifier.notify(notification(Channel::Chat)).await.is_err());
    }
}

//! Order and fulfillment engine: the components frontends talk to.

pub mod catalog;
pub mod dispatcher;
pub mod gateway;
pub mod ledger;
pub mod notifier;
pub mod reconciler;

pub use catalog::CatalogStore;
pub use dispatcher::{DeliveryDispatcher, DeliveryOutcome};
pub use gateway::{GatewayError, HostedInvoiceIssuer, InvoiceRequest, PaymentGateway};
pub use ledger::{FlowPolicy, OrderLedger};
pub use notifier::{LogNotifier, Notification, NotificationKind, Notifier, NotifyError};
pub use reconciler::{PaymentEvent, PaymentReconciler, PaymentStatus, ReconcileOutcome};

//! Services module for business logic

pub mod callback_reconciler;
pub mod order_service;
pub mod stock_ledger;

pub use callback_reconciler::{
    ipn_disposition, CallbackReconciler, ReconcileStatus, Reconciliation,
};
pub use order_service::{CheckoutLine, CheckoutRequest, OrderService, PaymentRedirect};
pub use stock_ledger::StockLedger;

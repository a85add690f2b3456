//! Callback Reconciler
//!
//! Applies a normalized [`PaymentOutcome`] to its order. Payment state only
//! leaves `pending` through a compare-and-set, so replays and concurrent
//! deliveries of the same callback settle the order once and release stock
//! at most once.

use crate::database::repository::{CallbackLogEntry, CallbackLogStore, OrderStore, PaymentTransition};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::orders::model::{Order, OrderStatus, PaymentInfo, PaymentStatus};
use crate::payments::{AmountCodec, IpnDisposition, PaymentOutcome};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const AMOUNT_MISMATCH_REASON: &str = "charged amount does not match order total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    /// This delivery moved the order to `paid`.
    Paid,
    /// The order was already `paid`; nothing changed.
    AlreadyPaid,
    /// This delivery moved the order to `failed` and released its stock.
    Failed,
    /// A failure for an order that already left `pending`; nothing changed.
    AlreadyResolved,
    /// A success for an order that is already `failed` or `cancelled`.
    Conflict,
}

impl ReconcileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStatus::Paid => "paid",
            ReconcileStatus::AlreadyPaid => "already_paid",
            ReconcileStatus::Failed => "failed",
            ReconcileStatus::AlreadyResolved => "already_resolved",
            ReconcileStatus::Conflict => "conflict",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub status: ReconcileStatus,
    pub order: Order,
}

/// Gateway acknowledgement for a reconcile result.
pub fn ipn_disposition(result: &AppResult<Reconciliation>) -> IpnDisposition {
    match result {
        Ok(reconciliation) => match reconciliation.status {
            ReconcileStatus::Paid | ReconcileStatus::Failed => IpnDisposition::Confirmed,
            ReconcileStatus::AlreadyPaid
            | ReconcileStatus::AlreadyResolved
            | ReconcileStatus::Conflict => IpnDisposition::AlreadyConfirmed,
        },
        Err(err) => match &err.kind {
            AppErrorKind::Domain(DomainError::SignatureInvalid { .. }) => {
                IpnDisposition::SignatureInvalid
            }
            AppErrorKind::Domain(DomainError::OrderNotFound { .. }) => {
                IpnDisposition::OrderNotFound
            }
            AppErrorKind::Domain(DomainError::AmbiguousOutcome { reason, .. })
                if reason == AMOUNT_MISMATCH_REASON =>
            {
                IpnDisposition::AmountMismatch
            }
            _ => IpnDisposition::Unknown,
        },
    }
}

#[derive(Clone)]
pub struct CallbackReconciler {
    orders: Arc<dyn OrderStore>,
    callback_log: Arc<dyn CallbackLogStore>,
    amounts: AmountCodec,
}

impl CallbackReconciler {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        callback_log: Arc<dyn CallbackLogStore>,
        amounts: AmountCodec,
    ) -> Self {
        Self {
            orders,
            callback_log,
            amounts,
        }
    }

    pub async fn apply(&self, outcome: &PaymentOutcome) -> AppResult<Reconciliation> {
        if !outcome.signature_valid {
            warn!(
                gateway = %outcome.gateway,
                order_number = %outcome.order_number,
                "callback signature invalid, order untouched"
            );
            self.record(outcome, "signature_invalid", true, outcome.reason.clone())
                .await;
            return Err(AppError::domain(DomainError::SignatureInvalid {
                gateway: outcome.gateway.to_string(),
            }));
        }

        let order = match self.orders.find_by_order_number(&outcome.order_number).await? {
            Some(order) => order,
            None => {
                warn!(
                    gateway = %outcome.gateway,
                    order_number = %outcome.order_number,
                    "callback for unknown order"
                );
                self.record(outcome, "order_not_found", true, None).await;
                return Err(AppError::domain(DomainError::OrderNotFound {
                    reference: outcome.order_number.clone(),
                }));
            }
        };

        if order.payment_status == PaymentStatus::Paid {
            info!(order_number = %order.order_number, "callback replay for paid order");
            self.record(outcome, ReconcileStatus::AlreadyPaid.as_str(), false, None)
                .await;
            return Ok(Reconciliation {
                status: ReconcileStatus::AlreadyPaid,
                order,
            });
        }

        if outcome.ambiguous {
            let reason = outcome
                .reason
                .clone()
                .unwrap_or_else(|| "ambiguous gateway result".to_string());
            return Err(self.hold_for_review(outcome, &order, reason).await);
        }

        if outcome.success {
            if let Some(charged) = outcome.amount_minor {
                let expected = self
                    .amounts
                    .convert(&order.total_amount, outcome.gateway)
                    .map_err(AppError::from)?;
                if charged != expected {
                    error!(
                        order_number = %order.order_number,
                        gateway = %outcome.gateway,
                        charged,
                        expected,
                        "charged amount mismatch"
                    );
                    return Err(self
                        .hold_for_review(outcome, &order, AMOUNT_MISMATCH_REASON.to_string())
                        .await);
                }
            }
        }

        if order.payment_status != PaymentStatus::Pending {
            return Ok(self.already_resolved(outcome, order).await);
        }

        if outcome.success {
            self.settle_paid(outcome, order).await
        } else {
            self.settle_failed(outcome, order).await
        }
    }

    async fn settle_paid(
        &self,
        outcome: &PaymentOutcome,
        order: Order,
    ) -> AppResult<Reconciliation> {
        let now = Utc::now();
        let transition = PaymentTransition {
            payment_status: PaymentStatus::Paid,
            order_status: OrderStatus::Processing,
            allowed_order_statuses: vec![],
            payment_info: Some(payment_info(outcome, Some(now))),
            cancellation_reason: None,
            release_stock: false,
        };

        match self
            .orders
            .transition_payment(&order.order_number, &transition)
            .await?
        {
            Some(paid) => {
                info!(
                    order_number = %paid.order_number,
                    gateway = %outcome.gateway,
                    transaction_id = ?outcome.gateway_transaction_id,
                    "order paid"
                );
                self.record(outcome, ReconcileStatus::Paid.as_str(), false, None)
                    .await;
                Ok(Reconciliation {
                    status: ReconcileStatus::Paid,
                    order: paid,
                })
            }
            None => self.lost_race(outcome, order).await,
        }
    }

    async fn settle_failed(
        &self,
        outcome: &PaymentOutcome,
        order: Order,
    ) -> AppResult<Reconciliation> {
        let reason = outcome
            .reason
            .clone()
            .unwrap_or_else(|| "payment failed".to_string());
        let transition = PaymentTransition {
            payment_status: PaymentStatus::Failed,
            order_status: OrderStatus::Cancelled,
            allowed_order_statuses: vec![],
            payment_info: Some(payment_info(outcome, None)),
            cancellation_reason: Some(reason.clone()),
            release_stock: true,
        };

        match self
            .orders
            .transition_payment(&order.order_number, &transition)
            .await?
        {
            Some(failed) => {
                info!(
                    order_number = %failed.order_number,
                    gateway = %outcome.gateway,
                    result_code = ?outcome.result_code,
                    reason = %reason,
                    "order payment failed, stock released"
                );
                self.record(outcome, ReconcileStatus::Failed.as_str(), false, Some(reason))
                    .await;
                Ok(Reconciliation {
                    status: ReconcileStatus::Failed,
                    order: failed,
                })
            }
            None => self.lost_race(outcome, order).await,
        }
    }

    /// Another delivery or a cancellation moved the order between the read
    /// and the compare-and-set.
    async fn lost_race(&self, outcome: &PaymentOutcome, order: Order) -> AppResult<Reconciliation> {
        let current = self
            .orders
            .find_by_order_number(&order.order_number)
            .await?
            .unwrap_or(order);

        if current.payment_status == PaymentStatus::Paid {
            self.record(outcome, ReconcileStatus::AlreadyPaid.as_str(), false, None)
                .await;
            return Ok(Reconciliation {
                status: ReconcileStatus::AlreadyPaid,
                order: current,
            });
        }
        Ok(self.already_resolved(outcome, current).await)
    }

    async fn already_resolved(&self, outcome: &PaymentOutcome, order: Order) -> Reconciliation {
        if outcome.success {
            error!(
                order_number = %order.order_number,
                gateway = %outcome.gateway,
                payment_status = %order.payment_status,
                transaction_id = ?outcome.gateway_transaction_id,
                "successful payment for a closed order, manual review required"
            );
            self.record(
                outcome,
                ReconcileStatus::Conflict.as_str(),
                true,
                Some(format!("order already {}", order.payment_status)),
            )
            .await;
            Reconciliation {
                status: ReconcileStatus::Conflict,
                order,
            }
        } else {
            info!(
                order_number = %order.order_number,
                payment_status = %order.payment_status,
                "failure callback for resolved order ignored"
            );
            self.record(outcome, ReconcileStatus::AlreadyResolved.as_str(), false, None)
                .await;
            Reconciliation {
                status: ReconcileStatus::AlreadyResolved,
                order,
            }
        }
    }

    async fn hold_for_review(
        &self,
        outcome: &PaymentOutcome,
        order: &Order,
        reason: String,
    ) -> AppError {
        warn!(
            order_number = %order.order_number,
            gateway = %outcome.gateway,
            result_code = ?outcome.result_code,
            reason = %reason,
            "ambiguous callback, order left pending"
        );
        self.record(outcome, "ambiguous", true, Some(reason.clone()))
            .await;
        AppError::domain(DomainError::AmbiguousOutcome {
            order_number: order.order_number.clone(),
            reason,
        })
    }

    /// Log writes never fail the callback.
    async fn record(
        &self,
        outcome: &PaymentOutcome,
        disposition: &str,
        needs_review: bool,
        reason: Option<String>,
    ) {
        let entry = CallbackLogEntry {
            id: Uuid::new_v4(),
            gateway: outcome.gateway,
            order_number: outcome.order_number.clone(),
            disposition: disposition.to_string(),
            result_code: outcome.result_code.clone(),
            transaction_id: outcome.gateway_transaction_id.clone(),
            reason: reason.or_else(|| outcome.reason.clone()),
            needs_review,
            raw_fields: serde_json::to_value(&outcome.raw_fields).unwrap_or_default(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.callback_log.append(&entry).await {
            error!(
                order_number = %outcome.order_number,
                disposition,
                error = %err,
                "callback log write failed"
            );
        }
    }

    /// Order id for a callback's order number, used by the result redirect.
    pub async fn order_id_for(&self, order_number: &str) -> Option<Uuid> {
        match self.orders.find_by_order_number(order_number).await {
            Ok(order) => order.map(|o| o.id),
            Err(err) => {
                warn!(order_number = %order_number, error = %err, "order lookup failed");
                None
            }
        }
    }

    pub async fn pending_reviews(&self, limit: i64) -> AppResult<Vec<CallbackLogEntry>> {
        Ok(self.callback_log.list_for_review(limit).await?)
    }
}

fn payment_info(outcome: &PaymentOutcome, paid_at: Option<chrono::DateTime<Utc>>) -> PaymentInfo {
    PaymentInfo {
        gateway: Some(outcome.gateway),
        transaction_id: outcome.gateway_transaction_id.clone(),
        result_code: outcome.result_code.clone(),
        raw: serde_json::to_value(&outcome.raw_fields).unwrap_or_default(),
        paid_at,
        updated_at: Some(Utc::now()),
    }
}

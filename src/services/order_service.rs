//! Order Service
//!
//! Checkout, payment-URL creation, customer cancellation, fulfilment
//! progression and expiry of abandoned online payments. This is the only
//! writer that both reserves stock and creates orders.

use crate::config::CheckoutConfig;
use crate::database::repository::{OrderStore, PaymentTransition, ProductStore};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::orders::model::{
    Order, OrderItem, OrderStatus, PaymentInfo, PaymentMethod, PaymentStatus, ShippingAddress,
};
use crate::payments::{Gateway, GatewayRegistry, RedirectContext};
use crate::services::stock_ledger::StockLedger;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const EXPIRED_REASON: &str = "payment window expired";

/// One requested cart line. `unit_price` is what the client displayed and is
/// only compared against the live price.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutLine {
    pub product_id: Uuid,
    pub quantity: i32,
    #[serde(default)]
    pub unit_price: Option<BigDecimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutLine>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    /// Advisory total shown to the customer.
    #[serde(default)]
    pub client_total: Option<BigDecimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRedirect {
    pub order_id: Uuid,
    pub order_number: String,
    pub gateway: Gateway,
    pub payment_url: String,
}

#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn ProductStore>,
    ledger: StockLedger,
    registry: GatewayRegistry,
    checkout: CheckoutConfig,
}

fn invalid_transition(order: &Order, to: impl ToString) -> AppError {
    AppError::domain(DomainError::InvalidTransition {
        order_number: order.order_number.clone(),
        from: order.order_status.to_string(),
        to: to.to_string(),
    })
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        products: Arc<dyn ProductStore>,
        registry: GatewayRegistry,
        checkout: CheckoutConfig,
    ) -> Self {
        Self {
            ledger: StockLedger::new(products.clone()),
            orders,
            products,
            registry,
            checkout,
        }
    }

    /// Merges repeated products and checks every line and the address before
    /// anything is touched.
    fn validate_request(&self, request: &CheckoutRequest) -> AppResult<Vec<(Uuid, i32)>> {
        if request.items.is_empty() {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::MissingField {
                    field: "items".to_string(),
                },
            )));
        }
        if request.items.len() > self.checkout.max_lines {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::OutOfRange {
                    field: "items".to_string(),
                    min: Some("1".to_string()),
                    max: Some(self.checkout.max_lines.to_string()),
                },
            )));
        }
        if let Some(field) = request.shipping_address.missing_field() {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::MissingField {
                    field: format!("shipping_address.{}", field),
                },
            )));
        }

        let mut lines: Vec<(Uuid, i32)> = Vec::with_capacity(request.items.len());
        for line in &request.items {
            match lines.iter_mut().find(|(id, _)| *id == line.product_id) {
                Some((_, quantity)) => *quantity = quantity.saturating_add(line.quantity),
                None => lines.push((line.product_id, line.quantity)),
            }
        }

        let max = self.checkout.max_line_quantity;
        for (_, quantity) in &lines {
            if *quantity < 1 || *quantity > max {
                return Err(AppError::new(AppErrorKind::Validation(
                    ValidationError::OutOfRange {
                        field: "quantity".to_string(),
                        min: Some("1".to_string()),
                        max: Some(max.to_string()),
                    },
                )));
            }
        }

        Ok(lines)
    }

    /// Prices every line from the live catalog, reserves stock for all of it
    /// and persists the order as `pending`/`pending`. Any failure after the
    /// first reservation releases what this call already reserved.
    pub async fn create_order(
        &self,
        customer_id: &str,
        request: CheckoutRequest,
    ) -> AppResult<Order> {
        let lines = self.validate_request(&request)?;

        let mut items = Vec::with_capacity(lines.len());
        for (product_id, quantity) in &lines {
            let product = self
                .products
                .find_product(*product_id)
                .await?
                .filter(|product| product.is_active)
                .ok_or_else(|| {
                    AppError::domain(DomainError::ProductNotFound {
                        product_id: product_id.to_string(),
                    })
                })?;

            let client_price = request
                .items
                .iter()
                .find(|line| line.product_id == *product_id)
                .and_then(|line| line.unit_price.as_ref());
            if let Some(client_price) = client_price {
                if *client_price != product.price {
                    warn!(
                        product_id = %product_id,
                        client_price = %client_price,
                        live_price = %product.price,
                        "client price differs from catalog, using catalog price"
                    );
                }
            }

            items.push(OrderItem::from_product(&product, *quantity));
        }

        let mut reserved: Vec<&OrderItem> = Vec::with_capacity(items.len());
        for item in &items {
            if let Err(err) = self.ledger.reserve(item.product_id, item.quantity).await {
                self.compensate(&reserved).await;
                return Err(err);
            }
            reserved.push(item);
        }

        let order = Order::new(
            customer_id,
            items.clone(),
            request.shipping_address,
            request.payment_method,
            self.checkout.shipping_fee.clone(),
        );

        if let Some(client_total) = &request.client_total {
            if *client_total != order.total_amount {
                warn!(
                    order_number = %order.order_number,
                    client_total = %client_total,
                    total = %order.total_amount,
                    "client total differs from server total"
                );
            }
        }

        if let Err(err) = self.orders.insert_order(&order).await {
            error!(error = %err, "order insert failed, releasing reservations");
            let all: Vec<&OrderItem> = items.iter().collect();
            self.compensate(&all).await;
            return Err(err.into());
        }

        info!(
            order_number = %order.order_number,
            customer_id = %customer_id,
            payment_method = %order.payment_method,
            total = %order.total_amount,
            lines = order.items.len(),
            "order created"
        );
        Ok(order)
    }

    async fn compensate(&self, reserved: &[&OrderItem]) {
        for item in reserved {
            if let Err(err) = self.ledger.release(item.product_id, item.quantity).await {
                error!(
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    error = %err,
                    "compensating release failed"
                );
            }
        }
    }

    /// Loads an order for its owner.
    pub async fn get_order(&self, customer_id: &str, id: Uuid) -> AppResult<Order> {
        let order = self.find_order(id).await?;
        if !order.is_owned_by(customer_id) {
            warn!(order_number = %order.order_number, customer_id = %customer_id, "order access denied");
            return Err(AppError::domain(DomainError::Forbidden {
                order_number: order.order_number,
            }));
        }
        Ok(order)
    }

    async fn find_order(&self, id: Uuid) -> AppResult<Order> {
        self.orders.find_order(id).await?.ok_or_else(|| {
            AppError::domain(DomainError::OrderNotFound {
                reference: id.to_string(),
            })
        })
    }

    /// Signs a redirect for `gateway`. Switches the order's payment method
    /// when it differs from the one chosen at checkout.
    pub async fn create_payment_url(
        &self,
        customer_id: &str,
        id: Uuid,
        gateway: Gateway,
        ctx: &RedirectContext,
    ) -> AppResult<PaymentRedirect> {
        let order = self.get_order(customer_id, id).await?;
        if order.payment_status != PaymentStatus::Pending
            || order.order_status == OrderStatus::Cancelled
        {
            return Err(AppError::domain(DomainError::InvalidTransition {
                order_number: order.order_number.clone(),
                from: order.payment_status.to_string(),
                to: "payment".to_string(),
            }));
        }

        let adapter = self.registry.get(gateway)?;
        let payment_url = adapter.build_redirect(&order, ctx).await.map_err(|err| {
            warn!(
                order_number = %order.order_number,
                gateway = %gateway,
                error = %err,
                "payment url creation failed"
            );
            AppError::from(err)
        })?;

        let method = PaymentMethod::from(gateway);
        if order.payment_method != method {
            self.orders
                .set_payment_method(order.id, method)
                .await?
                .ok_or_else(|| invalid_transition(&order, "payment"))?;
            info!(
                order_number = %order.order_number,
                from = %order.payment_method,
                to = %method,
                "payment method switched"
            );
        }

        info!(order_number = %order.order_number, gateway = %gateway, "payment url issued");
        Ok(PaymentRedirect {
            order_id: order.id,
            order_number: order.order_number,
            gateway,
            payment_url,
        })
    }

    /// Customer cancellation, allowed while the order is `pending` or
    /// `confirmed`. Stock is released once, by whichever caller wins the
    /// compare-and-set.
    pub async fn cancel_order(
        &self,
        customer_id: &str,
        id: Uuid,
        reason: Option<String>,
    ) -> AppResult<Order> {
        let order = self.get_order(customer_id, id).await?;
        if !order.order_status.is_cancellable() || order.payment_status != PaymentStatus::Pending
        {
            return Err(invalid_transition(&order, OrderStatus::Cancelled));
        }

        let transition = PaymentTransition {
            payment_status: PaymentStatus::Cancelled,
            order_status: OrderStatus::Cancelled,
            allowed_order_statuses: vec![OrderStatus::Pending, OrderStatus::Confirmed],
            payment_info: None,
            cancellation_reason: Some(
                reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "cancelled by customer".to_string()),
            ),
            release_stock: true,
        };

        let cancelled = self
            .orders
            .transition_payment(&order.order_number, &transition)
            .await?
            .ok_or_else(|| invalid_transition(&order, OrderStatus::Cancelled))?;

        info!(order_number = %cancelled.order_number, "order cancelled by customer");
        Ok(cancelled)
    }

    /// Moves fulfilment forward. Online orders stay at `confirmed` until
    /// paid; delivering an unpaid `cod` order settles it.
    pub async fn advance_status(&self, id: Uuid, target: OrderStatus) -> AppResult<Order> {
        let order = self.find_order(id).await?;
        if !order.order_status.can_advance_to(target) {
            return Err(invalid_transition(&order, target));
        }
        if order.payment_method.is_online()
            && order.payment_status != PaymentStatus::Paid
            && target != OrderStatus::Confirmed
        {
            warn!(
                order_number = %order.order_number,
                target = %target,
                "fulfilment blocked until payment settles"
            );
            return Err(invalid_transition(&order, target));
        }

        let updated = if order.payment_method == PaymentMethod::Cod
            && order.payment_status == PaymentStatus::Pending
            && target == OrderStatus::Delivered
        {
            let now = Utc::now();
            let transition = PaymentTransition {
                payment_status: PaymentStatus::Paid,
                order_status: OrderStatus::Delivered,
                allowed_order_statuses: vec![order.order_status],
                payment_info: Some(PaymentInfo {
                    paid_at: Some(now),
                    updated_at: Some(now),
                    ..PaymentInfo::default()
                }),
                cancellation_reason: None,
                release_stock: false,
            };
            self.orders
                .transition_payment(&order.order_number, &transition)
                .await?
        } else {
            self.orders
                .advance_order_status(order.id, order.order_status, target)
                .await?
        };

        let updated = updated.ok_or_else(|| invalid_transition(&order, target))?;
        info!(
            order_number = %updated.order_number,
            from = %order.order_status,
            to = %updated.order_status,
            "order status advanced"
        );
        Ok(updated)
    }

    /// Cancels online orders whose payment never arrived within `ttl`.
    /// Returns how many were expired.
    pub async fn expire_stale_orders(&self, ttl: Duration, limit: i64) -> AppResult<usize> {
        let cutoff = Utc::now() - ttl;
        let stale = self.orders.find_stale_pending(cutoff, limit).await?;
        let mut expired = 0;

        for order in stale {
            let transition = PaymentTransition {
                payment_status: PaymentStatus::Cancelled,
                order_status: OrderStatus::Cancelled,
                allowed_order_statuses: vec![OrderStatus::Pending],
                payment_info: None,
                cancellation_reason: Some(EXPIRED_REASON.to_string()),
                release_stock: true,
            };
            match self
                .orders
                .transition_payment(&order.order_number, &transition)
                .await
            {
                Ok(Some(cancelled)) => {
                    info!(order_number = %cancelled.order_number, "pending order expired");
                    expired += 1;
                }
                // Settled or cancelled since the scan
                Ok(None) => {}
                // Left pending, so the next sweep retries it
                Err(err) => {
                    error!(
                        order_number = %order.order_number,
                        error = %err,
                        "failed to expire pending order"
                    );
                }
            }
        }

        Ok(expired)
    }
}

//! HTTP surface: order endpoints, gateway callbacks and health.

pub mod orders;
pub mod payments;

use crate::config::{AmountConfig, AppConfig, CheckoutConfig};
use crate::database::Stores;
use crate::error::{AppError, AppResult};
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{make_request_span, request_logging_middleware, UuidRequestId};
use crate::payments::{AmountCodec, GatewayRegistry};
use crate::services::{CallbackReconciler, OrderService};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state. Cheap to clone; everything inside is `Arc`-backed.
#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub reconciler: CallbackReconciler,
    pub registry: GatewayRegistry,
    pub health: HealthChecker,
    pub payment_result_url: String,
}

impl AppState {
    pub fn from_config(config: &AppConfig, stores: Stores) -> AppResult<Self> {
        let registry = GatewayRegistry::from_config(&config.gateways, &config.amounts)?;
        Self::from_parts(
            stores,
            registry,
            config.checkout.clone(),
            &config.amounts,
            config.server.payment_result_url.clone(),
        )
    }

    /// Wires the services around an already-built registry.
    pub fn from_parts(
        stores: Stores,
        registry: GatewayRegistry,
        checkout: CheckoutConfig,
        amounts: &AmountConfig,
        payment_result_url: String,
    ) -> AppResult<Self> {
        let orders = OrderService::new(
            stores.orders.clone(),
            stores.products.clone(),
            registry.clone(),
            checkout,
        );
        let reconciler = CallbackReconciler::new(
            stores.orders.clone(),
            stores.callback_log.clone(),
            AmountCodec::from_config(amounts)?,
        );
        let health = HealthChecker::new(stores, registry.enabled());

        Ok(Self {
            orders,
            reconciler,
            registry,
            health,
            payment_result_url,
        })
    }
}

/// Attaches the caller's request id to an error.
pub(crate) fn with_request_id(headers: &HeaderMap) -> impl Fn(AppError) -> AppError + '_ {
    move |err| match get_request_id_from_headers(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

/// GET /health
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.health.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    (code, Json(status))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/orders", post(orders::create_order))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/payment-url", post(orders::create_payment_url))
        .route("/orders/{id}/cancel", axum::routing::put(orders::cancel_order))
        .route("/orders/{id}/status", axum::routing::patch(orders::advance_status))
        .route(
            "/payments/callback/{gateway}",
            get(payments::payment_callback).post(payments::payment_callback),
        )
        .route(
            "/payments/ipn/{gateway}",
            get(payments::payment_ipn).post(payments::payment_ipn),
        )
        .route("/payments/reviews", get(payments::list_reviews))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

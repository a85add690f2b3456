use crate::api::{with_request_id, AppState};
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::orders::model::{Order, OrderStatus};
use crate::payments::{Gateway, RedirectContext};
use crate::services::{CheckoutRequest, PaymentRedirect};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

/// Header set by the upstream auth layer.
pub const CUSTOMER_HEADER: &str = "x-customer-id";

/// Authenticated customer making the request.
#[derive(Debug, Clone)]
pub struct CustomerId(pub String);

impl<S> FromRequestParts<S> for CustomerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CUSTOMER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CustomerId(v.to_string()))
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                    field: "X-Customer-Id".to_string(),
                }))
            })
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentUrlRequest {
    pub gateway: Gateway,
    #[serde(default)]
    pub locale: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
}

fn body_error(rejection: JsonRejection) -> AppError {
    AppError::validation("body", rejection.body_text())
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::validation("id", "order id must be a UUID"))
}

fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::validation("body", e.to_string()))
}

/// First hop of `x-forwarded-for`, then `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| RedirectContext::default().client_ip)
}

/// POST /orders
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    CustomerId(customer_id): CustomerId,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let Json(request) = payload.map_err(body_error).map_err(with_request_id(&headers))?;
    let order = state
        .orders
        .create_order(&customer_id, request)
        .await
        .map_err(with_request_id(&headers))?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    CustomerId(customer_id): CustomerId,
    Path(id): Path<String>,
) -> Result<Json<Order>, AppError> {
    let id = parse_id(&id).map_err(with_request_id(&headers))?;
    let order = state
        .orders
        .get_order(&customer_id, id)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(order))
}

/// POST /orders/{id}/payment-url
pub async fn create_payment_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    CustomerId(customer_id): CustomerId,
    Path(id): Path<String>,
    payload: Result<Json<PaymentUrlRequest>, JsonRejection>,
) -> Result<Json<PaymentRedirect>, AppError> {
    let id = parse_id(&id).map_err(with_request_id(&headers))?;
    let Json(request) = payload.map_err(body_error).map_err(with_request_id(&headers))?;
    let ctx = RedirectContext {
        client_ip: client_ip(&headers),
        locale: request.locale,
    };
    let redirect = state
        .orders
        .create_payment_url(&customer_id, id, request.gateway, &ctx)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(redirect))
}

/// PUT /orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    CustomerId(customer_id): CustomerId,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Order>, AppError> {
    let id = parse_id(&id).map_err(with_request_id(&headers))?;
    let request: CancelRequest = optional_body(&body).map_err(with_request_id(&headers))?;
    let order = state
        .orders
        .cancel_order(&customer_id, id, request.reason)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(order))
}

/// PATCH /orders/{id}/status
pub async fn advance_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<Json<Order>, AppError> {
    let id = parse_id(&id).map_err(with_request_id(&headers))?;
    let Json(request) = payload.map_err(body_error).map_err(with_request_id(&headers))?;
    let order = state
        .orders
        .advance_status(id, request.status)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(order))
}

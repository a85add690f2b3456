use crate::api::{with_request_id, AppState};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::orders::model::PaymentStatus;
use crate::payments::{CallbackParams, Gateway, IpnDisposition, PaymentOutcome};
use crate::services::{ipn_disposition, ReconcileStatus, Reconciliation};
use axum::{
    body::Bytes,
    extract::{Path, Query, RawQuery, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

/// Result-page status carried back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultPageStatus {
    Success,
    Failed,
    Cancelled,
    Error,
}

impl ResultPageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultPageStatus::Success => "success",
            ResultPageStatus::Failed => "failed",
            ResultPageStatus::Cancelled => "cancelled",
            ResultPageStatus::Error => "error",
        }
    }

    pub fn for_result(outcome: &PaymentOutcome, result: &AppResult<Reconciliation>) -> Self {
        match result {
            Ok(reconciliation) => match reconciliation.status {
                ReconcileStatus::Paid | ReconcileStatus::AlreadyPaid => ResultPageStatus::Success,
                ReconcileStatus::Failed if outcome.payer_cancelled => ResultPageStatus::Cancelled,
                ReconcileStatus::Failed => ResultPageStatus::Failed,
                ReconcileStatus::AlreadyResolved => {
                    match reconciliation.order.payment_status {
                        PaymentStatus::Cancelled => ResultPageStatus::Cancelled,
                        _ => ResultPageStatus::Failed,
                    }
                }
                ReconcileStatus::Conflict => ResultPageStatus::Error,
            },
            Err(_) => ResultPageStatus::Error,
        }
    }
}

/// Builds the client-facing redirect target.
pub fn result_url(base: &str, status: ResultPageStatus, order_id: Option<Uuid>) -> String {
    let order_id = order_id.map(|id| id.to_string()).unwrap_or_default();
    match url::Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("payment_status", status.as_str())
                .append_pair("order_id", &order_id);
            url.to_string()
        }
        Err(_) => format!(
            "{}?payment_status={}&order_id={}",
            base,
            status.as_str(),
            order_id
        ),
    }
}

fn json_scalar(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Collects callback fields from the query string and the body. Body fields
/// win on duplicates; JSON bodies are flattened one level into strings.
pub fn collect_params(query: Option<&str>, headers: &HeaderMap, body: &[u8]) -> CallbackParams {
    let mut params: CallbackParams = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return params;
    }

    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        match serde_json::from_slice::<JsonValue>(body) {
            Ok(JsonValue::Object(map)) => {
                for (key, value) in map {
                    params.insert(key, json_scalar(&value));
                }
            }
            Ok(_) | Err(_) => warn!("callback body is not a JSON object, ignored"),
        }
    } else {
        params.extend(url::form_urlencoded::parse(body).into_owned());
    }

    params
}

fn parse_gateway(raw: &str) -> AppResult<Gateway> {
    Gateway::from_str(raw).map_err(AppError::from)
}

/// GET|POST /payments/callback/{gateway}
///
/// Browser return leg. Always answers with a redirect to the result page;
/// failure details only reach the logs.
pub async fn payment_callback(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Redirect {
    let base = state.payment_result_url.as_str();
    let params = collect_params(query.as_deref(), &headers, &body);

    let adapter = match parse_gateway(&gateway).and_then(|g| Ok(state.registry.get(g)?)) {
        Ok(adapter) => adapter,
        Err(err) => {
            warn!(gateway = %gateway, error = %err, "callback for unavailable gateway");
            return Redirect::to(&result_url(base, ResultPageStatus::Error, None));
        }
    };

    let outcome = match adapter.parse_callback(&params).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(gateway = %gateway, error = %err, "callback could not be parsed");
            return Redirect::to(&result_url(base, ResultPageStatus::Error, None));
        }
    };

    let result = state.reconciler.apply(&outcome).await;
    let status = ResultPageStatus::for_result(&outcome, &result);
    let order_id = match &result {
        Ok(reconciliation) => Some(reconciliation.order.id),
        Err(AppError {
            kind: AppErrorKind::Domain(DomainError::SignatureInvalid { .. }),
            ..
        }) => None,
        Err(_) => state.reconciler.order_id_for(&outcome.order_number).await,
    };

    info!(
        gateway = %outcome.gateway,
        order_number = %outcome.order_number,
        payment_status = status.as_str(),
        "payment callback handled"
    );
    Redirect::to(&result_url(base, status, order_id))
}

/// GET|POST /payments/ipn/{gateway}
///
/// Server-to-server notification. Answers in the gateway's own
/// acknowledgement format.
pub async fn payment_ipn(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let gateway = parse_gateway(&gateway).map_err(with_request_id(&headers))?;
    let adapter = state
        .registry
        .get(gateway)
        .map_err(AppError::from)
        .map_err(with_request_id(&headers))?;
    let params = collect_params(query.as_deref(), &headers, &body);

    let disposition = match adapter.parse_callback(&params).await {
        Ok(outcome) => {
            let result = state.reconciler.apply(&outcome).await;
            let disposition = ipn_disposition(&result);
            info!(
                gateway = %gateway,
                order_number = %outcome.order_number,
                disposition = ?disposition,
                "payment notification handled"
            );
            disposition
        }
        Err(err) => {
            warn!(gateway = %gateway, error = %err, "notification could not be parsed");
            IpnDisposition::Unknown
        }
    };

    let ack = adapter.acknowledge(disposition);
    let status = StatusCode::from_u16(ack.status).unwrap_or(StatusCode::OK);
    Ok(match ack.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ReviewQuery {
    #[serde(default = "default_review_limit")]
    pub limit: i64,
}

fn default_review_limit() -> i64 {
    50
}

/// GET /payments/reviews
pub async fn list_reviews(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ReviewQuery>,
) -> Result<Json<JsonValue>, AppError> {
    let limit = query.limit.clamp(1, 500);
    let entries = state
        .reconciler
        .pending_reviews(limit)
        .await
        .map_err(with_request_id(&headers))?;
    Ok(Json(serde_json::json!({
        "count": entries.len(),
        "entries": entries,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_url_appends_status_and_order() {
        let id = Uuid::new_v4();
        let url = result_url(
            "https://shop.example/payment/result",
            ResultPageStatus::Cancelled,
            Some(id),
        );
        assert_eq!(
            url,
            format!(
                "https://shop.example/payment/result?payment_status=cancelled&order_id={}",
                id
            )
        );
    }

    #[test]
    fn body_fields_override_query_fields() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/x-www-form-urlencoded".parse().unwrap());
        let params = collect_params(Some("a=1&b=2"), &headers, b"b=3&c=hello+world");
        assert_eq!(params["a"], "1");
        assert_eq!(params["b"], "3");
        assert_eq!(params["c"], "hello world");
    }

    #[test]
    fn json_bodies_are_flattened_to_strings() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        let body = br#"{"orderId":"ORD-1","amount":2000000,"resultCode":0,"extraData":""}"#;
        let params = collect_params(None, &headers, body);
        assert_eq!(params["orderId"], "ORD-1");
        assert_eq!(params["amount"], "2000000");
        assert_eq!(params["resultCode"], "0");
        assert_eq!(params["extraData"], "");
    }
}

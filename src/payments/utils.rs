use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::Gateway;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub enum RequestBody<'a> {
    Empty,
    Json(&'a JsonValue),
    Form(&'a [(&'a str, &'a str)]),
}

/// Outbound HTTP for gateway APIs. Every call is a single attempt bounded by
/// `timeout`; transport failures and 5xx answers surface as
/// `GatewayUnavailable`, other non-2xx answers as `ProviderError`.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    gateway: Gateway,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(gateway: Gateway, timeout: Duration) -> PaymentResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            PaymentError::GatewayUnavailable {
                gateway,
                message: format!("failed to initialize HTTP client: {}", e),
            }
        })?;

        Ok(Self {
            client,
            gateway,
            timeout,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: RequestBody<'_>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut request = self.client.request(method, url).timeout(self.timeout);

        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        for (k, v) in additional_headers {
            request = request.header(*k, *v);
        }
        match body {
            RequestBody::Empty => {}
            RequestBody::Json(payload) => {
                request = request.json(payload);
            }
            RequestBody::Form(fields) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter())
                    .finish();
                request = request
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(encoded);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable {
                gateway: self.gateway,
                message: if e.is_timeout() {
                    format!("request timed out after {}s", self.timeout.as_secs())
                } else {
                    format!("request failed: {}", e)
                },
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(|e| PaymentError::ProviderError {
                provider: self.gateway.to_string(),
                message: format!("invalid gateway JSON response: {}", e),
                provider_code: None,
                retryable: false,
            });
        }

        if status.is_server_error() {
            warn!(gateway = %self.gateway, status = %status, "gateway server error");
            return Err(PaymentError::GatewayUnavailable {
                gateway: self.gateway,
                message: format!("HTTP {}: {}", status, text),
            });
        }

        Err(PaymentError::ProviderError {
            provider: self.gateway.to_string(),
            message: format!("HTTP {}: {}", status, text),
            provider_code: Some(status.as_u16().to_string()),
            retryable: false,
        })
    }
}

/// Serializes `params` onto `base` with the signature appended last.
/// Values are URL-encoded here, after signing.
pub fn signed_query_url<'a, I>(
    base: &str,
    params: I,
    signature_field: &str,
    signature: &str,
) -> PaymentResult<String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut url = Url::parse(base).map_err(|e| PaymentError::ValidationError {
        message: format!("invalid gateway URL '{}': {}", base, e),
        field: Some("url".to_string()),
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            if key != signature_field {
                query.append_pair(key, value);
            }
        }
        query.append_pair(signature_field, signature);
    }
    Ok(url.into())
}

/// Decodes the query string of `url` into ordered parameters.
pub fn query_params(url: &str) -> PaymentResult<crate::payments::types::CallbackParams> {
    let url = Url::parse(url).map_err(|e| PaymentError::ValidationError {
        message: format!("invalid URL: {}", e),
        field: Some("url".to_string()),
    })?;
    Ok(url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

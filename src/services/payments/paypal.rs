use crate::config::PaymentsConfig;
use crate::entities::order::PaymentStatus;
use crate::errors::ServiceError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

const SANDBOX_BASE: &str = "https://api-m.sandbox.paypal.com";
const LIVE_BASE: &str = "https://api-m.paypal.com";

/// A created provider order awaiting buyer approval.
#[derive(Clone, Debug)]
pub struct PayPalOrder {
    pub id: String,
    pub status: String,
    pub approval_link: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CaptureResult {
    pub status: String,
}

/// The `paypal-transmission-*` headers of a webhook delivery, exactly as
/// received. All five must be present for verification to even start.
#[derive(Clone, Debug)]
pub struct TransmissionHeaders {
    pub transmission_id: String,
    pub transmission_time: String,
    pub cert_url: String,
    pub auth_algo: String,
    pub transmission_sig: String,
}

impl TransmissionHeaders {
    pub fn from_header_map(headers: &http::HeaderMap) -> Option<Self> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        Some(Self {
            transmission_id: get("paypal-transmission-id")?,
            transmission_time: get("paypal-transmission-time")?,
            cert_url: get("paypal-cert-url")?,
            auth_algo: get("paypal-auth-algo")?,
            transmission_sig: get("paypal-transmission-sig")?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    links: Vec<OrderLink>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderLink {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    #[serde(default)]
    status: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    verification_status: String,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    transmission_id: &'a str,
    transmission_time: &'a str,
    cert_url: &'a str,
    auth_algo: &'a str,
    transmission_sig: &'a str,
    webhook_id: &'a str,
    webhook_event: &'a serde_json::Value,
}

/// Maps a webhook event type to the payment status it implies. Comparison
/// is case-insensitive; unmapped events are acknowledged and ignored.
pub fn map_event_to_status(event_type: &str) -> Option<PaymentStatus> {
    match event_type.to_uppercase().as_str() {
        "PAYMENT.CAPTURE.COMPLETED" => Some(PaymentStatus::Paid),
        "PAYMENT.CAPTURE.DENIED" => Some(PaymentStatus::Failed),
        "PAYMENT.CAPTURE.REFUNDED" => Some(PaymentStatus::Refunded),
        _ => None,
    }
}

/// Formats a whole-currency amount the way the checkout API expects.
pub fn amount_string(total: i64) -> String {
    format!("{}.00", total.max(0))
}

/// Client for the checkout and webhook-verification APIs. A fresh access
/// token is fetched per operation; the client-credentials grant is cheap
/// and caching tokens is not worth the invalidation handling.
#[derive(Clone)]
pub struct PayPalGateway {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    webhook_id: Option<String>,
    base_url: String,
}

impl PayPalGateway {
    pub fn from_config(
        client: reqwest::Client,
        payments: &PaymentsConfig,
    ) -> Result<Self, ServiceError> {
        let client_id = payments
            .paypal_client_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ServiceError::NotConfigured("PayPal credentials are not configured.".to_string())
            })?;
        let client_secret = payments
            .paypal_client_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ServiceError::NotConfigured("PayPal credentials are not configured.".to_string())
            })?;

        let base_url = if payments.paypal_env.trim().eq_ignore_ascii_case("live") {
            LIVE_BASE
        } else {
            SANDBOX_BASE
        };

        Ok(Self {
            client,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            webhook_id: payments
                .paypal_webhook_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            base_url: base_url.to_string(),
        })
    }

    /// Overrides the API host, for tests against a local mock server.
    pub fn with_base_url(
        client: reqwest::Client,
        client_id: &str,
        client_secret: &str,
        webhook_id: Option<&str>,
        base_url: &str,
    ) -> Self {
        Self {
            client,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            webhook_id: webhook_id.map(String::from),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let auth = BASE64.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .header("Authorization", format!("Basic {}", auth))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .map_err(|e| ServiceError::ExternalService(format!("PayPal request failed: {}", e)))?;

        let ok = response.status().is_success();
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalService(format!("PayPal response invalid: {}", e)))?;

        match (ok, body.access_token) {
            (true, Some(token)) => Ok(token),
            _ => Err(ServiceError::ExternalService(
                body.error_description
                    .unwrap_or_else(|| "Unable to get PayPal access token.".to_string()),
            )),
        }
    }

    #[instrument(skip(self))]
    pub async fn create_order(
        &self,
        total: i64,
        currency: &str,
        reference_hint: &str,
    ) -> Result<PayPalOrder, ServiceError> {
        let token = self.access_token().await?;
        let reference = if reference_hint.trim().is_empty() {
            format!("ORD-{}", chrono::Utc::now().timestamp_millis())
        } else {
            reference_hint.trim().to_string()
        };

        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": reference,
                "amount": {
                    "currency_code": currency.to_uppercase(),
                    "value": amount_string(total),
                }
            }]
        });

        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalService(format!("PayPal request failed: {}", e)))?;

        let ok = response.status().is_success();
        let body: OrderResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalService(format!("PayPal response invalid: {}", e)))?;

        match (ok, body.id) {
            (true, Some(id)) => Ok(PayPalOrder {
                id,
                status: body.status,
                approval_link: body
                    .links
                    .into_iter()
                    .find(|link| link.rel == "approve")
                    .map(|link| link.href),
            }),
            _ => Err(ServiceError::ExternalService(
                body.message
                    .unwrap_or_else(|| "Unable to create PayPal order.".to_string()),
            )),
        }
    }

    #[instrument(skip(self))]
    pub async fn capture_order(&self, provider_order_id: &str) -> Result<CaptureResult, ServiceError> {
        let provider_order_id = provider_order_id.trim();
        if provider_order_id.is_empty() {
            return Err(ServiceError::ValidationError(
                "PayPal order id is required.".to_string(),
            ));
        }

        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.base_url, provider_order_id
            ))
            .bearer_auth(&token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| ServiceError::ExternalService(format!("PayPal request failed: {}", e)))?;

        let ok = response.status().is_success();
        let body: CaptureResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalService(format!("PayPal response invalid: {}", e)))?;

        if !ok {
            return Err(ServiceError::ExternalService(
                body.message
                    .unwrap_or_else(|| "Unable to capture PayPal order.".to_string()),
            ));
        }
        Ok(CaptureResult { status: body.status })
    }

    /// Verifies a webhook delivery by asking the provider itself. Anything
    /// short of an explicit SUCCESS, including transport failures, counts
    /// as unverified.
    #[instrument(skip(self, event_body, headers))]
    pub async fn verify_webhook(
        &self,
        event_body: &serde_json::Value,
        headers: &TransmissionHeaders,
    ) -> Result<bool, ServiceError> {
        let Some(webhook_id) = self.webhook_id.as_deref() else {
            return Ok(false);
        };

        let token = self.access_token().await?;
        let request = VerifyRequest {
            transmission_id: &headers.transmission_id,
            transmission_time: &headers.transmission_time,
            cert_url: &headers.cert_url,
            auth_algo: &headers.auth_algo,
            transmission_sig: &headers.transmission_sig,
            webhook_id,
            webhook_event: event_body,
        };

        let response = self
            .client
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.base_url
            ))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalService(format!("PayPal request failed: {}", e)))?;

        if !response.status().is_success() {
            return Ok(false);
        }
        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalService(format!("PayPal response invalid: {}", e)))?;
        Ok(body.verification_status.to_uppercase() == "SUCCESS")
    }
}

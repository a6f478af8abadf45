use crate::config::PaymentsConfig;
use crate::entities::order::PaymentStatus;
use crate::errors::ServiceError;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, instrument};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// A created payment intent, as returned to the checkout client.
#[derive(Clone, Debug)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct StripeIntentResponse {
    id: Option<String>,
    client_secret: Option<String>,
    #[serde(default)]
    status: String,
    error: Option<StripeErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

/// Maps a Stripe webhook event type to the payment status it implies.
/// Unmapped events are acknowledged and ignored.
pub fn map_event_to_status(event_type: &str) -> Option<PaymentStatus> {
    match event_type {
        "payment_intent.succeeded" => Some(PaymentStatus::Paid),
        "payment_intent.payment_failed" => Some(PaymentStatus::Failed),
        "payment_intent.canceled" => Some(PaymentStatus::Cancelled),
        _ => None,
    }
}

/// Verifies a `Stripe-Signature` header against the raw request payload.
///
/// The header carries `t=<unix seconds>,v1=<hex hmac>`; the signed message
/// is `"{t}.{payload}"`. Verification is constant-time and the timestamp
/// must be within `tolerance_secs` of now, which bounds replay of captured
/// webhook deliveries.
pub fn verify_webhook_signature(
    payload: &[u8],
    signature_header: &str,
    webhook_secret: &str,
    tolerance_secs: u64,
) -> bool {
    let header = signature_header.trim();
    let secret = webhook_secret.trim();
    if header.is_empty() || secret.is_empty() || payload.is_empty() {
        return false;
    }

    let mut timestamp: Option<&str> = None;
    let mut signature: Option<&str> = None;
    for part in header.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("t=") {
            timestamp = Some(value);
        } else if let Some(value) = part.strip_prefix("v1=") {
            signature = Some(value);
        }
    }
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return false;
    };

    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    let now = Utc::now().timestamp();
    if (now - ts).unsigned_abs() > tolerance_secs {
        debug!("webhook timestamp outside tolerance");
        return false;
    }

    let Ok(expected_sig) = hex::decode(signature) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&expected_sig).is_ok()
}

/// Signs a payload the way the provider would. Test and demo helper.
pub fn sign_payload(payload: &[u8], timestamp: i64, webhook_secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={},v1={}", timestamp, signature)
}

/// Thin client for the payment-intent API. Amounts are submitted in minor
/// units, as the provider expects.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeGateway {
    pub fn from_config(
        client: reqwest::Client,
        payments: &PaymentsConfig,
    ) -> Result<Self, ServiceError> {
        let secret_key = payments
            .stripe_secret_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ServiceError::NotConfigured("Stripe is not configured.".to_string())
            })?;
        Ok(Self {
            client,
            secret_key: secret_key.to_string(),
            base_url: STRIPE_API_BASE.to_string(),
        })
    }

    /// Overrides the API host, for tests against a local mock server.
    pub fn with_base_url(client: reqwest::Client, secret_key: &str, base_url: &str) -> Self {
        Self {
            client,
            secret_key: secret_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[instrument(skip(self, metadata))]
    pub async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &[(&str, String)],
    ) -> Result<PaymentIntent, ServiceError> {
        let mut params: Vec<(String, String)> = vec![
            ("amount".to_string(), amount_minor.max(1).to_string()),
            ("currency".to_string(), currency.to_lowercase()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in metadata {
            if !key.is_empty() {
                params.push((format!("metadata[{}]", key), value.clone()));
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalService(format!("Stripe request failed: {}", e)))?;

        let ok = response.status().is_success();
        let body: StripeIntentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalService(format!("Stripe response invalid: {}", e)))?;

        match (ok, body.id) {
            (true, Some(id)) => Ok(PaymentIntent {
                id,
                client_secret: body.client_secret,
                status: body.status,
            }),
            _ => Err(ServiceError::ExternalService(
                body.error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Unable to create Stripe payment intent.".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn valid_signature_is_accepted() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign_payload(payload, Utc::now().timestamp(), SECRET);
        assert!(verify_webhook_signature(payload, &header, SECRET, 300));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign_payload(payload, Utc::now().timestamp(), SECRET);
        let tampered = br#"{"type":"payment_intent.payment_failed"}"#;
        assert!(!verify_webhook_signature(tampered, &header, SECRET, 300));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = b"payload";
        let header = sign_payload(payload, Utc::now().timestamp(), "whsec_other");
        assert!(!verify_webhook_signature(payload, &header, SECRET, 300));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = b"payload";
        let stale = Utc::now().timestamp() - 3600;
        let header = sign_payload(payload, stale, SECRET);
        assert!(!verify_webhook_signature(payload, &header, SECRET, 300));
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(!verify_webhook_signature(b"payload", "", SECRET, 300));
        assert!(!verify_webhook_signature(b"payload", "v1=abc", SECRET, 300));
        assert!(!verify_webhook_signature(b"payload", "t=123", SECRET, 300));
        assert!(!verify_webhook_signature(
            b"payload",
            "t=notanumber,v1=abc",
            SECRET,
            300
        ));
    }

    #[test]
    fn event_mapping_covers_terminal_states() {
        assert_eq!(
            map_event_to_status("payment_intent.succeeded"),
            Some(PaymentStatus::Paid)
        );
        assert_eq!(
            map_event_to_status("payment_intent.payment_failed"),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(
            map_event_to_status("payment_intent.canceled"),
            Some(PaymentStatus::Cancelled)
        );
        assert_eq!(map_event_to_status("charge.updated"), None);
    }
}

use crate::config::PaymentsConfig;
use crate::errors::ServiceError;
use std::time::Duration;

pub mod paypal;
pub mod stripe;

pub use paypal::PayPalGateway;
pub use stripe::StripeGateway;

/// Builds the HTTP client shared by the provider gateways. Every outbound
/// call is bounded by the configured timeout so a slow provider cannot pin
/// request handlers.
pub fn provider_http_client(payments: &PaymentsConfig) -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(payments.provider_timeout_secs))
        .build()
        .map_err(|e| ServiceError::InternalError(format!("failed to build HTTP client: {}", e)))
}

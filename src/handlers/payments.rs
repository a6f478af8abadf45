use crate::errors::ServiceError;
use crate::services::payment_readiness::validate_selected_method;
use crate::services::payments::{PayPalGateway, StripeGateway};
use crate::services::quote::CartLine;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use super::orders::parse_delivery_option;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPaymentRequest {
    #[serde(default)]
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub delivery_option: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub payment_reference: Option<String>,
}

/// Creates a card payment intent for the quoted total. The cart is always
/// re-priced here; the client's idea of the total plays no part.
#[instrument(skip(state, request))]
pub async fn create_stripe_intent(
    State(state): State<AppState>,
    Json(request): Json<InitPaymentRequest>,
) -> Result<Json<Value>, ServiceError> {
    validate_selected_method(
        "Stripe (Card)",
        &state.config.payments,
        state.config.is_production(),
    )?;

    let delivery_option = parse_delivery_option(request.delivery_option.as_deref());
    let quote = state
        .quote_service
        .build_quote(&request.items, delivery_option)
        .await?;

    let order_number = request
        .order_number
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .to_string();

    let gateway = StripeGateway::from_config(state.http_client.clone(), &state.config.payments)?;
    // The card network settles in minor units; quoted totals are whole rupees.
    let amount_minor = quote.total * 100;
    let intent = gateway
        .create_payment_intent(
            amount_minor,
            &state.config.currency,
            &[
                ("orderNumber", order_number),
                ("cartTotal", quote.total.to_string()),
            ],
        )
        .await?;

    Ok(Json(json!({
        "ok": true,
        "paymentProvider": "stripe",
        "paymentReference": intent.id,
        "clientSecret": intent.client_secret,
        "total": quote.total,
        "currency": state.config.currency,
    })))
}

/// Creates a provider-side PayPal order for the quoted total and returns
/// the approval link the buyer must visit.
#[instrument(skip(state, request))]
pub async fn create_paypal_order(
    State(state): State<AppState>,
    Json(request): Json<InitPaymentRequest>,
) -> Result<Json<Value>, ServiceError> {
    validate_selected_method(
        "PayPal",
        &state.config.payments,
        state.config.is_production(),
    )?;

    let delivery_option = parse_delivery_option(request.delivery_option.as_deref());
    let quote = state
        .quote_service
        .build_quote(&request.items, delivery_option)
        .await?;

    let gateway = PayPalGateway::from_config(state.http_client.clone(), &state.config.payments)?;
    let order = gateway
        .create_order(
            quote.total,
            &state.config.currency,
            request.order_number.as_deref().unwrap_or(""),
        )
        .await?;

    Ok(Json(json!({
        "ok": true,
        "paymentProvider": "paypal",
        "paymentReference": order.id,
        "approvalUrl": order.approval_link,
        "status": order.status,
        "total": quote.total,
        "currency": state.config.currency,
    })))
}

/// Captures an approved PayPal order and reconciles the matching order row
/// by its payment reference.
#[instrument(skip(state, request))]
pub async fn capture_paypal_order(
    State(state): State<AppState>,
    Json(request): Json<CaptureRequest>,
) -> Result<Json<Value>, ServiceError> {
    validate_selected_method(
        "PayPal",
        &state.config.payments,
        state.config.is_production(),
    )?;

    let reference = request
        .order_id
        .as_deref()
        .or(request.payment_reference.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ServiceError::ValidationError("PayPal order id is required.".to_string())
        })?;

    let gateway = PayPalGateway::from_config(state.http_client.clone(), &state.config.payments)?;
    let capture = gateway.capture_order(reference).await?;

    let mapped = if capture.status.eq_ignore_ascii_case("COMPLETED") {
        crate::entities::order::PaymentStatus::Paid
    } else {
        crate::entities::order::PaymentStatus::PendingOnline
    };

    state
        .order_status_service
        .update_payment(
            crate::services::order_status::OrderRef::PaymentReference(reference.to_string()),
            crate::services::order_status::PaymentUpdate {
                payment_status: Some(mapped),
                payment_method: Some(crate::entities::order::PaymentMethod::PayPal),
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(json!({
        "ok": true,
        "status": capture.status,
        "paymentReference": reference,
    })))
}

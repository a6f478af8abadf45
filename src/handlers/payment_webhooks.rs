use crate::entities::order::PaymentMethod;
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::order_status::{OrderRef, PaymentUpdate};
use crate::services::payments::paypal::TransmissionHeaders;
use crate::services::payments::{paypal, stripe, PayPalGateway};
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

/// Stripe webhook receiver. Signature verification runs over the raw body
/// before any JSON parsing, then the mapped payment status is reconciled
/// onto the order the event refers to. Unmapped or stray events are
/// acknowledged with 200 so the provider stops retrying them.
#[instrument(skip(state, headers, body))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    let webhook_secret = state
        .config
        .payments
        .stripe_webhook_secret
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ServiceError::InternalError("Stripe webhook is not configured.".to_string())
        })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !stripe::verify_webhook_signature(
        &body,
        signature,
        webhook_secret,
        state.config.payments.stripe_webhook_tolerance_secs,
    ) {
        return Err(ServiceError::InvalidSignature);
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|_| ServiceError::ValidationError("Invalid webhook payload.".to_string()))?;

    let event_type = event["type"].as_str().unwrap_or("");
    let data_object = &event["data"]["object"];
    let payment_intent_id = data_object["id"].as_str().unwrap_or("").trim();
    let order_number = data_object["metadata"]["orderNumber"]
        .as_str()
        .unwrap_or("")
        .trim();

    let Some(mapped) = stripe::map_event_to_status(event_type) else {
        debug!(%event_type, "ignoring unmapped webhook event");
        return Ok(Json(json!({ "ok": true })));
    };

    if !payment_intent_id.is_empty() {
        // Order number from metadata is the strongest link; fall back to the
        // intent id the order was created with.
        let (order_ref, reference) = if !order_number.is_empty() {
            (
                OrderRef::Number(order_number.to_string()),
                Some(payment_intent_id.to_string()),
            )
        } else {
            (
                OrderRef::PaymentReference(payment_intent_id.to_string()),
                None,
            )
        };

        let updated = state
            .order_status_service
            .update_payment(
                order_ref,
                PaymentUpdate {
                    payment_status: Some(mapped),
                    payment_reference: reference,
                    payment_method: Some(PaymentMethod::Stripe),
                },
            )
            .await?;
        if updated.is_none() {
            info!(%payment_intent_id, "webhook event matched no order");
        }
    }

    state
        .event_sender
        .send(Event::WebhookProcessed {
            provider: "stripe".to_string(),
            event_type: event_type.to_string(),
        })
        .await;

    Ok(Json(json!({ "ok": true })))
}

/// PayPal webhook receiver. Deliveries are verified by calling back to the
/// provider's verification API with the transmission headers; only then is
/// the capture outcome applied to the referenced order.
#[instrument(skip(state, headers, body))]
pub async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ServiceError> {
    let Some(transmission) = TransmissionHeaders::from_header_map(&headers) else {
        return Err(ServiceError::InvalidSignature);
    };

    let gateway = PayPalGateway::from_config(state.http_client.clone(), &state.config.payments)?;
    if !gateway.verify_webhook(&body, &transmission).await? {
        return Err(ServiceError::InvalidSignature);
    }

    let event_type = body["event_type"].as_str().unwrap_or("");
    let reference = body["resource"]["supplementary_data"]["related_ids"]["order_id"]
        .as_str()
        .unwrap_or("")
        .trim();

    if let Some(mapped) = paypal::map_event_to_status(event_type) {
        if !reference.is_empty() {
            let updated = state
                .order_status_service
                .update_payment(
                    OrderRef::PaymentReference(reference.to_string()),
                    PaymentUpdate {
                        payment_status: Some(mapped),
                        payment_method: Some(PaymentMethod::PayPal),
                        ..Default::default()
                    },
                )
                .await?;
            if updated.is_none() {
                info!(%reference, "webhook event matched no order");
            }
        }
    } else {
        debug!(%event_type, "ignoring unmapped webhook event");
    }

    state
        .event_sender
        .send(Event::WebhookProcessed {
            provider: "paypal".to_string(),
            event_type: event_type.to_string(),
        })
        .await;

    Ok(Json(json!({ "ok": true })))
}

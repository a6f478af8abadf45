use crate::entities::order::FulfillmentStatus;
use crate::errors::ServiceError;
use crate::services::orders::{CreateOrderInput, OrderDetail};
use crate::services::payment_readiness::validate_selected_method;
use crate::services::quote::CartLine;
use crate::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;

const COURIER_NAME: &str = "TCS";
const COURIER_TRACK_BASE: &str = "https://www.tcsexpress.com/track/";

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPayload {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub shipping_address: String,
    #[serde(default)]
    pub billing_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub customer: CustomerPayload,
    #[serde(default)]
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub delivery_option: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_reference: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub ok: bool,
    pub order_number: String,
}

/// Places an order: readiness gate, server-side quote, then the locking
/// creator. Client-sent prices never survive past deserialization.
#[instrument(skip(state, request))]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, ServiceError> {
    let method_label = request.payment_method.as_deref().unwrap_or("");
    let (payment_method, payment_status) = validate_selected_method(
        method_label,
        &state.config.payments,
        state.config.is_production(),
    )?;

    if request.items.is_empty() {
        return Err(ServiceError::EmptyCart);
    }

    let customer = &request.customer;
    if customer.full_name.trim().is_empty()
        || customer.email.trim().is_empty()
        || customer.phone.trim().is_empty()
        || customer.shipping_address.trim().is_empty()
    {
        return Err(ServiceError::ValidationError(
            "Missing required customer fields.".to_string(),
        ));
    }
    if !customer.email.contains('@') {
        return Err(ServiceError::ValidationError(
            "Please provide a valid email address.".to_string(),
        ));
    }

    let payment_reference = request
        .payment_reference
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    if payment_method.is_online() && payment_reference.is_none() {
        return Err(ServiceError::ValidationError(
            "Payment reference is required for online payment methods.".to_string(),
        ));
    }

    let delivery_option = parse_delivery_option(request.delivery_option.as_deref());
    let quote = state
        .quote_service
        .build_quote(&request.items, delivery_option)
        .await?;

    let created = state
        .order_service
        .create_order(
            CreateOrderInput {
                customer_name: customer.full_name.clone(),
                customer_email: customer.email.clone(),
                customer_phone: customer.phone.clone(),
                city: customer.city.clone(),
                shipping_address: customer.shipping_address.clone(),
                billing_address: customer.billing_address.clone(),
                delivery_option,
                payment_method,
                payment_status,
                payment_reference,
            },
            quote,
        )
        .await?;

    Ok(Json(CreateOrderResponse {
        ok: true,
        order_number: created.order_number,
    }))
}

pub fn parse_delivery_option(label: Option<&str>) -> crate::entities::order::DeliveryOption {
    use crate::entities::order::DeliveryOption;
    label
        .and_then(DeliveryOption::from_label)
        .unwrap_or(DeliveryOption::Standard)
}

#[derive(Debug, Deserialize)]
pub struct TrackQuery {
    #[serde(default, alias = "order")]
    pub order: String,
    #[serde(default)]
    pub phone: String,
}

/// One step of the public tracking timeline.
#[derive(Debug, Serialize)]
pub struct TimelineStep {
    pub label: &'static str,
    pub done: bool,
}

/// Marks every forward stage up to and including the current one as done.
/// A cancelled or unrecognized status renders like a freshly confirmed
/// order rather than leaking internal state.
pub fn build_timeline(status: FulfillmentStatus) -> Vec<TimelineStep> {
    let current = status.sequence_position().unwrap_or(0);
    FulfillmentStatus::SEQUENCE
        .iter()
        .enumerate()
        .map(|(index, step)| TimelineStep {
            label: step.as_str(),
            done: index <= current,
        })
        .collect()
}

/// Coarse delivery estimate from the order's age and stage.
pub fn estimate_delivery_at(
    status: FulfillmentStatus,
    created_at: DateTime<Utc>,
) -> DateTime<Utc> {
    let add_days = match status {
        FulfillmentStatus::Delivered => return created_at,
        FulfillmentStatus::OutForDelivery => 0,
        FulfillmentStatus::InTransit => 1,
        _ => 3,
    };
    created_at + Duration::days(add_days)
}

/// Fallback code shown before a courier code is assigned.
pub fn fallback_tracking_code(order_number: &str) -> String {
    let tail: String = order_number
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("TCS-{}", tail)
}

fn courier_track_url(reference: &str) -> String {
    let encoded: String = reference
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            other => format!("%{:02X}", other),
        })
        .collect();
    format!("{}{}", COURIER_TRACK_BASE, encoded)
}

/// Public tracking lookup, keyed on order number plus phone.
#[instrument(skip(state, query))]
pub async fn track_order(
    State(state): State<AppState>,
    Query(query): Query<TrackQuery>,
) -> Result<Json<Value>, ServiceError> {
    let order_number = query.order.trim();
    let phone = query.phone.trim();
    if order_number.is_empty() || phone.is_empty() {
        return Err(ServiceError::ValidationError(
            "Order number and phone are required.".to_string(),
        ));
    }

    let Some(detail) = state
        .order_service
        .find_tracked_order(order_number, phone)
        .await?
    else {
        return Err(ServiceError::NotFound("Order not found.".to_string()));
    };

    Ok(Json(json!({
        "ok": true,
        "order": tracking_view(&detail),
    })))
}

fn tracking_view(detail: &OrderDetail) -> Value {
    let order = &detail.order;
    let tracking_code = order
        .tracking_code
        .clone()
        .unwrap_or_else(|| fallback_tracking_code(&order.order_number));
    let courier_reference = order
        .tracking_code
        .as_deref()
        .unwrap_or(&order.order_number);

    json!({
        "orderNumber": order.order_number,
        "status": order.status.as_str(),
        "trackingCode": tracking_code,
        "courierName": COURIER_NAME,
        "courierTrackUrl": courier_track_url(courier_reference),
        "createdAt": order.created_at.to_rfc3339(),
        "paymentMethod": order.payment_method.as_str(),
        "paymentStatus": order.payment_status.as_str(),
        "estimatedDeliveryAt": estimate_delivery_at(order.status, order.created_at).to_rfc3339(),
        "total": order.total,
        "timeline": build_timeline(order.status),
        "statusHistory": detail
            .status_history
            .iter()
            .map(|entry| json!({
                "status": entry.status.as_str(),
                "note": entry.note,
                "at": entry.at.to_rfc3339(),
            }))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::{DeliveryOption, PaymentMethod, PaymentStatus};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn sample_detail(tracking_code: Option<&str>) -> OrderDetail {
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        OrderDetail {
            order: crate::entities::order::Model {
                id: Uuid::new_v4(),
                order_number: "NXO-12345".to_string(),
                customer_name: "Ayesha Khan".to_string(),
                customer_email: "ayesha@example.com".to_string(),
                customer_phone: "03001234567".to_string(),
                city: "Lahore".to_string(),
                shipping_address: "12 Canal Road".to_string(),
                billing_address: None,
                delivery_option: DeliveryOption::Standard,
                payment_method: PaymentMethod::CashOnDelivery,
                payment_status: PaymentStatus::PendingCod,
                payment_reference: None,
                status: FulfillmentStatus::Confirmed,
                tracking_code: tracking_code.map(String::from),
                subtotal: 2000,
                shipping_fee: 250,
                total: 2250,
                currency: "PKR".to_string(),
                created_at: created,
                updated_at: created,
                version: 1,
            },
            items: vec![],
            status_history: vec![],
        }
    }

    #[test]
    fn tracking_view_falls_back_before_courier_assignment() {
        let view = tracking_view(&sample_detail(None));
        assert_eq!(view["orderNumber"], "NXO-12345");
        assert_eq!(view["trackingCode"], "TCS--12345");
        assert_eq!(
            view["courierTrackUrl"],
            "https://www.tcsexpress.com/track/NXO-12345"
        );
        assert_eq!(view["timeline"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn tracking_view_prefers_the_assigned_courier_code() {
        let view = tracking_view(&sample_detail(Some("TCS-987654")));
        assert_eq!(view["trackingCode"], "TCS-987654");
        assert_eq!(
            view["courierTrackUrl"],
            "https://www.tcsexpress.com/track/TCS-987654"
        );
    }

    #[test]
    fn timeline_marks_progress_inclusively() {
        let timeline = build_timeline(FulfillmentStatus::InTransit);
        assert_eq!(timeline.len(), 6);
        let done: Vec<bool> = timeline.iter().map(|s| s.done).collect();
        assert_eq!(done, vec![true, true, true, true, false, false]);
    }

    #[test]
    fn cancelled_orders_render_as_first_step() {
        let timeline = build_timeline(FulfillmentStatus::Cancelled);
        assert!(timeline[0].done);
        assert!(timeline[1..].iter().all(|s| !s.done));
    }

    #[test]
    fn delivery_estimates_follow_the_stage() {
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            estimate_delivery_at(FulfillmentStatus::Delivered, created),
            created
        );
        assert_eq!(
            estimate_delivery_at(FulfillmentStatus::OutForDelivery, created),
            created
        );
        assert_eq!(
            estimate_delivery_at(FulfillmentStatus::InTransit, created),
            created + Duration::days(1)
        );
        assert_eq!(
            estimate_delivery_at(FulfillmentStatus::Confirmed, created),
            created + Duration::days(3)
        );
    }

    #[test]
    fn fallback_code_uses_order_number_tail() {
        assert_eq!(fallback_tracking_code("NXO-12345"), "TCS--12345");
        assert_eq!(fallback_tracking_code("12345"), "TCS-12345");
    }

    #[test]
    fn courier_url_escapes_reference() {
        assert_eq!(
            courier_track_url("NXO-12345"),
            "https://www.tcsexpress.com/track/NXO-12345"
        );
        assert_eq!(
            courier_track_url("a b"),
            "https://www.tcsexpress.com/track/a%20b"
        );
    }
}

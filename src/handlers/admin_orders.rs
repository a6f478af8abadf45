use crate::entities::order::{FulfillmentStatus, PaymentMethod, PaymentStatus};
use crate::errors::ServiceError;
use crate::services::order_status::{OrderRef, PaymentUpdate};
use crate::services::orders::OrderDetail;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::ApiResponse;

/// Checks the shared-secret bearer token. Operator identity lives in the
/// admin gateway in front of this service; the token only guards direct
/// exposure. With no token configured, the admin surface stays closed.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ServiceError> {
    let Some(expected) = state
        .config
        .admin_api_token
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return Err(ServiceError::Unauthorized(
            "admin API is not enabled".to_string(),
        ));
    };

    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("");

    if presented != expected {
        return Err(ServiceError::Unauthorized("invalid admin token".to_string()));
    }
    Ok(())
}

/// Lists every order, newest first.
#[instrument(skip(state, headers))]
pub async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<OrderDetail>>>, ServiceError> {
    require_admin(&state, &headers)?;
    let orders = state.order_service.list_orders().await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[instrument(skip(state, headers))]
pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderDetail>>, ServiceError> {
    require_admin(&state, &headers)?;
    let detail = state
        .order_service
        .get_order(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    Ok(Json(ApiResponse::success(detail)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: FulfillmentStatus,
    #[serde(default)]
    pub tracking_code: Option<String>,
}

/// Sets fulfillment status and tracking code on one order.
#[instrument(skip(state, headers, request))]
pub async fn update_order_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<crate::entities::order::Model>>, ServiceError> {
    require_admin(&state, &headers)?;
    let updated = state
        .order_status_service
        .update_status(id, request.status, request.tracking_code)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    Ok(Json(ApiResponse::success(updated)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaymentRequest {
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

/// Manually reconciles payment state, e.g. a bank transfer confirmed out
/// of band or a refund issued from the provider dashboard.
#[instrument(skip(state, headers, request))]
pub async fn update_order_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePaymentRequest>,
) -> Result<Json<ApiResponse<crate::entities::order::Model>>, ServiceError> {
    require_admin(&state, &headers)?;
    let updated = state
        .order_status_service
        .update_payment(
            OrderRef::Id(id),
            PaymentUpdate {
                payment_status: Some(request.payment_status),
                payment_reference: request.payment_reference,
                payment_method: request.payment_method,
            },
        )
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    Ok(Json(ApiResponse::success(updated)))
}

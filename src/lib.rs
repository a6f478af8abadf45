//! Storefront order API library.
//!
//! Order placement, inventory locking, payment readiness and provider
//! reconciliation for the storefront, exposed over HTTP.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod rate_limiter;
pub mod services;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use errors::ServiceError;
use events::EventSender;
use services::order_status::OrderStatusService;
use services::orders::OrderService;
use services::quote::QuoteService;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub http_client: reqwest::Client,
    pub quote_service: QuoteService,
    pub order_service: OrderService,
    pub order_status_service: OrderStatusService,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: EventSender,
    ) -> Result<Self, ServiceError> {
        let event_sender = Arc::new(event_sender);
        let http_client = services::payments::provider_http_client(&config.payments)?;
        Ok(Self {
            quote_service: QuoteService::new(db.clone(), config.shipping.clone()),
            order_service: OrderService::new(
                db.clone(),
                event_sender.clone(),
                config.currency.clone(),
            ),
            order_status_service: OrderStatusService::new(db.clone(), event_sender.clone()),
            db,
            config,
            event_sender,
            http_client,
        })
    }
}

/// Standard envelope for admin and status responses. Public storefront
/// endpoints keep their own compact `{ "ok": true, ... }` shapes.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        // Storefront
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/track", get(handlers::orders::track_order))
        // Payment initialization
        .route(
            "/payments/stripe/intent",
            post(handlers::payments::create_stripe_intent),
        )
        .route(
            "/payments/paypal/order",
            post(handlers::payments::create_paypal_order),
        )
        .route(
            "/payments/paypal/capture",
            post(handlers::payments::capture_paypal_order),
        )
        // Provider webhooks
        .route(
            "/webhooks/stripe",
            post(handlers::payment_webhooks::stripe_webhook),
        )
        .route(
            "/webhooks/paypal",
            post(handlers::payment_webhooks::paypal_webhook),
        )
        // Admin
        .route("/admin/orders", get(handlers::admin_orders::list_orders))
        .route("/admin/orders/:id", get(handlers::admin_orders::get_order))
        .route(
            "/admin/orders/:id/status",
            put(handlers::admin_orders::update_order_status),
        )
        .route(
            "/admin/orders/:id/payment",
            put(handlers::admin_orders::update_order_payment),
        )
}

async fn api_status(State(state): State<AppState>) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    let readiness = services::payment_readiness::payment_readiness(
        &state.config.payments,
        state.config.is_production(),
    );
    let status_data = json!({
        "status": "ok",
        "service": "storefront-api",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "currency": state.config.currency,
        "payments": readiness,
        "timestamp": Utc::now().to_rfc3339(),
    });
    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });
    Ok(Json(ApiResponse::success(health_data)))
}

mod common;

use storefront_api::config::ShippingConfig;
use storefront_api::entities::order::{
    DeliveryOption, PaymentMethod, PaymentStatus,
};
use storefront_api::errors::ServiceError;
use storefront_api::services::order_status::{OrderRef, OrderStatusService, PaymentUpdate};
use storefront_api::services::orders::{CreateOrderInput, OrderService};
use storefront_api::services::quote::{CartLine, QuoteService};

struct Ctx {
    orders: OrderService,
    status: OrderStatusService,
    quotes: QuoteService,
}

async fn ctx() -> Ctx {
    let db = common::test_db().await;
    common::seed_product(&db, "widget-a", "Widget A", 1000, 50, true).await;
    Ctx {
        orders: OrderService::new(db.clone(), common::test_event_sender(), "PKR".to_string()),
        status: OrderStatusService::new(db.clone(), common::test_event_sender()),
        quotes: QuoteService::new(db, ShippingConfig::default()),
    }
}

async fn place_online_order(ctx: &Ctx, reference: Option<&str>) -> storefront_api::entities::order::Model {
    let quote = ctx
        .quotes
        .build_quote(
            &[CartLine {
                slug: "widget-a".to_string(),
                quantity: Some(1),
                variant: None,
            }],
            DeliveryOption::Standard,
        )
        .await
        .expect("quote");
    ctx.orders
        .create_order(
            CreateOrderInput {
                customer_name: "Sana Tariq".to_string(),
                customer_email: "sana@example.com".to_string(),
                customer_phone: "03217654321".to_string(),
                city: "Islamabad".to_string(),
                shipping_address: "4 Blue Area".to_string(),
                billing_address: None,
                delivery_option: DeliveryOption::Standard,
                payment_method: PaymentMethod::Stripe,
                payment_status: PaymentStatus::PendingOnline,
                payment_reference: reference.map(String::from),
            },
            quote,
        )
        .await
        .expect("order")
}

#[tokio::test]
async fn webhook_by_order_number_marks_paid_and_stores_reference() {
    let ctx = ctx().await;
    let created = place_online_order(&ctx, None).await;

    let updated = ctx
        .status
        .update_payment(
            OrderRef::Number(created.order_number.clone()),
            PaymentUpdate {
                payment_status: Some(PaymentStatus::Paid),
                payment_reference: Some("pi_3Abc".to_string()),
                payment_method: Some(PaymentMethod::Stripe),
            },
        )
        .await
        .expect("update")
        .expect("order found");

    assert_eq!(updated.payment_status, PaymentStatus::Paid);
    assert_eq!(updated.payment_reference.as_deref(), Some("pi_3Abc"));
    assert_eq!(updated.payment_method, PaymentMethod::Stripe);
    assert_eq!(updated.version, created.version + 1);
}

#[tokio::test]
async fn webhook_by_payment_reference_finds_the_order() {
    let ctx = ctx().await;
    let created = place_online_order(&ctx, Some("pi_3Def")).await;

    let updated = ctx
        .status
        .update_payment(
            OrderRef::PaymentReference("pi_3Def".to_string()),
            PaymentUpdate {
                payment_status: Some(PaymentStatus::Failed),
                ..Default::default()
            },
        )
        .await
        .expect("update")
        .expect("order found");

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.payment_status, PaymentStatus::Failed);
    // A blank update keeps the stored reference.
    assert_eq!(updated.payment_reference.as_deref(), Some("pi_3Def"));
}

#[tokio::test]
async fn stray_webhooks_resolve_to_none_not_errors() {
    let ctx = ctx().await;

    let by_number = ctx
        .status
        .update_payment(
            OrderRef::Number("NXO-00000".to_string()),
            PaymentUpdate {
                payment_status: Some(PaymentStatus::Paid),
                ..Default::default()
            },
        )
        .await
        .expect("no db error");
    assert!(by_number.is_none());

    let by_reference = ctx
        .status
        .update_payment(
            OrderRef::PaymentReference("pi_unknown".to_string()),
            PaymentUpdate {
                payment_status: Some(PaymentStatus::Paid),
                ..Default::default()
            },
        )
        .await
        .expect("no db error");
    assert!(by_reference.is_none());

    let blank = ctx
        .status
        .update_payment(
            OrderRef::PaymentReference("   ".to_string()),
            PaymentUpdate {
                payment_status: Some(PaymentStatus::Paid),
                ..Default::default()
            },
        )
        .await
        .expect("no db error");
    assert!(blank.is_none());
}

#[tokio::test]
async fn update_without_a_status_is_rejected() {
    let ctx = ctx().await;
    let created = place_online_order(&ctx, Some("pi_3Ghi")).await;

    let err = ctx
        .status
        .update_payment(OrderRef::Id(created.id), PaymentUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn stale_payment_writes_are_rejected() {
    let ctx = ctx().await;
    let created = place_online_order(&ctx, Some("pi_3Stale")).await;

    ctx.status
        .apply_payment_update(
            created.clone(),
            PaymentUpdate {
                payment_status: Some(PaymentStatus::Paid),
                ..Default::default()
            },
        )
        .await
        .expect("first write")
        .expect("order found");

    // Second writer still holds the version-1 row.
    let err = ctx
        .status
        .apply_payment_update(
            created.clone(),
            PaymentUpdate {
                payment_status: Some(PaymentStatus::Failed),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    let detail = ctx
        .orders
        .get_order(created.id)
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(detail.order.payment_status, PaymentStatus::Paid);
    assert_eq!(detail.order.version, 2);
}

#[tokio::test]
async fn replayed_webhooks_are_idempotent_on_payment_state() {
    let ctx = ctx().await;
    let created = place_online_order(&ctx, Some("pi_3Jkl")).await;

    for _ in 0..2 {
        ctx.status
            .update_payment(
                OrderRef::PaymentReference("pi_3Jkl".to_string()),
                PaymentUpdate {
                    payment_status: Some(PaymentStatus::Paid),
                    payment_reference: Some("pi_3Jkl".to_string()),
                    payment_method: Some(PaymentMethod::Stripe),
                },
            )
            .await
            .expect("update")
            .expect("order found");
    }

    let detail = ctx
        .orders
        .get_order(created.id)
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(detail.order.payment_status, PaymentStatus::Paid);
    assert_eq!(detail.order.payment_reference.as_deref(), Some("pi_3Jkl"));
    // Payment reconciliation never touches the fulfillment audit trail.
    assert_eq!(detail.status_history.len(), 1);
}

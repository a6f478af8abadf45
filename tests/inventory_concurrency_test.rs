mod common;

use sea_orm::EntityTrait;
use storefront_api::config::ShippingConfig;
use storefront_api::entities::order::{
    DeliveryOption, PaymentMethod, PaymentStatus,
};
use storefront_api::entities::product;
use storefront_api::services::orders::{CreateOrderInput, OrderService};
use storefront_api::services::quote::{CartLine, QuoteService};

fn checkout_input(phone: &str) -> CreateOrderInput {
    CreateOrderInput {
        customer_name: "Bilal Ahmed".to_string(),
        customer_email: "bilal@example.com".to_string(),
        customer_phone: phone.to_string(),
        city: "Karachi".to_string(),
        shipping_address: "7 Shahrah-e-Faisal".to_string(),
        billing_address: None,
        delivery_option: DeliveryOption::Standard,
        payment_method: PaymentMethod::CashOnDelivery,
        payment_status: PaymentStatus::PendingCod,
        payment_reference: None,
    }
}

/// Many checkouts race for a single remaining unit. The conditional stock
/// decrement inside the order transaction must let exactly one through and
/// reject the rest, leaving stock at zero rather than negative.
#[tokio::test]
async fn racing_checkouts_cannot_oversell_the_last_unit() {
    let db = common::test_db().await;
    let seeded = common::seed_product(&db, "last-unit", "Last Unit", 1500, 1, true).await;

    let quotes = QuoteService::new(db.clone(), ShippingConfig::default());
    let orders = OrderService::new(db.clone(), common::test_event_sender(), "PKR".to_string());

    // Every task prices its own quote first, as real checkouts would; all
    // quotes succeed because stock is still 1 at quote time.
    let mut staged = Vec::new();
    for i in 0..8 {
        let quote = quotes
            .build_quote(
                &[CartLine {
                    slug: "last-unit".to_string(),
                    quantity: Some(1),
                    variant: None,
                }],
                DeliveryOption::Standard,
            )
            .await
            .expect("quote");
        staged.push((quote, format!("0300{:07}", i)));
    }

    let mut handles = Vec::new();
    for (quote, phone) in staged {
        let orders = orders.clone();
        handles.push(tokio::spawn(async move {
            orders.create_order(checkout_input(&phone), quote).await
        }));
    }

    let mut successes = 0;
    let mut stock_failures = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(_) => successes += 1,
            Err(storefront_api::errors::ServiceError::InsufficientStock(_)) => stock_failures += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(stock_failures, 7);

    let remaining = product::Entity::find_by_id(seeded.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remaining.stock, 0);
}

#[tokio::test]
async fn duplicate_cart_lines_are_aggregated_before_the_stock_check() {
    let db = common::test_db().await;
    let seeded = common::seed_product(&db, "widget-a", "Widget A", 1000, 3, true).await;

    let quotes = QuoteService::new(db.clone(), ShippingConfig::default());
    let orders = OrderService::new(db.clone(), common::test_event_sender(), "PKR".to_string());

    // Two lines for the same product: 2 + 2 exceeds the 3 in stock even
    // though each line alone would pass.
    let quote = quotes
        .build_quote(
            &[
                CartLine {
                    slug: "widget-a".to_string(),
                    quantity: Some(2),
                    variant: None,
                },
                CartLine {
                    slug: "widget-a".to_string(),
                    quantity: Some(2),
                    variant: Some("Blue".to_string()),
                },
            ],
            DeliveryOption::Standard,
        )
        .await
        .expect("quote");

    let result = orders.create_order(checkout_input("03001112233"), quote).await;
    assert!(matches!(
        result,
        Err(storefront_api::errors::ServiceError::InsufficientStock(_))
    ));

    // The failed transaction must not leak a partial decrement.
    let remaining = product::Entity::find_by_id(seeded.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remaining.stock, 3);
}

#[tokio::test]
async fn unpublishing_between_quote_and_checkout_blocks_the_order() {
    let db = common::test_db().await;
    let seeded = common::seed_product(&db, "widget-a", "Widget A", 1000, 5, true).await;

    let quotes = QuoteService::new(db.clone(), ShippingConfig::default());
    let orders = OrderService::new(db.clone(), common::test_event_sender(), "PKR".to_string());

    let quote = quotes
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

    use sea_orm::{ActiveModelTrait, IntoActiveModel, Set};
    let mut active = product::Entity::find_by_id(seeded.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap()
        .into_active_model();
    active.is_published = Set(false);
    active.update(db.as_ref()).await.unwrap();

    let err = orders
        .create_order(checkout_input("03001112233"), quote)
        .await
        .unwrap_err();
    match err {
        storefront_api::errors::ServiceError::ProductUnavailable(message) => {
            assert!(message.contains("no longer published"));
        }
        other => panic!("expected ProductUnavailable, got {:?}", other),
    }
}

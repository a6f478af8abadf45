#![allow(dead_code)]

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use std::sync::Arc;
use std::time::Duration;
use storefront_api::db::{establish_connection_with_config, run_migrations, DbConfig, DbPool};
use storefront_api::entities::product;
use storefront_api::events::{process_events, EventSender};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Fresh in-memory database with the schema applied. A single connection
/// is used so every handle sees the same in-memory database.
pub async fn test_db() -> Arc<DbPool> {
    let config = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connect_timeout: Duration::from_secs(5),
        acquire_timeout: Duration::from_secs(5),
    };
    let pool = establish_connection_with_config(&config)
        .await
        .expect("db connect");
    run_migrations(&pool).await.expect("migrations");
    Arc::new(pool)
}

/// Event sender backed by a drained channel.
pub fn test_event_sender() -> Arc<EventSender> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(process_events(rx));
    Arc::new(EventSender::new(tx))
}

pub async fn seed_product(
    db: &DbPool,
    slug: &str,
    name: &str,
    price: i64,
    stock: i32,
    published: bool,
) -> product::Model {
    let now = Utc::now();
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        slug: Set(slug.to_string()),
        sku: Set(format!("SKU-{}", slug.to_uppercase())),
        name: Set(name.to_string()),
        description: Set(None),
        price: Set(price),
        compare_at_price: Set(None),
        stock: Set(stock),
        is_published: Set(published),
        category_id: Set(None),
        images: Set(serde_json::json!([])),
        tags: Set(serde_json::json!([])),
        variants: Set(serde_json::json!([])),
        features: Set(serde_json::json!([])),
        badges: Set(serde_json::json!([])),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed product")
}

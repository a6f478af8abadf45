use crate::db::DbPool;
use crate::entities::order::{
    self, DeliveryOption, FulfillmentStatus, PaymentMethod, PaymentStatus,
};
use crate::entities::{order_item, order_status_history, product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::quote::Quote;
use chrono::Utc;
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const ORDER_NUMBER_PREFIX: &str = "NXO-";
const ORDER_NUMBER_MAX_ATTEMPTS: u32 = 50;

/// Customer and payment details accompanying a priced quote. The money
/// fields live on the [`Quote`], never here.
#[derive(Clone, Debug)]
pub struct CreateOrderInput {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub city: String,
    pub shipping_address: String,
    pub billing_address: Option<String>,
    pub delivery_option: DeliveryOption,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
}

/// A full order as the admin surface sees it.
#[derive(Clone, Debug, serde::Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub status_history: Vec<order_status_history::Model>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, currency: String) -> Self {
        Self {
            db,
            event_sender,
            currency,
        }
    }

    fn random_order_number() -> String {
        let digits: u32 = rand::thread_rng().gen_range(10_000..100_000);
        format!("{}{}", ORDER_NUMBER_PREFIX, digits)
    }

    /// Draws candidate numbers until one is unused. The candidate space is
    /// small, so the loop is bounded; exhausting it means the namespace is
    /// effectively full and the request fails rather than spinning.
    pub async fn allocate_order_number<C: ConnectionTrait>(
        conn: &C,
    ) -> Result<String, ServiceError> {
        Self::allocate_order_number_with(conn, Self::random_order_number).await
    }

    /// Allocation loop with a caller-supplied candidate generator.
    pub async fn allocate_order_number_with<C, F>(
        conn: &C,
        mut candidate: F,
    ) -> Result<String, ServiceError>
    where
        C: ConnectionTrait,
        F: FnMut() -> String,
    {
        for _ in 0..ORDER_NUMBER_MAX_ATTEMPTS {
            let candidate = candidate();
            let taken = order::Entity::find()
                .filter(order::Column::OrderNumber.eq(candidate.clone()))
                .count(conn)
                .await?;
            if taken == 0 {
                return Ok(candidate);
            }
        }
        Err(ServiceError::InternalError(
            "order number space exhausted".to_string(),
        ))
    }

    /// Creates the order and decrements stock in one transaction. Each
    /// decrement is conditional on the row still having enough stock, so two
    /// racing checkouts can never both take the last unit: the loser's
    /// update matches zero rows and the whole transaction rolls back.
    #[instrument(skip(self, input, quote), fields(payment_method = input.payment_method.as_str()))]
    pub async fn create_order(
        &self,
        input: CreateOrderInput,
        quote: Quote,
    ) -> Result<order::Model, ServiceError> {
        if quote.items.is_empty() {
            return Err(ServiceError::NoValidItems);
        }

        let mut requested: HashMap<Uuid, i32> = HashMap::new();
        for item in &quote.items {
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(
                    "Invalid order item payload.".to_string(),
                ));
            }
            *requested.entry(item.product_id).or_insert(0) += item.quantity;
        }

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let mut depleted: Vec<(Uuid, String)> = Vec::new();
        for (product_id, qty) in &requested {
            let result = product::Entity::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).sub(*qty),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(*product_id))
                .filter(product::Column::IsPublished.eq(true))
                .filter(product::Column::Stock.gte(*qty))
                .exec(&txn)
                .await?;

            if result.rows_affected == 0 {
                // Reload outside the guard to name the reason precisely.
                let current = product::Entity::find_by_id(*product_id).one(&txn).await?;
                return Err(match current {
                    None => ServiceError::ProductUnavailable(
                        "A product in the cart is no longer available.".to_string(),
                    ),
                    Some(p) if !p.is_published => ServiceError::ProductUnavailable(format!(
                        "{} is no longer published.",
                        p.name
                    )),
                    Some(p) => ServiceError::InsufficientStock(format!(
                        "{} has only {} item(s) left in stock.",
                        p.name, p.stock
                    )),
                });
            }

            let after = product::Entity::find_by_id(*product_id).one(&txn).await?;
            if let Some(p) = after {
                if p.stock <= 0 {
                    depleted.push((p.id, p.slug));
                }
            }
        }

        let order_number = Self::allocate_order_number(&txn).await?;
        let order_id = Uuid::new_v4();

        let order_row = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_name: Set(input.customer_name.trim().to_string()),
            customer_email: Set(input.customer_email.trim().to_string()),
            customer_phone: Set(input.customer_phone.trim().to_string()),
            city: Set(input.city.trim().to_string()),
            shipping_address: Set(input.shipping_address.trim().to_string()),
            billing_address: Set(input
                .billing_address
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)),
            delivery_option: Set(input.delivery_option),
            payment_method: Set(input.payment_method),
            payment_status: Set(input.payment_status),
            payment_reference: Set(input
                .payment_reference
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)),
            status: Set(FulfillmentStatus::Confirmed),
            tracking_code: Set(None),
            subtotal: Set(quote.subtotal),
            shipping_fee: Set(quote.shipping_fee),
            total: Set(quote.total),
            currency: Set(self.currency.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };
        let created = order_row.insert(&txn).await?;

        for item in &quote.items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_sku: Set(item.product_sku.clone()),
                product_name: Set(item.product_name.clone()),
                variant: Set(item.variant.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total: Set(item.total),
            }
            .insert(&txn)
            .await?;
        }

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(FulfillmentStatus::Confirmed),
            note: Set("Order created".to_string()),
            at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(%order_id, %order_number, "order created with inventory locked");
        self.event_sender
            .send(Event::OrderCreated {
                order_id,
                order_number: order_number.clone(),
            })
            .await;
        for (product_id, slug) in depleted {
            self.event_sender
                .send(Event::StockDepleted { product_id, slug })
                .await;
        }

        if created.payment_method.is_online() && created.payment_reference.is_none() {
            // The readiness gate requires a reference upstream; reaching this
            // point without one means a caller bypassed the handler.
            warn!(%order_id, "online order stored without payment reference");
        }

        Ok(created)
    }

    /// Public tracking lookup. Order number plus the phone it was placed
    /// with act as a weak shared secret; any mismatch is a plain miss so the
    /// endpoint cannot be used to probe which order numbers exist.
    #[instrument(skip(self, phone))]
    pub async fn find_tracked_order(
        &self,
        order_number: &str,
        phone: &str,
    ) -> Result<Option<OrderDetail>, ServiceError> {
        let order_number = order_number.trim();
        let phone = phone.trim();
        if order_number.is_empty() || phone.is_empty() {
            return Ok(None);
        }

        let Some(found) = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .filter(order::Column::CustomerPhone.eq(phone))
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(None);
        };

        self.load_detail(found).await.map(Some)
    }

    /// Admin listing, newest first.
    pub async fn list_orders(&self) -> Result<Vec<OrderDetail>, ServiceError> {
        let orders = order::Entity::find()
            .order_by_desc(order::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        let mut details = Vec::with_capacity(orders.len());
        for found in orders {
            details.push(self.load_detail(found).await?);
        }
        Ok(details)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderDetail>, ServiceError> {
        let Some(found) = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(None);
        };
        self.load_detail(found).await.map(Some)
    }

    async fn load_detail(&self, found: order::Model) -> Result<OrderDetail, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(found.id))
            .all(self.db.as_ref())
            .await?;
        let status_history = order_status_history::Entity::find()
            .filter(order_status_history::Column::OrderId.eq(found.id))
            .order_by_asc(order_status_history::Column::At)
            .all(self.db.as_ref())
            .await?;
        Ok(OrderDetail {
            order: found,
            items,
            status_history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_match_the_public_pattern() {
        for _ in 0..200 {
            let number = OrderService::random_order_number();
            let digits = number.strip_prefix("NXO-").expect("prefix");
            assert_eq!(digits.len(), 5);
            let value: u32 = digits.parse().expect("digits");
            assert!((10_000..100_000).contains(&value));
        }
    }
}

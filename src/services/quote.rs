use crate::config::ShippingConfig;
use crate::db::DbPool;
use crate::entities::order::DeliveryOption;
use crate::entities::product;
use crate::errors::ServiceError;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const MIN_LINE_QUANTITY: i32 = 1;
pub const MAX_LINE_QUANTITY: i32 = 20;

/// One line of a client cart, as submitted. Quantities are clamped and slugs
/// resolved server-side; nothing here is trusted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CartLine {
    pub slug: String,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub variant: Option<String>,
}

/// A priced line after catalog resolution.
#[derive(Clone, Debug, Serialize)]
pub struct QuoteLine {
    pub product_id: Uuid,
    pub product_slug: String,
    pub product_sku: String,
    pub product_name: String,
    pub variant: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total: i64,
}

/// Server-side priced cart. The only numbers that ever reach an order row.
#[derive(Clone, Debug, Serialize)]
pub struct Quote {
    pub items: Vec<QuoteLine>,
    pub subtotal: i64,
    pub shipping_fee: i64,
    pub total: i64,
    pub delivery_option: DeliveryOption,
}

pub fn clamp_quantity(requested: Option<i32>) -> i32 {
    requested
        .unwrap_or(MIN_LINE_QUANTITY)
        .clamp(MIN_LINE_QUANTITY, MAX_LINE_QUANTITY)
}

pub fn pick_shipping_fee(
    subtotal: i64,
    delivery_option: DeliveryOption,
    shipping: &ShippingConfig,
) -> i64 {
    if subtotal >= shipping.free_shipping_threshold {
        return 0;
    }
    match delivery_option {
        DeliveryOption::Express => shipping.express_fee,
        DeliveryOption::Standard => shipping.standard_fee,
    }
}

/// Builds priced quotes from untrusted carts against the live catalog.
#[derive(Clone)]
pub struct QuoteService {
    db: Arc<DbPool>,
    shipping: ShippingConfig,
}

impl QuoteService {
    pub fn new(db: Arc<DbPool>, shipping: ShippingConfig) -> Self {
        Self { db, shipping }
    }

    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn build_quote(
        &self,
        lines: &[CartLine],
        delivery_option: DeliveryOption,
    ) -> Result<Quote, ServiceError> {
        self.build_quote_on(self.db.as_ref(), lines, delivery_option)
            .await
    }

    /// Same as [`build_quote`](Self::build_quote) but runs on the given
    /// connection, so the order creator can re-quote inside its transaction.
    pub async fn build_quote_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        lines: &[CartLine],
        delivery_option: DeliveryOption,
    ) -> Result<Quote, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let slugs: Vec<String> = lines
            .iter()
            .map(|line| line.slug.trim().to_string())
            .filter(|slug| !slug.is_empty())
            .collect();

        let products = product::Entity::find()
            .filter(product::Column::Slug.is_in(slugs))
            .filter(product::Column::IsPublished.eq(true))
            .all(conn)
            .await?;

        if products.is_empty() {
            return Err(ServiceError::ProductUnavailable(
                "Products are not available.".to_string(),
            ));
        }

        let by_slug: HashMap<&str, &product::Model> = products
            .iter()
            .map(|product| (product.slug.as_str(), product))
            .collect();

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            // Unknown or unpublished slugs are silently dropped: the client
            // cart may be stale, and a stale line is not the buyer's fault.
            let Some(db_product) = by_slug.get(line.slug.trim()) else {
                debug!(slug = %line.slug, "dropping stale cart line");
                continue;
            };

            let quantity = clamp_quantity(line.quantity);
            if db_product.stock <= 0 || quantity > db_product.stock {
                return Err(ServiceError::InsufficientStock(format!(
                    "{} is out of stock for requested quantity.",
                    db_product.name
                )));
            }

            let unit_price = db_product.price;
            items.push(QuoteLine {
                product_id: db_product.id,
                product_slug: db_product.slug.clone(),
                product_sku: db_product.sku.clone(),
                product_name: db_product.name.clone(),
                variant: line.variant.clone(),
                quantity,
                unit_price,
                total: unit_price * i64::from(quantity),
            });
        }

        if items.is_empty() {
            return Err(ServiceError::NoValidItems);
        }

        let subtotal: i64 = items.iter().map(|item| item.total).sum();
        let shipping_fee = pick_shipping_fee(subtotal, delivery_option, &self.shipping);

        Ok(Quote {
            items,
            subtotal,
            shipping_fee,
            total: subtotal + shipping_fee,
            delivery_option,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_is_clamped_into_range() {
        assert_eq!(clamp_quantity(None), 1);
        assert_eq!(clamp_quantity(Some(0)), 1);
        assert_eq!(clamp_quantity(Some(-3)), 1);
        assert_eq!(clamp_quantity(Some(7)), 7);
        assert_eq!(clamp_quantity(Some(500)), 20);
    }

    #[test]
    fn shipping_fee_schedule() {
        let shipping = ShippingConfig::default();
        // Below threshold: flat fee by delivery option
        assert_eq!(
            pick_shipping_fee(2000, DeliveryOption::Standard, &shipping),
            250
        );
        assert_eq!(
            pick_shipping_fee(2000, DeliveryOption::Express, &shipping),
            450
        );
        // At or above threshold: free, regardless of option
        assert_eq!(
            pick_shipping_fee(5000, DeliveryOption::Express, &shipping),
            0
        );
        assert_eq!(
            pick_shipping_fee(9999, DeliveryOption::Standard, &shipping),
            0
        );
    }
}

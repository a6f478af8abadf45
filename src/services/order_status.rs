use crate::db::DbPool;
use crate::entities::order::{self, FulfillmentStatus, PaymentMethod, PaymentStatus};
use crate::entities::order_status_history;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// How a payment update locates its order. Webhooks carry either the order
/// number (from provider metadata) or the provider's own reference.
#[derive(Clone, Debug)]
pub enum OrderRef {
    Id(Uuid),
    Number(String),
    PaymentReference(String),
}

#[derive(Clone, Debug, Default)]
pub struct PaymentUpdate {
    pub payment_status: Option<PaymentStatus>,
    pub payment_reference: Option<String>,
    pub payment_method: Option<PaymentMethod>,
}

/// Reconciles fulfillment and payment state after the fact: admin actions
/// and provider webhooks land here. Every write is conditional on the
/// version the caller read, so two concurrent updates cannot both apply:
/// the loser's update matches zero rows and surfaces as a conflict.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Sets the fulfillment status and tracking code. A history row is
    /// appended only when the status actually changes, so replaying the same
    /// update is a no-op on the audit trail. Returns the updated order, or
    /// `None` when the order does not exist.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: FulfillmentStatus,
        tracking_code: Option<String>,
    ) -> Result<Option<order::Model>, ServiceError> {
        let Some(current) = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(None);
        };
        self.apply_status_update(current, new_status, tracking_code)
            .await
    }

    /// Applies a status update against the row the caller read. The write is
    /// predicated on `current.version`: a concurrent writer bumps the
    /// version first, this update then matches no rows and the call fails
    /// with a conflict instead of losing the write or duplicating the
    /// history entry.
    pub async fn apply_status_update(
        &self,
        current: order::Model,
        new_status: FulfillmentStatus,
        tracking_code: Option<String>,
    ) -> Result<Option<order::Model>, ServiceError> {
        let order_id = current.id;
        let old_status = current.status;
        if !old_status.can_transition(&new_status) {
            return Err(ServiceError::Conflict(format!(
                "Cannot move order from {} to {}",
                old_status.as_str(),
                new_status.as_str()
            )));
        }
        if old_status != new_status && !old_status.is_forward_move(&new_status) {
            warn!(
                %order_id,
                from = old_status.as_str(),
                to = new_status.as_str(),
                "non-forward fulfillment move"
            );
        }

        let now = Utc::now();
        let changed = old_status != new_status;
        let expected_version = current.version;
        let tracking = tracking_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        let txn = self.db.begin().await?;

        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status.to_value()))
            .col_expr(order::Column::TrackingCode, Expr::value(tracking.clone()))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(order::Column::Version, Expr::value(expected_version + 1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(expected_version))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            return if order::Entity::find_by_id(order_id).one(&txn).await?.is_none() {
                Ok(None)
            } else {
                Err(ServiceError::Conflict(
                    "Order was updated concurrently; reload and retry.".to_string(),
                ))
            };
        }

        if changed {
            order_status_history::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                status: Set(new_status),
                note: Set("Updated by admin".to_string()),
                at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        if changed {
            info!(
                %order_id,
                from = old_status.as_str(),
                to = new_status.as_str(),
                "order status updated"
            );
            self.event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status,
                })
                .await;
        }

        let mut updated = current;
        updated.status = new_status;
        updated.tracking_code = tracking;
        updated.updated_at = now;
        updated.version = expected_version + 1;
        Ok(Some(updated))
    }

    /// Applies a payment update to whichever order the reference resolves
    /// to. `Ok(None)` means no such order; webhook handlers treat that as a
    /// harmless stray event, not an error.
    #[instrument(skip(self, update))]
    pub async fn update_payment(
        &self,
        order_ref: OrderRef,
        update: PaymentUpdate,
    ) -> Result<Option<order::Model>, ServiceError> {
        let found = match &order_ref {
            OrderRef::Id(id) => order::Entity::find_by_id(*id).one(self.db.as_ref()).await?,
            OrderRef::Number(number) => {
                let number = number.trim();
                if number.is_empty() {
                    return Ok(None);
                }
                order::Entity::find()
                    .filter(order::Column::OrderNumber.eq(number))
                    .one(self.db.as_ref())
                    .await?
            }
            OrderRef::PaymentReference(reference) => {
                let reference = reference.trim();
                if reference.is_empty() {
                    return Ok(None);
                }
                order::Entity::find()
                    .filter(order::Column::PaymentReference.eq(reference))
                    .one(self.db.as_ref())
                    .await?
            }
        };

        let Some(current) = found else {
            return Ok(None);
        };
        self.apply_payment_update(current, update).await
    }

    /// Version-guarded counterpart of [`update_payment`](Self::update_payment)
    /// for callers that already hold the row.
    pub async fn apply_payment_update(
        &self,
        current: order::Model,
        update: PaymentUpdate,
    ) -> Result<Option<order::Model>, ServiceError> {
        let Some(new_status) = update.payment_status else {
            return Err(ServiceError::ValidationError(
                "A payment status is required.".to_string(),
            ));
        };

        let order_id = current.id;
        let expected_version = current.version;
        let now = Utc::now();
        // A reference in the update wins; a blank one keeps what is stored.
        let reference = update
            .payment_reference
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .or_else(|| current.payment_reference.clone());

        let mut stmt = order::Entity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(new_status.to_value()),
            )
            .col_expr(
                order::Column::PaymentReference,
                Expr::value(reference.clone()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(order::Column::Version, Expr::value(expected_version + 1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(expected_version));
        if let Some(method) = update.payment_method {
            stmt = stmt.col_expr(order::Column::PaymentMethod, Expr::value(method.to_value()));
        }
        let result = stmt.exec(self.db.as_ref()).await?;

        if result.rows_affected == 0 {
            return if order::Entity::find_by_id(order_id)
                .one(self.db.as_ref())
                .await?
                .is_none()
            {
                Ok(None)
            } else {
                Err(ServiceError::Conflict(
                    "Order was updated concurrently; reload and retry.".to_string(),
                ))
            };
        }

        info!(
            %order_id,
            payment_status = new_status.as_str(),
            "payment state reconciled"
        );
        self.event_sender
            .send(Event::PaymentStatusChanged {
                order_id,
                payment_status: new_status,
                payment_reference: reference.clone(),
            })
            .await;

        let mut updated = current;
        updated.payment_status = new_status;
        updated.payment_reference = reference;
        if let Some(method) = update.payment_method {
            updated.payment_method = method;
        }
        updated.updated_at = now;
        updated.version = expected_version + 1;
        Ok(Some(updated))
    }
}
